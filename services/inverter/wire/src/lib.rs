//! P30 wire protocol for Voltronic inverters.
//!
//! This crate implements the framed, digest-verified request/response protocol
//! spoken by Voltronic-family inverters and UPS units over a serial line:
//! the CRC digest with reserved-byte escaping, the terminator-delimited frame
//! reader and writer, and the [`P30Protocol`] facade tying them to a
//! [`Device`].
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | payload              | ASCII text (0..N)          |
//! +----------------------+----------------------------+
//! | digest               | 2 bytes, big-endian,       |
//! |                      | reserved bytes escaped     |
//! +----------------------+----------------------------+
//! | terminator           | 0x0D                       |
//! +----------------------+----------------------------+
//! ```
//!
//! There is no length prefix; the first carriage return ends the frame.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod digest;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod protocol;

// Re-export main types
pub use device::{Device, ReadOutcome};
pub use digest::{
    is_reserved, DigestAlgorithm, DigestBytes, DigestFactory, MessageDigest, V1Digest,
    V1LegacyDigest, RESERVED_BYTES, V1_DIGEST_LENGTH,
};
pub use encoding::TextEncoding;
pub use error::WireError;
pub use frame::{encode_frame, read_frame, ReadBuffer, END_OF_INPUT, INITIAL_BUFFER_SIZE, READ_INTERVAL};
pub use protocol::{
    P30Protocol, P30ProtocolBuilder, ProtocolConfig, DEFAULT_MAXIMUM_BUFFER_SIZE,
    MAXIMUM_BUFFER_SIZE_CEILING,
};
