//! Message digests for the P30 wire protocol.
//!
//! The protocol protects every frame with a CRC-16/XMODEM computed four bits
//! at a time. The two output bytes may never collide with bytes the framing
//! layer gives meaning to (line feed, carriage return and `(`), so each
//! reserved output byte is bumped by one before it goes on the wire.
//!
//! Digests are produced by a [`DigestFactory`] so the framing code never
//! names a concrete algorithm.

use crate::WireError;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Digest output; inline for anything up to eight bytes
pub type DigestBytes = SmallVec<[u8; 8]>;

/// Digest length of the V1 algorithm in bytes
pub const V1_DIGEST_LENGTH: usize = 2;

/// Bytes a digest may never contain on the wire
pub const RESERVED_BYTES: [u8; 3] = [0x0A, 0x0D, 0x28];

/// CRC-16/XMODEM (poly 0x1021) table for one nibble: `i << 12` run through
/// four shift/xor rounds.
const HALF_BYTE_CRC_TABLE: [u16; 16] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50A5, 0x60C6, 0x70E7, 0x8108, 0x9129, 0xA14A,
    0xB16B, 0xC18C, 0xD1AD, 0xE1CE, 0xF1EF,
];

/// Whether `b` must be escaped when it appears in a digest
pub fn is_reserved(b: u8) -> bool {
    RESERVED_BYTES.contains(&b)
}

/// Running checksum over a byte stream.
pub trait MessageDigest: Send {
    /// Return to the initial state
    fn reset(&mut self);

    /// Feed bytes in order
    fn update(&mut self, data: &[u8]);

    /// Length in bytes of [`MessageDigest::finalize`] output
    fn digest_length(&self) -> usize;

    /// Escaped digest of everything fed since the last reset.
    ///
    /// The running state is left untouched, so further `update` calls keep
    /// accumulating on top of it.
    fn finalize(&self) -> DigestBytes;

    /// Feed `length` bytes of `data` starting at `offset`
    fn update_range(&mut self, data: &[u8], offset: usize, length: usize) -> Result<(), WireError> {
        let range = offset
            .checked_add(length)
            .filter(|end| *end <= data.len())
            .map(|end| offset..end)
            .ok_or_else(|| {
                WireError::InvalidArgument(format!(
                    "range {}+{} outside input of {} bytes",
                    offset,
                    length,
                    data.len()
                ))
            })?;

        if length > 0 {
            self.update(&data[range]);
        }
        Ok(())
    }
}

/// Running 16-bit register shared by the V1 variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CrcRegister(u16);

impl CrcRegister {
    fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.push_nibble(b >> 4);
            self.push_nibble(b & 0x0F);
        }
    }

    fn push_nibble(&mut self, nibble: u8) {
        let idx = ((self.0 >> 12) as u8 ^ nibble) as usize;
        self.0 = HALF_BYTE_CRC_TABLE[idx] ^ (self.0 << 4);
    }
}

/// Escape each output byte on its own
fn escape_per_byte(crc: u16) -> [u8; 2] {
    let [mut hi, mut lo] = crc.to_be_bytes();
    if is_reserved(hi) {
        hi = hi.wrapping_add(1);
    }
    if is_reserved(lo) {
        lo = lo.wrapping_add(1);
    }
    [hi, lo]
}

/// Escape by adjusting the whole value: low byte first, then the high byte of
/// the adjusted value.
fn escape_whole_value(crc: u16) -> [u8; 2] {
    let mut crc = crc;
    if is_reserved(crc as u8) {
        crc = crc.wrapping_add(1);
    }
    if is_reserved((crc >> 8) as u8) {
        crc = crc.wrapping_add(256);
    }
    crc.to_be_bytes()
}

/// Voltronic modified CRC-16/XMODEM with per-byte escaping
#[derive(Debug, Clone, Default)]
pub struct V1Digest {
    crc: CrcRegister,
}

impl V1Digest {
    /// Create a digest in the reset state
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw register value, before escaping
    pub fn register(&self) -> u16 {
        self.crc.0
    }
}

impl MessageDigest for V1Digest {
    fn reset(&mut self) {
        self.crc = CrcRegister::default();
    }

    fn update(&mut self, data: &[u8]) {
        self.crc.update(data);
    }

    fn digest_length(&self) -> usize {
        V1_DIGEST_LENGTH
    }

    fn finalize(&self) -> DigestBytes {
        SmallVec::from_slice(&escape_per_byte(self.crc.0))
    }
}

/// The same CRC as [`V1Digest`], escaped the way older firmware tooling did:
/// by adding to the 16-bit value instead of to each byte.
#[derive(Debug, Clone, Default)]
pub struct V1LegacyDigest {
    crc: CrcRegister,
}

impl V1LegacyDigest {
    /// Create a digest in the reset state
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageDigest for V1LegacyDigest {
    fn reset(&mut self) {
        self.crc = CrcRegister::default();
    }

    fn update(&mut self, data: &[u8]) {
        self.crc.update(data);
    }

    fn digest_length(&self) -> usize {
        V1_DIGEST_LENGTH
    }

    fn finalize(&self) -> DigestBytes {
        SmallVec::from_slice(&escape_whole_value(self.crc.0))
    }
}

/// Built-in digest algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestAlgorithm {
    /// CRC-16/XMODEM, reserved output bytes incremented individually
    #[default]
    V1,
    /// CRC-16/XMODEM, reserved bytes corrected on the 16-bit value
    V1Legacy,
}

impl DigestAlgorithm {
    /// Factory producing fresh digests of this algorithm
    pub fn factory(self) -> DigestFactory {
        match self {
            DigestAlgorithm::V1 => DigestFactory::new(|| Box::new(V1Digest::new())),
            DigestAlgorithm::V1Legacy => DigestFactory::new(|| Box::new(V1LegacyDigest::new())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::V1 => write!(f, "v1"),
            DigestAlgorithm::V1Legacy => write!(f, "v1-legacy"),
        }
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Ok(DigestAlgorithm::V1),
            "v1-legacy" | "v1legacy" => Ok(DigestAlgorithm::V1Legacy),
            other => Err(WireError::InvalidArgument(format!(
                "unknown digest algorithm: {}",
                other
            ))),
        }
    }
}

/// Supplies a fresh digest instance per frame
#[derive(Clone)]
pub struct DigestFactory {
    make: Arc<dyn Fn() -> Box<dyn MessageDigest> + Send + Sync>,
}

impl DigestFactory {
    /// Wrap a constructor closure
    pub fn new<F>(make: F) -> Self
    where
        F: Fn() -> Box<dyn MessageDigest> + Send + Sync + 'static,
    {
        Self {
            make: Arc::new(make),
        }
    }

    /// Produce a digest in the reset state
    pub fn get(&self) -> Box<dyn MessageDigest> {
        (self.make)()
    }

    /// Check that produced digests are usable for framing
    pub(crate) fn validate(&self) -> Result<usize, WireError> {
        let digest = self.get();
        let digest_length = digest.digest_length();
        if digest_length == 0 {
            return Err(WireError::InvalidArgument(
                "digest length must be greater than zero".to_string(),
            ));
        }

        let produced = digest.finalize().len();
        if produced != digest_length {
            return Err(WireError::InvalidArgument(format!(
                "digest produced {} bytes but declares {}",
                produced, digest_length
            )));
        }

        Ok(digest_length)
    }
}

impl Default for DigestFactory {
    fn default() -> Self {
        DigestAlgorithm::V1.factory()
    }
}

impl fmt::Debug for DigestFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestFactory").finish_non_exhaustive()
    }
}
