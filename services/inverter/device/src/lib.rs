//! Byte-stream devices for the P30 protocol.
//!
//! This crate provides the transports [`inverter_wire::P30Protocol`] runs
//! over: an in-memory scripted device for tests and dry runs, and a
//! serial-port device for real hardware (feature `serial`).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mem;
#[cfg(feature = "serial")]
pub mod serial;

pub use inverter_wire::{Device, ReadOutcome};
pub use mem::{MemoryDevice, WhenExhausted};
#[cfg(feature = "serial")]
pub use serial::{Parity, SerialDevice, SerialSettings};

use thiserror::Error;

/// Device setup errors
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Rejected device setting
    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    /// Serial port error
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
