//! Byte-stream device abstraction the protocol runs over.

use std::io;

/// Result of a single non-blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Number of bytes stored at the front of the buffer; zero when nothing is
    /// available yet
    Data(usize),
    /// No further data will ever arrive
    EndOfStream,
}

/// Raw byte transport, e.g. a serial port.
///
/// A device is used by one protocol call at a time; the `&mut` receivers make
/// callers serialize access.
pub trait Device {
    /// Read up to `buf.len()` bytes without blocking
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;

    /// Write all of `buf` or fail
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Release transport resources
    fn close(&mut self) -> io::Result<()>;
}

impl<D: Device + ?Sized> Device for &mut D {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}
