//! In-memory device for development and testing

use crate::{Device, ReadOutcome};
use bytes::{Bytes, BytesMut};
use std::io;
use tracing::debug;

/// What a [`MemoryDevice`] reports once its input is used up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WhenExhausted {
    /// Report that nothing is available yet
    #[default]
    Idle,
    /// Report end of stream
    EndOfStream,
}

/// Scripted device: serves preset input and captures everything written
#[derive(Debug, Default)]
pub struct MemoryDevice {
    input: Bytes,
    position: usize,
    chunk_size: usize,
    idle_polls: usize,
    idle_remaining: usize,
    when_exhausted: WhenExhausted,
    output: BytesMut,
    closed: bool,
}

impl MemoryDevice {
    /// Create a device with no input
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device serving `input`
    pub fn with_input(input: impl Into<Bytes>) -> Self {
        let mut device = Self::new();
        device.set_input(input);
        device
    }

    /// Replace the pending input
    pub fn set_input(&mut self, input: impl Into<Bytes>) {
        self.input = input.into();
        self.position = 0;
        self.idle_remaining = self.idle_polls;
    }

    /// Cap the bytes returned by a single read; zero removes the cap
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size;
    }

    /// Report "nothing available" this many times before each chunk
    pub fn set_idle_polls(&mut self, idle_polls: usize) {
        self.idle_polls = idle_polls;
        self.idle_remaining = idle_polls;
    }

    /// Behaviour once the input is used up
    pub fn set_when_exhausted(&mut self, when_exhausted: WhenExhausted) {
        self.when_exhausted = when_exhausted;
    }

    /// Input not yet read
    pub fn remaining_input(&self) -> &[u8] {
        &self.input[self.position..]
    }

    /// Everything written so far
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Take the captured output, leaving it empty
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    /// Serve the captured output as the next input
    pub fn loop_back(&mut self) {
        let output = self.take_output();
        self.set_input(output);
    }

    /// Whether [`Device::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "memory device is closed",
            ));
        }
        Ok(())
    }
}

impl Device for MemoryDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        self.ensure_open()?;

        let remaining = self.input.len() - self.position;
        if remaining == 0 {
            return Ok(match self.when_exhausted {
                WhenExhausted::Idle => ReadOutcome::Data(0),
                WhenExhausted::EndOfStream => ReadOutcome::EndOfStream,
            });
        }

        if self.idle_remaining > 0 {
            self.idle_remaining -= 1;
            return Ok(ReadOutcome::Data(0));
        }
        self.idle_remaining = self.idle_polls;

        let mut n = remaining.min(buf.len());
        if self.chunk_size > 0 {
            n = n.min(self.chunk_size);
        }

        buf[..n].copy_from_slice(&self.input[self.position..self.position + n]);
        self.position += n;
        Ok(ReadOutcome::Data(n))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        self.output.extend_from_slice(buf);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        debug!(
            "closing memory device with {} unread bytes",
            self.input.len() - self.position
        );
        self.closed = true;
        Ok(())
    }
}
