//! Message framing for the wire protocol.
//!
//! A frame is the payload, the escaped digest of the payload, and a single
//! carriage return. Neither payload nor digest may contain the terminator, so
//! the reader only has to look for the first `0x0D`.

use crate::device::{Device, ReadOutcome};
use crate::digest::MessageDigest;
use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Frame terminator (carriage return)
pub const END_OF_INPUT: u8 = b'\r';

/// Initial read buffer capacity, capped by the configured maximum
pub const INITIAL_BUFFER_SIZE: usize = 128;

/// Wait between device polls when no input is available
pub const READ_INTERVAL: Duration = Duration::from_millis(50);

/// Assemble `payload ++ digest ++ terminator`, feeding the payload to `digest`
pub fn encode_frame(payload: &[u8], digest: &mut dyn MessageDigest) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + digest.digest_length() + 1);

    if !payload.is_empty() {
        digest.update(payload);
        buf.put_slice(payload);
    }

    buf.put_slice(&digest.finalize());
    buf.put_u8(END_OF_INPUT);

    buf.freeze()
}

/// Growable accumulation buffer for one read call.
///
/// `len <= capacity <= limit` always holds and capacity never shrinks.
#[derive(Debug)]
pub struct ReadBuffer {
    bytes: Vec<u8>,
    len: usize,
    limit: usize,
}

impl ReadBuffer {
    /// Create a buffer bounded by `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: vec![0; INITIAL_BUFFER_SIZE.min(limit)],
            len: 0,
            limit,
        }
    }

    /// Accumulated bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been accumulated
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current capacity
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Whether no spare capacity remains
    pub fn is_full(&self) -> bool {
        self.len == self.bytes.len()
    }

    /// Double the capacity, capped at the limit
    pub fn grow(&mut self) -> Result<(), WireError> {
        let capacity = self.bytes.len();
        let new_capacity = capacity.saturating_mul(2).min(self.limit);
        if new_capacity <= capacity {
            return Err(WireError::BufferOverflow { limit: self.limit });
        }

        self.bytes.resize(new_capacity, 0);
        debug!("read buffer grown from {} to {} bytes", capacity, new_capacity);
        Ok(())
    }

    /// Unfilled tail the device reads into
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.len..]
    }

    /// Accept `n` bytes just written into [`ReadBuffer::spare_mut`].
    ///
    /// Returns the frame length when a terminator is among them. The
    /// terminator and anything after it are dropped.
    pub fn commit(&mut self, n: usize) -> Result<Option<usize>, WireError> {
        let start = self.len;
        let end = start
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                WireError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "device reported {} bytes read into {} bytes of space",
                        n,
                        self.bytes.len() - start
                    ),
                ))
            })?;

        trace!("received {:02X?}", &self.bytes[start..end]);

        match self.bytes[start..end].iter().position(|&b| b == END_OF_INPUT) {
            Some(pos) => {
                let frame_len = start + pos;
                let discarded = n - pos - 1;
                if discarded > 0 {
                    debug!("discarding {} bytes received after terminator", discarded);
                }
                self.len = frame_len;
                Ok(Some(frame_len))
            }
            None => {
                self.len = end;
                Ok(None)
            }
        }
    }

    /// Accumulated bytes, terminator excluded
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bytes.truncate(self.len);
        self.bytes
    }
}

/// Poll `device` until a terminator arrives, returning payload and digest.
///
/// The deadline is fixed on entry. Between empty polls the task sleeps for
/// [`READ_INTERVAL`]; if `cancel` flips to `true` during that wait the read
/// ends with [`WireError::Interrupted`].
pub async fn read_frame<D: Device + ?Sized>(
    device: &mut D,
    limit: usize,
    timeout: Duration,
    mut cancel: Option<&mut watch::Receiver<bool>>,
) -> Result<Vec<u8>, WireError> {
    let mut buffer = ReadBuffer::new(limit);
    let deadline = Instant::now().checked_add(timeout);

    loop {
        let bytes_read = match device.read(buffer.spare_mut())? {
            ReadOutcome::EndOfStream => {
                return Err(WireError::EndOfStream {
                    bytes_transferred: buffer.len(),
                });
            }
            ReadOutcome::Data(n) => n,
        };

        if bytes_read > 0 {
            if let Some(frame_len) = buffer.commit(bytes_read)? {
                debug!("frame of {} bytes received", frame_len);
                return Ok(buffer.into_bytes());
            }
            // A full buffer overflows even when the deadline has also passed.
            if buffer.is_full() {
                buffer.grow()?;
            }
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(WireError::Timeout { timeout });
        }

        if bytes_read == 0 {
            tokio::select! {
                _ = tokio::time::sleep(READ_INTERVAL) => {}
                _ = cancelled(cancel.as_deref_mut()) => {
                    debug!("read cancelled after {} bytes", buffer.len());
                    return Err(WireError::Interrupted {
                        bytes_transferred: buffer.len(),
                    });
                }
            }
        }
    }
}

/// Resolve once the flag reads `true`; never if there is no flag or its
/// sender is gone
async fn cancelled(cancel: Option<&mut watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}
