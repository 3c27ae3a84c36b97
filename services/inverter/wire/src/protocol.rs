//! The P30 request/response protocol.
//!
//! [`P30Protocol`] writes commands as framed, digest-protected text and reads
//! responses back, verifying the digest before decoding the payload.

use crate::device::Device;
use crate::digest::{DigestAlgorithm, DigestFactory};
use crate::encoding::TextEncoding;
use crate::frame::{encode_frame, read_frame};
use crate::WireError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Default maximum response size (8 KiB)
pub const DEFAULT_MAXIMUM_BUFFER_SIZE: usize = 8 * 1024;

/// Largest accepted maximum buffer size; keeps sizes within a 16-bit domain
pub const MAXIMUM_BUFFER_SIZE_CEILING: usize = u16::MAX as usize;

/// Protocol settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest frame accepted by `read`, terminator included
    pub maximum_buffer_size: usize,
    /// Whether `read` checks the received digest
    pub verify_digest: bool,
    /// Digest algorithm used for both directions
    pub digest_algorithm: DigestAlgorithm,
    /// Payload text encoding
    pub text_encoding: TextEncoding,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            maximum_buffer_size: DEFAULT_MAXIMUM_BUFFER_SIZE,
            verify_digest: true,
            digest_algorithm: DigestAlgorithm::V1,
            text_encoding: TextEncoding::Ascii,
        }
    }
}

impl ProtocolConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WireError> {
        check_maximum_buffer_size(self.maximum_buffer_size)
    }
}

fn check_maximum_buffer_size(size: usize) -> Result<(), WireError> {
    if size == 0 {
        return Err(WireError::InvalidArgument(
            "maximum buffer size must be greater than zero".to_string(),
        ));
    }
    if size > MAXIMUM_BUFFER_SIZE_CEILING {
        return Err(WireError::InvalidArgument(format!(
            "maximum buffer size {} exceeds {}",
            size, MAXIMUM_BUFFER_SIZE_CEILING
        )));
    }
    Ok(())
}

/// P30 protocol codec
#[derive(Debug, Clone)]
pub struct P30Protocol {
    digests: DigestFactory,
    digest_length: usize,
    text_encoding: TextEncoding,
    maximum_buffer_size: usize,
    verify_digest: bool,
}

impl P30Protocol {
    /// Protocol with the V1 digest, US-ASCII payloads, an 8 KiB limit and
    /// digest verification on
    pub fn new() -> Self {
        Self {
            digests: DigestFactory::default(),
            digest_length: crate::digest::V1_DIGEST_LENGTH,
            text_encoding: TextEncoding::Ascii,
            maximum_buffer_size: DEFAULT_MAXIMUM_BUFFER_SIZE,
            verify_digest: true,
        }
    }

    /// Build a protocol from a configuration
    pub fn from_config(config: &ProtocolConfig) -> Result<Self, WireError> {
        Self::builder()
            .digest_algorithm(config.digest_algorithm)
            .text_encoding(config.text_encoding)
            .maximum_buffer_size(config.maximum_buffer_size)
            .verify_digest(config.verify_digest)
            .build()
    }

    /// Start building a protocol with custom parts
    pub fn builder() -> P30ProtocolBuilder {
        P30ProtocolBuilder::new()
    }

    /// Set the largest accepted frame; rejected values leave the limit as is
    pub fn set_maximum_buffer_size(&mut self, size: usize) -> Result<(), WireError> {
        check_maximum_buffer_size(size)?;
        self.maximum_buffer_size = size;
        Ok(())
    }

    /// Enable or disable digest verification on read
    pub fn set_verify_digest(&mut self, verify_digest: bool) {
        self.verify_digest = verify_digest;
    }

    /// Largest accepted frame
    pub fn maximum_buffer_size(&self) -> usize {
        self.maximum_buffer_size
    }

    /// Whether digests are verified on read
    pub fn verify_digest(&self) -> bool {
        self.verify_digest
    }

    /// Payload text encoding
    pub fn text_encoding(&self) -> TextEncoding {
        self.text_encoding
    }

    /// Digest length of the configured algorithm
    pub fn digest_length(&self) -> usize {
        self.digest_length
    }

    /// Frame `text` and hand it to the device in a single write
    pub fn write<D: Device + ?Sized>(&self, device: &mut D, text: &str) -> Result<(), WireError> {
        let payload = self.text_encoding.encode(text)?;
        let mut digest = self.digests.get();
        let frame = encode_frame(&payload, digest.as_mut());

        debug!("writing frame of {} bytes", frame.len());
        device.write(&frame)?;
        Ok(())
    }

    /// Read one response, waiting at most `timeout` for its terminator
    pub async fn read<D: Device + ?Sized>(
        &self,
        device: &mut D,
        timeout: Duration,
    ) -> Result<String, WireError> {
        let frame = read_frame(device, self.maximum_buffer_size, timeout, None).await?;
        self.decode_frame(&frame)
    }

    /// Like [`P30Protocol::read`], ending with [`WireError::Interrupted`] once
    /// `cancel` reads `true`.
    ///
    /// The flag is only observed; it stays set for the caller.
    pub async fn read_with_cancel<D: Device + ?Sized>(
        &self,
        device: &mut D,
        timeout: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<String, WireError> {
        let frame = read_frame(device, self.maximum_buffer_size, timeout, Some(cancel)).await?;
        self.decode_frame(&frame)
    }

    /// Write `command` and read the response
    pub async fn query<D: Device + ?Sized>(
        &self,
        device: &mut D,
        command: &str,
        timeout: Duration,
    ) -> Result<String, WireError> {
        self.write(device, command)?;
        self.read(device, timeout).await
    }

    /// Check and decode a received frame (payload and digest, no terminator)
    pub fn decode_frame(&self, frame: &[u8]) -> Result<String, WireError> {
        let mut digest = self.digests.get();
        let digest_length = digest.digest_length();

        let data_length =
            frame
                .len()
                .checked_sub(digest_length)
                .ok_or(WireError::TruncatedData {
                    expected: digest_length + 1,
                    received: frame.len() + 1,
                })?;
        let (payload, received) = frame.split_at(data_length);

        if self.verify_digest {
            digest.update(payload);
            let calculated = digest.finalize();
            if !digests_equal(&calculated, received) {
                warn!(
                    "digest mismatch: received {:02X?}, calculated {:02X?}",
                    received,
                    calculated.as_slice()
                );
                return Err(WireError::DigestMismatch {
                    received: received.to_vec(),
                    calculated: calculated.to_vec(),
                });
            }
        }

        Ok(self.text_encoding.decode(payload))
    }
}

impl Default for P30Protocol {
    fn default() -> Self {
        Self::new()
    }
}

/// Compare every byte regardless of where the first difference is
fn digests_equal(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Builder for [`P30Protocol`]
#[derive(Debug, Default)]
pub struct P30ProtocolBuilder {
    config: ProtocolConfig,
    digests: Option<DigestFactory>,
}

impl P30ProtocolBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a built-in digest algorithm
    pub fn digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.config.digest_algorithm = algorithm;
        self.digests = None;
        self
    }

    /// Use a custom digest factory
    pub fn digest_factory(mut self, factory: DigestFactory) -> Self {
        self.digests = Some(factory);
        self
    }

    /// Set the payload text encoding
    pub fn text_encoding(mut self, encoding: TextEncoding) -> Self {
        self.config.text_encoding = encoding;
        self
    }

    /// Set the largest accepted frame
    pub fn maximum_buffer_size(mut self, size: usize) -> Self {
        self.config.maximum_buffer_size = size;
        self
    }

    /// Enable or disable digest verification
    pub fn verify_digest(mut self, verify_digest: bool) -> Self {
        self.config.verify_digest = verify_digest;
        self
    }

    /// Validate settings and digest factory
    pub fn build(self) -> Result<P30Protocol, WireError> {
        self.config.validate()?;

        let digests = self
            .digests
            .unwrap_or_else(|| self.config.digest_algorithm.factory());
        let digest_length = digests.validate()?;

        Ok(P30Protocol {
            digests,
            digest_length,
            text_encoding: self.config.text_encoding,
            maximum_buffer_size: self.config.maximum_buffer_size,
            verify_digest: self.config.verify_digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ReadOutcome;
    use crate::digest::{DigestBytes, MessageDigest};
    use smallvec::SmallVec;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Digest with a fixed output that records what it was fed
    #[derive(Clone)]
    struct FixedDigest {
        output: Vec<u8>,
        fed: Arc<Mutex<Vec<u8>>>,
    }

    impl MessageDigest for FixedDigest {
        fn reset(&mut self) {
            self.fed.lock().unwrap().clear();
        }

        fn update(&mut self, data: &[u8]) {
            self.fed.lock().unwrap().extend_from_slice(data);
        }

        fn digest_length(&self) -> usize {
            self.output.len()
        }

        fn finalize(&self) -> DigestBytes {
            SmallVec::from_slice(&self.output)
        }
    }

    fn fixed_digest() -> (DigestFactory, Arc<Mutex<Vec<u8>>>) {
        let fed = Arc::new(Mutex::new(Vec::new()));
        let digest = FixedDigest {
            output: vec![0x01, 0x02, 0x03, 0x04],
            fed: fed.clone(),
        };
        (
            DigestFactory::new(move || Box::new(digest.clone())),
            fed,
        )
    }

    /// Serves a fixed input once, then signals end of stream
    #[derive(Default)]
    struct BufferDevice {
        input: Vec<u8>,
        position: usize,
        output: Vec<u8>,
        writes: usize,
    }

    impl Device for BufferDevice {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
            let remaining = &self.input[self.position..];
            if remaining.is_empty() {
                return Ok(ReadOutcome::EndOfStream);
            }
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.position += n;
            Ok(ReadOutcome::Data(n))
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<()> {
            self.output.extend_from_slice(buf);
            self.writes += 1;
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn protocol_with_fixed_digest() -> (P30Protocol, Arc<Mutex<Vec<u8>>>) {
        let (factory, fed) = fixed_digest();
        let protocol = P30Protocol::builder()
            .digest_factory(factory)
            .maximum_buffer_size(32)
            .build()
            .unwrap();
        (protocol, fed)
    }

    #[test]
    fn test_default_protocol_writes() {
        let mut device = BufferDevice::default();
        P30Protocol::new().write(&mut device, "Hello").unwrap();
        assert_eq!(device.output, b"Hello\xCB\xD6\r".to_vec());
    }

    #[test]
    fn test_maximum_buffer_size_limits() {
        let mut protocol = P30Protocol::new();
        assert!(protocol.set_maximum_buffer_size(0).is_err());
        assert!(protocol
            .set_maximum_buffer_size(MAXIMUM_BUFFER_SIZE_CEILING + 1)
            .is_err());
        assert_eq!(protocol.maximum_buffer_size(), DEFAULT_MAXIMUM_BUFFER_SIZE);

        protocol.set_maximum_buffer_size(1).unwrap();
        assert_eq!(protocol.maximum_buffer_size(), 1);
        protocol
            .set_maximum_buffer_size(MAXIMUM_BUFFER_SIZE_CEILING)
            .unwrap();
        assert_eq!(protocol.maximum_buffer_size(), 65535);
    }

    #[test]
    fn test_writes_empty() {
        let (protocol, fed) = protocol_with_fixed_digest();
        let mut device = BufferDevice::default();

        protocol.write(&mut device, "").unwrap();

        assert!(fed.lock().unwrap().is_empty());
        assert_eq!(device.output, vec![0x01, 0x02, 0x03, 0x04, b'\r']);
        assert_eq!(device.writes, 1);
    }

    #[test]
    fn test_writes_not_empty() {
        let (protocol, fed) = protocol_with_fixed_digest();
        let mut device = BufferDevice::default();

        protocol.write(&mut device, "Hello world").unwrap();

        assert_eq!(*fed.lock().unwrap(), b"Hello world".to_vec());
        assert_eq!(device.output, b"Hello world\x01\x02\x03\x04\r".to_vec());
        assert_eq!(device.writes, 1);
    }

    #[test]
    fn test_write_rejects_unencodable_text() {
        let mut device = BufferDevice::default();
        let err = P30Protocol::new().write(&mut device, "QPIGS\u{2022}").unwrap_err();
        assert!(matches!(err, WireError::InvalidArgument(_)));
        assert!(device.output.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_response() {
        let (protocol, _) = protocol_with_fixed_digest();
        let mut device = BufferDevice {
            input: vec![0x00, 0x00, 0x00, b'\r'],
            ..Default::default()
        };

        let err = protocol
            .read(&mut device, Duration::from_secs(60))
            .await
            .unwrap_err();

        match &err {
            WireError::TruncatedData { expected, received } => {
                assert_eq!(*expected, 5);
                assert_eq!(*received, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "Expected at least 5 bytes but received 4 bytes"
        );
    }

    #[tokio::test]
    async fn test_digest_mismatch() {
        let (protocol, fed) = protocol_with_fixed_digest();
        let mut device = BufferDevice {
            input: b"Hi\x09\x08\x07\x06\r".to_vec(),
            ..Default::default()
        };

        let err = protocol
            .read(&mut device, Duration::from_secs(60))
            .await
            .unwrap_err();

        match &err {
            WireError::DigestMismatch {
                received,
                calculated,
            } => {
                assert_eq!(received, &vec![0x09, 0x08, 0x07, 0x06]);
                assert_eq!(calculated, &vec![0x01, 0x02, 0x03, 0x04]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*fed.lock().unwrap(), b"Hi".to_vec());
        assert_eq!(
            err.to_string(),
            "Digest received [0x09,0x08,0x07,0x06] != [0x01,0x02,0x03,0x04] calculated"
        );
    }

    #[tokio::test]
    async fn test_digest_mismatch_ignored_when_disabled() {
        let (mut protocol, _) = protocol_with_fixed_digest();
        protocol.set_verify_digest(false);
        let mut device = BufferDevice {
            input: b"Hi\x09\x08\x07\x06\r".to_vec(),
            ..Default::default()
        };

        let received = protocol
            .read(&mut device, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(received, "Hi");
    }

    #[tokio::test]
    async fn test_buffer_overflow() {
        let (mut protocol, _) = protocol_with_fixed_digest();
        let mut input = b"The quick brown fox jumps over the lazy dog".to_vec();
        input.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, b'\r']);
        let limit = input.len() - 1;
        protocol.set_maximum_buffer_size(limit).unwrap();
        let mut device = BufferDevice {
            input,
            ..Default::default()
        };

        let err = protocol
            .read(&mut device, Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, WireError::BufferOverflow { limit: l } if l == limit));
        assert_eq!(err.to_string(), format!("Limit of {} bytes reached", limit));
    }

    #[tokio::test]
    async fn test_frame_exactly_at_limit() {
        let protocol = P30Protocol::builder()
            .maximum_buffer_size(8)
            .build()
            .unwrap();
        let mut device = BufferDevice {
            input: b"QPIGS\xB7\xA9\r".to_vec(),
            ..Default::default()
        };

        let received = protocol
            .read(&mut device, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(received, "QPIGS");
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let protocol = P30Protocol::new();
        let mut device = BufferDevice {
            input: b"(NAK\x73\x73\r".to_vec(),
            ..Default::default()
        };

        let received = protocol
            .query(&mut device, "QPIGS", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(device.output, b"QPIGS\xB7\xA9\r".to_vec());
        assert_eq!(received, "(NAK");
    }

    #[test]
    fn test_builder_rejects_zero_length_digest() {
        let factory = DigestFactory::new(|| {
            Box::new(FixedDigest {
                output: vec![],
                fed: Arc::default(),
            })
        });
        assert!(matches!(
            P30Protocol::builder().digest_factory(factory).build(),
            Err(WireError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_builder_rejects_inconsistent_digest() {
        struct Liar;

        impl MessageDigest for Liar {
            fn reset(&mut self) {}
            fn update(&mut self, _data: &[u8]) {}
            fn digest_length(&self) -> usize {
                4
            }
            fn finalize(&self) -> DigestBytes {
                SmallVec::from_slice(&[0, 0])
            }
        }

        let factory = DigestFactory::new(|| Box::new(Liar));
        assert!(matches!(
            P30Protocol::builder().digest_factory(factory).build(),
            Err(WireError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_builder_rejects_bad_buffer_size() {
        assert!(P30Protocol::builder().maximum_buffer_size(0).build().is_err());
        assert!(P30Protocol::builder()
            .maximum_buffer_size(70_000)
            .build()
            .is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let config: ProtocolConfig = serde_yaml::from_str(
            "maximum_buffer_size: 1024\nverify_digest: false\ndigest_algorithm: v1-legacy\ntext_encoding: latin1\n",
        )
        .unwrap();

        assert_eq!(config.maximum_buffer_size, 1024);
        assert!(!config.verify_digest);
        assert_eq!(config.digest_algorithm, DigestAlgorithm::V1Legacy);
        assert_eq!(config.text_encoding, TextEncoding::Latin1);

        let protocol = P30Protocol::from_config(&config).unwrap();
        assert_eq!(protocol.maximum_buffer_size(), 1024);
        assert!(!protocol.verify_digest());
        assert_eq!(protocol.text_encoding(), TextEncoding::Latin1);
        assert_eq!(protocol.digest_length(), 2);
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: ProtocolConfig = serde_yaml::from_str("verify_digest: false\n").unwrap();
        assert_eq!(config.maximum_buffer_size, DEFAULT_MAXIMUM_BUFFER_SIZE);
        assert_eq!(config.digest_algorithm, DigestAlgorithm::V1);
    }

    #[test]
    fn test_digests_equal() {
        assert!(digests_equal(&[1, 2], &[1, 2]));
        assert!(!digests_equal(&[1, 2], &[1, 3]));
        assert!(!digests_equal(&[1, 2], &[1, 2, 3]));
        assert!(digests_equal(&[], &[]));
    }
}
