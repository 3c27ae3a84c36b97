//! Single-byte text encodings for frame payloads.

use crate::WireError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Text encoding applied to frame payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TextEncoding {
    /// 7-bit US-ASCII; bytes above 0x7F decode to U+FFFD
    #[default]
    Ascii,
    /// ISO-8859-1, every byte maps to the code point of the same value
    Latin1,
}

impl TextEncoding {
    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Ascii => "US-ASCII",
            TextEncoding::Latin1 => "ISO-8859-1",
        }
    }

    /// Encode `text` with one byte per character.
    ///
    /// Characters outside the encoding are rejected rather than replaced so a
    /// command never goes out altered.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, WireError> {
        let limit = match self {
            TextEncoding::Ascii => 0x7F,
            TextEncoding::Latin1 => 0xFF,
        };

        text.chars()
            .enumerate()
            .map(|(idx, ch)| {
                let code = ch as u32;
                if code <= limit {
                    Ok(code as u8)
                } else {
                    Err(WireError::InvalidArgument(format!(
                        "character {:?} at position {} is not representable in {}",
                        ch,
                        idx,
                        self.name()
                    )))
                }
            })
            .collect()
    }

    /// Decode payload bytes
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        b as char
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US-ASCII" | "ASCII" | "US_ASCII" => Ok(TextEncoding::Ascii),
            "ISO-8859-1" | "ISO_8859_1" | "LATIN1" | "LATIN-1" => Ok(TextEncoding::Latin1),
            _ => Err(WireError::UnsupportedEncoding(s.to_string())),
        }
    }
}

impl TryFrom<String> for TextEncoding {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TextEncoding> for String {
    fn from(value: TextEncoding) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("US-ASCII".parse::<TextEncoding>().unwrap(), TextEncoding::Ascii);
        assert_eq!("ascii".parse::<TextEncoding>().unwrap(), TextEncoding::Ascii);
        assert_eq!("latin1".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        assert!(matches!(
            "UTF-16".parse::<TextEncoding>(),
            Err(WireError::UnsupportedEncoding(name)) if name == "UTF-16"
        ));
    }

    #[test]
    fn test_ascii_encode() {
        assert_eq!(TextEncoding::Ascii.encode("QPIGS").unwrap(), b"QPIGS".to_vec());
        assert_eq!(TextEncoding::Ascii.encode("").unwrap(), Vec::<u8>::new());
        assert!(matches!(
            TextEncoding::Ascii.encode("caf\u{e9}"),
            Err(WireError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_latin1_encode() {
        assert_eq!(TextEncoding::Latin1.encode("caf\u{e9}").unwrap(), vec![b'c', b'a', b'f', 0xE9]);
        assert!(TextEncoding::Latin1.encode("\u{20ac}").is_err());
    }

    #[test]
    fn test_decode() {
        assert_eq!(TextEncoding::Ascii.decode(b"(230.0"), "(230.0");
        assert_eq!(TextEncoding::Ascii.decode(&[b'A', 0xE9]), "A\u{fffd}");
        assert_eq!(TextEncoding::Latin1.decode(&[b'A', 0xE9]), "A\u{e9}");
    }

    #[test]
    fn test_serde_by_name() {
        let enc: TextEncoding = serde_yaml::from_str("ISO-8859-1").unwrap();
        assert_eq!(enc, TextEncoding::Latin1);
        assert!(serde_yaml::from_str::<TextEncoding>("EBCDIC").is_err());
    }
}
