// Opaque byte buffers
// Byte length is exact: no text encoding is applied unless asked for

use std::fmt;
use std::rc::Rc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RawError {
    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("invalid hex at offset {offset}")]
    Hex { offset: usize },

    #[error("bytes are not valid UTF-8")]
    Utf8,
}

/// Raw byte sequence, shared until written to.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Raw(Rc<Vec<u8>>);

impl Raw {
    pub fn new(bytes: Vec<u8>) -> Self {
        Raw(Rc::new(bytes))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mutable access, cloning the buffer first if it is shared.
    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        Rc::make_mut(&mut self.0)
    }

    /// A buffer that shares nothing with `self`.
    pub fn deep_copy(&self) -> Raw {
        Raw::new(self.0.as_ref().clone())
    }

    pub fn concat(&self, other: &[u8]) -> Raw {
        let mut bytes = Vec::with_capacity(self.len() + other.len());
        bytes.extend_from_slice(self.as_bytes());
        bytes.extend_from_slice(other);
        Raw::new(bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.as_bytes())
    }

    pub fn from_base64(text: &str) -> Result<Raw, RawError> {
        BASE64
            .decode(text.trim())
            .map(Raw::new)
            .map_err(|e| RawError::Base64(e.to_string()))
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(self.len() * 2);
        for byte in self.as_bytes() {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    pub fn from_hex(text: &str) -> Result<Raw, RawError> {
        let text = text.trim();
        if text.len() % 2 != 0 {
            return Err(RawError::Hex { offset: text.len() });
        }
        let mut bytes = Vec::with_capacity(text.len() / 2);
        for offset in (0..text.len()).step_by(2) {
            let pair = text
                .get(offset..offset + 2)
                .filter(|pair| pair.bytes().all(|b| b.is_ascii_hexdigit()))
                .ok_or(RawError::Hex { offset })?;
            let byte = u8::from_str_radix(pair, 16).map_err(|_| RawError::Hex { offset })?;
            bytes.push(byte);
        }
        Ok(Raw::new(bytes))
    }

    pub fn to_utf8(&self) -> Result<String, RawError> {
        String::from_utf8(self.0.as_ref().clone()).map_err(|_| RawError::Utf8)
    }
}

impl From<Vec<u8>> for Raw {
    fn from(bytes: Vec<u8>) -> Self {
        Raw::new(bytes)
    }
}

impl From<&[u8]> for Raw {
    fn from(bytes: &[u8]) -> Self {
        Raw::new(bytes.to_vec())
    }
}

impl From<&str> for Raw {
    fn from(text: &str) -> Self {
        Raw::new(text.as_bytes().to_vec())
    }
}

impl fmt::Debug for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Raw({} bytes)", self.len())
    }
}

impl fmt::Display for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"{}\"", self.to_base64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64() {
        let raw = Raw::from("hello");
        assert_eq!(raw.to_base64(), "aGVsbG8=");
        assert_eq!(Raw::from_base64("aGVsbG8=").unwrap(), raw);
        assert!(Raw::from_base64("***").is_err());
    }

    #[test]
    fn test_hex() {
        let raw = Raw::new(vec![0x00, 0xff, 0x10]);
        assert_eq!(raw.to_hex(), "00ff10");
        assert_eq!(Raw::from_hex("00FF10").unwrap(), raw);
        assert_eq!(Raw::from_hex("0"), Err(RawError::Hex { offset: 1 }));
        assert_eq!(Raw::from_hex("zz"), Err(RawError::Hex { offset: 0 }));
        assert_eq!(Raw::from_hex("+f+f"), Err(RawError::Hex { offset: 0 }));
        assert_eq!(Raw::from_hex("00-1"), Err(RawError::Hex { offset: 2 }));
    }

    #[test]
    fn test_length_is_exact() {
        let raw = Raw::new(vec![0xc3, 0xa9]);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.to_utf8().unwrap(), "é");
        assert_eq!(Raw::new(vec![0xff]).to_utf8(), Err(RawError::Utf8));
    }

    #[test]
    fn test_copy_on_write() {
        let original = Raw::from("ab");
        let mut copy = original.clone();
        copy.bytes_mut().push(b'c');
        assert_eq!(original.as_bytes(), b"ab");
        assert_eq!(copy.as_bytes(), b"abc");
    }
}
