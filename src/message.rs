//! Byte containers for packet payloads.
//!
//! This module implements the [`Message`] container and the Base64 codec
//! used when packet contents cross an external boundary.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::{fmt::Display, sync::Arc};
use thiserror::Error as ThisError;

/// An immutable byte sequence exchanged over a connection.
///
/// Whatever callers hand to [`send`](crate::Connection::send) is
/// canonicalized into a `Message` first: strings, byte slices, byte arrays,
/// and byte vectors all convert into the same representation. The contents
/// are shared, so a message can be queued and redelivered without copying.
///
/// # Examples
///
/// ```
/// # use vatnet::Message;
/// assert_eq!(Message::new("bytes"), Message::new(b"bytes".to_vec()));
/// ```
#[derive(Debug, Clone)]
pub struct Message {
    bytes: Arc<[u8]>,
}

impl Message {
    /// Creates a new message with the given contents.
    pub fn new(data: impl Into<Self>) -> Self {
        data.into()
    }

    /// The length of the message in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the message contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The message contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Returns an iterator over the bytes of the message.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.bytes.iter().copied()
    }

    /// Encodes the contents as RFC 4648 standard Base64 for crossing an
    /// external boundary.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Decodes an RFC 4648 standard Base64 string back into a message.
    ///
    /// # Examples
    ///
    /// ```
    /// # use vatnet::Message;
    /// let message = Message::new("hello");
    /// assert_eq!(Message::from_base64(&message.to_base64()).unwrap(), message);
    /// ```
    pub fn from_base64(encoded: &str) -> Result<Self, Base64Error> {
        let bytes = STANDARD.decode(encoded).map_err(Base64Error)?;
        Ok(Self {
            bytes: bytes.into(),
        })
    }
}

impl Default for Message {
    fn default() -> Self {
        Self {
            bytes: Vec::new().into(),
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.iter() {
            write!(f, "{byte:x} ")?;
        }
        Ok(())
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Message {}

impl From<&str> for Message {
    fn from(val: &str) -> Self {
        Self {
            bytes: val.as_bytes().into(),
        }
    }
}

impl From<String> for Message {
    fn from(val: String) -> Self {
        Self {
            bytes: val.into_bytes().into(),
        }
    }
}

impl From<Vec<u8>> for Message {
    fn from(val: Vec<u8>) -> Self {
        Self { bytes: val.into() }
    }
}

impl From<&[u8]> for Message {
    fn from(val: &[u8]) -> Self {
        Self { bytes: val.into() }
    }
}

impl<const L: usize> From<[u8; L]> for Message {
    fn from(val: [u8; L]) -> Self {
        Self { bytes: val.into() }
    }
}

impl<const L: usize> From<&[u8; L]> for Message {
    fn from(val: &[u8; L]) -> Self {
        Self {
            bytes: (&val[..]).into(),
        }
    }
}

/// The input to [`Message::from_base64`] was not valid Base64.
#[derive(Debug, ThisError)]
#[error("Invalid base64 data: {0}")]
pub struct Base64Error(base64::DecodeError);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms_agree() {
        let from_str = Message::new("bytes");
        let from_slice = Message::new(&b"bytes"[..]);
        let from_vec = Message::new(b"bytes".to_vec());
        let from_array = Message::new(*b"bytes");
        assert_eq!(from_str, from_slice);
        assert_eq!(from_str, from_vec);
        assert_eq!(from_str, from_array);
        assert_eq!(from_str.len(), 5);
    }

    #[test]
    fn base64_round_trip() {
        let message = Message::new("hello world");
        assert_eq!(Message::from_base64(&message.to_base64()).unwrap(), message);
    }

    #[test]
    fn base64_known_encoding() {
        let message = Message::new(vec![0u8, 255, 17, 3]);
        assert_eq!(message.to_base64(), "AP8RAw==");
        assert_eq!(Message::from_base64("AP8RAw==").unwrap(), message);
    }

    #[test]
    fn malformed_base64_fails() {
        assert!(Message::from_base64("not base64!!!").is_err());
    }

    #[test]
    fn empty_message() {
        let message = Message::default();
        assert!(message.is_empty());
        assert_eq!(message.to_base64(), "");
        assert_eq!(Message::from_base64("").unwrap(), message);
    }

    #[test]
    fn displays_as_hex() {
        let message = Message::new([0xabu8, 0x01]);
        assert_eq!(message.to_string(), "ab 1 ");
    }
}
