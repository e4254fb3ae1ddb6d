//! Content keys identify immutable objects by the BLAKE3 digest of their bytes.
//!
//! A key is rendered as a path of the form `/blake3/<hex digest>`, which is
//! also the form stored in serialized datasets and references. Identical byte
//! sequences always produce identical keys, so writing the same bytes twice
//! converges on the same object.

use std::fmt;
use std::str::FromStr;

use hex::FromHex;
use hex::FromHexError;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

/// Length of a raw digest in bytes.
pub const KEY_LEN: usize = 32;

pub type RawKey = [u8; KEY_LEN];

const PROTOCOL: &str = "blake3";

/// Deterministic identifier of an immutable blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey {
    pub raw: RawKey,
}

impl ContentKey {
    pub fn new(raw: RawKey) -> Self {
        Self { raw }
    }

    /// Hashes `bytes` and returns the key they are stored under.
    pub fn digest(bytes: &[u8]) -> Self {
        Self::new(*blake3::hash(bytes).as_bytes())
    }

    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let raw = RawKey::from_hex(hex)?;
        Ok(Self::new(raw))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.raw)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{PROTOCOL}/{}", self.to_hex())
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({self})")
    }
}

/// An error that can occur when parsing a content key from its path form.
/// The error can be caused by a bad protocol prefix or a bad hex encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyError {
    BadProtocol,
    BadHex(FromHexError),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::BadProtocol => write!(f, "content key must start with /{PROTOCOL}/"),
            KeyError::BadHex(e) => write!(f, "bad content key digest: {e}"),
        }
    }
}

impl std::error::Error for KeyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KeyError::BadProtocol => None,
            KeyError::BadHex(e) => Some(e),
        }
    }
}

impl From<FromHexError> for KeyError {
    fn from(value: FromHexError) -> Self {
        KeyError::BadHex(value)
    }
}

impl FromStr for ContentKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix('/') else {
            return Err(KeyError::BadProtocol);
        };
        let Some(digest) = rest
            .strip_prefix(PROTOCOL)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return Err(KeyError::BadProtocol);
        };
        ContentKey::from_hex(digest)
    }
}

impl Serialize for ContentKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let path = String::deserialize(deserializer)?;
        path.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_share_a_key() {
        let a = ContentKey::digest(b"a,b,c\n1,2,3");
        let b = ContentKey::digest(b"a,b,c\n1,2,3");
        let c = ContentKey::digest(b"a,b,c\n1,2,4");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn path_roundtrip() {
        let key = ContentKey::digest(b"[]");
        let path = key.to_string();
        assert!(path.starts_with("/blake3/"));
        assert_eq!(path.len(), "/blake3/".len() + KEY_LEN * 2);
        let parsed: ContentKey = path.parse().expect("roundtrip should succeed");
        assert_eq!(parsed, key);
    }

    #[test]
    fn parse_fail_protocol() {
        let s = "/sha256/CA98593CB9DC0FA48B2BE01E53D042E22B47862D646F9F19E2889A7961663663";
        let err = s.parse::<ContentKey>().expect_err("bad protocol should fail");
        assert_eq!(err, KeyError::BadProtocol);
    }

    #[test]
    fn parse_fail_hex() {
        let err = "/blake3/BAD!"
            .parse::<ContentKey>()
            .expect_err("bad hex should fail");
        assert!(matches!(err, KeyError::BadHex(..)));
    }

    #[test]
    fn serde_uses_path_form() {
        let key = ContentKey::digest(b"{}");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
        let back: ContentKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
