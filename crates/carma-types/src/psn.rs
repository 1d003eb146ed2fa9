//! Persona identifiers.
//!
//! A PSN is an opaque, totally ordered node identity. On disk and in JSON
//! it appears in slug form so that it can double as a file name.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Result, TypesError};

/// Ordered set of personas. Every neighbor set in the topology uses this.
pub type PsnSet = BTreeSet<Psn>;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// A node's persona.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Psn(String);

impl Psn {
    /// Wrap a raw persona string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Decode a persona from its slug.
    pub fn from_slug(slug: &str) -> Result<Self> {
        unslugify(slug).map(Self)
    }

    /// The raw persona string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The raw persona bytes, as fed to the bucket hash.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Filesystem-safe encoding of this persona.
    pub fn to_slug(&self) -> String {
        slugify(&self.0)
    }
}

impl fmt::Display for Psn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Psn {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Psn {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl Serialize for Psn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_slug())
    }
}

impl<'de> Deserialize<'de> for Psn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let slug = String::deserialize(deserializer)?;
        Self::from_slug(&slug).map_err(serde::de::Error::custom)
    }
}

/// Encode a string so that it is safe to use as a single path component.
///
/// `[0-9_a-z]` pass through, `-` and `.` pass through unless they are the
/// first or last byte, `%` doubles, and every other byte becomes `%XX`.
/// The name `shared` is reserved and always encodes as `share%64`.
pub fn slugify(src: &str) -> String {
    if src == "shared" {
        return "share%64".to_string();
    }
    let bytes = src.as_bytes();
    let mut dst = String::with_capacity(bytes.len());
    for (i, &b) in bytes.iter().enumerate() {
        let interior = i > 0 && i + 1 < bytes.len();
        match b {
            b'0'..=b'9' | b'_' | b'a'..=b'z' => dst.push(char::from(b)),
            b'-' | b'.' if interior => dst.push(char::from(b)),
            b'%' => dst.push_str("%%"),
            _ => {
                dst.push('%');
                dst.push(char::from(HEX_UPPER[usize::from(b >> 4)]));
                dst.push(char::from(HEX_UPPER[usize::from(b & 0xF)]));
            }
        }
    }
    dst
}

/// Decode a slug produced by [`slugify`].
///
/// Malformed escapes are kept literally rather than rejected, so any
/// string decodes to something. Fails only when the decoded bytes are
/// not UTF-8.
pub fn unslugify(src: &str) -> Result<String> {
    let mut dst: Vec<u8> = Vec::with_capacity(src.len());
    let mut bytes = src.bytes().peekable();
    while let Some(c) = bytes.next() {
        if c != b'%' {
            dst.push(c);
            continue;
        }
        let Some(&hi) = bytes.peek() else {
            dst.push(b'%');
            break;
        };
        if hi == b'%' {
            bytes.next();
            dst.push(b'%');
            continue;
        }
        let Some(hi_val) = hex_val(hi) else {
            dst.push(b'%');
            continue;
        };
        bytes.next();
        match bytes.peek().copied() {
            Some(lo) => {
                bytes.next();
                match hex_val(lo) {
                    Some(lo_val) => dst.push((hi_val << 4) | lo_val),
                    None => dst.extend_from_slice(&[b'%', hi, lo]),
                }
            }
            None => dst.extend_from_slice(&[b'%', hi]),
        }
    }
    String::from_utf8(dst).map_err(|_| TypesError::InvalidSlug(src.to_string()))
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_vectors() {
        let cases = [
            ("", ""),
            ("%", "%%"),
            ("%%", "%%%%"),
            ("-", "%2D"),
            (".", "%2E"),
            (":", "%3A"),
            ("@", "%40"),
            ("Hello", "%48ello"),
            ("X", "%58"),
            ("hello", "hello"),
            ("shared", "share%64"),
            ("x", "x"),
            ("node-1.b", "node-1.b"),
        ];
        for (raw, slug) in cases {
            assert_eq!(slugify(raw), slug, "slugify({raw:?})");
        }
    }

    #[test]
    fn test_unslugify_vectors() {
        let cases = [
            ("", ""),
            ("%", "%"),
            ("%%", "%"),
            ("%%%", "%%"),
            ("%%%%", "%%"),
            ("%2", "%2"),
            ("%21", "!"),
            ("%2A", "*"),
            ("%2G", "%2G"),
            ("%2G%", "%2G%"),
            ("%2G%%", "%2G%"),
            ("%2G%%%", "%2G%%"),
            ("%2a", "*"),
            ("%2a%2", "*%2"),
            ("%2a%2A", "**"),
            ("%2a%2X", "*%2X"),
            ("%2g", "%2g"),
            ("%3A", ":"),
            ("share%64", "shared"),
        ];
        for (slug, raw) in cases {
            assert_eq!(unslugify(slug).expect("decode"), raw, "unslugify({slug:?})");
        }
    }

    #[test]
    fn test_unslugify_rejects_non_utf8() {
        assert!(unslugify("%FF").is_err());
    }

    #[test]
    fn test_psn_serde_uses_slug() {
        let psn = Psn::new("Alice@host");
        let json = serde_json::to_string(&psn).expect("serialize");
        assert_eq!(json, "\"%41lice%40host\"");
        let back: Psn = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, psn);
    }

    #[test]
    fn test_psn_ordering() {
        let set: PsnSet = ["c", "a", "b"].into_iter().map(Psn::from).collect();
        let order: Vec<&str> = set.iter().map(Psn::as_str).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }
}
