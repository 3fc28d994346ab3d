//! Message identity extraction
//!
//! A message's identity is its `Message-ID` header. Uniqueness is a
//! convention of the sending system, not a guarantee, so callers must
//! tolerate both duplicates and messages without an identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized `Message-ID` value used for deduplication and verification
///
/// Surrounding whitespace and angle brackets are removed so that `<a@b>`,
/// ` <a@b> ` and `a@b` compare equal. Case is preserved. The bracketed form
/// is available through [`Display`](fmt::Display).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Normalize a raw header value; `None` if nothing remains
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let trimmed = trimmed.strip_prefix('<').unwrap_or(trimmed);
        let trimmed = trimmed.strip_suffix('>').unwrap_or(trimmed).trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// The bare identifier, without angle brackets
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// Extract the identity key from a header block or a full raw message
///
/// Only the header section is scanned (up to the first empty line). The
/// header name is matched case-insensitively and folded continuation lines
/// are joined. Returns `None` when the header is missing or empty; this never
/// fails.
pub fn extract(header_bytes: &[u8]) -> Option<IdentityKey> {
    if header_bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(header_bytes);

    let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
    while let Some(line) = lines.next() {
        if line.is_empty() {
            // End of headers
            return None;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim_end().eq_ignore_ascii_case("message-id") {
            continue;
        }

        let mut value = value.to_string();
        for next in lines.by_ref() {
            if next.starts_with(' ') || next.starts_with('\t') {
                value.push_str(next);
            } else {
                break;
            }
        }
        return IdentityKey::parse(&value);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_simple() {
        let headers = b"From: a@example.com\r\nMessage-ID: <abc@example.com>\r\nSubject: hi\r\n\r\n";
        let key = extract(headers).unwrap();
        assert_eq!(key.as_str(), "abc@example.com");
        assert_eq!(key.to_string(), "<abc@example.com>");
    }

    #[test]
    fn test_extract_case_insensitive_name() {
        let key = extract(b"message-id: <x@y>\r\n").unwrap();
        assert_eq!(key.as_str(), "x@y");
        let key = extract(b"MESSAGE-ID:<x@y>\n").unwrap();
        assert_eq!(key.as_str(), "x@y");
    }

    #[test]
    fn test_extract_preserves_case_of_value() {
        let key = extract(b"Message-Id: <AbC@Example.COM>\r\n").unwrap();
        assert_eq!(key.as_str(), "AbC@Example.COM");
    }

    #[test]
    fn test_extract_missing_header() {
        assert!(extract(b"From: a@example.com\r\nSubject: none\r\n\r\nbody").is_none());
        assert!(extract(b"").is_none());
    }

    #[test]
    fn test_extract_empty_value() {
        assert!(extract(b"Message-ID:   \r\n").is_none());
        assert!(extract(b"Message-ID: <>\r\n").is_none());
    }

    #[test]
    fn test_extract_ignores_body() {
        let raw = b"Subject: quoted\r\n\r\nMessage-ID: <in-body@example.com>\r\n";
        assert!(extract(raw).is_none());
    }

    #[test]
    fn test_extract_folded_header() {
        let raw = b"Message-ID:\r\n <folded@example.com>\r\nSubject: x\r\n\r\n";
        assert_eq!(extract(raw).unwrap().as_str(), "folded@example.com");
    }

    #[test]
    fn test_bracket_and_whitespace_variants_compare_equal() {
        let a = IdentityKey::parse("<id@host>").unwrap();
        let b = IdentityKey::parse("  <id@host>  ").unwrap();
        let c = IdentityKey::parse("id@host").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_does_not_match_similar_header_names() {
        assert!(extract(b"X-Original-Message-ID: <other@host>\r\n").is_none());
        assert!(extract(b"In-Reply-To: <parent@host>\r\n").is_none());
    }
}
