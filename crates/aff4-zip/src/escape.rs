//! Percent-escaping of member names.

use std::fmt::Write;

/// Bytes that are always escaped, in addition to controls and non-ASCII.
const RESERVED: &[u8] = b"%\"*:<>?\\|!$&'()[]{}#^~";

fn needs_escape(byte: u8) -> bool {
    byte < 0x20 || byte >= 0x7f || RESERVED.contains(&byte)
}

/// Escape a member name for storage in the archive.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if needs_escape(byte) {
            let _ = write!(out, "%{byte:02X}");
        } else {
            out.push(byte as char);
        }
    }
    out
}

/// Reverse [`escape_name`]. Malformed `%` sequences are kept literally.
pub fn unescape_name(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn urn_members_are_escaped() {
        assert_eq!(
            escape_name("aff4://abc/00000000"),
            "aff4%3A//abc/00000000"
        );
        assert_eq!(escape_name("plain/name.idx"), "plain/name.idx");
    }

    #[test]
    fn reserved_and_control_bytes() {
        assert_eq!(escape_name("a b"), "a b");
        assert_eq!(escape_name("x\ty"), "x%09y");
        assert_eq!(escape_name("100%"), "100%25");
        assert_eq!(escape_name("é"), "%C3%A9");
    }

    #[test]
    fn malformed_sequences_survive() {
        assert_eq!(unescape_name("50%"), "50%");
        assert_eq!(unescape_name("%zz1"), "%zz1");
        assert_eq!(unescape_name("%4"), "%4");
    }

    proptest! {
        #[test]
        fn escape_roundtrip(name in "\\PC{0,40}") {
            prop_assert_eq!(unescape_name(&escape_name(&name)), name);
        }

        #[test]
        fn escaped_names_have_no_reserved_bytes(name in "\\PC{0,40}") {
            let escaped = escape_name(&name);
            prop_assert!(escaped.bytes().all(|b| b == b'%' || !needs_escape(b)));
        }
    }
}
