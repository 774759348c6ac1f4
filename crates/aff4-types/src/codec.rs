//! Text codecs shared by every serialization layer.

use data_encoding::{BASE32, BASE64, HEXLOWER_PERMISSIVE};

use crate::error::TypeError;

pub fn encode_base16(data: &[u8]) -> String {
    HEXLOWER_PERMISSIVE.encode(data)
}

pub fn decode_base16(text: &str) -> Result<Vec<u8>, TypeError> {
    HEXLOWER_PERMISSIVE
        .decode(text.trim().as_bytes())
        .map_err(|e| TypeError::InvalidEncoding {
            encoding: "base16",
            reason: e.to_string(),
        })
}

pub fn encode_base32(data: &[u8]) -> String {
    BASE32.encode(data)
}

pub fn decode_base32(text: &str) -> Result<Vec<u8>, TypeError> {
    BASE32
        .decode(text.trim().as_bytes())
        .map_err(|e| TypeError::InvalidEncoding {
            encoding: "base32",
            reason: e.to_string(),
        })
}

pub fn encode_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, TypeError> {
    BASE64
        .decode(text.trim().as_bytes())
        .map_err(|e| TypeError::InvalidEncoding {
            encoding: "base64",
            reason: e.to_string(),
        })
}

/// Parse a signed integer in decimal or `0x` hexadecimal notation.
pub fn parse_int(text: &str) -> Result<i64, TypeError> {
    let trimmed = text.trim();
    let invalid = || TypeError::InvalidInteger(text.to_string());

    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let magnitude = i128::from(u64::from_str_radix(hex, 16).map_err(|_| invalid())?);
        let value = if negative { -magnitude } else { magnitude };
        return i64::try_from(value).map_err(|_| invalid());
    }

    trimmed.parse::<i64>().map_err(|_| invalid())
}

/// Parse a byte count with an optional binary suffix: `512`, `32k`, `10M`, `2g`, `1T`.
pub fn parse_size(text: &str) -> Result<u64, TypeError> {
    let trimmed = text.trim();
    let invalid = || TypeError::InvalidSize(text.to_string());

    let (digits, shift) = match trimmed.chars().last() {
        Some('k' | 'K') => (&trimmed[..trimmed.len() - 1], 10),
        Some('m' | 'M') => (&trimmed[..trimmed.len() - 1], 20),
        Some('g' | 'G') => (&trimmed[..trimmed.len() - 1], 30),
        Some('t' | 'T') => (&trimmed[..trimmed.len() - 1], 40),
        Some(_) => (trimmed, 0),
        None => return Err(invalid()),
    };

    let base = parse_int(digits).map_err(|_| invalid())?;
    let base = u64::try_from(base).map_err(|_| invalid())?;
    base.checked_mul(1u64 << shift).ok_or_else(invalid)
}

/// Render a byte count with the largest exact binary suffix.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(u32, &str); 4] = [(40, "T"), (30, "G"), (20, "M"), (10, "k")];
    for (shift, suffix) in UNITS {
        let unit = 1u64 << shift;
        if bytes >= unit && bytes % unit == 0 {
            return format!("{}{suffix}", bytes / unit);
        }
    }
    bytes.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base16_roundtrip() {
        let data = [0xde, 0xad, 0xbe, 0xef];
        assert_eq!(encode_base16(&data), "deadbeef");
        assert_eq!(decode_base16("DEADBEEF").unwrap(), data);
    }

    #[test]
    fn base32_roundtrip() {
        let data = b"forensic";
        let text = encode_base32(data);
        assert_eq!(decode_base32(&text).unwrap(), data);
    }

    #[test]
    fn base64_rejects_garbage() {
        let err = decode_base64("not base64!").unwrap_err();
        assert!(matches!(err, TypeError::InvalidEncoding { encoding: "base64", .. }));
    }

    #[test]
    fn parse_int_forms() {
        assert_eq!(parse_int("42").unwrap(), 42);
        assert_eq!(parse_int(" -17 ").unwrap(), -17);
        assert_eq!(parse_int("0x20").unwrap(), 32);
        assert_eq!(parse_int("-0x10").unwrap(), -16);
        assert_eq!(parse_int(&i64::MIN.to_string()).unwrap(), i64::MIN);
        assert!(parse_int("12a").is_err());
        assert!(parse_int("0xffffffffffffffff").is_err());
    }

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("32k").unwrap(), 32 * 1024);
        assert_eq!(parse_size("10M").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("2g").unwrap(), 2 << 30);
        assert_eq!(parse_size("1T").unwrap(), 1 << 40);
        assert!(parse_size("").is_err());
        assert!(parse_size("-1k").is_err());
        assert!(parse_size("k").is_err());
    }

    #[test]
    fn format_size_prefers_exact_units() {
        assert_eq!(format_size(32768), "32k");
        assert_eq!(format_size(10 << 20), "10M");
        assert_eq!(format_size(1000), "1000");
    }
}
