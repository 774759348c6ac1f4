use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::TypeError;
use crate::urn::Urn;

/// The kind of values a predicate holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    String,
    Urn,
    Int32,
    Int64,
    Binary,
}

/// A typed attribute value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Urn(Urn),
    Int32(i32),
    Int64(i64),
    Binary(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Urn(_) => ValueKind::Urn,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Binary(_) => ValueKind::Binary,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Urn(u) => Some(u.as_str()),
            _ => None,
        }
    }

    pub fn as_urn(&self) -> Option<&Urn> {
        match self {
            Self::Urn(u) => Some(u),
            _ => None,
        }
    }

    /// Integer view of the value; strings holding a number also convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            Self::String(s) => codec::parse_int(s).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            Self::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Encode for the line-oriented properties format.
    ///
    /// The result never contains a newline.
    pub fn encode(&self) -> String {
        match self {
            Self::String(s) => escape_text(s),
            Self::Urn(u) => escape_text(u.as_str()),
            Self::Int32(v) => v.to_string(),
            Self::Int64(v) => v.to_string(),
            Self::Binary(b) => codec::encode_base64(b),
        }
    }

    /// Decode text produced by [`Value::encode`] as a value of `kind`.
    ///
    /// URN values are returned verbatim; resolving relative references is
    /// the caller's concern.
    pub fn decode(kind: ValueKind, text: &str) -> Result<Self, TypeError> {
        Ok(match kind {
            ValueKind::String => Self::String(unescape_text(text)),
            ValueKind::Urn => Self::Urn(Urn::new(unescape_text(text))),
            ValueKind::Int32 => {
                let v = codec::parse_int(text)?;
                Self::Int32(i32::try_from(v).map_err(|_| TypeError::KindMismatch {
                    value: text.to_string(),
                    expected: "int32",
                })?)
            }
            ValueKind::Int64 => Self::Int64(codec::parse_int(text)?),
            ValueKind::Binary => Self::Binary(codec::decode_base64(text)?),
        })
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Urn(u) => write!(f, "Urn({u})"),
            Self::Int32(v) => write!(f, "Int32({v})"),
            Self::Int64(v) => write!(f, "Int64({v})"),
            Self::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Urn(u) => write!(f, "{u}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Binary(b) => f.write_str(&codec::encode_base16(b)),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Urn> for Value {
    fn from(v: Urn) -> Self {
        Self::Urn(v)
    }
}

impl From<&Urn> for Value {
    fn from(v: &Urn) -> Self {
        Self::Urn(v.clone())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Int64(v as i64)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn string_escaping_roundtrip() {
        let v = Value::from("line one\nline two \\ end\r");
        let encoded = v.encode();
        assert!(!encoded.contains('\n'));
        assert_eq!(Value::decode(ValueKind::String, &encoded).unwrap(), v);
    }

    #[test]
    fn int32_overflow_is_rejected() {
        let err = Value::decode(ValueKind::Int32, "4294967296").unwrap_err();
        assert!(matches!(err, TypeError::KindMismatch { .. }));
    }

    #[test]
    fn binary_is_base64() {
        let v = Value::Binary(vec![0, 1, 2, 255]);
        assert_eq!(v.encode(), "AAEC/w==");
        assert_eq!(Value::decode(ValueKind::Binary, "AAEC/w==").unwrap(), v);
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Int32(-4).as_i64(), Some(-4));
        assert_eq!(Value::Int32(-4).as_u64(), None);
        assert_eq!(Value::from("0x10").as_u64(), Some(16));
        assert_eq!(Value::Binary(vec![1]).as_i64(), None);
    }

    proptest! {
        #[test]
        fn any_string_survives_encoding(s in ".*") {
            let v = Value::String(s);
            prop_assert_eq!(Value::decode(ValueKind::String, &v.encode()).unwrap(), v);
        }

        #[test]
        fn any_int64_survives_encoding(n in any::<i64>()) {
            let v = Value::Int64(n);
            prop_assert_eq!(Value::decode(ValueKind::Int64, &v.encode()).unwrap(), v);
        }
    }
}
