//! The properties text format.
//!
//! ```text
//! aff4://2c1f.../image aff4:type=aff4:image
//! aff4://2c1f.../image aff4:size=10485760
//! aff4://2c1f.../image aff4:note^^int64=7
//! ```
//!
//! One triple per line: subject, a single space, predicate, `=`, encoded
//! value. Values use the kind registered for their predicate; a value of
//! any other kind carries an explicit `^^kind` marker after the predicate.

use aff4_types::{predicates, Urn, Value, ValueKind};

use crate::error::{StoreError, StoreResult};
use crate::triple::Triple;

const KIND_MARKER: &str = "^^";

/// Render triples, dropping volatile predicates.
pub fn export_triples(triples: &[Triple]) -> String {
    let mut out = String::new();
    for triple in triples {
        if predicates::is_volatile(&triple.predicate) {
            continue;
        }
        out.push_str(triple.subject.as_str());
        out.push(' ');
        out.push_str(&triple.predicate);
        if triple.value.kind() != predicates::kind_of(&triple.predicate) {
            out.push_str(KIND_MARKER);
            out.push_str(kind_name(triple.value.kind()));
        }
        out.push('=');
        out.push_str(&triple.value.encode());
        out.push('\n');
    }
    out
}

/// Parse properties text. Blank lines and `#` comments are ignored.
pub fn parse_triples(context: &Urn, input: &str) -> StoreResult<Vec<Triple>> {
    let mut triples = Vec::new();
    for (index, raw) in input.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        triples.push(parse_line(context, index + 1, line)?);
    }
    Ok(triples)
}

fn parse_line(context: &Urn, line_no: usize, line: &str) -> StoreResult<Triple> {
    let malformed = |reason: &str| StoreError::Malformed {
        line: line_no,
        reason: reason.to_string(),
    };

    let (subject, rest) = line
        .split_once(' ')
        .ok_or_else(|| malformed("missing predicate"))?;
    let (predicate, encoded) = rest
        .split_once('=')
        .ok_or_else(|| malformed("missing '='"))?;
    if subject.is_empty() || predicate.is_empty() {
        return Err(malformed("empty subject or predicate"));
    }

    let (predicate, kind) = match predicate.split_once(KIND_MARKER) {
        Some((name, kind)) => (
            name,
            kind_from_name(kind).ok_or_else(|| malformed("unknown value kind"))?,
        ),
        None => (predicate, predicates::kind_of(predicate)),
    };

    let value = match Value::decode(kind, encoded)? {
        Value::Urn(urn) => Value::Urn(context.resolve(urn.as_str())),
        other => other,
    };

    Ok(Triple::new(context.resolve(subject), predicate, value))
}

fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::String => "string",
        ValueKind::Urn => "urn",
        ValueKind::Int32 => "int32",
        ValueKind::Int64 => "int64",
        ValueKind::Binary => "binary",
    }
}

fn kind_from_name(name: &str) -> Option<ValueKind> {
    Some(match name {
        "string" => ValueKind::String,
        "urn" => ValueKind::Urn,
        "int32" => ValueKind::Int32,
        "int64" => ValueKind::Int64,
        "binary" => ValueKind::Binary,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Urn {
        Urn::from("aff4://volume")
    }

    #[test]
    fn volatile_predicates_are_dropped() {
        let subject = Urn::from("aff4://volume/s");
        let text = export_triples(&[
            Triple::new(subject.clone(), predicates::SIZE, Value::Int64(5)),
            Triple::new(subject, predicates::WRITE_LOCK, Value::Urn(Urn::random())),
        ]);
        assert_eq!(text, "aff4://volume/s aff4:size=5\n");
    }

    #[test]
    fn relative_subjects_and_urns_resolve_against_context() {
        let triples = parse_triples(&ctx(), "image aff4:stored=data\n").unwrap();
        assert_eq!(triples[0].subject.as_str(), "aff4://volume/image");
        assert_eq!(
            triples[0].value,
            Value::Urn(Urn::from("aff4://volume/data"))
        );
    }

    #[test]
    fn kind_marker_preserves_unregistered_kinds() {
        let subject = Urn::from("aff4://volume/s");
        let original = vec![
            Triple::new(subject.clone(), "custom:count", Value::Int64(-3)),
            Triple::new(subject.clone(), predicates::SIZE, Value::from("odd")),
        ];
        let text = export_triples(&original);
        assert!(text.contains("custom:count^^int64=-3"));
        assert_eq!(parse_triples(&ctx(), &text).unwrap(), original);
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let input = "# header\n\naff4://volume/x aff4:type=aff4:image\r\n";
        let triples = parse_triples(&ctx(), input).unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].value, Value::from("aff4:image"));
    }

    #[test]
    fn malformed_lines_report_position() {
        let err = parse_triples(&ctx(), "aff4://a aff4:type=x\nbroken\n").unwrap_err();
        assert!(matches!(err, StoreError::Malformed { line: 2, .. }));
        let err = parse_triples(&ctx(), "aff4://a aff4:size=notanumber\n").unwrap_err();
        assert!(matches!(err, StoreError::Type(_)));
    }

    #[test]
    fn values_may_contain_equals_and_spaces() {
        let subject = Urn::from("aff4://volume/s");
        let original = vec![Triple::new(subject, "custom:note", Value::from("a = b c"))];
        let text = export_triples(&original);
        assert_eq!(parse_triples(&ctx(), &text).unwrap(), original);
    }
}
