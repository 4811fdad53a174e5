//! Variant ⇄ JSON interop.
//!
//! Parsing accepts any JSON document and produces the corresponding
//! variant tree (objects keep source order). Serialization covers the
//! JSON-expressible kinds; `undefined` serializes as `null`, while
//! dynamic, native, and byte-sequence values are refused with
//! `not-supported`.

use std::io::Write;

use serde_json::Value;

use crate::error::{ExecResult, RuntimeError};

use super::{UniqKey, VArray, VObject, Variant};

/// Parse a JSON source string into a variant.
pub fn parse(source: &str) -> ExecResult<Variant> {
    let value: Value = serde_json::from_str(source)
        .map_err(|e| RuntimeError::invalid_value(format!("JSON parse: {e}")))?;
    Ok(from_value(&value))
}

/// Parse a JSON byte stream into a variant.
pub fn parse_from_reader(reader: impl std::io::Read) -> ExecResult<Variant> {
    let value: Value = serde_json::from_reader(reader)
        .map_err(|e| RuntimeError::invalid_value(format!("JSON parse: {e}")))?;
    Ok(from_value(&value))
}

/// Convert a parsed JSON value into a variant.
pub fn from_value(value: &Value) -> Variant {
    match value {
        Value::Null => Variant::Null,
        Value::Bool(b) => Variant::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Variant::LongInt(i)
            } else if let Some(u) = n.as_u64() {
                Variant::ULongInt(u)
            } else {
                Variant::Number(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Variant::string(s),
        Value::Array(items) => {
            let arr = VArray::new();
            for item in items {
                // Fresh array, no listeners yet; append cannot fail.
                let _ = arr.append(from_value(item));
            }
            Variant::Array(arr)
        }
        Value::Object(map) => {
            let obj = VObject::new();
            for (k, v) in map {
                let _ = obj.set(k.as_str(), from_value(v));
            }
            Variant::Object(obj)
        }
    }
}

/// Convert a variant into a JSON value. Sets and tuples serialize as
/// arrays; the set's uniqueness key is not part of the data.
pub fn to_value(variant: &Variant) -> ExecResult<Value> {
    Ok(match variant {
        Variant::Undefined | Variant::Null => Value::Null,
        Variant::Boolean(b) => Value::Bool(*b),
        Variant::Number(n) | Variant::LongDouble(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Variant::LongInt(n) => Value::Number((*n).into()),
        Variant::ULongInt(n) => Value::Number((*n).into()),
        Variant::String(_) | Variant::AtomString(_) => {
            Value::String(variant.as_str().unwrap_or("").to_string())
        }
        Variant::Object(obj) => {
            let mut map = serde_json::Map::new();
            for (k, v) in obj.entries() {
                map.insert(k.to_string(), to_value(&v)?);
            }
            Value::Object(map)
        }
        Variant::Array(arr) => seq_to_value(&arr.items())?,
        Variant::Set(set) => seq_to_value(&set.items())?,
        Variant::Tuple(tup) => seq_to_value(&tup.items())?,
        other => {
            return Err(RuntimeError::NotSupported(format!(
                "{} is not JSON-expressible",
                other.kind_name()
            )));
        }
    })
}

fn seq_to_value(items: &[Variant]) -> ExecResult<Value> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(to_value(item)?);
    }
    Ok(Value::Array(out))
}

/// Serialize a variant as compact JSON text.
pub fn serialize(variant: &Variant) -> ExecResult<String> {
    let value = to_value(variant)?;
    serde_json::to_string(&value)
        .map_err(|e| RuntimeError::FailedWrite(format!("JSON serialize: {e}")))
}

/// Serialize a variant as compact JSON onto a writer.
pub fn serialize_to_writer(variant: &Variant, writer: impl Write) -> ExecResult<()> {
    let value = to_value(variant)?;
    serde_json::to_writer(writer, &value)
        .map_err(|e| RuntimeError::FailedWrite(format!("JSON serialize: {e}")))
}

/// Parse JSON into a set with the given uniqueness key; the source must
/// be a JSON array of members.
pub fn parse_as_set(source: &str, unique_by: UniqKey) -> ExecResult<Variant> {
    let parsed = parse(source)?;
    let Variant::Array(arr) = parsed else {
        return Err(RuntimeError::invalid_value("set source must be a JSON array"));
    };
    let set = super::VSet::new(unique_by);
    for member in arr.items() {
        set.insert(member, true)?;
    }
    Ok(Variant::Set(set))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let src = r#"{"name":"clock","interval":1000,"tags":["a","b"],"on":true,"x":null}"#;
        let v = parse(src).unwrap();
        let text = serialize(&v).unwrap();
        let reparsed = parse(&text).unwrap();
        assert_eq!(v, reparsed);
    }

    #[test]
    fn test_object_keeps_source_order() {
        let v = parse(r#"{"z":1,"a":2,"m":3}"#).unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj.keys(), vec!["z", "a", "m"]);
    }

    #[test]
    fn test_numbers_pick_narrowest_kind() {
        let v = parse("[1, -2, 3.5]").unwrap();
        let items = v.as_array().unwrap().items();
        assert!(matches!(items[0], Variant::LongInt(1)));
        assert!(matches!(items[1], Variant::LongInt(-2)));
        assert!(matches!(items[2], Variant::Number(n) if n == 3.5));
    }

    #[test]
    fn test_parse_error() {
        let err = parse("{nope").unwrap_err();
        assert_eq!(err.kind(), "invalid-value");
    }

    #[test]
    fn test_non_expressible_kinds_refused() {
        let err = serialize(&Variant::byte_seq([1, 2, 3])).unwrap_err();
        assert_eq!(err.kind(), "not-supported");
    }

    #[test]
    fn test_parse_as_set() {
        let v = parse_as_set(
            r#"[{"id":"a","n":1},{"id":"b","n":2},{"id":"a","n":3}]"#,
            UniqKey::by_prop("id"),
        )
        .unwrap();
        let set = v.as_set().unwrap();
        assert_eq!(set.size(), 2);
        let member = set.get_by_key(&Variant::string("a")).unwrap();
        assert_eq!(member.as_object().unwrap().get("n"), Some(Variant::LongInt(3)));
    }
}
