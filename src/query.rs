//! Key and index extraction over heterogeneous values
//!
//! Resolves one path segment at a time against mappings, ordered mappings,
//! records, sequences, and capability objects. Extraction is total and
//! deterministic: a miss is `None`, never an error.

use crate::value::{Record, Value};

/// Capability trait for opaque values that resolve keys themselves.
///
/// Implementations take priority over every built-in resolution rule.
pub trait KeyExtractor: Send + Sync {
    fn extract_by_key(&self, key: &str) -> Option<Value>;
}

/// Resolve `key` against `value`.
///
/// Resolution order: `KeyExtractor` capability, exact string-key mapping
/// lookup, stringized-key mapping lookup, record fields, shared-reference
/// dereference. Mapping scans are linear and the first match wins, which
/// gives ordered mappings their documented semantics for duplicate keys.
pub fn extract_by_key(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Extractor(e) => e.extract_by_key(key),
        Value::Map(map) => {
            if let Some(v) = map
                .iter()
                .find(|(k, _)| matches!(k, Value::String(s) if s == key))
            {
                return Some(v.1.clone());
            }
            map.iter()
                .find(|(k, _)| k.stringize().as_deref() == Some(key))
                .map(|(_, v)| v.clone())
        }
        Value::Record(record) => extract_record(record, key),
        Value::Shared(inner) => extract_by_key(inner, key),
        _ => None,
    }
}

/// Resolve an integer index against `value`.
///
/// Sequences index positionally; mappings fall back to an integer or
/// stringized key match.
pub fn extract_by_index(value: &Value, index: i64) -> Option<Value> {
    match value {
        Value::Seq(seq) => {
            let idx = usize::try_from(index).ok()?;
            seq.get(idx).cloned()
        }
        Value::Map(map) => {
            if let Some(v) = map
                .iter()
                .find(|(k, _)| matches!(k, Value::Int(i) if *i == index))
            {
                return Some(v.1.clone());
            }
            extract_by_key(value, &index.to_string())
        }
        Value::Extractor(e) => e.extract_by_key(&index.to_string()),
        Value::Shared(inner) => extract_by_index(inner, index),
        _ => None,
    }
}

/// Record resolution: tags are matched case-sensitively on their first
/// comma-separated form; field names match through their lowercased form
/// only, so key `"a"` finds field `A` but key `"A"` misses; inline fields
/// contribute children transparently; embedded fields answer to their
/// lowercased type name and also expose their own fields.
fn extract_record(record: &Record, key: &str) -> Option<Value> {
    // direct matches, in declaration order
    for field in record.fields() {
        if let Some(tag) = &field.tag {
            let name = tag.split(',').next().unwrap_or("");
            if !name.is_empty() {
                if name == key {
                    return Some(field.value.clone());
                }
                continue;
            }
        }
        if field.inline {
            continue;
        }
        if field.embedded {
            if field.name.to_lowercase() == key {
                return Some(field.value.clone());
            }
            continue;
        }
        if field.name.to_lowercase() == key {
            return Some(field.value.clone());
        }
    }
    // inline children
    for field in record.fields() {
        if field.inline {
            if let Some(v) = extract_by_key(&field.value, key) {
                return Some(v);
            }
        }
    }
    // embedded children
    for field in record.fields() {
        if field.embedded {
            if let Some(v) = extract_by_key(&field.value, key) {
                return Some(v);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Mapping;
    use std::sync::Arc;

    struct StubExtractor(Option<Value>);

    impl KeyExtractor for StubExtractor {
        fn extract_by_key(&self, _key: &str) -> Option<Value> {
            self.0.clone()
        }
    }

    fn sample_record() -> Record {
        Record::new("Outer")
            .field("A", Value::from("AAA"))
            .tagged_field("B", "2", Value::from("BBB"))
            .tagged_field("C", "3,omitempty", Value::from("C"))
            .inline_field(
                "Inline",
                Value::Record(Record::new("Inner").field("C", Value::from("CCC"))),
            )
            .embedded(Record::new("Anon").field("D", Value::from("DDD")))
    }

    #[test]
    fn test_mapping_string_key() {
        let mut m = Mapping::new();
        m.insert("key", Value::from("value"));
        assert_eq!(
            extract_by_key(&Value::Map(m), "key"),
            Some(Value::from("value"))
        );
    }

    #[test]
    fn test_mapping_untyped_key_stringized() {
        let mut m = Mapping::new();
        m.insert(Value::Int(0), Value::Int(0));
        m.insert("key", Value::Int(1));
        let v = Value::Map(m);
        assert_eq!(extract_by_key(&v, "key"), Some(Value::Int(1)));
        assert_eq!(extract_by_key(&v, "0"), Some(Value::Int(0)));
    }

    #[test]
    fn test_ordered_mapping_first_match_wins() {
        let mut m = Mapping::new();
        m.insert("paramA", Value::from("value"));
        m.insert("paramA", Value::from("shadowed"));
        assert_eq!(
            extract_by_key(&Value::Map(m), "paramA"),
            Some(Value::from("value"))
        );
    }

    #[test]
    fn test_record_field_name_matches_lowercased_only() {
        let v = Value::Record(sample_record());
        assert_eq!(extract_by_key(&v, "a"), Some(Value::from("AAA")));
        // only the field name is lowercased; the key is taken as-is
        assert_eq!(extract_by_key(&v, "A"), None);
    }

    #[test]
    fn test_record_tag_resolution() {
        let v = Value::Record(sample_record());
        assert_eq!(extract_by_key(&v, "2"), Some(Value::from("BBB")));
        // comma options are stripped
        assert_eq!(extract_by_key(&v, "3"), Some(Value::from("C")));
        // a tag hides the field name
        assert_eq!(extract_by_key(&v, "b"), None);
    }

    #[test]
    fn test_record_inline_fields() {
        let v = Value::Record(sample_record());
        assert_eq!(extract_by_key(&v, "c"), Some(Value::from("C")));
        // the inline field itself is not addressable
        assert_eq!(extract_by_key(&v, "inline"), None);
    }

    #[test]
    fn test_record_embedded() {
        let v = Value::Record(sample_record());
        let anon = extract_by_key(&v, "anon").expect("embedded record by type name");
        assert!(matches!(anon, Value::Record(_)));
        assert_eq!(extract_by_key(&v, "d"), Some(Value::from("DDD")));
    }

    #[test]
    fn test_key_extractor_capability() {
        let found = Value::Extractor(Arc::new(StubExtractor(Some(Value::from("value")))));
        assert_eq!(extract_by_key(&found, "key"), Some(Value::from("value")));

        let missing = Value::Extractor(Arc::new(StubExtractor(None)));
        assert_eq!(extract_by_key(&missing, "key"), None);
    }

    #[test]
    fn test_shared_dereference() {
        let mut m = Mapping::new();
        m.insert("key", Value::from("value"));
        let v = Value::Shared(Arc::new(Value::Map(m)));
        assert_eq!(extract_by_key(&v, "key"), Some(Value::from("value")));
    }

    #[test]
    fn test_not_found() {
        assert_eq!(extract_by_key(&Value::Null, "key"), None);
        assert_eq!(extract_by_key(&Value::Map(Mapping::new()), "key"), None);
    }

    #[test]
    fn test_index_extraction() {
        let seq = Value::Seq(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        assert_eq!(extract_by_index(&seq, 1), Some(Value::Int(20)));
        assert_eq!(extract_by_index(&seq, 3), None);
        assert_eq!(extract_by_index(&seq, -1), None);

        let mut m = Mapping::new();
        m.insert(Value::Int(2), Value::from("two"));
        assert_eq!(extract_by_index(&Value::Map(m), 2), Some(Value::from("two")));
    }

    #[test]
    fn test_extract_deterministic() {
        let v = Value::Record(sample_record());
        let first = extract_by_key(&v, "d");
        for _ in 0..10 {
            assert_eq!(extract_by_key(&v, "d"), first);
        }
    }
}
