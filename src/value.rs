//! Runtime value model
//!
//! Scenario data, template results, and plugin values all flow through
//! [`Value`], a closed set of shapes: scalars, sequences, ordered mappings,
//! records with schema tags, callables, capability objects, and shared
//! references. Mappings preserve YAML document order. Callable variants
//! compare by pointer identity so a function surviving a YAML round trip can
//! be verified to be the same function, not a lookalike.

use std::fmt;
use std::sync::Arc;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::common::{Error, Result};
use crate::plugin::PluginStep;
use crate::query::KeyExtractor;
use crate::template::LeftArrowFunc;

/// A dynamically typed runtime value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<Value>),
    Map(Mapping),
    Record(Record),
    /// A callable template function
    Func(FuncValue),
    /// A left-arrow function taking a YAML-bodied argument
    LeftArrowFunc(Arc<dyn LeftArrowFunc>),
    /// A plugin-defined step
    Step(Arc<dyn PluginStep>),
    /// An opaque value exposing key-based extraction
    Extractor(Arc<dyn KeyExtractor>),
    /// A shared reference, dereferenced transparently during extraction
    Shared(Arc<Value>),
}

impl Value {
    /// Short type label for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
            Value::Record(_) => "record",
            Value::Func(_) => "function",
            Value::LeftArrowFunc(_) => "function",
            Value::Step(_) => "step",
            Value::Extractor(_) => "extractor",
            Value::Shared(_) => "reference",
        }
    }

    /// True for variants that cannot survive YAML serialization
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Func(_) | Value::LeftArrowFunc(_) | Value::Step(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render scalars as the string YAML would use for a mapping key
    pub fn stringize(&self) -> Option<String> {
        match self {
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Shared(v) => v.stringize(),
            _ => None,
        }
    }

    /// Serialize to a YAML document string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Execute(e.to_string()))
    }

    /// Parse a YAML document string, preserving mapping order
    pub fn from_yaml(s: &str) -> Result<Value> {
        Ok(serde_yaml::from_str(s)?)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Seq(v) => f.debug_tuple("Seq").field(v).finish(),
            Value::Map(v) => f.debug_tuple("Map").field(v).finish(),
            Value::Record(v) => f.debug_tuple("Record").field(v).finish(),
            Value::Func(v) => write!(f, "Func({})", v.name()),
            Value::LeftArrowFunc(_) => write!(f, "LeftArrowFunc"),
            Value::Step(_) => write!(f, "Step"),
            Value::Extractor(_) => write!(f, "Extractor"),
            Value::Shared(v) => f.debug_tuple("Shared").field(v).finish(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Shared(a), b) => a.as_ref() == b,
            (a, Value::Shared(b)) => a == b.as_ref(),
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            (Value::LeftArrowFunc(a), Value::LeftArrowFunc(b)) => Arc::ptr_eq(a, b),
            (Value::Step(a), Value::Step(b)) => Arc::ptr_eq(a, b),
            (Value::Extractor(a), Value::Extractor(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// An ordered mapping of values, preserving insertion (document) order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mapping {
    entries: Vec<(Value, Value)>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; duplicate keys are kept in order
    pub fn insert(&mut self, key: impl Into<Value>, value: Value) {
        self.entries.push((key.into(), value));
    }

    /// Look up the first entry whose key is exactly the given string
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::String(s) if s == key))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Value, Value)> for Mapping {
    fn from_iter<T: IntoIterator<Item = (Value, Value)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Mapping {
    type Item = (Value, Value);
    type IntoIter = std::vec::IntoIter<(Value, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A record: named fields with optional schema tags, inline expansion, and
/// embedding, mirroring how typed structures present themselves to the
/// extractor.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Record {
    type_name: String,
    fields: Vec<Field>,
}

/// One record field
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    /// Schema tag; matched case-sensitively, first comma option wins
    pub tag: Option<String>,
    /// Inline fields contribute their children transparently
    pub inline: bool,
    /// Embedded fields also answer to their lowercased type name
    pub embedded: bool,
    pub value: Value,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push(Field {
            name: name.into(),
            tag: None,
            inline: false,
            embedded: false,
            value,
        });
        self
    }

    pub fn tagged_field(
        mut self,
        name: impl Into<String>,
        tag: impl Into<String>,
        value: Value,
    ) -> Self {
        self.fields.push(Field {
            name: name.into(),
            tag: Some(tag.into()),
            inline: false,
            embedded: false,
            value,
        });
        self
    }

    pub fn inline_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push(Field {
            name: name.into(),
            tag: None,
            inline: true,
            embedded: false,
            value,
        });
        self
    }

    /// Embed another record; it answers to its lowercased type name and
    /// contributes its own fields.
    pub fn embedded(mut self, record: Record) -> Self {
        let name = record.type_name.clone();
        self.fields.push(Field {
            name,
            tag: None,
            inline: false,
            embedded: true,
            value: Value::Record(record),
        });
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// A callable template function with declared parameters
#[derive(Clone)]
pub struct FuncValue {
    name: String,
    params: Vec<ParamType>,
    variadic: bool,
    f: Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>,
}

/// Declared parameter types; arguments with convertible dynamic types are
/// converted, anything else is passed through unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Any,
    Bool,
    Int,
    Float,
    String,
}

impl ParamType {
    /// Convert the value when its dynamic type is convertible to this
    /// parameter type; otherwise return it as-is.
    pub fn convert(self, value: Value) -> Value {
        match (self, value) {
            (ParamType::Float, Value::Int(i)) => Value::Float(i as f64),
            (ParamType::Int, Value::Float(f)) => Value::Int(f as i64),
            (_, v) => v,
        }
    }
}

impl FuncValue {
    pub fn new(
        name: impl Into<String>,
        params: Vec<ParamType>,
        variadic: bool,
        f: impl Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            variadic,
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Declared type of the i-th argument; the last parameter of a variadic
    /// function repeats.
    pub fn required_param(&self, idx: usize) -> ParamType {
        if self.variadic && idx >= self.params.len().saturating_sub(1) {
            return self.params.last().copied().unwrap_or(ParamType::Any);
        }
        self.params.get(idx).copied().unwrap_or(ParamType::Any)
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        (self.f)(args)
    }

    pub fn ptr_eq(&self, other: &FuncValue) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncValue({})", self.name)
    }
}

// === Serialization ===

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Seq(seq) => {
                let mut s = serializer.serialize_seq(Some(seq.len()))?;
                for v in seq {
                    s.serialize_element(v)?;
                }
                s.end()
            }
            Value::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
            Value::Record(record) => serialize_record(record, serializer),
            Value::Shared(v) => v.serialize(serializer),
            other => Err(serde::ser::Error::custom(format!(
                "cannot serialize a {} value",
                other.type_name()
            ))),
        }
    }
}

/// Records serialize as mappings: tags override names, inline and embedded
/// fields contribute their children at the current level.
fn serialize_record<S: Serializer>(
    record: &Record,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    fn collect<'a>(
        record: &'a Record,
        out: &mut Vec<(String, &'a Value)>,
    ) -> std::result::Result<(), String> {
        for field in record.fields() {
            if field.inline || field.embedded {
                match &field.value {
                    Value::Record(inner) => collect(inner, out)?,
                    Value::Map(m) => {
                        for (k, v) in m.iter() {
                            let key = k
                                .stringize()
                                .ok_or_else(|| "mapping key is not a scalar".to_string())?;
                            out.push((key, v));
                        }
                    }
                    other => {
                        return Err(format!(
                            "cannot expand a {} field inline",
                            other.type_name()
                        ))
                    }
                }
            } else {
                let key = match &field.tag {
                    Some(tag) => tag.split(',').next().unwrap_or("").to_string(),
                    None => field.name.to_lowercase(),
                };
                out.push((key, &field.value));
            }
        }
        Ok(())
    }

    let mut entries = Vec::new();
    collect(record, &mut entries).map_err(serde::ser::Error::custom)?;
    let mut m = serializer.serialize_map(Some(entries.len()))?;
    for (k, v) in entries {
        m.serialize_entry(&k, v)?;
    }
    m.end()
}

// === Deserialization ===

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("any YAML value")
            }

            fn visit_unit<E>(self) -> std::result::Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E>(self) -> std::result::Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_bool<E>(self, v: bool) -> std::result::Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Value, E> {
                Ok(Value::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
                i64::try_from(v)
                    .map(Value::Int)
                    .map_err(|_| E::custom(format!("integer {v} overflows")))
            }

            fn visit_f64<E>(self, v: f64) -> std::result::Result<Value, E> {
                Ok(Value::Float(v))
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Value, E> {
                Ok(Value::String(v.to_string()))
            }

            fn visit_string<E>(self, v: String) -> std::result::Result<Value, E> {
                Ok(Value::String(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Value, A::Error> {
                let mut out = Vec::new();
                while let Some(v) = seq.next_element()? {
                    out.push(v);
                }
                Ok(Value::Seq(out))
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Value, A::Error> {
                let mut out = Mapping::new();
                while let Some((k, v)) = map.next_entry::<Value, Value>()? {
                    out.insert(k, v);
                }
                Ok(Value::Map(out))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}
