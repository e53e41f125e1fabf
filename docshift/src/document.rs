//! Schema-less documents with dotted-path access and runtime type tags.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::UpdateError;
use crate::id::generate_document_id;

/// Field name holding a document's identifier in its serialized form.
pub const ID_FIELD: &str = "_id";

/// Runtime type tag of a document value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
            Value::Object(_) => ValueType::Object,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document in a named collection: a stable id plus arbitrary fields.
///
/// Paths are dot-separated (`"profile.avatar.url"`) and address nested objects.
/// Array elements are not addressable by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    id: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Create an empty document with a generated id.
    pub fn with_generated_id() -> Self {
        Self::new(generate_document_id())
    }

    /// Create a document from an id and a JSON object.
    ///
    /// Non-object values produce an empty document. An `_id` key inside `fields` is dropped.
    pub fn from_fields(id: impl Into<String>, fields: Value) -> Self {
        let mut fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        fields.remove(ID_FIELD);
        Self { id: id.into(), fields }
    }

    /// Builder-style field assignment for top-level or nested paths.
    ///
    /// Meant for literal paths: an invalid one trips a debug assertion and is otherwise
    /// skipped. Use [`Document::try_with`] when the path comes from input.
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        let result = self.set(path, value.into());
        debug_assert!(result.is_ok(), "invalid document path '{path}': {result:?}");
        self
    }

    /// Builder-style field assignment that reports invalid paths.
    pub fn try_with(mut self, path: &str, value: impl Into<Value>) -> Result<Self, UpdateError> {
        self.set(path, value.into())?;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Serialize the document into a JSON object including `_id`.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }

    /// Parse a JSON object carrying an `_id` string.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn value_type(&self, path: &str) -> Option<ValueType> {
        self.get(path).map(ValueType::of)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_array(&self, path: &str) -> Option<&Vec<Value>> {
        self.get(path).and_then(Value::as_array)
    }

    /// Set a value, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), UpdateError> {
        let segments = split_path(path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| UpdateError::InvalidPath(path.to_string()))?;

        let mut current = &mut self.fields;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(map) => map,
                _ => return Err(UpdateError::NotTraversable { path: path.to_string() }),
            };
        }
        current.insert(last.to_string(), value);
        Ok(())
    }

    /// Remove a value, returning it when present. Empty parent objects are kept.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments = split_path(path).ok()?;
        let (last, parents) = segments.split_last()?;

        let mut current = &mut self.fields;
        for segment in parents {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }
        current.remove(*last)
    }

    /// Mutable access to a value at `path`.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get_mut(first)?;
        for segment in segments {
            current = current.as_object_mut()?.get_mut(segment)?;
        }
        Some(current)
    }
}

pub(crate) fn split_path(path: &str) -> Result<Vec<&str>, UpdateError> {
    if path.is_empty() || path == ID_FIELD {
        return Err(UpdateError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(UpdateError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}
