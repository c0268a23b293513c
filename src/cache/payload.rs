//! Normalized payload shapes held by cache entries.

use serde_json::{Map, Value};

use super::error::RemoteError;
use super::keys::EntityId;

/// A single entity as a JSON object.
pub type Record = Map<String, Value>;

/// Envelope members that may sit next to `data` without making the body a
/// plain entity.
const ENVELOPE_KEYS: &[&str] = &["data", "meta", "links", "message", "success", "status"];

/// Cached data in one of two tagged shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Collection {
        items: Vec<Record>,
        meta: Option<Value>,
    },
    Item(Record),
}

impl Payload {
    pub fn collection(items: Vec<Record>) -> Self {
        Self::Collection { items, meta: None }
    }

    /// Normalize a response body. Accepts a bare array, a bare object, or a
    /// `{ data, meta }` envelope wrapping either.
    pub fn from_json(body: Value) -> Result<Self, RemoteError> {
        match body {
            Value::Array(values) => Ok(Self::Collection {
                items: records(values)?,
                meta: None,
            }),
            Value::Object(mut object) if is_envelope(&object) => {
                let meta = object.remove("meta");
                match object.remove("data") {
                    Some(Value::Array(values)) => Ok(Self::Collection {
                        items: records(values)?,
                        meta,
                    }),
                    Some(Value::Object(record)) => Ok(Self::Item(record)),
                    Some(other) => Err(RemoteError::unexpected_shape(format!(
                        "envelope `data` is {}",
                        json_kind(&other)
                    ))),
                    None => Err(RemoteError::unexpected_shape("envelope carries no `data`")),
                }
            }
            Value::Object(record) => Ok(Self::Item(record)),
            other => Err(RemoteError::unexpected_shape(format!(
                "response body is {}",
                json_kind(&other)
            ))),
        }
    }

    /// Normalize the body of a write. Empty bodies and bare status envelopes
    /// yield `None`.
    pub fn entity_from_json(body: Value) -> Result<Option<Record>, RemoteError> {
        match body {
            Value::Null => Ok(None),
            Value::Object(mut object) if is_envelope(&object) || is_status_only(&object) => {
                match object.remove("data") {
                    Some(Value::Object(record)) => Ok(Some(record)),
                    Some(Value::Null) | None => Ok(None),
                    Some(other) => Err(RemoteError::unexpected_shape(format!(
                        "write response `data` is {}",
                        json_kind(&other)
                    ))),
                }
            }
            Value::Object(record) => Ok(Some(record)),
            other => Err(RemoteError::unexpected_shape(format!(
                "write response is {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn items(&self) -> Option<&[Record]> {
        match self {
            Self::Collection { items, .. } => Some(items),
            Self::Item(_) => None,
        }
    }

    pub fn as_item(&self) -> Option<&Record> {
        match self {
            Self::Item(record) => Some(record),
            Self::Collection { .. } => None,
        }
    }

    pub fn meta(&self) -> Option<&Value> {
        match self {
            Self::Collection { meta, .. } => meta.as_ref(),
            Self::Item(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Collection { items, .. } => items.len(),
            Self::Item(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the collection holds an item with the given id.
    pub fn contains_id(&self, id_field: &str, id: &EntityId) -> bool {
        self.items().is_some_and(|items| {
            items
                .iter()
                .any(|record| record_id(record, id_field).as_ref() == Some(id))
        })
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Collection { items, meta } => {
                let data = Value::Array(items.iter().cloned().map(Value::Object).collect());
                match meta {
                    Some(meta) => serde_json::json!({ "data": data, "meta": meta }),
                    None => data,
                }
            }
            Self::Item(record) => Value::Object(record.clone()),
        }
    }
}

/// Identifier of a record under the family's id field.
pub fn record_id(record: &Record, id_field: &str) -> Option<EntityId> {
    record.get(id_field).and_then(EntityId::from_value)
}

fn records(values: Vec<Value>) -> Result<Vec<Record>, RemoteError> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match value {
            Value::Object(record) => Ok(record),
            other => Err(RemoteError::unexpected_shape(format!(
                "collection item {index} is {}",
                json_kind(&other)
            ))),
        })
        .collect()
}

fn is_envelope(object: &Map<String, Value>) -> bool {
    object.contains_key("data") && object.keys().all(|key| ENVELOPE_KEYS.contains(&key.as_str()))
}

fn is_status_only(object: &Map<String, Value>) -> bool {
    !object.is_empty() && object.keys().all(|key| ENVELOPE_KEYS.contains(&key.as_str()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
