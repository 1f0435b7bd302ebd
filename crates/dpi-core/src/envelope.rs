//! Wire representation of object references.
//!
//! ```json
//! { "handle": "obj-2",
//!   "type": "MemorySchema",
//!   "string": "public",
//!   "interfaces": ["Schema"],
//!   "containers": { "getDataSource": "obj-1" },
//!   "properties": { "name": "public" } }
//! ```
//!
//! Everything but `handle` is sent only the first time a handle crosses the
//! channel in a given direction.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    error::{DpiError, DpiResult},
    registry::Handle,
};

/// One object reference on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub handle: Handle,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(rename = "string", default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    /// Navigation parents by accessor name, only those the peer already knows.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, Handle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, WireValue>>,
}

impl Envelope {
    /// A reference carrying only the handle.
    #[must_use]
    pub fn bare(handle: Handle) -> Self {
        Self {
            handle,
            type_name: None,
            display: None,
            interfaces: Vec::new(),
            containers: BTreeMap::new(),
            properties: None,
        }
    }

    /// Whether this is a repeat reference with no inlined description.
    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.type_name.is_none() && self.properties.is_none()
    }

    /// Parse one envelope from raw JSON.
    ///
    /// # Errors
    /// Returns a protocol error if the value is not an object with a handle.
    pub fn from_json(raw: serde_json::Value) -> DpiResult<Self> {
        match WireValue::try_from(raw)? {
            WireValue::Object(envelope) => Ok(*envelope),
            other => Err(DpiError::Protocol(format!(
                "expected an object envelope, got {}",
                other.shape()
            ))),
        }
    }
}

/// An encoded value: a primitive, a list, or an object envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<WireValue>),
    Object(Box<Envelope>),
}

impl WireValue {
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    /// Serialize to a JSON value.
    ///
    /// # Errors
    /// Returns an encoding error if serialization fails.
    pub fn to_json(&self) -> DpiResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| DpiError::Encoding(e.to_string()))
    }
}

impl TryFrom<serde_json::Value> for WireValue {
    type Error = DpiError;

    fn try_from(raw: serde_json::Value) -> DpiResult<Self> {
        use serde_json::Value as Json;

        Ok(match raw {
            Json::Null => Self::Null,
            Json::Bool(flag) => Self::Bool(flag),
            Json::Number(n) => match n.as_i64() {
                Some(int) => Self::Int(int),
                None => Self::Float(n.as_f64().ok_or_else(|| {
                    DpiError::Protocol(format!("unrepresentable number {n}"))
                })?),
            },
            Json::String(text) => Self::Text(text),
            Json::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<DpiResult<_>>()?,
            ),
            Json::Object(map) => {
                if !map.contains_key("handle") {
                    return Err(DpiError::Protocol("envelope has no handle".to_string()));
                }
                Self::Object(Box::new(serde_json::from_value(Json::Object(map))?))
            }
        })
    }
}

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}
