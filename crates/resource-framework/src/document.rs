//! # Document Identifiers and Field Conventions
//!
//! Stored documents are JSON objects. Every document carries an `_id`, and the
//! repository core maintains `createdAt` / `updatedAt` timestamps.
//!
//! Identifiers come in two shapes:
//!
//! - **Native**: a time-ordered UUID (v7), the engine's own identifier type.
//!   On the wire it is written in extended-JSON form: `{"$oid": "<uuid>"}`.
//! - **Text**: any other string. Older records and records imported from other
//!   systems use plain string ids, so lookups fall back to a literal string
//!   match when the input is not a native id (see [`IdPolicy`]).

use crate::error::RepositoryError;
use chrono::{DateTime, SubsecRound, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const ID_FIELD: &str = "_id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

const OID_KEY: &str = "$oid";

/// The identifier of a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentId {
    Native(Uuid),
    Text(String),
}

/// How string identifiers are resolved into [`DocumentId`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdPolicy {
    /// Strings that are not native ids are matched literally.
    #[default]
    Lenient,
    /// Strings that are not native ids are rejected with `InvalidId`.
    Strict,
}

impl FromStr for IdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(IdPolicy::Lenient),
            "strict" => Ok(IdPolicy::Strict),
            other => Err(format!("unknown id policy {other:?}")),
        }
    }
}

impl DocumentId {
    /// Generates a fresh native identifier.
    pub fn generate() -> Self {
        DocumentId::Native(Uuid::now_v7())
    }

    /// Resolves a caller-supplied string under the given policy.
    pub fn parse(raw: &str, policy: IdPolicy) -> Result<Self, RepositoryError> {
        if raw.is_empty() {
            return Err(RepositoryError::InvalidId("empty id".into()));
        }
        match Uuid::parse_str(raw) {
            Ok(uuid) => Ok(DocumentId::Native(uuid)),
            Err(_) => match policy {
                IdPolicy::Lenient => Ok(DocumentId::Text(raw.to_string())),
                IdPolicy::Strict => Err(RepositoryError::InvalidId(raw.to_string())),
            },
        }
    }

    /// Reads an identifier out of a stored `_id` value.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(DocumentId::Text(s.clone())),
            Value::Object(map) if map.len() == 1 => map
                .get(OID_KEY)
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(DocumentId::Native),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Native(uuid) => {
                let mut map = serde_json::Map::with_capacity(1);
                map.insert(OID_KEY.to_string(), Value::String(uuid.to_string()));
                Value::Object(map)
            }
            DocumentId::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, DocumentId::Native(_))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Native(uuid) => write!(f, "{uuid}"),
            DocumentId::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DocumentId::Native(uuid) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(OID_KEY, &uuid.to_string())?;
                map.end()
            }
            DocumentId::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Oid {
                #[serde(rename = "$oid")]
                oid: Uuid,
            },
            Text(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Oid { oid } => DocumentId::Native(oid),
            Repr::Text(s) => DocumentId::Text(s),
        })
    }
}

/// Current time at the precision timestamps are persisted with (microseconds).
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Encodes a timestamp the way stored documents carry it.
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::from(at.timestamp_micros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_prefers_native_ids() {
        let native = DocumentId::generate();
        let parsed = DocumentId::parse(&native.to_string(), IdPolicy::Strict).unwrap();
        assert_eq!(parsed, native);
    }

    #[test]
    fn lenient_policy_falls_back_to_text() {
        let parsed = DocumentId::parse("legacy-42", IdPolicy::Lenient).unwrap();
        assert_eq!(parsed, DocumentId::Text("legacy-42".into()));
    }

    #[test]
    fn strict_policy_rejects_text_and_empty_is_always_invalid() {
        assert!(matches!(
            DocumentId::parse("legacy-42", IdPolicy::Strict),
            Err(RepositoryError::InvalidId(_))
        ));
        assert!(matches!(
            DocumentId::parse("", IdPolicy::Lenient),
            Err(RepositoryError::InvalidId(_))
        ));
    }

    #[test]
    fn serde_keeps_native_and_text_apart() {
        let native = DocumentId::generate();
        let encoded = serde_json::to_value(&native).unwrap();
        assert_eq!(encoded, native.to_value());
        assert_eq!(encoded["$oid"], json!(native.to_string()));
        assert_eq!(serde_json::from_value::<DocumentId>(encoded).unwrap(), native);

        let text = DocumentId::Text(native.to_string());
        let encoded = serde_json::to_value(&text).unwrap();
        assert!(encoded.is_string());
        assert_eq!(DocumentId::from_value(&encoded), Some(text));
    }
}
