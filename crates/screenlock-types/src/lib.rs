//! Shared types for screenlock components.
//!
//! This crate provides the value types used across screenlock-rpc,
//! screenlock-daemon, and screenlock-cli. All types are serializable for RPC
//! transport.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Identifier of one control claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stable identifier of one socket connection, assigned when it is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a [`Session`]. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Waiting,
    Active,
    Finished,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionStatus::Waiting => "WAITING",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Finished => "FINISHED",
        };
        f.write_str(label)
    }
}

/// One claim of exclusive control over a source.
///
/// A session starts `Waiting`. Guarding the single-active rule is the
/// session manager's job, so `activate` and `finish` never fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    status: SessionStatus,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            status: SessionStatus::Waiting,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn activate(&mut self) {
        self.status = SessionStatus::Active;
    }

    pub fn finish(&mut self) {
        self.status = SessionStatus::Finished;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// `{success, response}` wrapper carried by every outbound reply and push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub success: bool,
    pub response: T,
}

impl<T> Envelope<T> {
    #[must_use]
    pub fn success(response: T) -> Self {
        Self {
            success: true,
            response,
        }
    }
}

impl Envelope<Value> {
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            response: Value::String(message.into()),
        }
    }

    /// Unwrap a received envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] when `success` or `response` is
    /// missing (or `success` is not a boolean), and [`EnvelopeError::Failure`]
    /// carrying the response payload when `success` is false.
    pub fn into_result(value: Value) -> Result<Value, EnvelopeError> {
        let Value::Object(mut obj) = value else {
            return Err(EnvelopeError::Malformed);
        };

        let success = obj.get("success").and_then(Value::as_bool);
        let response = obj.remove("response");

        match (success, response) {
            (Some(true), Some(response)) => Ok(response),
            (Some(false), Some(response)) => Err(EnvelopeError::Failure(response)),
            _ => Err(EnvelopeError::Malformed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Server response is not well formatted.")]
    Malformed,

    #[error("Request failed: {}", failure_text(.0))]
    Failure(Value),
}

fn failure_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A statistics event.
///
/// Serializes flat: the base fields followed by every key of `data`, where a
/// data key overrides a base field of the same name.
#[derive(Debug, Clone, PartialEq)]
pub struct StatRecord {
    pub date: DateTime<Utc>,
    pub collection: String,
    pub hash_id: String,
    pub data: Map<String, Value>,
}

impl StatRecord {
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            collection: collection.into(),
            hash_id: String::new(),
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn with_hash_id(mut self, hash_id: impl Into<String>) -> Self {
        self.hash_id = hash_id.into();
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields())
    }

    fn fields(&self) -> Map<String, Value> {
        let mut obj = Map::new();
        obj.insert("date".to_string(), Value::String(self.date.to_rfc3339()));
        obj.insert("hashId".to_string(), Value::String(self.hash_id.clone()));
        obj.insert(
            "collection".to_string(),
            Value::String(self.collection.clone()),
        );
        for (key, value) in &self.data {
            obj.insert(key.clone(), value.clone());
        }
        obj
    }
}

impl Serialize for StatRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.fields();
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (key, value) in &fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
