//! Helpers for building and reading event notifications.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use screenlock_types::Envelope;

use crate::protocol::{Message, Notification, RpcError};

/// Build an event whose payload is wrapped in a `{success, response}` envelope.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn envelope_event<T: Serialize>(
    name: &str,
    envelope: &Envelope<T>,
) -> Result<Message, serde_json::Error> {
    raw_event(name, envelope)
}

/// Build an event carrying `payload` as-is.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn raw_event<T: Serialize + ?Sized>(
    name: &str,
    payload: &T,
) -> Result<Message, serde_json::Error> {
    let params = serde_json::to_value(payload)?;
    Ok(Message::Notification(Notification::new(name, Some(params))))
}

/// Decode a method's params, treating absent params as JSON `null`.
///
/// # Errors
///
/// Returns an `INVALID_PARAMS` error naming the method when decoding fails.
pub fn parse_params<T: DeserializeOwned>(
    method: &str,
    params: Option<&Value>,
) -> Result<T, RpcError> {
    let value = params.cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| RpcError::invalid_params(format!("Invalid params for '{method}': {e}")))
}
