//! Source connections: the side that owns a shared resource.

use std::time::Duration;

use serde_json::{Map, Value};

use screenlock_rpc::helpers::raw_event;
use screenlock_rpc::protocol::Message;
use screenlock_types::{ConnectionId, Session, SessionId};

use crate::session::{ControlSignal, SessionManager, SignalKind};

/// Registration parameter holding the client idle timeout in seconds.
pub const TIMEOUT_DURATION_PARAM: &str = "TimeoutDuration";

#[derive(Debug)]
pub struct SourceManager {
    sessions: SessionManager,
    params: Map<String, Value>,
}

impl SourceManager {
    #[must_use]
    pub fn new(owner: ConnectionId, params: Map<String, Value>) -> Self {
        Self {
            sessions: SessionManager::new(owner),
            params,
        }
    }

    pub fn new_session(&mut self, requester: ConnectionId) -> (Session, Vec<ControlSignal>) {
        self.sessions.new_session(requester)
    }

    pub fn finish_active_session(&mut self) -> Vec<ControlSignal> {
        self.sessions.finish_active_session()
    }

    pub fn withdraw(&mut self, session_id: &SessionId) -> Vec<ControlSignal> {
        self.sessions.withdraw(session_id)
    }

    pub fn close(&mut self) -> Vec<ControlSignal> {
        self.sessions.close()
    }

    #[must_use]
    pub fn session_manager(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// `LockedControl` push for this source's own connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be serialized.
    pub fn lock_control(session: &Session) -> Result<Message, serde_json::Error> {
        Self::control_push(SignalKind::Lock, session)
    }

    /// `UnlockedControl` push for this source's own connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be serialized.
    pub fn unlock_control(session: &Session) -> Result<Message, serde_json::Error> {
        Self::control_push(SignalKind::Unlock, session)
    }

    fn control_push(kind: SignalKind, session: &Session) -> Result<Message, serde_json::Error> {
        // Sources get the raw session, not an envelope
        raw_event(kind.event_name(), session)
    }

    /// Idle timeout its clients get.
    ///
    /// Reads `TimeoutDuration` as whole seconds, given either as a number or
    /// as a numeric string. Missing, unparseable, or zero values fall back to
    /// `default`.
    #[must_use]
    pub fn timeout_duration(&self, default: Duration) -> Duration {
        let secs = match self.params.get(TIMEOUT_DURATION_PARAM) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => parse_leading_int(s),
            _ => None,
        };

        secs.filter(|&s| s > 0)
            .map_or(default, Duration::from_secs)
    }
}

/// Digits at the start of `s` after leading whitespace (`"15s"` -> 15).
fn parse_leading_int(s: &str) -> Option<u64> {
    let trimmed = s.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}
