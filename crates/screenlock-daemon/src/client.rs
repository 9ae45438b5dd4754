//! Client connections: the side that asks for control of a source.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use screenlock_rpc::helpers::envelope_event;
use screenlock_rpc::protocol::{Message, events};
use screenlock_types::{ConnectionId, Envelope, Session, SessionId};

use crate::session::SignalKind;

/// Single-shot idle timer for one connection.
///
/// Every `reset` aborts the pending firing and schedules a new one under a
/// fresh generation number. A firing reports its generation on the channel;
/// the connection only acts on it when [`IdleTimer::is_current`] agrees, so a
/// firing that raced a reset is ignored.
#[derive(Debug)]
pub struct IdleTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
    fired_tx: mpsc::UnboundedSender<u64>,
}

impl IdleTimer {
    #[must_use]
    pub fn new(fired_tx: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            generation: 0,
            handle: None,
            fired_tx,
        }
    }

    pub fn reset(&mut self, timeout: Duration) {
        self.cancel();

        let generation = self.generation;
        let fired_tx = self.fired_tx.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = fired_tx.send(generation);
        }));
        trace!("Idle timer armed: generation={generation}, timeout={timeout:?}");
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_armed() && generation == self.generation
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// The source and session a client currently controls or waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub source: ConnectionId,
    pub session: SessionId,
}

#[derive(Debug)]
pub struct ClientManager {
    binding: Option<Binding>,
    idle_timeout: Duration,
    timer: IdleTimer,
}

impl ClientManager {
    #[must_use]
    pub fn new(timer: IdleTimer, idle_timeout: Duration) -> Self {
        Self {
            binding: None,
            idle_timeout,
            timer,
        }
    }

    #[must_use]
    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Attach to a source session and start counting idle time.
    pub fn bind(&mut self, binding: Binding, idle_timeout: Duration) {
        self.binding = Some(binding);
        self.idle_timeout = idle_timeout;
        self.reset_timeout();
    }

    /// Detach and stop the idle timer.
    pub fn unbind(&mut self) -> Option<Binding> {
        self.timer.cancel();
        self.binding.take()
    }

    /// Detach only if still bound to `session`.
    pub fn unbind_session(&mut self, session: &SessionId) -> bool {
        if self.binding.as_ref().is_some_and(|b| &b.session == session) {
            self.unbind();
            return true;
        }
        false
    }

    pub fn reset_timeout(&mut self) {
        self.timer.reset(self.idle_timeout);
    }

    #[must_use]
    pub fn is_timer_current(&self, generation: u64) -> bool {
        self.timer.is_current(generation)
    }

    /// `LockedControl` / `UnlockedControl` push for this client.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be serialized.
    pub fn control_push(kind: SignalKind, session: &Session) -> Result<Message, serde_json::Error> {
        envelope_event(kind.event_name(), &Envelope::success(session))
    }

    /// `ControlSession` answer to a `TakeControl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be serialized.
    pub fn control_session_reply(
        outcome: Result<&Session, String>,
    ) -> Result<Message, serde_json::Error> {
        match outcome {
            Ok(session) => envelope_event(events::CONTROL_SESSION, &Envelope::success(session)),
            Err(message) => envelope_event(events::CONTROL_SESSION, &Envelope::failure(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::Instant;

    fn client() -> (ClientManager, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ClientManager::new(IdleTimer::new(tx), Duration::from_secs(30)),
            rx,
        )
    }

    fn binding(source: &str, session: &str) -> Binding {
        Binding {
            source: source.into(),
            session: session.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timer_fires_within_window() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IdleTimer::new(tx);

        let start = Instant::now();
        timer.reset(Duration::from_secs(1));
        let generation = rx.recv().await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(1), "fired early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "fired late: {elapsed:?}");
        assert!(timer.is_current(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_prior_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IdleTimer::new(tx);

        timer.reset(Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(600)).await;
        timer.reset(Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "first firing must be cancelled");

        let generation = rx.recv().await.unwrap();
        assert!(timer.is_current(generation));
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "only one firing per idle period");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timer = IdleTimer::new(tx);

        timer.reset(Duration::from_secs(1));
        let old = timer.generation();
        timer.reset(Duration::from_secs(1));

        assert!(!timer.is_current(old));
        assert!(timer.is_current(timer.generation()));

        timer.cancel();
        assert!(!timer.is_armed());
        assert!(!timer.is_current(timer.generation()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_arms_timer_with_source_timeout() {
        let (mut client, mut rx) = client();
        assert!(!client.is_bound());

        let start = Instant::now();
        client.bind(binding("screen-1", "s-1"), Duration::from_secs(1));
        assert_eq!(client.idle_timeout(), Duration::from_secs(1));

        let generation = rx.recv().await.unwrap();
        assert!(client.is_timer_current(generation));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_stops_timer() {
        let (mut client, mut rx) = client();
        client.bind(binding("screen-1", "s-1"), Duration::from_secs(1));

        let previous = client.unbind();
        assert_eq!(previous, Some(binding("screen-1", "s-1")));

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_session_only_matches_current() {
        let (mut client, _rx) = client();
        client.bind(binding("screen-1", "s-2"), Duration::from_secs(30));

        assert!(!client.unbind_session(&"s-1".into()));
        assert!(client.is_bound());
        assert!(client.unbind_session(&"s-2".into()));
        assert!(!client.is_bound());
    }

    #[test]
    fn test_control_push_is_enveloped() {
        let session = Session::new();
        let Message::Notification(push) =
            ClientManager::control_push(SignalKind::Unlock, &session).unwrap()
        else {
            panic!("Expected Notification");
        };
        assert_eq!(push.method, events::UNLOCKED_CONTROL);
        let params = push.params.unwrap();
        assert_eq!(params["success"], true);
        assert_eq!(params["response"]["id"], session.id().as_str());
    }

    #[test]
    fn test_control_session_failure_reply() {
        let msg = ClientManager::control_session_reply(Err("nope".to_string())).unwrap();
        let Message::Notification(reply) = msg else {
            panic!("Expected Notification");
        };
        assert_eq!(reply.method, events::CONTROL_SESSION);
        assert_eq!(reply.params, Some(json!({"success": false, "response": "nope"})));
    }
}
