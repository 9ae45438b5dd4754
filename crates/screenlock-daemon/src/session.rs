//! Per-source control arbitration.
//!
//! A [`SessionManager`] belongs to one source connection. It owns the active
//! session, a FIFO queue of waiting sessions, and the session -> requester
//! mapping. It never talks to sockets: every transition returns the
//! [`ControlSignal`]s the caller must deliver.

use std::collections::{HashMap, VecDeque};

use screenlock_rpc::protocol::events;
use screenlock_types::{ConnectionId, Session, SessionId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Lock,
    Unlock,
}

impl SignalKind {
    /// Event name pushed to the recipient.
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            SignalKind::Lock => events::LOCKED_CONTROL,
            SignalKind::Unlock => events::UNLOCKED_CONTROL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// The client connection that requested the session
    Requester(ConnectionId),
    /// The source connection the manager belongs to
    Owner(ConnectionId),
}

/// A lock or unlock push waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSignal {
    pub kind: SignalKind,
    pub recipient: Recipient,
    pub session: Session,
}

impl ControlSignal {
    fn lock(recipient: Recipient, session: Session) -> Self {
        Self {
            kind: SignalKind::Lock,
            recipient,
            session,
        }
    }

    fn unlock(recipient: Recipient, session: Session) -> Self {
        Self {
            kind: SignalKind::Unlock,
            recipient,
            session,
        }
    }
}

#[derive(Debug)]
pub struct SessionManager {
    owner: ConnectionId,
    active: Option<Session>,
    pending: VecDeque<Session>,
    attached: HashMap<SessionId, ConnectionId>,
}

impl SessionManager {
    #[must_use]
    pub fn new(owner: ConnectionId) -> Self {
        Self {
            owner,
            active: None,
            pending: VecDeque::new(),
            attached: HashMap::new(),
        }
    }

    /// Create a session for `requester`.
    ///
    /// The session becomes active immediately when nothing else is, which
    /// locks control for the requester and the owner; otherwise it waits at
    /// the back of the queue. The returned snapshot reflects that outcome.
    pub fn new_session(&mut self, requester: ConnectionId) -> (Session, Vec<ControlSignal>) {
        let mut session = Session::new();
        self.attached.insert(session.id().clone(), requester.clone());

        if self.active.is_some() {
            debug!(
                "[{}] Session {} queued at position {}",
                self.owner,
                session.id(),
                self.pending.len() + 1
            );
            self.pending.push_back(session.clone());
            return (session, Vec::new());
        }

        session.activate();
        debug!("[{}] Session {} active immediately", self.owner, session.id());
        self.active = Some(session.clone());

        let signals = vec![
            ControlSignal::lock(Recipient::Requester(requester), session.clone()),
            ControlSignal::lock(Recipient::Owner(self.owner.clone()), session.clone()),
        ];
        (session, signals)
    }

    /// Finish the active session and promote the oldest waiting one.
    ///
    /// The finished session is marked `Finished` before anything is promoted.
    pub fn finish_active_session(&mut self) -> Vec<ControlSignal> {
        let Some(mut finished) = self.active.take() else {
            return Vec::new();
        };
        finished.finish();
        debug!("[{}] Session {} finished", self.owner, finished.id());

        let mut signals = Vec::new();
        if let Some(requester) = self.attached.remove(finished.id()) {
            signals.push(ControlSignal::unlock(
                Recipient::Requester(requester),
                finished.clone(),
            ));
        }
        signals.push(ControlSignal::unlock(
            Recipient::Owner(self.owner.clone()),
            finished,
        ));

        self.promote_next(&mut signals);
        signals
    }

    fn promote_next(&mut self, signals: &mut Vec<ControlSignal>) {
        let Some(mut next) = self.pending.pop_front() else {
            return;
        };
        next.activate();
        debug!("[{}] Session {} promoted", self.owner, next.id());

        if let Some(requester) = self.attached.get(next.id()) {
            signals.push(ControlSignal::lock(
                Recipient::Requester(requester.clone()),
                next.clone(),
            ));
        }
        signals.push(ControlSignal::lock(
            Recipient::Owner(self.owner.clone()),
            next.clone(),
        ));
        self.active = Some(next);
    }

    /// Drop one session, whatever its state.
    ///
    /// Withdrawing the active session is the same as finishing it. A waiting
    /// session leaves the queue silently. Unknown ids are ignored.
    pub fn withdraw(&mut self, session_id: &SessionId) -> Vec<ControlSignal> {
        if self.is_active(session_id) {
            return self.finish_active_session();
        }

        if let Some(position) = self.pending.iter().position(|s| s.id() == session_id) {
            if let Some(mut withdrawn) = self.pending.remove(position) {
                withdrawn.finish();
            }
            self.attached.remove(session_id);
            debug!("[{}] Waiting session {session_id} withdrawn", self.owner);
        }
        Vec::new()
    }

    /// Finish every session because the owner is gone.
    ///
    /// Each requester gets an unlock; the owner gets nothing.
    pub fn close(&mut self) -> Vec<ControlSignal> {
        let sessions: Vec<Session> = self
            .active
            .take()
            .into_iter()
            .chain(self.pending.drain(..))
            .collect();

        let mut signals = Vec::with_capacity(sessions.len());
        for mut session in sessions {
            session.finish();
            if let Some(requester) = self.attached.remove(session.id()) {
                signals.push(ControlSignal::unlock(Recipient::Requester(requester), session));
            }
        }
        self.attached.clear();
        signals
    }

    #[must_use]
    pub fn owner(&self) -> &ConnectionId {
        &self.owner
    }

    #[must_use]
    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.active.as_ref().is_some_and(|s| s.id() == session_id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Session> {
        self.pending.iter()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn requester_of(&self, session_id: &SessionId) -> Option<&ConnectionId> {
        self.attached.get(session_id)
    }

    #[must_use]
    pub fn attached_len(&self) -> usize {
        self.attached.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenlock_types::SessionStatus;

    fn manager() -> SessionManager {
        SessionManager::new("screen-1".into())
    }

    fn requester(name: &str) -> ConnectionId {
        name.into()
    }

    #[test]
    fn test_first_session_is_active_and_attached() {
        let mut mgr = manager();
        let (session, signals) = mgr.new_session(requester("a"));

        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(mgr.attached_len(), 1);
        assert_eq!(mgr.requester_of(session.id()), Some(&requester("a")));
        assert_eq!(
            signals,
            vec![
                ControlSignal::lock(Recipient::Requester(requester("a")), session.clone()),
                ControlSignal::lock(Recipient::Owner("screen-1".into()), session),
            ]
        );
    }

    #[test]
    fn test_second_session_waits() {
        let mut mgr = manager();
        let (first, _) = mgr.new_session(requester("a"));
        let (second, signals) = mgr.new_session(requester("b"));

        assert_eq!(second.status(), SessionStatus::Waiting);
        assert!(signals.is_empty());
        assert_eq!(mgr.active().map(Session::id), Some(first.id()));
        assert_eq!(mgr.pending_len(), 1);
        assert_eq!(mgr.attached_len(), 2);
    }

    #[test]
    fn test_finish_promotes_waiting_session() {
        let mut mgr = manager();
        let (first, _) = mgr.new_session(requester("a"));
        let (second, _) = mgr.new_session(requester("b"));

        let signals = mgr.finish_active_session();

        let mut finished = first.clone();
        finished.finish();
        let mut promoted = second.clone();
        promoted.activate();

        assert_eq!(
            signals,
            vec![
                ControlSignal::unlock(Recipient::Requester(requester("a")), finished.clone()),
                ControlSignal::unlock(Recipient::Owner("screen-1".into()), finished),
                ControlSignal::lock(Recipient::Requester(requester("b")), promoted.clone()),
                ControlSignal::lock(Recipient::Owner("screen-1".into()), promoted),
            ]
        );
        assert_eq!(mgr.active().map(Session::id), Some(second.id()));
        assert_eq!(mgr.pending_len(), 0);
        assert_eq!(mgr.requester_of(first.id()), None);
        assert_eq!(mgr.attached_len(), 1);
    }

    #[test]
    fn test_unlocked_session_is_finished_before_promotion() {
        let mut mgr = manager();
        mgr.new_session(requester("a"));
        mgr.new_session(requester("b"));

        let signals = mgr.finish_active_session();
        let unlocks: Vec<_> = signals
            .iter()
            .filter(|s| s.kind == SignalKind::Unlock)
            .collect();

        assert_eq!(unlocks.len(), 2);
        assert!(
            unlocks
                .iter()
                .all(|s| s.session.status() == SessionStatus::Finished)
        );
    }

    #[test]
    fn test_fifo_promotion_order() {
        let mut mgr = manager();
        mgr.new_session(requester("a"));
        let (b, _) = mgr.new_session(requester("b"));
        let (c, _) = mgr.new_session(requester("c"));
        let (d, _) = mgr.new_session(requester("d"));

        for expected in [&b, &c, &d] {
            mgr.finish_active_session();
            assert_eq!(mgr.active().map(Session::id), Some(expected.id()));
        }

        mgr.finish_active_session();
        assert!(mgr.active().is_none());
        assert_eq!(mgr.attached_len(), 0);
    }

    #[test]
    fn test_finish_without_active_is_noop() {
        let mut mgr = manager();
        assert!(mgr.finish_active_session().is_empty());
    }

    #[test]
    fn test_withdraw_waiting_session() {
        let mut mgr = manager();
        let (first, _) = mgr.new_session(requester("a"));
        let (second, _) = mgr.new_session(requester("b"));
        let (third, _) = mgr.new_session(requester("c"));

        assert!(mgr.withdraw(second.id()).is_empty());
        assert_eq!(mgr.pending_len(), 1);
        assert_eq!(mgr.requester_of(second.id()), None);
        assert!(mgr.is_active(first.id()));

        mgr.finish_active_session();
        assert!(mgr.is_active(third.id()));
    }

    #[test]
    fn test_withdraw_active_session_promotes() {
        let mut mgr = manager();
        let (first, _) = mgr.new_session(requester("a"));
        let (second, _) = mgr.new_session(requester("b"));

        let signals = mgr.withdraw(first.id());
        assert_eq!(signals.len(), 4);
        assert!(mgr.is_active(second.id()));
    }

    #[test]
    fn test_withdraw_unknown_session_is_noop() {
        let mut mgr = manager();
        mgr.new_session(requester("a"));
        assert!(mgr.withdraw(&"missing".into()).is_empty());
        assert_eq!(mgr.attached_len(), 1);
    }

    #[test]
    fn test_close_unlocks_every_requester() {
        let mut mgr = manager();
        mgr.new_session(requester("a"));
        mgr.new_session(requester("b"));

        let signals = mgr.close();

        let recipients: Vec<_> = signals.iter().map(|s| s.recipient.clone()).collect();
        assert_eq!(
            recipients,
            vec![
                Recipient::Requester(requester("a")),
                Recipient::Requester(requester("b")),
            ]
        );
        assert!(signals.iter().all(|s| s.kind == SignalKind::Unlock));
        assert!(
            signals
                .iter()
                .all(|s| s.session.status() == SessionStatus::Finished)
        );
        assert!(mgr.active().is_none());
        assert_eq!(mgr.pending_len(), 0);
        assert_eq!(mgr.attached_len(), 0);
    }

    #[test]
    fn test_signal_event_names() {
        assert_eq!(SignalKind::Lock.event_name(), "LockedControl");
        assert_eq!(SignalKind::Unlock.event_name(), "UnlockedControl");
    }
}
