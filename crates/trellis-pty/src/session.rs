use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::pty::PtyHandle;
use crate::scrollback::ScrollbackBuffer;

/// Unique identifier for a terminal session.
pub type SessionId = u64;

/// Identifier of one subscriber queue within a session.
pub type SubscriberId = u64;

/// Errors from session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No session entry exists for this id.
    NotFound(SessionId),
    /// The session entry exists but its backing process has exited or
    /// the session was destroyed.
    Closed(SessionId),
    /// The backing process could not be started.
    Spawn(String),
    /// The owning pane was closed before the spawn finished.
    SpawnCancelled,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotFound(id) => write!(f, "session {id} not found"),
            SessionError::Closed(id) => write!(f, "session {id} is closed"),
            SessionError::Spawn(msg) => write!(f, "failed to start session: {msg}"),
            SessionError::SpawnCancelled => write!(f, "session spawn cancelled"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Events fanned out to a session's subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Raw output bytes from the backing process.
    Output(Vec<u8>),
    /// The backing process exited on its own.
    Exited { code: Option<u32> },
    /// The session was explicitly destroyed.
    Closed,
}

/// Liveness of a session entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Live,
    Closed { code: Option<u32> },
}

impl SessionStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionStatus::Closed { .. })
    }
}

/// One backing process plus its scrollback and subscriber set.
///
/// Output handling and subscription share the session lock, so a
/// subscriber registered by [`Session::subscribe`] observes exactly the
/// events appended after its scrollback snapshot: replay then live,
/// never interleaved, never gapped.
pub struct Session {
    id: SessionId,
    working_dir: PathBuf,
    purpose: String,
    pty: PtyHandle,
    scrollback: ScrollbackBuffer,
    subscribers: HashMap<SubscriberId, mpsc::Sender<SessionEvent>>,
    next_subscriber_id: SubscriberId,
    status: SessionStatus,
    created_at: SystemTime,
    last_activity: SystemTime,
}

impl Session {
    pub fn new(
        id: SessionId,
        working_dir: PathBuf,
        purpose: String,
        pty: PtyHandle,
        scrollback_max_bytes: usize,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            working_dir,
            purpose,
            pty,
            scrollback: ScrollbackBuffer::new(scrollback_max_bytes),
            subscribers: HashMap::new(),
            next_subscriber_id: 1,
            status: SessionStatus::Live,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_activity(&self) -> SystemTime {
        self.last_activity
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    /// Append backing-process output to the scrollback and fan it out to
    /// every current subscriber.
    pub fn handle_output(&mut self, bytes: &[u8]) {
        self.scrollback.append(bytes);
        self.fan_out(SessionEvent::Output(bytes.to_vec()));
        self.last_activity = SystemTime::now();
    }

    /// Register a subscriber: returns the scrollback replay (oldest
    /// first), the output sequence cursor the replay ends at, and the
    /// live event receiver.
    ///
    /// A subscriber attaching to an already-closed session receives the
    /// terminal `Exited` event immediately after its replay.
    pub fn subscribe(
        &mut self,
        queue_depth: usize,
        replay_max_bytes: usize,
    ) -> (Vec<u8>, u64, SubscriberId, mpsc::Receiver<SessionEvent>) {
        let replay = self.scrollback.replay(replay_max_bytes);
        let cursor = self.scrollback.seq();

        let subscriber_id = self.next_subscriber_id;
        self.next_subscriber_id += 1;

        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        if let SessionStatus::Closed { code } = self.status {
            let _ = tx.try_send(SessionEvent::Exited { code });
        }
        self.subscribers.insert(subscriber_id, tx);

        (replay, cursor, subscriber_id, rx)
    }

    /// Remove a subscriber. Removing an unknown id is a no-op.
    pub fn unsubscribe(&mut self, subscriber: SubscriberId) {
        self.subscribers.remove(&subscriber);
    }

    /// Forward user input to the backing process.
    pub fn write_input(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.status.is_closed() {
            return Err(SessionError::Closed(self.id));
        }
        if let Err(e) = self.pty.write(data) {
            log::debug!("session {}: write failed: {e}", self.id);
            return Err(SessionError::Closed(self.id));
        }
        self.last_activity = SystemTime::now();
        Ok(())
    }

    /// Forward a terminal geometry change to the backing process.
    /// Last writer wins when multiple clients disagree.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if self.status.is_closed() {
            return Err(SessionError::Closed(self.id));
        }
        if let Err(e) = self.pty.resize(cols, rows) {
            log::debug!("session {}: resize failed: {e}", self.id);
            return Err(SessionError::Closed(self.id));
        }
        Ok(())
    }

    /// Record that the backing process exited and notify subscribers.
    pub fn mark_exited(&mut self, code: Option<u32>) {
        self.status = SessionStatus::Closed { code };
        self.fan_out(SessionEvent::Exited { code });
    }

    /// Notify subscribers that the session is being destroyed and evict
    /// its scrollback.
    pub fn notify_closed(&mut self) {
        self.fan_out(SessionEvent::Closed);
        if !self.status.is_closed() {
            self.status = SessionStatus::Closed { code: None };
        }
        self.scrollback.clear();
    }

    pub fn close_pty(&mut self) {
        self.pty.close();
    }

    pub fn force_kill(&mut self) {
        self.pty.force_kill();
    }

    pub fn pty_try_wait(&mut self) -> Option<u32> {
        self.pty.try_wait()
    }

    /// Block until the backing process exits; only call once the PTY has
    /// reached EOF.
    pub fn wait_exit(&mut self) -> Option<u32> {
        self.pty.wait()
    }

    /// Deliver an event to every subscriber without ever blocking: a
    /// full queue drops the event for that subscriber only, and a
    /// dropped receiver removes the subscription.
    fn fan_out(&mut self, event: SessionEvent) {
        let mut dead = Vec::new();
        for (subscriber, tx) in &self.subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!(
                        "session {}: subscriber {subscriber} queue full, dropping event",
                        self.id
                    );
                }
                Err(TrySendError::Closed(_)) => dead.push(*subscriber),
            }
        }
        for subscriber in dead {
            self.subscribers.remove(&subscriber);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(scrollback_max: usize) -> Session {
        let pty = PtyHandle::spawn(Some("/bin/sh"), &std::env::temp_dir(), 80, 24).unwrap();
        Session::new(
            1,
            std::env::temp_dir(),
            "shell".to_string(),
            pty,
            scrollback_max,
        )
    }

    #[test]
    fn test_replay_then_live_ordering() {
        let mut session = test_session(1024);
        session.handle_output(b"before-attach");

        let (replay, cursor, _sub, mut rx) = session.subscribe(8, 1024);
        assert_eq!(replay, b"before-attach");
        assert_eq!(cursor, 13);

        session.handle_output(b"after-attach");
        let event = rx.try_recv().unwrap();
        assert_eq!(event, SessionEvent::Output(b"after-attach".to_vec()));
        // Nothing written before the snapshot leaks into the live stream.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fan_out_to_multiple_subscribers() {
        let mut session = test_session(1024);
        let (_, _, sub_a, mut rx_a) = session.subscribe(8, 1024);
        let (_, _, _sub_b, mut rx_b) = session.subscribe(8, 1024);

        session.handle_output(b"hello");
        assert_eq!(rx_a.try_recv().unwrap(), SessionEvent::Output(b"hello".to_vec()));
        assert_eq!(rx_b.try_recv().unwrap(), SessionEvent::Output(b"hello".to_vec()));

        session.unsubscribe(sub_a);
        session.handle_output(b"world");
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), SessionEvent::Output(b"world".to_vec()));
    }

    #[test]
    fn test_slow_subscriber_does_not_block() {
        let mut session = test_session(1024);
        let (_, _, _sub, mut rx) = session.subscribe(1, 1024);

        // Queue depth 1: the second and third events are dropped for this
        // subscriber, but fan-out itself never stalls.
        session.handle_output(b"one");
        session.handle_output(b"two");
        session.handle_output(b"three");

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Output(b"one".to_vec()));
        assert!(rx.try_recv().is_err());
        assert_eq!(session.subscriber_count(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let mut session = test_session(1024);
        let (_, _, _sub, rx) = session.subscribe(8, 1024);
        drop(rx);
        session.handle_output(b"data");
        assert_eq!(session.subscriber_count(), 0);
    }

    #[test]
    fn test_write_after_exit_fails_closed() {
        let mut session = test_session(1024);
        session.mark_exited(Some(0));
        assert_eq!(
            session.write_input(b"echo hi\n"),
            Err(SessionError::Closed(1))
        );
        assert_eq!(session.resize(100, 30), Err(SessionError::Closed(1)));
    }

    #[test]
    fn test_exit_notifies_subscribers() {
        let mut session = test_session(1024);
        let (_, _, _sub, mut rx) = session.subscribe(8, 1024);
        session.mark_exited(Some(2));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Exited { code: Some(2) });
    }

    #[test]
    fn test_subscribe_after_exit_sees_exited_event() {
        let mut session = test_session(1024);
        session.handle_output(b"last words");
        session.mark_exited(Some(0));

        let (replay, _, _sub, mut rx) = session.subscribe(8, 1024);
        assert_eq!(replay, b"last words");
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Exited { code: Some(0) });
    }

    #[test]
    fn test_notify_closed_evicts_scrollback() {
        let mut session = test_session(1024);
        session.handle_output(b"history");
        let (_, _, _sub, mut rx) = session.subscribe(8, 1024);

        session.notify_closed();
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Closed);
        assert!(session.status().is_closed());
        assert_eq!(session.scrollback_len(), 0);
    }

    #[test]
    fn test_replay_respects_bound() {
        let mut session = test_session(1024);
        session.handle_output(b"0123456789");
        let (replay, _, _, _rx) = session.subscribe(8, 4);
        assert_eq!(replay, b"6789");
    }
}
