use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::pty::PtyHandle;
use crate::session::{Session, SessionError, SessionEvent, SessionId, SessionStatus, SubscriberId};

/// Default terminal geometry for sessions created before any client has
/// reported its real size.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Tunables for session buffering and teardown.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Upper bound on retained scrollback per session, in bytes.
    pub scrollback_max_bytes: usize,
    /// Upper bound on bytes replayed to a newly attaching subscriber.
    pub replay_max_bytes: usize,
    /// Per-subscriber live event queue depth.
    pub subscriber_queue_depth: usize,
    /// How long to wait after a graceful PTY close before force-killing
    /// the backing process.
    pub kill_grace: Duration,
    /// How long a closed session entry lingers before eviction, so
    /// in-flight operations fail with `Closed` rather than `NotFound`.
    pub reap_grace: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            scrollback_max_bytes: 4 * 1024 * 1024,
            replay_max_bytes: 4 * 1024 * 1024,
            subscriber_queue_depth: 64,
            kill_grace: Duration::from_millis(500),
            reap_grace: Duration::from_secs(30),
        }
    }
}

/// A registered subscription to one session's output.
///
/// `replay` holds the buffered scrollback (oldest first) and must be
/// delivered to the client before draining `events`: events only carry
/// output appended after the replay snapshot, so delivering replay first
/// yields a gap-free, duplicate-free stream.
pub struct Attachment {
    pub session_id: SessionId,
    pub subscriber_id: SubscriberId,
    pub replay: Vec<u8>,
    /// Output sequence number the replay ends at.
    pub cursor: u64,
    pub events: mpsc::Receiver<SessionEvent>,
}

type SessionMap = Arc<Mutex<HashMap<SessionId, Arc<Mutex<Session>>>>>;
type StopMap = Arc<Mutex<HashMap<SessionId, mpsc::Sender<()>>>>;

/// Process-wide table of backing sessions.
///
/// The registry is the only component permitted to start or terminate a
/// backing process. Sessions are keyed by id; entries are shared by
/// reference, so panes in different tabs (and clients on different
/// devices) can observe the same session concurrently.
pub struct SessionRegistry {
    sessions: SessionMap,
    io_stops: StopMap,
    next_id: AtomicU64,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            io_stops: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Spawn a backing process rooted at `working_dir` and register it.
    ///
    /// Starts a dedicated I/O thread for the session, since PTY reads
    /// are blocking.
    pub fn create_session(
        &self,
        working_dir: &Path,
        shell: Option<&str>,
        purpose: &str,
        cols: u16,
        rows: u16,
    ) -> Result<SessionId, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut pty = PtyHandle::spawn(shell, working_dir, cols, rows)
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        // Extract the reader before the session goes behind the mutex so
        // blocking reads never hold the session lock.
        let reader = pty
            .take_reader()
            .ok_or_else(|| SessionError::Spawn("PTY reader unavailable".to_string()))?;

        let session = Session::new(
            id,
            working_dir.to_path_buf(),
            purpose.to_string(),
            pty,
            self.config.scrollback_max_bytes,
        );
        let entry = Arc::new(Mutex::new(session));

        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id, Arc::clone(&entry));
        }
        if let Ok(mut stops) = self.io_stops.lock() {
            stops.insert(id, stop_tx);
        }

        start_io_thread(
            id,
            entry,
            Arc::clone(&self.sessions),
            Arc::clone(&self.io_stops),
            self.config.reap_grace,
            reader,
            stop_rx,
        );

        log::info!(
            "session {id} ({purpose}) created in {}",
            working_dir.display()
        );
        Ok(id)
    }

    /// Find a live session for the given (working directory, purpose)
    /// pair, so callers can reuse instead of re-spawning.
    pub fn find_session(&self, working_dir: &Path, purpose: &str) -> Option<SessionId> {
        let sessions = self.sessions.lock().ok()?;
        for (id, entry) in sessions.iter() {
            if let Ok(session) = entry.lock() {
                if !session.status().is_closed()
                    && session.working_dir() == working_dir
                    && session.purpose() == purpose
                {
                    return Some(*id);
                }
            }
        }
        None
    }

    /// Forward input bytes to a session's backing process.
    pub fn write(&self, id: SessionId, data: &[u8]) -> Result<(), SessionError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock().map_err(|_| SessionError::Closed(id))?;
        session.write_input(data)
    }

    /// Forward a terminal geometry change to a session's backing process.
    pub fn resize(&self, id: SessionId, cols: u16, rows: u16) -> Result<(), SessionError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock().map_err(|_| SessionError::Closed(id))?;
        session.resize(cols, rows)
    }

    /// Register a subscriber and return its scrollback replay plus live
    /// event receiver. The snapshot and the subscription are taken under
    /// one lock, so replay-then-live delivery is gap-free.
    pub fn attach(&self, id: SessionId) -> Result<Attachment, SessionError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock().map_err(|_| SessionError::NotFound(id))?;
        let (replay, cursor, subscriber_id, events) = session.subscribe(
            self.config.subscriber_queue_depth,
            self.config.replay_max_bytes,
        );
        Ok(Attachment {
            session_id: id,
            subscriber_id,
            replay,
            cursor,
            events,
        })
    }

    /// Remove a subscription. Unknown ids are a no-op; detaching never
    /// affects the session's lifetime.
    pub fn detach(&self, id: SessionId, subscriber: SubscriberId) {
        if let Ok(entry) = self.entry(id) {
            if let Ok(mut session) = entry.lock() {
                session.unsubscribe(subscriber);
            }
        }
    }

    /// Destroy a session: notify subscribers with a terminal `Closed`
    /// event, evict its scrollback, close the PTY, and force-kill the
    /// backing process if it outlives the grace timeout.
    ///
    /// Idempotent: destroying an already-destroyed id is a no-op. Safe
    /// to call concurrently with in-flight writes: those fail with
    /// `Closed` once the entry is marked.
    pub fn destroy_session(&self, id: SessionId) {
        let entry = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&id),
            Err(_) => None,
        };
        let Some(entry) = entry else {
            return;
        };

        if let Ok(mut stops) = self.io_stops.lock() {
            if let Some(tx) = stops.remove(&id) {
                let _ = tx.try_send(());
            }
        }

        {
            let mut session = match entry.lock() {
                Ok(s) => s,
                Err(_) => return,
            };
            session.notify_closed();
            session.close_pty();
        }

        let kill_grace = self.config.kill_grace;
        std::thread::Builder::new()
            .name(format!("session-kill-{id}"))
            .spawn(move || {
                std::thread::sleep(kill_grace);
                if let Ok(mut session) = entry.lock() {
                    if session.pty_try_wait().is_none() {
                        log::warn!("session {id} ignored hangup, force-killing");
                        session.force_kill();
                    }
                }
            })
            .expect("failed to spawn kill thread");

        log::info!("session {id} destroyed");
    }

    /// Current status of a session, or `None` if the entry is gone.
    pub fn session_status(&self, id: SessionId) -> Option<SessionStatus> {
        let entry = self.entry(id).ok()?;
        let session = entry.lock().ok()?;
        Some(session.status())
    }

    /// Working directory of a session, used to inherit the directory
    /// when splitting a pane.
    pub fn working_dir_of(&self, id: SessionId) -> Option<PathBuf> {
        let entry = self.entry(id).ok()?;
        let session = entry.lock().ok()?;
        Some(session.working_dir().to_path_buf())
    }

    /// List all session IDs.
    pub fn list_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = match self.sessions.lock() {
            Ok(sessions) => sessions.keys().copied().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort_unstable();
        ids
    }

    pub fn subscriber_count(&self, id: SessionId) -> usize {
        self.entry(id)
            .ok()
            .and_then(|entry| entry.lock().ok().map(|s| s.subscriber_count()))
            .unwrap_or(0)
    }

    fn entry(&self, id: SessionId) -> Result<Arc<Mutex<Session>>, SessionError> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| SessionError::NotFound(id))?;
        sessions.get(&id).cloned().ok_or(SessionError::NotFound(id))
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

/// Start the I/O read loop for a session on a dedicated OS thread.
///
/// The reader was extracted before the session went behind its mutex, so
/// blocking reads never prevent writes, resizes, or attaches.
fn start_io_thread(
    id: SessionId,
    entry: Arc<Mutex<Session>>,
    sessions: SessionMap,
    io_stops: StopMap,
    reap_grace: Duration,
    reader: Box<dyn Read + Send>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    std::thread::Builder::new()
        .name(format!("session-io-{id}"))
        .spawn(move || {
            io_loop(id, entry, sessions, io_stops, reap_grace, reader, &mut stop_rx);
        })
        .expect("failed to spawn I/O thread");
}

fn io_loop(
    id: SessionId,
    entry: Arc<Mutex<Session>>,
    sessions: SessionMap,
    io_stops: StopMap,
    reap_grace: Duration,
    mut reader: Box<dyn Read + Send>,
    stop_rx: &mut mpsc::Receiver<()>,
) {
    let mut buf = [0u8; 65536];

    loop {
        match stop_rx.try_recv() {
            Ok(()) => return,
            Err(mpsc::error::TryRecvError::Disconnected) => return,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        // Blocks until data is available or the PTY closes.
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };

        // Lock briefly to append scrollback and fan out.
        let mut session = match entry.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        session.handle_output(&buf[..n]);
    }

    // EOF: either the child exited on its own, or destroy_session closed
    // the PTY. Only the former needs an exit notification and a reap.
    let exited = {
        let mut session = match entry.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        if session.status().is_closed() {
            false
        } else {
            let code = session.wait_exit();
            session.mark_exited(code);
            log::info!("session {id} exited with code {code:?}");
            true
        }
    };

    if exited {
        std::thread::Builder::new()
            .name(format!("session-reap-{id}"))
            .spawn(move || {
                std::thread::sleep(reap_grace);
                if let Ok(mut map) = sessions.lock() {
                    map.remove(&id);
                }
                if let Ok(mut map) = io_stops.lock() {
                    map.remove(&id);
                }
                log::debug!("session {id} reaped");
            })
            .expect("failed to spawn reap thread");
    }
}
