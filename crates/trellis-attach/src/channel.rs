use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use trellis_pty::{SessionError, SessionEvent, SessionId, SessionRegistry, SubscriberId};

use crate::frame::{ClientFrame, ServerFrame};

/// Unique identifier for a connected client.
pub type ClientId = u64;

/// One subscription pump: forwards a session's live events into the
/// client's outbound queue until the stream ends.
struct Pump {
    subscriber_id: SubscriberId,
    task: JoinHandle<()>,
}

/// Per-client multiplexer over one logical transport.
///
/// The embedding shell owns the connection; it hands the channel an
/// outbound frame sender and feeds decoded [`ClientFrame`]s into
/// [`AttachmentChannel::handle_frame`]. Each attached session gets its
/// own pump task, so a slow session or a torn-down subscription never
/// affects the others. Dropping the channel (client disconnect) detaches
/// everything; the sessions themselves keep running.
pub struct AttachmentChannel {
    client_id: ClientId,
    registry: Arc<SessionRegistry>,
    outbound: mpsc::Sender<ServerFrame>,
    pumps: HashMap<SessionId, Pump>,
}

impl AttachmentChannel {
    pub fn new(
        client_id: ClientId,
        registry: Arc<SessionRegistry>,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> Self {
        Self {
            client_id,
            registry,
            outbound,
            pumps: HashMap::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn is_attached(&self, session_id: SessionId) -> bool {
        self.pumps.contains_key(&session_id)
    }

    pub fn attached_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.pumps.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Subscribe this client to a session.
    ///
    /// The scrollback replay is queued as the first `data` frame, and the
    /// pump only forwards events recorded after that snapshot, so the
    /// client's stream is replay-then-live with no gap and no overlap.
    /// Attaching to an already-attached session re-subscribes with a
    /// fresh replay (the reconnect path).
    pub async fn attach(&mut self, session_id: SessionId) -> Result<(), SessionError> {
        self.detach(session_id);

        let attachment = self.registry.attach(session_id)?;
        let subscriber_id = attachment.subscriber_id;

        if self
            .outbound
            .send(ServerFrame::Data {
                session_id,
                payload: attachment.replay,
            })
            .await
            .is_err()
        {
            // Transport already gone; don't leave the subscription behind.
            log::debug!("client {}: outbound closed during attach", self.client_id);
            self.registry.detach(session_id, subscriber_id);
            return Ok(());
        }

        let outbound = self.outbound.clone();
        let mut events = attachment.events;
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let frame = match event {
                    SessionEvent::Output(payload) => ServerFrame::Data {
                        session_id,
                        payload,
                    },
                    SessionEvent::Exited { code } => ServerFrame::Exit { session_id, code },
                    SessionEvent::Closed => ServerFrame::Closed { session_id },
                };
                let terminal = matches!(frame, ServerFrame::Closed { .. });
                if outbound.send(frame).await.is_err() {
                    return;
                }
                if terminal {
                    return;
                }
            }
        });

        self.pumps.insert(
            session_id,
            Pump {
                subscriber_id,
                task,
            },
        );
        Ok(())
    }

    /// Remove this client's subscription to a session. Does not affect
    /// the session's lifetime. Unknown ids are a no-op.
    pub fn detach(&mut self, session_id: SessionId) {
        if let Some(pump) = self.pumps.remove(&session_id) {
            pump.task.abort();
            self.registry.detach(session_id, pump.subscriber_id);
        }
    }

    /// Forward input bytes to a session's backing process.
    pub fn input(&self, session_id: SessionId, data: &[u8]) -> Result<(), SessionError> {
        self.registry.write(session_id, data)
    }

    /// Forward a geometry change. Last writer wins across clients.
    pub fn resize(&self, session_id: SessionId, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.registry.resize(session_id, cols, rows)
    }

    /// Dispatch one decoded client frame. Failures are reported back to
    /// the client as an `error` frame scoped to the session; a bad frame
    /// never tears down the connection.
    pub async fn handle_frame(&mut self, frame: ClientFrame) {
        let result = match frame {
            ClientFrame::Attach { session_id } => self
                .attach(session_id)
                .await
                .map_err(|e| (session_id, e)),
            ClientFrame::Detach { session_id } => {
                self.detach(session_id);
                Ok(())
            }
            ClientFrame::Input {
                session_id,
                payload,
            } => self.input(session_id, &payload).map_err(|e| (session_id, e)),
            ClientFrame::Resize {
                session_id,
                cols,
                rows,
            } => self
                .resize(session_id, cols, rows)
                .map_err(|e| (session_id, e)),
        };

        if let Err((session_id, e)) = result {
            log::warn!(
                "client {}: frame for session {session_id} failed: {e}",
                self.client_id
            );
            let _ = self
                .outbound
                .send(ServerFrame::Error {
                    session_id,
                    message: e.to_string(),
                })
                .await;
        }
    }

    /// Detach every session this client holds (client disconnect).
    pub fn shutdown(&mut self) {
        let ids: Vec<SessionId> = self.pumps.keys().copied().collect();
        for id in ids {
            self.detach(id);
        }
    }
}

impl Drop for AttachmentChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use trellis_pty::{RegistryConfig, DEFAULT_COLS, DEFAULT_ROWS};

    fn registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(RegistryConfig::default()))
    }

    fn create(reg: &SessionRegistry) -> SessionId {
        reg.create_session(
            &std::env::temp_dir(),
            Some("/bin/sh"),
            "shell",
            DEFAULT_COLS,
            DEFAULT_ROWS,
        )
        .unwrap()
    }

    /// Receive frames until the concatenated `data` payloads contain
    /// `marker`; returns everything received so far.
    async fn recv_until_marker(
        rx: &mut mpsc::Receiver<ServerFrame>,
        marker: &str,
    ) -> (String, Vec<ServerFrame>) {
        let mut text = String::new();
        let mut frames = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for {marker:?}; got: {text}"));
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(frame)) => {
                    if let ServerFrame::Data { payload, .. } = &frame {
                        text.push_str(&String::from_utf8_lossy(payload));
                    }
                    frames.push(frame);
                    if text.contains(marker) {
                        return (text, frames);
                    }
                }
                Ok(None) => panic!("outbound closed before {marker:?}; got: {text}"),
                Err(_) => panic!("timed out waiting for {marker:?}; got: {text}"),
            }
        }
    }

    #[tokio::test]
    async fn test_attach_replays_then_streams() {
        let reg = registry();
        let id = create(&reg);

        // First client drives the session until the marker is known to be
        // in the scrollback.
        let (tx_a, mut rx_a) = mpsc::channel(64);
        let mut a = AttachmentChannel::new(1, Arc::clone(&reg), tx_a);
        a.attach(id).await.unwrap();
        a.input(id, b"echo TRELLIS_REPLAY\n").unwrap();
        recv_until_marker(&mut rx_a, "TRELLIS_REPLAY").await;

        // A late client sees that history in its very first frame.
        let (tx_b, mut rx_b) = mpsc::channel(64);
        let mut b = AttachmentChannel::new(2, Arc::clone(&reg), tx_b);
        b.attach(id).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            ServerFrame::Data { payload, .. } => {
                assert!(
                    String::from_utf8_lossy(&payload).contains("TRELLIS_REPLAY"),
                    "replay frame missing history"
                );
            }
            other => panic!("expected replay data frame first, got {other:?}"),
        }

        // Live output still follows the replay.
        b.input(id, b"echo TRELLIS_LIVE\n").unwrap();
        recv_until_marker(&mut rx_b, "TRELLIS_LIVE").await;

        reg.destroy_session(id);
    }

    #[tokio::test]
    async fn test_two_clients_mirror_one_session() {
        let reg = registry();
        let id = create(&reg);

        let (tx_a, mut rx_a) = mpsc::channel(64);
        let mut a = AttachmentChannel::new(1, Arc::clone(&reg), tx_a);
        a.attach(id).await.unwrap();

        let (tx_b, mut rx_b) = mpsc::channel(64);
        let mut b = AttachmentChannel::new(2, Arc::clone(&reg), tx_b);
        b.attach(id).await.unwrap();

        a.input(id, b"echo TRELLIS_HELLO\n").unwrap();
        recv_until_marker(&mut rx_a, "TRELLIS_HELLO").await;
        recv_until_marker(&mut rx_b, "TRELLIS_HELLO").await;

        // After A detaches, only B observes further output.
        a.detach(id);
        b.input(id, b"echo TRELLIS_WORLD\n").unwrap();
        let (_, _) = recv_until_marker(&mut rx_b, "TRELLIS_WORLD").await;

        let mut leftover = String::new();
        while let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_millis(500), rx_a.recv()).await
        {
            if let ServerFrame::Data { payload, .. } = frame {
                leftover.push_str(&String::from_utf8_lossy(&payload));
            }
        }
        assert!(
            !leftover.contains("TRELLIS_WORLD"),
            "detached client observed new output: {leftover}"
        );

        reg.destroy_session(id);
    }

    #[tokio::test]
    async fn test_handle_frame_reports_errors_in_band() {
        let reg = registry();
        let (tx, mut rx) = mpsc::channel(64);
        let mut channel = AttachmentChannel::new(1, reg, tx);

        channel
            .handle_frame(ClientFrame::Input {
                session_id: 999,
                payload: b"ls\n".to_vec(),
            })
            .await;

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match frame {
            ServerFrame::Error {
                session_id,
                message,
            } => {
                assert_eq!(session_id, 999);
                assert!(message.contains("not found"), "got: {message}");
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exit_frame_reaches_client() {
        let reg = registry();
        let id = create(&reg);

        let (tx, mut rx) = mpsc::channel(64);
        let mut channel = AttachmentChannel::new(1, Arc::clone(&reg), tx);
        channel
            .handle_frame(ClientFrame::Attach { session_id: id })
            .await;
        channel
            .handle_frame(ClientFrame::Input {
                session_id: id,
                payload: b"exit 3\n".to_vec(),
            })
            .await;

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .expect("timed out waiting for exit frame");
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(ServerFrame::Exit { session_id, code })) => {
                    assert_eq!(session_id, id);
                    assert_eq!(code, Some(3));
                    break;
                }
                Ok(Some(_)) => {}
                Ok(None) => panic!("outbound closed before exit frame"),
                Err(_) => panic!("timed out waiting for exit frame"),
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_detaches_everything() {
        let reg = registry();
        let s1 = create(&reg);
        let s2 = create(&reg);

        let (tx, _rx) = mpsc::channel(64);
        let mut channel = AttachmentChannel::new(1, Arc::clone(&reg), tx);
        channel.attach(s1).await.unwrap();
        channel.attach(s2).await.unwrap();
        assert_eq!(channel.attached_sessions(), vec![s1, s2]);
        assert_eq!(reg.subscriber_count(s1), 1);
        assert_eq!(reg.subscriber_count(s2), 1);

        channel.shutdown();
        assert!(channel.attached_sessions().is_empty());
        assert_eq!(reg.subscriber_count(s1), 0);
        assert_eq!(reg.subscriber_count(s2), 0);

        // Sessions survive the disconnect.
        assert!(reg.session_status(s1).is_some());
        assert!(reg.session_status(s2).is_some());

        reg.destroy_session(s1);
        reg.destroy_session(s2);
    }
}
