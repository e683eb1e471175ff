//! Wire frames exchanged with attached clients.
//!
//! Frames are serialized as tagged JSON. The transport itself (WebSocket,
//! IPC channel, pipe) is owned by the embedding shell; this module only
//! defines what travels over it.

use serde::{Deserialize, Serialize};

use trellis_pty::SessionId;

/// Frames sent from the core to an attached client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Session output bytes. The first `data` frame after an attach
    /// carries the scrollback replay; live output follows on the same
    /// queue, so clients never see history and live bytes out of order.
    Data {
        session_id: SessionId,
        payload: Vec<u8>,
    },
    /// The session's backing process exited.
    Exit {
        session_id: SessionId,
        code: Option<u32>,
    },
    /// The session was destroyed; the client should drop the pane.
    Closed { session_id: SessionId },
    /// An operation on this session failed; scoped to the session, never
    /// fatal to the connection.
    Error {
        session_id: SessionId,
        message: String,
    },
}

/// Frames sent from a client to the core.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Subscribe to a session. A reconnecting client re-issues `attach`
    /// for each previously-open session and receives a fresh replay.
    Attach { session_id: SessionId },
    /// Unsubscribe; the session keeps running.
    Detach { session_id: SessionId },
    /// Raw input bytes for the session's backing process.
    Input {
        session_id: SessionId,
        payload: Vec<u8>,
    },
    /// Terminal geometry change; last writer wins.
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
}

/// Encode a server frame for the transport.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Decode one client frame from the transport.
pub fn decode_client_frame(raw: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_frame_tagging() {
        let frame = ServerFrame::Exit {
            session_id: 7,
            code: Some(1),
        };
        let json = encode_server_frame(&frame).unwrap();
        assert!(json.contains(r#""kind":"exit""#), "got: {json}");
        assert!(json.contains(r#""session_id":7"#), "got: {json}");
    }

    #[test]
    fn test_data_frame_round_trip() {
        let frame = ServerFrame::Data {
            session_id: 3,
            payload: b"hello".to_vec(),
        };
        let json = encode_server_frame(&frame).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_decode_client_frames() {
        let attach = decode_client_frame(r#"{"kind":"attach","session_id":5}"#).unwrap();
        assert_eq!(attach, ClientFrame::Attach { session_id: 5 });

        let input =
            decode_client_frame(r#"{"kind":"input","session_id":5,"payload":[108,115,10]}"#)
                .unwrap();
        assert_eq!(
            input,
            ClientFrame::Input {
                session_id: 5,
                payload: b"ls\n".to_vec(),
            }
        );

        let resize =
            decode_client_frame(r#"{"kind":"resize","session_id":5,"cols":120,"rows":40}"#)
                .unwrap();
        assert_eq!(
            resize,
            ClientFrame::Resize {
                session_id: 5,
                cols: 120,
                rows: 40,
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        assert!(decode_client_frame(r#"{"kind":"reboot","session_id":5}"#).is_err());
    }
}
