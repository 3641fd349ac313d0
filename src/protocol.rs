//! Wire Protocol
//!
//! Defines the JSON message envelope exchanged between peers and the hub.
//! Each direction is a closed tagged union so an unhandled message kind is a
//! compile error, not a silently ignored frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on a single frame; signaling payloads are small JSON.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Presence status of a connected user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Away,
    Busy,
    Offline,
}

/// Wire snapshot of a user, embedded in presence and chat events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: u64,
    pub username: String,
    pub status: UserStatus,
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

/// A chat message as stored in history and delivered on the wire.
///
/// `from` is a snapshot taken at send time; later status changes by the
/// sender do not rewrite delivered messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub from: UserInfo,
    pub content: String,
    pub timestamp: String,
}

/// Hub coordinates advertised in `welcome` and on the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub ip: String,
    pub port: u16,
}

/// Messages a peer sends to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        username: String,
    },
    Message {
        content: String,
    },
    Typing,
    Status {
        status: UserStatus,
    },
    CallRequest {
        target_id: u64,
        call_id: String,
    },
    CallAccept {
        caller_id: u64,
        call_id: String,
    },
    CallReject {
        caller_id: u64,
        call_id: String,
    },
    CallEnd {
        call_id: String,
    },
    WebrtcSignal {
        target_id: u64,
        call_id: String,
        /// Opaque SDP/ICE payload; the hub relays it without inspection.
        signal: Value,
    },
}

/// Messages the hub sends to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        id: u64,
        server_info: ServerInfo,
        messages: Vec<ChatMessage>,
    },
    Users {
        users: Vec<UserInfo>,
    },
    Message {
        message: ChatMessage,
    },
    UserJoined {
        user: UserInfo,
    },
    UserLeft {
        user_id: u64,
        username: String,
    },
    Typing {
        user: UserInfo,
    },
    CallIncoming {
        from: UserInfo,
        call_id: String,
    },
    CallAccepted {
        by: u64,
        call_id: String,
    },
    CallRejected {
        by: u64,
        call_id: String,
    },
    CallEnded {
        call_id: String,
        by: u64,
    },
    WebrtcSignal {
        from: u64,
        signal: Value,
        call_id: String,
    },
}

/// Errors reading a length-prefixed frame from a connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    TooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

fn frame_payload(data: Vec<u8>) -> Vec<u8> {
    let len = (data.len() as u32).to_be_bytes();
    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&len);
    framed.extend_from_slice(&data);
    framed
}

impl ClientMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize with the 4-byte big-endian length prefix.
    pub fn to_framed(&self) -> Result<Vec<u8>, serde_json::Error> {
        Ok(frame_payload(self.to_bytes()?))
    }
}

impl ServerMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize with the 4-byte big-endian length prefix.
    pub fn to_framed(&self) -> Result<Vec<u8>, serde_json::Error> {
        Ok(frame_payload(self.to_bytes()?))
    }
}

/// Read one length-prefixed frame, returning the raw payload bytes.
///
/// Decoding is left to the caller so a malformed payload can be logged and
/// skipped without tearing the connection down.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(msg_len));
    }

    let mut msg_buf = vec![0u8; msg_len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(msg_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64, username: &str) -> UserInfo {
        UserInfo {
            id,
            username: username.to_string(),
            status: UserStatus::Online,
            joined_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_join_wire_shape() {
        let msg = ClientMessage::Join {
            username: "ana".to_string(),
        };
        let json: Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "join");
        assert_eq!(json["username"], "ana");
    }

    #[test]
    fn test_call_request_uses_camel_case_fields() {
        let msg = ClientMessage::CallRequest {
            target_id: 2,
            call_id: "c1".to_string(),
        };
        let json: Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "call_request");
        assert_eq!(json["targetId"], 2);
        assert_eq!(json["callId"], "c1");
    }

    #[test]
    fn test_signal_payload_survives_relay_unparsed() {
        let signal = serde_json::json!({"kind": "offer", "sdp": "v=0..."});
        let msg = ClientMessage::WebrtcSignal {
            target_id: 7,
            call_id: "x".to_string(),
            signal: signal.clone(),
        };
        let parsed = ClientMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        if let ClientMessage::WebrtcSignal { signal: relayed, .. } = parsed {
            assert_eq!(relayed, signal);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_welcome_round_trip() {
        let msg = ServerMessage::Welcome {
            id: 1,
            server_info: ServerInfo {
                ip: "192.168.1.10".to_string(),
                port: 9090,
            },
            messages: vec![ChatMessage {
                id: 42,
                from: user(1, "ana"),
                content: "hola".to_string(),
                timestamp: "2024-01-01T00:00:00Z".to_string(),
            }],
        };
        let parsed = ServerMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        if let ServerMessage::Welcome { id, messages, .. } = parsed {
            assert_eq!(id, 1);
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].from.username, "ana");
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_framed_message() {
        let msg = ClientMessage::Typing;
        let framed = msg.to_framed().unwrap();

        // Check length prefix
        let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]);
        assert_eq!(len as usize, framed.len() - 4);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversize() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(_)));
    }

    #[tokio::test]
    async fn test_read_frame_round_trip() {
        let msg = ServerMessage::UserLeft {
            user_id: 3,
            username: "beto".to_string(),
        };
        let mut cursor = std::io::Cursor::new(msg.to_framed().unwrap());
        let payload = read_frame(&mut cursor).await.unwrap();
        let parsed = ServerMessage::from_bytes(&payload).unwrap();
        assert!(matches!(parsed, ServerMessage::UserLeft { user_id: 3, .. }));
    }
}
