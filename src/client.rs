//! Peer-Side State
//!
//! A pure reducer over hub events plus builders for outbound actions. The
//! reducer mirrors the hub's view of the world and is idempotent under
//! replay: users and messages are keyed by id, never appended blindly.
//!
//! Call signaling that arrives before the local media session exists is
//! buffered, not dropped; `mark_local_ready` releases it in arrival order so
//! a remote description or candidate is never applied before the local side
//! is constructed.

use std::collections::VecDeque;

use serde_json::Value;
use uuid::Uuid;

use crate::history::HISTORY_CAPACITY;
use crate::protocol::{ChatMessage, ClientMessage, ServerMessage, UserInfo, UserStatus};

/// The peer's view of its own call, alongside the chat state.
#[derive(Debug, Default)]
pub struct CallView {
    pub active: bool,
    pub call_id: Option<String>,
    /// Counter-party once known (on accept, or the dialed target).
    pub peer: Option<u64>,
    /// Who is ringing us, while an inbound call is unanswered.
    pub incoming: Option<UserInfo>,
    /// Who we dialed, while our outbound call is unanswered.
    pub outgoing: Option<u64>,
    pub connected: bool,
    local_ready: bool,
    pending: VecDeque<Value>,
    ready: VecDeque<Value>,
}

impl CallView {
    fn reset(&mut self) {
        *self = CallView::default();
    }

    fn is_call(&self, call_id: &str) -> bool {
        self.call_id.as_deref() == Some(call_id)
    }

    fn push_signal(&mut self, signal: Value) {
        if self.local_ready {
            self.ready.push_back(signal);
        } else {
            self.pending.push_back(signal);
        }
    }

    /// The local media session is constructed; buffered remote signaling may
    /// now be applied.
    pub fn mark_local_ready(&mut self) {
        self.local_ready = true;
        self.ready.append(&mut self.pending);
    }

    /// Remote signals ready to hand to the negotiation layer, in arrival
    /// order. Empty until `mark_local_ready` is called.
    pub fn drain_signals(&mut self) -> Vec<Value> {
        self.ready.drain(..).collect()
    }
}

/// Everything a peer tracks about the hub's state.
#[derive(Debug, Default)]
pub struct ClientState {
    pub connected: bool,
    pub self_id: Option<u64>,
    pub username: String,
    pub users: Vec<UserInfo>,
    pub messages: Vec<ChatMessage>,
    pub typing_users: Vec<UserInfo>,
    pub call: CallView,
}

impl ClientState {
    pub fn new(username: String) -> Self {
        Self {
            username,
            ..Default::default()
        }
    }

    /// Fold one hub event into local state. Each variant touches exactly one
    /// slice; the match is exhaustive by construction.
    pub fn apply(&mut self, event: ServerMessage) {
        match event {
            ServerMessage::Welcome { id, messages, .. } => {
                self.connected = true;
                self.self_id = Some(id);
                for message in messages {
                    self.upsert_message(message);
                }
            }
            ServerMessage::Users { users } => {
                self.users = users;
                self.typing_users
                    .retain(|t| self.users.iter().any(|u| u.id == t.id));
            }
            ServerMessage::Message { message } => {
                self.upsert_message(message);
            }
            ServerMessage::UserJoined { user } => {
                self.upsert_user(user);
            }
            ServerMessage::UserLeft { user_id, .. } => {
                self.users.retain(|u| u.id != user_id);
                self.typing_users.retain(|u| u.id != user_id);
            }
            ServerMessage::Typing { user } => {
                if !self.typing_users.iter().any(|u| u.id == user.id) {
                    self.typing_users.push(user);
                }
            }
            ServerMessage::CallIncoming { from, call_id } => {
                if self.call.active {
                    log::debug!("Ignoring incoming call {} while already in one", call_id);
                    return;
                }
                self.call.active = true;
                self.call.call_id = Some(call_id);
                self.call.incoming = Some(from);
            }
            ServerMessage::CallAccepted { by, call_id } => {
                if self.call.is_call(&call_id) {
                    self.call.connected = true;
                    self.call.peer = Some(by);
                    self.call.outgoing = None;
                }
            }
            ServerMessage::CallRejected { call_id, .. } => {
                if self.call.is_call(&call_id) {
                    self.call.reset();
                }
            }
            ServerMessage::CallEnded { call_id, .. } => {
                // Broadcast to everyone; only the participants match on id
                if self.call.is_call(&call_id) {
                    self.call.reset();
                }
            }
            ServerMessage::WebrtcSignal {
                signal, call_id, ..
            } => {
                if self.call.is_call(&call_id) {
                    self.call.push_signal(signal);
                } else {
                    log::debug!("Dropping signal for unknown call {}", call_id);
                }
            }
        }
    }

    /// A user finished typing or the UI expiry fired; purely client-local.
    pub fn clear_typing(&mut self, user_id: u64) {
        self.typing_users.retain(|u| u.id != user_id);
    }

    // ---- outbound actions (fire and forget, no ack protocol) ----

    pub fn send_message(&self, content: String) -> ClientMessage {
        ClientMessage::Message { content }
    }

    pub fn send_typing(&self) -> ClientMessage {
        ClientMessage::Typing
    }

    pub fn set_status(&self, status: UserStatus) -> ClientMessage {
        ClientMessage::Status { status }
    }

    /// Dial `target_id` under a fresh call id. `None` while already in a call.
    pub fn start_call(&mut self, target_id: u64) -> Option<ClientMessage> {
        if self.call.active {
            return None;
        }
        let call_id = Uuid::new_v4().to_string();
        self.call.active = true;
        self.call.call_id = Some(call_id.clone());
        self.call.outgoing = Some(target_id);
        self.call.peer = Some(target_id);
        Some(ClientMessage::CallRequest { target_id, call_id })
    }

    /// Accept the ringing inbound call, if any.
    pub fn accept_call(&mut self) -> Option<ClientMessage> {
        let caller = self.call.incoming.take()?;
        let call_id = self.call.call_id.clone()?;
        self.call.connected = true;
        self.call.peer = Some(caller.id);
        Some(ClientMessage::CallAccept {
            caller_id: caller.id,
            call_id,
        })
    }

    /// Reject the ringing inbound call, if any.
    pub fn reject_call(&mut self) -> Option<ClientMessage> {
        let caller = self.call.incoming.take()?;
        let call_id = self.call.call_id.clone()?;
        self.call.reset();
        Some(ClientMessage::CallReject {
            caller_id: caller.id,
            call_id,
        })
    }

    /// End the current call unilaterally, at any phase.
    pub fn end_call(&mut self) -> Option<ClientMessage> {
        if !self.call.active {
            return None;
        }
        let call_id = self.call.call_id.clone()?;
        self.call.reset();
        Some(ClientMessage::CallEnd { call_id })
    }

    /// Address an opaque negotiation payload to the counter-party.
    pub fn send_signal(&self, signal: Value) -> Option<ClientMessage> {
        let target_id = self.call.peer?;
        let call_id = self.call.call_id.clone()?;
        Some(ClientMessage::WebrtcSignal {
            target_id,
            call_id,
            signal,
        })
    }

    fn upsert_user(&mut self, user: UserInfo) {
        match self.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => self.users.push(user),
        }
    }

    fn upsert_message(&mut self, message: ChatMessage) {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return;
        }
        if self.messages.len() >= HISTORY_CAPACITY {
            self.messages.remove(0);
        }
        self.messages.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: u64, username: &str) -> UserInfo {
        UserInfo {
            id,
            username: username.to_string(),
            status: UserStatus::Online,
            joined_at: Utc::now(),
        }
    }

    fn message(id: i64, content: &str) -> ChatMessage {
        ChatMessage {
            id,
            from: user(1, "ana"),
            content: content.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_duplicate_user_joined_is_idempotent() {
        let mut state = ClientState::new("beto".to_string());
        state.apply(ServerMessage::UserJoined { user: user(1, "ana") });
        state.apply(ServerMessage::UserJoined { user: user(1, "ana") });
        assert_eq!(state.users.len(), 1);
    }

    #[test]
    fn test_duplicate_message_is_idempotent() {
        let mut state = ClientState::new("beto".to_string());
        state.apply(ServerMessage::Message {
            message: message(7, "hola"),
        });
        state.apply(ServerMessage::Message {
            message: message(7, "hola"),
        });
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_user_left_clears_typing() {
        let mut state = ClientState::new("beto".to_string());
        state.apply(ServerMessage::UserJoined { user: user(1, "ana") });
        state.apply(ServerMessage::Typing { user: user(1, "ana") });
        state.apply(ServerMessage::Typing { user: user(1, "ana") });
        assert_eq!(state.typing_users.len(), 1);

        state.apply(ServerMessage::UserLeft {
            user_id: 1,
            username: "ana".to_string(),
        });
        assert!(state.users.is_empty());
        assert!(state.typing_users.is_empty());
    }

    #[test]
    fn test_outbound_call_flow() {
        let mut state = ClientState::new("beto".to_string());
        let request = state.start_call(1).unwrap();
        let call_id = match request {
            ClientMessage::CallRequest { target_id, call_id } => {
                assert_eq!(target_id, 1);
                call_id
            }
            other => panic!("Expected call_request, got {:?}", other),
        };
        // Dialing twice is refused
        assert!(state.start_call(2).is_none());

        state.apply(ServerMessage::CallAccepted {
            by: 1,
            call_id: call_id.clone(),
        });
        assert!(state.call.connected);
        assert_eq!(state.call.peer, Some(1));

        state.apply(ServerMessage::CallEnded { call_id, by: 1 });
        assert!(!state.call.active);
        assert!(state.end_call().is_none());
    }

    #[test]
    fn test_inbound_call_accept() {
        let mut state = ClientState::new("ana".to_string());
        state.apply(ServerMessage::CallIncoming {
            from: user(2, "beto"),
            call_id: "x1".to_string(),
        });
        assert!(state.call.active);
        assert_eq!(state.call.incoming.as_ref().unwrap().username, "beto");

        let accept = state.accept_call().unwrap();
        assert!(matches!(
            accept,
            ClientMessage::CallAccept { caller_id: 2, .. }
        ));
        assert!(state.call.connected);
        assert_eq!(state.call.peer, Some(2));
    }

    #[test]
    fn test_reject_resets_view() {
        let mut state = ClientState::new("ana".to_string());
        state.apply(ServerMessage::CallIncoming {
            from: user(2, "beto"),
            call_id: "x1".to_string(),
        });
        let reject = state.reject_call().unwrap();
        assert!(matches!(
            reject,
            ClientMessage::CallReject { caller_id: 2, .. }
        ));
        assert!(!state.call.active);
    }

    #[test]
    fn test_second_incoming_call_ignored_while_busy() {
        let mut state = ClientState::new("ana".to_string());
        state.apply(ServerMessage::CallIncoming {
            from: user(2, "beto"),
            call_id: "x1".to_string(),
        });
        state.apply(ServerMessage::CallIncoming {
            from: user(3, "carla"),
            call_id: "x2".to_string(),
        });
        assert_eq!(state.call.call_id.as_deref(), Some("x1"));
        assert_eq!(state.call.incoming.as_ref().unwrap().id, 2);
    }

    #[test]
    fn test_early_signals_buffer_until_local_ready() {
        let mut state = ClientState::new("ana".to_string());
        state.apply(ServerMessage::CallIncoming {
            from: user(2, "beto"),
            call_id: "x1".to_string(),
        });
        state.accept_call().unwrap();

        // Remote offer and candidates race ahead of local session setup
        state.apply(ServerMessage::WebrtcSignal {
            from: 2,
            call_id: "x1".to_string(),
            signal: serde_json::json!({"kind": "offer"}),
        });
        state.apply(ServerMessage::WebrtcSignal {
            from: 2,
            call_id: "x1".to_string(),
            signal: serde_json::json!({"kind": "candidate", "n": 1}),
        });
        assert!(state.call.drain_signals().is_empty());

        state.call.mark_local_ready();
        let signals = state.call.drain_signals();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0]["kind"], "offer");
        assert_eq!(signals[1]["n"], 1);

        // Later signals flow straight through
        state.apply(ServerMessage::WebrtcSignal {
            from: 2,
            call_id: "x1".to_string(),
            signal: serde_json::json!({"kind": "candidate", "n": 2}),
        });
        assert_eq!(state.call.drain_signals().len(), 1);
    }

    #[test]
    fn test_signal_for_foreign_call_dropped() {
        let mut state = ClientState::new("ana".to_string());
        state.apply(ServerMessage::WebrtcSignal {
            from: 2,
            call_id: "stale".to_string(),
            signal: serde_json::json!({}),
        });
        state.call.mark_local_ready();
        assert!(state.call.drain_signals().is_empty());
    }

    #[test]
    fn test_welcome_seeds_history() {
        let mut state = ClientState::new("beto".to_string());
        state.apply(ServerMessage::Welcome {
            id: 2,
            server_info: crate::protocol::ServerInfo {
                ip: "127.0.0.1".to_string(),
                port: 9090,
            },
            messages: vec![message(1, "old"), message(2, "newer")],
        });
        assert!(state.connected);
        assert_eq!(state.self_id, Some(2));
        assert_eq!(state.messages.len(), 2);
    }
}
