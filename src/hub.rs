//! Broadcast Hub
//!
//! Owns the registry, chat history and call table as plain fields and
//! processes one inbound command at a time, so no locks guard hub state and
//! tests can run any number of independent hubs. Connection tasks talk to the
//! hub over an mpsc channel and receive events on their own outbound channel.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::calls::CallTable;
use crate::history::{HistoryBuffer, WELCOME_LIMIT};
use crate::protocol::{ClientMessage, ServerInfo, ServerMessage, UserInfo, UserStatus};
use crate::registry::{ConnectionId, Registry};

/// Commands the hub task processes in arrival order.
#[derive(Debug)]
pub enum HubCommand {
    /// A connection opened; `tx` is its outbound event channel.
    Attach {
        conn: ConnectionId,
        tx: mpsc::UnboundedSender<ServerMessage>,
    },
    /// A decoded frame arrived on `conn`.
    Frame {
        conn: ConnectionId,
        message: ClientMessage,
    },
    /// The connection closed.
    Detach { conn: ConnectionId },
    /// Status side-channel query.
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
}

/// Payload of the HTTP status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub ip: String,
    pub port: u16,
    pub users: Vec<UserInfo>,
    pub online: usize,
}

/// The hub: presence, history, call sessions and delivery primitives.
pub struct Hub {
    server_info: ServerInfo,
    registry: Registry,
    history: HistoryBuffer,
    calls: CallTable,
    links: HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>,
}

impl Hub {
    pub fn new(server_info: ServerInfo) -> Self {
        Self {
            server_info,
            registry: Registry::new(),
            history: HistoryBuffer::new(),
            calls: CallTable::new(),
            links: HashMap::new(),
        }
    }

    /// Drive the hub from a command channel until all senders drop.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                HubCommand::Attach { conn, tx } => self.attach(conn, tx),
                HubCommand::Frame { conn, message } => self.handle(conn, message),
                HubCommand::Detach { conn } => self.detach(conn),
                HubCommand::Status { reply } => {
                    let _ = reply.send(self.status_snapshot());
                }
            }
        }
    }

    pub fn attach(&mut self, conn: ConnectionId, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.links.insert(conn, tx);
    }

    /// Remove the connection and, if it had joined, publish its departure.
    pub fn detach(&mut self, conn: ConnectionId) {
        self.links.remove(&conn);
        if let Some(user) = self.registry.leave(conn) {
            // A session survives one participant's disconnect so the other
            // can still end it unilaterally; once both are gone it is dropped.
            for (call_id, peer) in self.calls.sessions_involving(user.id) {
                if self.registry.conn_by_user(peer).is_none() {
                    self.calls.remove(&call_id);
                }
            }
            self.broadcast_all(
                ServerMessage::UserLeft {
                    user_id: user.id,
                    username: user.username,
                },
                None,
            );
            self.publish_presence();
        }
    }

    /// Dispatch one inbound message. Anything arriving before `join` has no
    /// user to attribute it to and is silently dropped.
    pub fn handle(&mut self, conn: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Join { username } => self.on_join(conn, username),
            ClientMessage::Message { content } => self.on_message(conn, content),
            ClientMessage::Typing => self.on_typing(conn),
            ClientMessage::Status { status } => self.on_status(conn, status),
            ClientMessage::CallRequest { target_id, call_id } => {
                self.on_call_request(conn, target_id, call_id)
            }
            ClientMessage::CallAccept { caller_id, call_id } => {
                self.on_call_accept(conn, caller_id, call_id)
            }
            ClientMessage::CallReject { caller_id, call_id } => {
                self.on_call_reject(conn, caller_id, call_id)
            }
            ClientMessage::CallEnd { call_id } => self.on_call_end(conn, call_id),
            ClientMessage::WebrtcSignal {
                target_id,
                call_id,
                signal,
            } => self.on_signal(conn, target_id, call_id, signal),
        }
    }

    fn on_join(&mut self, conn: ConnectionId, username: String) {
        if self.registry.user_by_conn(conn).is_some() {
            log::debug!("Ignoring repeated join on {}", conn);
            return;
        }
        let user = self.registry.join(conn, username);

        self.send_to_conn(
            conn,
            ServerMessage::Welcome {
                id: user.id,
                server_info: self.server_info.clone(),
                messages: self.history.snapshot(WELCOME_LIMIT),
            },
        );
        self.broadcast_all(ServerMessage::UserJoined { user: user.info() }, Some(conn));
        self.publish_presence();
    }

    fn on_message(&mut self, conn: ConnectionId, content: String) {
        let Some(from) = self.registry.user_by_conn(conn).map(|u| u.info()) else {
            log::debug!("Dropping chat from unjoined {}", conn);
            return;
        };
        let message = self.history.record(from, content);
        // Chat reaches everyone, the sender included
        self.broadcast_all(ServerMessage::Message { message }, None);
    }

    fn on_typing(&mut self, conn: ConnectionId) {
        let Some(user) = self.registry.user_by_conn(conn).map(|u| u.info()) else {
            return;
        };
        self.broadcast_all(ServerMessage::Typing { user }, Some(conn));
    }

    fn on_status(&mut self, conn: ConnectionId, status: UserStatus) {
        if self.registry.set_status(conn, status).is_some() {
            self.publish_presence();
        }
    }

    fn on_call_request(&mut self, conn: ConnectionId, target_id: u64, call_id: String) {
        let Some(caller) = self.registry.user_by_conn(conn).map(|u| u.info()) else {
            return;
        };
        let caller_id = caller.id;
        if target_id == caller_id {
            log::debug!("Dropping self-call {} from {}", call_id, caller_id);
            return;
        }
        let delivered = self.unicast(
            target_id,
            ServerMessage::CallIncoming {
                from: caller,
                call_id: call_id.clone(),
            },
        );
        if delivered {
            self.calls.ring(&call_id, caller_id, target_id);
        } else {
            // No NACK to the caller; the request just evaporates
            log::warn!(
                "Call {} from {} dropped, target {} not connected",
                call_id,
                caller_id,
                target_id
            );
        }
    }

    fn on_call_accept(&mut self, conn: ConnectionId, caller_id: u64, call_id: String) {
        let Some(by) = self.registry.user_by_conn(conn).map(|u| u.id) else {
            return;
        };
        if let Some(caller) = self.calls.accept(&call_id, by, caller_id) {
            self.unicast(caller, ServerMessage::CallAccepted { by, call_id });
        }
    }

    fn on_call_reject(&mut self, conn: ConnectionId, caller_id: u64, call_id: String) {
        let Some(by) = self.registry.user_by_conn(conn).map(|u| u.id) else {
            return;
        };
        if let Some(caller) = self.calls.reject(&call_id, by, caller_id) {
            self.unicast(caller, ServerMessage::CallRejected { by, call_id });
        }
    }

    fn on_call_end(&mut self, conn: ConnectionId, call_id: String) {
        let Some(by) = self.registry.user_by_conn(conn).map(|u| u.id) else {
            return;
        };
        if self.calls.end(&call_id, by) {
            // Deliberately a broadcast, not a unicast to the counter-party:
            // third peers may track call-ended events
            self.broadcast_all(ServerMessage::CallEnded { call_id, by }, None);
        }
    }

    fn on_signal(
        &mut self,
        conn: ConnectionId,
        target_id: u64,
        call_id: String,
        signal: serde_json::Value,
    ) {
        let Some(from) = self.registry.user_by_conn(conn).map(|u| u.id) else {
            return;
        };
        if !self.calls.may_relay(&call_id, from, target_id) {
            log::debug!("Dropping signal for stale or foreign call {}", call_id);
            return;
        }
        self.unicast(
            target_id,
            ServerMessage::WebrtcSignal {
                from,
                signal,
                call_id,
            },
        );
    }

    /// Deliver to every open connection, optionally excluding one. A link
    /// whose receiver is gone is skipped; it will detach on its own.
    pub fn broadcast_all(&self, message: ServerMessage, exclude: Option<ConnectionId>) {
        for (conn, tx) in &self.links {
            if Some(*conn) == exclude {
                continue;
            }
            if tx.send(message.clone()).is_err() {
                log::debug!("Skipping closed {} during broadcast", conn);
            }
        }
    }

    /// Deliver to the connection owning `target_id`. Returns whether a live
    /// recipient was found.
    pub fn unicast(&self, target_id: u64, message: ServerMessage) -> bool {
        let Some(conn) = self.registry.conn_by_user(target_id) else {
            return false;
        };
        match self.links.get(&conn) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    fn send_to_conn(&self, conn: ConnectionId, message: ServerMessage) {
        if let Some(tx) = self.links.get(&conn) {
            let _ = tx.send(message);
        }
    }

    fn publish_presence(&self) {
        self.broadcast_all(
            ServerMessage::Users {
                users: self.registry.snapshot(),
            },
            None,
        );
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            ip: self.server_info.ip.clone(),
            port: self.server_info.port,
            users: self.registry.snapshot(),
            online: self.registry.online_count(),
        }
    }
}
