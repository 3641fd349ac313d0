//! Connection Registry
//!
//! Maps opaque connection handles to user identities and tracks presence.
//! Identity lives only in the registry's own tables; nothing is stashed on
//! the transport object.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::protocol::{UserInfo, UserStatus};

/// Opaque handle for one live connection, assigned by the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A joined user.
#[derive(Debug, Clone)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub status: UserStatus,
    pub joined_at: DateTime<Utc>,
}

impl User {
    /// Wire snapshot of this user.
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            username: self.username.clone(),
            status: self.status,
            joined_at: self.joined_at,
        }
    }
}

/// Registry of joined users, keyed both ways between connection and user id.
///
/// User ids come from a monotonic counter and are never reused for the
/// process lifetime, so a stale reference to a departed user can never
/// resolve to a newer peer.
#[derive(Debug, Default)]
pub struct Registry {
    next_id: u64,
    users: HashMap<u64, User>,
    conn_to_user: HashMap<ConnectionId, u64>,
    user_to_conn: HashMap<u64, ConnectionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user on `conn`, assigning the next id.
    ///
    /// Usernames are client-supplied and not checked for uniqueness.
    pub fn join(&mut self, conn: ConnectionId, username: String) -> User {
        self.next_id += 1;
        let user = User {
            id: self.next_id,
            username,
            status: UserStatus::Online,
            joined_at: Utc::now(),
        };
        self.users.insert(user.id, user.clone());
        self.conn_to_user.insert(conn, user.id);
        self.user_to_conn.insert(user.id, conn);
        log::info!("User {} joined as {}", user.id, user.username);
        user
    }

    /// Remove whatever user joined on `conn`, if any.
    pub fn leave(&mut self, conn: ConnectionId) -> Option<User> {
        let user_id = self.conn_to_user.remove(&conn)?;
        self.user_to_conn.remove(&user_id);
        let user = self.users.remove(&user_id)?;
        log::info!("User {} ({}) left", user.id, user.username);
        Some(user)
    }

    /// The user who joined on `conn`, if it ever joined.
    pub fn user_by_conn(&self, conn: ConnectionId) -> Option<&User> {
        let user_id = self.conn_to_user.get(&conn)?;
        self.users.get(user_id)
    }

    /// The live connection owning `user_id`, if any.
    pub fn conn_by_user(&self, user_id: u64) -> Option<ConnectionId> {
        self.user_to_conn.get(&user_id).copied()
    }

    pub fn get(&self, user_id: u64) -> Option<&User> {
        self.users.get(&user_id)
    }

    pub fn set_status(&mut self, conn: ConnectionId, status: UserStatus) -> Option<&User> {
        let user_id = *self.conn_to_user.get(&conn)?;
        let user = self.users.get_mut(&user_id)?;
        user.status = status;
        Some(user)
    }

    /// Presence snapshot, ordered by join (ascending id).
    pub fn snapshot(&self) -> Vec<UserInfo> {
        let mut users: Vec<UserInfo> = self.users.values().map(User::info).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn online_count(&self) -> usize {
        self.users.len()
    }
}
