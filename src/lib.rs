//! LAN Hub - Chat & Call-Signaling Library
//!
//! This library provides the core functionality for a LAN real-time hub:
//! presence, bounded chat history, typing relay and voice-call signaling
//! between pairs of peers over persistent framed-JSON connections.

pub mod calls;
pub mod client;
pub mod config;
pub mod history;
pub mod hub;
pub mod protocol;
pub mod registry;

pub use client::ClientState;
pub use config::{ClientConfig, ServerConfig};
pub use hub::{Hub, HubCommand};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{ConnectionId, Registry, User};
