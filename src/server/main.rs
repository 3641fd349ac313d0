//! LAN Hub Server - Main Entry Point
//!
//! TCP listener for the framed-JSON hub protocol, plus an HTTP status
//! side-channel for LAN discovery.

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use lanhub::hub::{Hub, HubCommand, StatusSnapshot};
use lanhub::protocol::{self, ClientMessage, FrameError, ServerInfo, ServerMessage};
use lanhub::registry::ConnectionId;
use lanhub::ServerConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "lanhub-server")]
#[command(about = "LAN Hub Server - chat and call signaling")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Override host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Override hub port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override HTTP status port
    #[arg(long)]
    status_port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    // Load configuration
    let config = if args.config.exists() {
        ServerConfig::from_file(args.config.to_str().unwrap_or_default())?
    } else {
        info!("Config file not found, using defaults");
        ServerConfig::default()
    };

    let host = args.host.unwrap_or(config.host.clone());
    let port = args.port.unwrap_or(config.port);
    let status_port = args.status_port.unwrap_or(config.status_port);

    let server_info = ServerInfo {
        ip: advertised_ip(&host),
        port,
    };

    // Hub task: owns all state, processes commands in arrival order
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let hub = Hub::new(server_info.clone());
    tokio::spawn(hub.run(cmd_rx));

    // HTTP status side-channel
    let status_addr: SocketAddr = format!("{}:{}", host, status_port).parse()?;
    let app = Router::new()
        .route("/", get(status_handler))
        .route("/status", get(status_handler))
        .with_state(cmd_tx.clone());
    let status_listener = TcpListener::bind(status_addr).await?;
    info!("Status endpoint on http://{}", status_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(status_listener, app).await {
            error!("Status endpoint error: {}", e);
        }
    });

    // Bind TCP listener
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("LAN Hub listening on {} (advertised as {})", addr, server_info.ip);

    // Accept connections
    let mut conn_seq: u64 = 0;
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        conn_seq += 1;
        let conn = ConnectionId(conn_seq);
        let cmd_tx = cmd_tx.clone();

        tokio::spawn(async move {
            info!("New connection {} from {}", conn, peer_addr);
            handle_connection(stream, peer_addr, conn, cmd_tx).await;
            info!("Connection {} from {} closed", conn, peer_addr);
        });
    }
}

/// Handle a connected peer: writer task drains the hub's outbound channel,
/// the reader loop feeds decoded frames to the hub.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    conn: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerMessage>();
    if cmd_tx.send(HubCommand::Attach { conn, tx: event_tx }).is_err() {
        return;
    }

    // Split stream for concurrent reading and writing
    let (mut read_half, mut write_half) = stream.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = event_rx.recv().await {
            if let Ok(data) = message.to_framed() {
                if write_half.write_all(&data).await.is_err() {
                    break;
                }
            }
        }
    });

    loop {
        match protocol::read_frame(&mut read_half).await {
            Ok(payload) => match ClientMessage::from_bytes(&payload) {
                Ok(message) => {
                    if cmd_tx.send(HubCommand::Frame { conn, message }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // Malformed input never propagates past this connection
                    warn!("Invalid message from {}: {}", peer_addr, e);
                }
            },
            Err(FrameError::TooLarge(len)) => {
                error!("Message too large from {} ({} bytes)", peer_addr, len);
                break;
            }
            Err(_) => break,
        }
    }

    let _ = cmd_tx.send(HubCommand::Detach { conn });
    writer_task.abort();
}

/// Answer the status endpoint from the hub's live state.
async fn status_handler(
    State(cmd_tx): State<mpsc::UnboundedSender<HubCommand>>,
) -> Result<Json<StatusSnapshot>, StatusCode> {
    let (reply, rx) = oneshot::channel();
    cmd_tx
        .send(HubCommand::Status { reply })
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let snapshot = rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(snapshot))
}

/// The address peers should dial. A wildcard bind advertises the primary
/// LAN interface instead of 0.0.0.0.
fn advertised_ip(host: &str) -> String {
    if host != "0.0.0.0" {
        return host.to_string();
    }
    let probe = || -> std::io::Result<String> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        // Routing probe only; no packet is sent
        socket.connect("10.254.254.254:9")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}
