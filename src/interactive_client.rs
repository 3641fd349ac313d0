//! Interactive LAN Hub Client
//!
//! Terminal client with real-time updates and interactive commands.

use anyhow::Result;
use clap::Parser;
use log::error;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use lanhub::client::ClientState;
use lanhub::protocol::{self, ClientMessage, ServerMessage, UserStatus};
use lanhub::ClientConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "lanhub-client")]
#[command(about = "LAN Hub Interactive Client")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/client.toml")]
    config: PathBuf,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Username
    #[arg(short, long)]
    username: Option<String>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,
}

type SharedState = Arc<Mutex<ClientState>>;
type SharedWriter = Arc<tokio::sync::Mutex<tokio::net::tcp::OwnedWriteHalf>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    // Load configuration
    let config = if args.config.exists() {
        ClientConfig::from_file(args.config.to_str().unwrap_or_default())?
    } else {
        ClientConfig::default()
    };

    let host = args.host.unwrap_or(config.server_host.clone());
    let port = args.port.unwrap_or(config.server_port);
    let username = args.username.unwrap_or(config.default_username.clone());

    println!("🚀 LAN Hub Client");
    println!("==================");
    println!("Username: {}", username);
    println!("Server: {}:{}", host, port);
    println!();

    // Connect to the hub
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("🔌 Connecting to hub...");
    let stream = TcpStream::connect(addr).await?;
    println!("✅ Connected");

    let state: SharedState = Arc::new(Mutex::new(ClientState::new(username.clone())));
    let (read_half, write_half) = stream.into_split();
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(write_half));

    // Join before anything else; the hub drops frames from unjoined peers
    send(&writer, &ClientMessage::Join { username }).await?;

    // Spawn task to handle hub events
    let reducer_state = state.clone();
    let mut server_task =
        tokio::spawn(async move { handle_hub_events(read_half, reducer_state).await });

    // Spawn task to handle user input
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();
    let input_task = tokio::spawn(async move { handle_user_input(cmd_tx).await });

    println!();
    println!("💬 Interactive Commands:");
    println!("  say <text>      - Send a chat message");
    println!("  typing          - Announce you are typing");
    println!("  users           - List connected users");
    println!("  status <s>      - Set status (online|away|busy|offline)");
    println!("  call <user_id>  - Start a call");
    println!("  accept / reject - Answer an incoming call");
    println!("  end             - End the current call");
    println!("  quit            - Exit client");
    println!();

    loop {
        tokio::select! {
            Some(command) = cmd_rx.recv() => {
                if !run_command(&command, &state, &writer).await? {
                    println!("👋 Goodbye!");
                    break;
                }
            }
            _ = &mut server_task => {
                println!("Hub connection lost");
                break;
            }
        }
    }

    input_task.abort();
    Ok(())
}

/// Execute one command line. Returns `false` on quit.
async fn run_command(command: &str, state: &SharedState, writer: &SharedWriter) -> Result<bool> {
    let parts: Vec<&str> = command.trim().split_whitespace().collect();
    if parts.is_empty() {
        return Ok(true);
    }

    match parts[0].to_lowercase().as_str() {
        "say" => {
            if parts.len() < 2 {
                println!("Usage: say <text>");
                return Ok(true);
            }
            let content = parts[1..].join(" ");
            let msg = state.lock().send_message(content);
            send(writer, &msg).await?;
        }
        "typing" => {
            let msg = state.lock().send_typing();
            send(writer, &msg).await?;
        }
        "users" => {
            let users = state.lock().users.clone();
            println!("👥 Connected users:");
            for user in users {
                println!("  #{} {} ({:?})", user.id, user.username, user.status);
            }
        }
        "status" => {
            if parts.len() < 2 {
                println!("Usage: status <online|away|busy|offline>");
                return Ok(true);
            }
            let status = match parts[1] {
                "online" => UserStatus::Online,
                "away" => UserStatus::Away,
                "busy" => UserStatus::Busy,
                "offline" => UserStatus::Offline,
                other => {
                    println!("Unknown status: {}", other);
                    return Ok(true);
                }
            };
            let msg = state.lock().set_status(status);
            send(writer, &msg).await?;
        }
        "call" => {
            if parts.len() < 2 {
                println!("Usage: call <user_id>");
                return Ok(true);
            }
            let Ok(target) = parts[1].parse::<u64>() else {
                println!("Not a user id: {}", parts[1]);
                return Ok(true);
            };
            let msg = state.lock().start_call(target);
            match msg {
                Some(msg) => {
                    println!("📞 Calling user {}...", target);
                    send(writer, &msg).await?;
                }
                None => println!("Already in a call"),
            }
        }
        "accept" => {
            let msg = {
                let mut state = state.lock();
                let msg = state.accept_call();
                if msg.is_some() {
                    // Stand-in for local media setup; releases buffered signals
                    state.call.mark_local_ready();
                }
                msg
            };
            match msg {
                Some(msg) => {
                    println!("✅ Call accepted");
                    send(writer, &msg).await?;
                }
                None => println!("No incoming call"),
            }
        }
        "reject" => {
            let msg = state.lock().reject_call();
            match msg {
                Some(msg) => {
                    println!("🚫 Call rejected");
                    send(writer, &msg).await?;
                }
                None => println!("No incoming call"),
            }
        }
        "end" => {
            let msg = state.lock().end_call();
            match msg {
                Some(msg) => {
                    println!("📴 Call ended");
                    send(writer, &msg).await?;
                }
                None => println!("No active call"),
            }
        }
        "quit" | "exit" => return Ok(false),
        other => {
            println!("Unknown command: {}", other);
        }
    }
    Ok(true)
}

async fn handle_hub_events(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    state: SharedState,
) -> Result<()> {
    loop {
        let payload = match protocol::read_frame(&mut reader).await {
            Ok(payload) => payload,
            Err(e) => {
                error!("Error receiving event: {}", e);
                break;
            }
        };
        let message = match ServerMessage::from_bytes(&payload) {
            Ok(message) => message,
            Err(e) => {
                error!("Malformed event: {}", e);
                continue;
            }
        };

        render(&message);
        let mut state = state.lock();
        let was_outgoing = state.call.outgoing.is_some();
        state.apply(message);
        // Our outbound call just connected; local session comes up now
        if was_outgoing && state.call.connected {
            state.call.mark_local_ready();
        }
        for signal in state.call.drain_signals() {
            println!("📡 Remote signal: {}", signal);
        }
        prompt();
    }
    Ok(())
}

fn render(message: &ServerMessage) {
    match message {
        ServerMessage::Welcome { id, messages, .. } => {
            println!("🎉 Joined as user #{}", id);
            if !messages.is_empty() {
                println!("🕘 Recent history ({} messages):", messages.len());
                for m in messages {
                    println!("  [{}] {}: {}", m.timestamp, m.from.username, m.content);
                }
            }
        }
        ServerMessage::Users { users } => {
            let names: Vec<String> = users
                .iter()
                .map(|u| format!("{} (#{})", u.username, u.id))
                .collect();
            println!("👥 Online: {}", names.join(", "));
        }
        ServerMessage::Message { message } => {
            println!("💬 {}: {}", message.from.username, message.content);
        }
        ServerMessage::UserJoined { user } => {
            println!("🟢 {} joined (#{})", user.username, user.id);
        }
        ServerMessage::UserLeft { username, user_id } => {
            println!("🔴 {} left (#{})", username, user_id);
        }
        ServerMessage::Typing { user } => {
            println!("✏️  {} is typing...", user.username);
        }
        ServerMessage::CallIncoming { from, .. } => {
            println!(
                "📞 Incoming call from {} (#{}) - 'accept' or 'reject'",
                from.username, from.id
            );
        }
        ServerMessage::CallAccepted { by, .. } => {
            println!("✅ User #{} accepted the call", by);
        }
        ServerMessage::CallRejected { by, .. } => {
            println!("🚫 User #{} rejected the call", by);
        }
        ServerMessage::CallEnded { by, call_id } => {
            println!("📴 Call {} ended by #{}", call_id, by);
        }
        ServerMessage::WebrtcSignal { .. } => {
            // Printed after the reducer decides it belongs to our call
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

async fn handle_user_input(cmd_tx: mpsc::UnboundedSender<String>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();

    prompt();
    while let Some(line) = lines.next_line().await? {
        if cmd_tx.send(line).is_err() {
            break;
        }
        prompt();
    }
    Ok(())
}

async fn send(writer: &SharedWriter, message: &ClientMessage) -> Result<()> {
    let data = message.to_framed()?;
    writer.lock().await.write_all(&data).await?;
    Ok(())
}
