//! Terminal chat client for huddle.
//!
//! Usage:
//!   # Local dev server, token from HUDDLE_TOKEN
//!   cargo run -p huddle-cli -- --server srv-1 --channel general
//!
//!   # Explicit endpoint and display name
//!   huddle --endpoint https://chat.example.com --name Alice --server srv-1 -c general -c random
//!
//! Lines typed on stdin go to the current channel (the most recently joined).
//! `/help` lists the commands.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt};

use huddle_client::{ClientConfig, ConnectionState, Session, SessionError, SessionEvent};
use huddle_protocol::{BroadcastMessage, ChannelId, ServerId};

use commands::{Command, HELP};

/// Terminal chat client for a huddle backend.
#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Terminal chat client for huddle")]
struct Args {
    /// Backend endpoint origin (overrides config and HUDDLE_ENDPOINT)
    #[arg(long)]
    endpoint: Option<String>,

    /// Config file (default: <config dir>/huddle/config.ron)
    #[arg(long)]
    config: Option<PathBuf>,

    /// User id to connect as (default: login name)
    #[arg(long)]
    user_id: Option<String>,

    /// Display name
    #[arg(long)]
    name: Option<String>,

    /// Isolation scope the channels belong to
    #[arg(long, default_value = "default")]
    server: String,

    /// Channel to join once connected (repeatable)
    #[arg(short, long = "channel")]
    channels: Vec<String>,
}

/// Channels the user wants, most recent last. The last one receives plain text.
struct Wanted {
    server: ServerId,
    channels: Vec<ChannelId>,
}

impl Wanted {
    fn current(&self) -> Option<&ChannelId> {
        self.channels.last()
    }

    fn add(&mut self, channel: ChannelId) {
        self.channels.retain(|c| c != &channel);
        self.channels.push(channel);
    }

    fn remove(&mut self, channel: &str) {
        self.channels.retain(|c| c.as_str() != channel);
    }

    /// (Re)announce every wanted channel. Called on each `Connected`.
    fn join_all(&self, session: &Session) {
        for channel in &self.channels {
            if let Err(e) = session.join_channel(channel, &self.server, None) {
                tracing::warn!(%channel, error = %e, "join failed");
            }
        }
    }
}

fn print_broadcast(msg: &BroadcastMessage) {
    let channel = msg.channel_id.as_ref().map(ChannelId::as_str).unwrap_or("?");
    let sender = msg
        .sender_name
        .as_deref()
        .or(msg.sender_id.as_ref().map(|id| id.as_str()))
        .unwrap_or("?");
    println!("[{channel}] {sender}: {}", msg.text.as_deref().unwrap_or(""));
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs to stderr; stdout carries the chat
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
        config.validate()?;
    }
    let user_id = args.user_id.unwrap_or_else(whoami::username);

    // The session and its WebSocket driver are !Send
    let local_set = tokio::task::LocalSet::new();
    local_set
        .run_until(run(config, user_id, args.name, args.server, args.channels))
        .await
}

async fn run(
    config: ClientConfig,
    user_id: String,
    name: Option<String>,
    server: String,
    channels: Vec<String>,
) -> Result<()> {
    tracing::info!(endpoint = %config.endpoint, %user_id, "starting huddle");

    let session = huddle_client::websocket_session(config);
    let mut events = session.subscribe_events();
    let _sub = session.on_message(print_broadcast);

    let mut wanted = Wanted {
        server: ServerId::from(server),
        channels: Vec::new(),
    };
    for channel in channels {
        wanted.add(ChannelId::from(channel));
    }

    session.connect(user_id.as_str(), name.as_deref())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::StateChanged(ConnectionState::Connected)) => {
                    eprintln!("* connected as {}", session.sender_name());
                    wanted.join_all(&session);
                }
                Ok(SessionEvent::StateChanged(ConnectionState::Disconnected)) => {
                    // Exhaustion is reported right behind the state change
                    if let Ok(SessionEvent::ReconnectExhausted { attempts }) = events.try_recv() {
                        break Err(anyhow!("gave up after {attempts} reconnection attempts"));
                    }
                    eprintln!("* disconnected by server");
                    break Ok(());
                }
                Ok(SessionEvent::ReconnectScheduled { attempt, delay }) => {
                    eprintln!("* reconnecting (attempt {attempt}, in {delay:?})");
                }
                Ok(SessionEvent::ReconnectExhausted { attempts }) => {
                    break Err(anyhow!("gave up after {attempts} reconnection attempts"));
                }
                Ok(SessionEvent::ProtocolViolation(detail)) => {
                    eprintln!("* protocol error: {detail}");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event receiver lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
            line = lines.next_line() => {
                // EOF or an unreadable stdin both end the session
                let Ok(Some(line)) = line else {
                    break Ok(());
                };
                if !handle_line(&session, &mut wanted, &line) {
                    break Ok(());
                }
            }
        }
    };

    session.disconnect();
    tracing::info!("huddle shutting down");
    result
}

/// Make `channel` current and join it now if the link is up. Otherwise the
/// next `Connected` picks it up through [`Wanted::join_all`].
fn join(session: &Session, wanted: &mut Wanted, channel: String) -> String {
    let channel = ChannelId::from(channel);
    wanted.add(channel.clone());
    if !session.is_connected() {
        return format!("will join {channel} once connected");
    }
    match session.join_channel(&channel, &wanted.server, None) {
        Ok(()) => format!("joined {channel}"),
        Err(SessionError::NotConnected) => format!("will join {channel} once connected"),
        Err(e) => format!("join failed: {e}"),
    }
}

/// Apply one input line. Returns `false` to quit.
fn handle_line(session: &Session, wanted: &mut Wanted, line: &str) -> bool {
    match Command::parse(line) {
        Command::Empty => {}
        Command::Quit => return false,
        Command::Help => eprintln!("{HELP}"),
        Command::Invalid(reason) => eprintln!("* {reason} (try /help)"),
        Command::Channels => {
            let active: Vec<String> = session
                .active_channels()
                .into_iter()
                .map(ChannelId::into_inner)
                .collect();
            eprintln!("* channels: {}", active.join(", "));
        }
        Command::Join(channel) => eprintln!("* {}", join(session, wanted, channel)),
        Command::Leave(channel) => {
            wanted.remove(&channel);
            if session.leave_channel(&channel) {
                eprintln!("* left {channel}");
            } else {
                eprintln!("* not in {channel}");
            }
        }
        Command::Name(name) => {
            session.set_user_name(name);
            eprintln!("* you are now {}", session.sender_name());
        }
        Command::Say(text) => {
            let Some(channel) = wanted.current() else {
                eprintln!("* no channel; /join one first");
                return true;
            };
            if let Err(e) = session.send_message(channel, text, &wanted.server, None) {
                eprintln!("* send failed: {e}");
            }
        }
    }
    true
}
