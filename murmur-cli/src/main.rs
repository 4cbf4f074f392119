//! murmur: terminal chat peer.
//!
//! Probes the well-known address, hosts the relay if nobody answers, and
//! chats over it either way. Lines typed on stdin are sent as chat;
//! `/typing on|off` toggles the typing indicator and `/quit` leaves.

mod view;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

use murmur_relay::{
    ChatEvent, ChatServer, HistoryConfig, Peer, PeerConfig, ReconnectPolicy, RelayError,
    ServerConfig,
};
use view::Input;

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "LAN chat that elects its own relay server")]
struct Args {
    /// Well-known relay address every peer probes
    #[arg(short, long, default_value = "127.0.0.1:7777")]
    addr: String,

    /// Directory for the chat transcript when this peer hosts
    #[arg(long, default_value = "HistoricLog")]
    history_dir: PathBuf,

    /// Do not write a transcript
    #[arg(long)]
    no_history: bool,

    /// Delay before the first reconnect attempt, in milliseconds
    #[arg(long, default_value = "1000")]
    retry_ms: u64,

    /// Upper bound for the reconnect delay; above `retry_ms` it doubles per attempt
    #[arg(long)]
    max_retry_ms: Option<u64>,

    /// Stop reconnecting after this many attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Only host the relay; no chat session on this terminal
    #[arg(long)]
    server_only: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn peer_config(&self) -> PeerConfig {
        let initial = Duration::from_millis(self.retry_ms);
        let mut reconnect = match self.max_retry_ms.map(Duration::from_millis) {
            Some(max) if max > initial => ReconnectPolicy::exponential(initial, max),
            _ => ReconnectPolicy::fixed(initial),
        };
        reconnect.max_attempts = self.max_attempts;

        let history = (!self.no_history).then(|| HistoryConfig {
            directory: self.history_dir.clone(),
            ..HistoryConfig::default()
        });

        PeerConfig {
            addr: self.addr.clone(),
            reconnect,
            server: ServerConfig {
                bind_addr: self.addr.clone(),
                history,
                ..ServerConfig::default()
            },
            ..PeerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    let args = Args::parse();

    let filter = if args.debug { "murmur=debug,murmur_relay=debug" } else { "murmur=info,murmur_relay=info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = args.peer_config();
    if args.server_only {
        info!("Hosting relay on {}", config.addr);
        return ChatServer::new(config.server).run().await;
    }

    info!("Starting murmur peer on {}", config.addr);
    let (peer, mut events) = Peer::start(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut typing = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(line) = view::render(&event) {
                    println!("{line}");
                }
                if event == ChatEvent::GaveUp {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match view::parse_input(&line) {
                    Input::Quit => break,
                    Input::Nothing => {}
                    Input::Typing(on) => {
                        typing = on;
                        if let Err(e) = peer.send_typing(on).await {
                            log::warn!("Typing state not sent: {e}");
                        }
                    }
                    Input::Chat(text) => {
                        if std::mem::take(&mut typing) {
                            let _ = peer.send_typing(false).await;
                        }
                        if let Err(e) = peer.send_chat(text).await {
                            log::warn!("Line not sent: {e}");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    peer.shutdown().await;
    Ok(())
}
