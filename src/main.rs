//! Relay binary entry point
//!
//! Runs with no arguments using the default ports and TURN credentials;
//! flags and environment variables only override those defaults. The
//! process stops on the stdin line "exit", stdin EOF, or an interrupt.

use clap::Parser;
use mirror_relay::{Relay, RelayConfig, TurnServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// WebRTC screen-share relay
///
/// Mirrors one screen-capture source to every connected sink through
/// per-sink WebRTC peer connections.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source signaling port
    #[arg(long, default_value_t = 9002, env = "RELAY_SOURCE_PORT")]
    source_port: u16,

    /// Sink signaling port
    #[arg(long, default_value_t = 9003, env = "RELAY_SINK_PORT")]
    sink_port: u16,

    /// TURN server URL (turn:<host>:<port>?transport=tcp)
    #[arg(
        long,
        default_value = "turn:127.0.0.1:3478?transport=tcp",
        env = "RELAY_TURN_URL"
    )]
    turn_url: String,

    /// TURN username
    #[arg(long, default_value = "user", env = "RELAY_TURN_USERNAME")]
    turn_username: String,

    /// TURN credential
    #[arg(long, default_value = "root", env = "RELAY_TURN_CREDENTIAL")]
    turn_credential: String,

    /// Log file appended in addition to stderr
    #[arg(long, default_value = "relay.log", env = "RELAY_LOG_FILE")]
    log_file: PathBuf,

    /// Disable the log file entirely
    #[arg(long, default_value_t = false)]
    no_log_file: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = RelayConfig {
        source_port: args.source_port,
        sink_port: args.sink_port,
        turn: TurnServerConfig {
            url: args.turn_url,
            username: args.turn_username,
            credential: args.turn_credential,
        },
        log_file: if args.no_log_file {
            None
        } else {
            Some(args.log_file)
        },
    };

    init_tracing(config.log_file.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        source_port = config.source_port,
        sink_port = config.sink_port,
        turn = %config.turn.url,
        "mirror-relay starting"
    );

    let relay = Relay::start(config).await?;

    wait_for_shutdown().await;
    relay.shutdown().await;

    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Block until the operator asks the relay to stop
async fn wait_for_shutdown() {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim() == "exit" => {
                    info!("exit requested on stdin");
                    break;
                }
                Ok(Some(_)) => continue,
                Ok(None) => {
                    info!("stdin closed, shutting down");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed, shutting down");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }
}
