use std::path::PathBuf;
use std::sync::Arc;

use beach_sfu::config::{ClientConfig, ConfigError, DEFAULT_ICE_SERVER, DEFAULT_SID};
use beach_sfu::negotiation::rtc::RtcPeer;
use beach_sfu::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use beach_sfu::transport::WebSocketChannel;
use beach_sfu::{
    NegotiationState, PeerError, SessionOptions, SignalingError, SignalingSession,
};
use clap::{Args, Parser};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "beach-sfu",
    about = "Publish a WebRTC stream to an ion-style SFU over JSON-RPC signaling",
    author,
    version
)]
struct Cli {
    #[arg(
        short = 'a',
        long = "addr",
        env = "BEACH_SFU_ADDR",
        default_value = "localhost:7001",
        help = "SFU signaling address (host:port, or a full ws:// / wss:// URL)"
    )]
    addr: String,

    #[arg(
        long,
        env = "BEACH_SFU_SID",
        default_value = DEFAULT_SID,
        help = "Session id to join"
    )]
    sid: String,

    #[arg(
        long = "ice-server",
        value_name = "URL",
        default_value = DEFAULT_ICE_SERVER,
        help = "STUN/TURN server URL (repeatable)"
    )]
    ice_servers: Vec<String>,

    #[arg(
        long = "max-retries",
        default_value_t = 3,
        help = "Fresh peer connections to try after a failed negotiation"
    )]
    max_retries: u32,

    #[command(flatten)]
    logging: LoggingArgs,
}

impl Cli {
    fn to_config(&self) -> ClientConfig {
        ClientConfig {
            address: self.addr.clone(),
            sid: self.sid.clone(),
            ice_servers: self.ice_servers.clone(),
            max_retries: self.max_retries,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "BEACH_SFU_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "BEACH_SFU_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Signaling(#[from] SignalingError),
    #[error("peer connection error: {0}")]
    Peer(#[from] PeerError),
    #[error("negotiation still failing after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
    #[error("signaling task failed: {0}")]
    Task(String),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let config = cli.to_config();
    let url = config.signaling_url()?;
    let channel = Arc::new(WebSocketChannel::connect(&url).await?);
    info!(url = %url, sid = %config.sid, "connected to signaling server");

    let peer_config = config.rtc_peer_config();
    let mut peer = Arc::new(RtcPeer::connect(&peer_config).await?);
    let (session, handle) = SignalingSession::new(
        channel,
        peer.clone(),
        SessionOptions {
            sid: config.sid.clone(),
        },
    );
    info!(session = %session.id(), "starting signaling session");
    let mut session_task = tokio::spawn(session.run());
    let mut status = handle.subscribe();
    handle.start_negotiation()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut retries = 0;

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received; shutting down");
                handle.shutdown();
                break finish(session_task).await;
            }
            result = &mut session_task => break flatten(result),
            changed = status.changed() => {
                if changed.is_err() {
                    break finish(session_task).await;
                }
                let current = status.borrow_and_update().clone();
                match current.state {
                    NegotiationState::Stable => {
                        info!(generation = current.generation, "publishing");
                    }
                    NegotiationState::Failed => {
                        let reason = current.last_failure.unwrap_or_default();
                        if retries >= config.max_retries {
                            handle.shutdown();
                            let _ = finish(session_task).await;
                            break Err(CliError::RetriesExhausted {
                                attempts: retries + 1,
                                reason,
                            });
                        }
                        retries += 1;
                        warn!(retry = retries, reason = %reason, "negotiation failed; retrying with a fresh peer connection");
                        if let Err(err) = peer.close().await {
                            debug!(error = %err, "failed to close previous peer connection");
                        }
                        peer = Arc::new(RtcPeer::connect(&peer_config).await?);
                        handle.restart(peer.clone())?;
                        handle.start_negotiation()?;
                    }
                    _ => {}
                }
            }
        }
    };

    if let Err(err) = peer.close().await {
        debug!(error = %err, "failed to close peer connection");
    }
    outcome
}

async fn finish(task: JoinHandle<Result<(), SignalingError>>) -> Result<(), CliError> {
    flatten(task.await)
}

fn flatten(
    result: Result<Result<(), SignalingError>, tokio::task::JoinError>,
) -> Result<(), CliError> {
    result
        .map_err(|err| CliError::Task(err.to_string()))?
        .map_err(CliError::from)
}
