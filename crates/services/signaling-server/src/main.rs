//! Signaling relay binary entry point
//!
//! Pairs a desktop and a phone per scan session and forwards their
//! negotiation and scan messages to each other.
//!
//! # Usage
//!
//! ```bash
//! # Listen on 0.0.0.0:8080 (default)
//! cargo run -p docscan-signaling-server
//!
//! # Custom address and session limit
//! cargo run -p docscan-signaling-server -- \
//!   --host 127.0.0.1 \
//!   --port 9000 \
//!   --max-sessions 200
//!
//! # JSON logs, debug for the relay
//! RUST_LOG=info,docscan_webrtc=debug cargo run -p docscan-signaling-server -- --json-logs
//! ```

use anyhow::Context;
use clap::Parser;
use docscan_webrtc::{RelayServer, RelayServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Document scan signaling relay
///
/// WebSocket relay with two seats per session.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0", env = "SIGNALING_HOST")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "SIGNALING_PORT")]
    port: u16,

    /// Maximum concurrent scan sessions
    #[arg(long, default_value_t = 1000, env = "SIGNALING_MAX_SESSIONS")]
    max_sessions: usize,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false, env = "SIGNALING_JSON_LOGS")]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down relay...");

        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(3));
            eprintln!("Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .context("failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("signaling-worker")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.json_logs)?;

    let config = RelayServerConfig {
        bind_addr: SocketAddr::new(args.host, args.port),
        max_sessions: args.max_sessions,
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_addr = %config.bind_addr,
        max_sessions = config.max_sessions,
        "Signaling relay starting"
    );

    let server = RelayServer::bind(config)
        .await
        .context("failed to bind signaling relay")?;
    let handle = server.spawn()?;
    info!("Relay running at {}. Press Ctrl+C to shutdown.", handle.url());

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!(
        sessions = handle.state().session_count(),
        "Shutdown signal received, stopping relay..."
    );
    handle.shutdown().await?;
    info!("Signaling relay shut down gracefully");

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid log filter")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}
