//! envstream server
//!
//! Serves the built-in environments over WebSocket: one session per
//! connection, one frame per tick.

use anyhow::{bail, Context, Result};
use clap::Parser;
use envstream_core::SessionConfig;
use envstream_env::TokioContext;
use envstream_sim::builtin_registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod routes;
mod ws_transport;

use routes::AppState;

#[derive(Parser, Debug)]
#[command(name = "envstream-server")]
#[command(about = "Stream interactive environments to WebSocket clients", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Time between frames, in milliseconds
    #[arg(long = "frametime-ms", default_value = "100")]
    frametime_ms: u64,

    /// Master seed for the built-in environments
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Verbose output (debug level unless RUST_LOG says otherwise)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    if args.frametime_ms == 0 {
        bail!("--frametime-ms must be at least 1");
    }
    let interval = Duration::from_millis(args.frametime_ms);
    let config = SessionConfig::default().with_frame_interval(interval);

    let registry =
        Arc::new(builtin_registry(args.seed).context("building environment registry")?);
    for spec in registry.specs() {
        info!(
            env = %spec.name,
            width = spec.width,
            height = spec.height,
            keys = ?spec.key_whitelist.keys(),
            "registered"
        );
    }

    let state = AppState {
        registry,
        ctx: TokioContext::shared(),
        config,
    };

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    info!(
        addr = %args.addr,
        frametime_ms = args.frametime_ms,
        seed = args.seed,
        "envstream server listening"
    );

    axum::serve(listener, routes::router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Args::parse_from(["envstream-server"]);
        assert_eq!(args.addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(args.frametime_ms, 100);
        assert!(!args.verbose);
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "envstream-server",
            "--addr",
            "127.0.0.1:9000",
            "--frametime-ms",
            "33",
            "-v",
        ]);
        assert_eq!(args.addr.port(), 9000);
        assert_eq!(args.frametime_ms, 33);
        assert!(args.verbose);
    }
}
