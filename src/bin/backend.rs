#![forbid(unsafe_code)]

//! Download proxy server: resolves settings, runs start-up checks and serves
//! `/download` and `/info` until Ctrl+C.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tubeproxy::{
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    extractor::YtDlp,
    logging, preflight,
    server::{AppState, router},
};

#[derive(Debug, Parser)]
#[command(name = "tubeproxy")]
#[command(about = "Streaming download proxy for online video", long_about = None)]
struct BackendArgs {
    /// Address to listen on (overrides TUBEPROXY_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides TUBEPROXY_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// yt-dlp executable (overrides TUBEPROXY_YTDLP).
    #[arg(long, value_name = "PATH")]
    ytdlp: Option<PathBuf>,
    /// Chunks buffered between upstream and client.
    #[arg(long, value_name = "N")]
    relay_capacity: Option<usize>,
    /// Give up on the title lookup after this many seconds.
    #[arg(long, value_name = "SECS")]
    metadata_timeout_secs: Option<u64>,
    /// Env file read before the process environment.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            ytdlp: self.ytdlp,
            relay_capacity: self.relay_capacity,
            metadata_timeout_secs: self.metadata_timeout_secs,
            env_path: self.env_file,
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBEPROXY_HOST")
}

fn listen_addr(settings: &RuntimeSettings) -> Result<SocketAddr> {
    Ok(SocketAddr::new(parse_host_arg(&settings.host)?, settings.port))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let settings = resolve_runtime_settings(BackendArgs::parse().into_overrides())
        .context("resolving runtime settings")?;

    preflight::ensure_not_root("tubeproxy")?;
    preflight::ensure_extractor_available(&settings.ytdlp)?;

    let addr = listen_addr(&settings)?;
    let extractor = Arc::new(YtDlp::new(settings.ytdlp.clone()));
    let app = router(AppState::new(extractor, &settings));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(
        %addr,
        ytdlp = %settings.ytdlp.display(),
        relay_capacity = settings.relay_capacity,
        metadata_timeout = ?settings.metadata_timeout,
        "download proxy listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running download proxy")?;

    tracing::info!("download proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on the handler; Ctrl+C still ends the
    // process without it.
    match signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(err) => tracing::error!(error = %err, "failed to install Ctrl+C handler"),
    }
}
