mod capture;
mod cli;
mod client;
mod frame;
mod protocol;
mod session;

use anyhow::{Context, Result};
use capture::{CameraDevice, CaptureSource, TestPattern};
use cli::{Cli, Source};
use client::{WsConnection, WsConnector};
use session::{SessionEnd, StreamingSession};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.debug)?;

    let config = cli.session_config();
    tracing::info!(
        endpoint = %config.endpoint,
        interval_ms = config.frame_interval.as_millis() as u64,
        "motioncam starting"
    );

    let capture = match cli.source {
        Source::Camera => CaptureSource::acquire(&CameraDevice::new(cli.device)),
        Source::Pattern => {
            let (w, h) = cli.pattern_size;
            CaptureSource::acquire(&TestPattern::new(w, h))
        }
    };

    let mut session: StreamingSession<WsConnection> = StreamingSession::new(config, capture);
    let alerts = session.subscribe_alerts();

    let end = tokio::select! {
        end = session.run(&WsConnector, shutdown_signal()) => end,
        _ = render_alerts(alerts) => SessionEnd::Shutdown,
    };

    match end {
        SessionEnd::Shutdown => println!("👋 Stopped"),
        SessionEnd::ConnectionClosed => println!("🔌 Connection closed, nothing left to stream"),
    }
    Ok(())
}

fn init_logging(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to initialise logging")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for Ctrl-C, running until the connection ends");
        std::future::pending::<()>().await;
    }
}

/// The alert overlay: one line when motion starts, one when it clears.
async fn render_alerts(mut alerts: watch::Receiver<bool>) {
    while alerts.changed().await.is_ok() {
        if *alerts.borrow_and_update() {
            println!("🚨 Motion Detected!");
        } else {
            println!("✅ All clear");
        }
    }
    // Sender lives in the session and outlives this select
    std::future::pending::<()>().await
}
