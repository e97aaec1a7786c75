use clap::{Parser, ValueEnum};
use std::time::Duration;

use crate::client::ReconnectPolicy;
use crate::protocol::{DEFAULT_ENDPOINT, MOTION_SIGNAL};
use crate::session::SessionConfig;

#[derive(Parser, Debug)]
#[command(name = "motioncam")]
#[command(about = "📹 Stream a camera to a motion-detection service", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Analysis service websocket endpoint
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Where frames come from
    #[arg(short, long, value_enum, default_value_t = Source::Camera)]
    pub source: Source,

    /// Camera device index
    #[arg(short, long, default_value_t = 0)]
    pub device: u32,

    /// Test pattern resolution (WIDTHxHEIGHT)
    #[arg(long, default_value = "640x480", value_parser = parse_resolution)]
    pub pattern_size: (u32, u32),

    /// Delay between frames, in milliseconds
    #[arg(long, default_value_t = 200)]
    pub interval_ms: u64,

    /// How long the motion alert stays up after the last signal, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub alert_ms: u64,

    /// Inbound message that means "motion detected"
    #[arg(long, default_value = MOTION_SIGNAL)]
    pub sentinel: String,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = crate::frame::DEFAULT_JPEG_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// Leave the camera track running on shutdown
    #[arg(long)]
    pub keep_device: bool,

    /// Reconnect with exponential backoff when the connection drops
    #[arg(long)]
    pub reconnect: bool,

    /// Upper bound for the reconnect delay, in seconds
    #[arg(long, default_value_t = 30)]
    pub backoff_max_secs: u64,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// Hardware camera
    Camera,
    /// Synthetic moving test pattern
    Pattern,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            frame_interval: Duration::from_millis(self.interval_ms),
            alert_window: Duration::from_millis(self.alert_ms),
            sentinel: self.sentinel.clone(),
            jpeg_quality: self.jpeg_quality,
            release_device_on_teardown: !self.keep_device,
            reconnect: if self.reconnect {
                ReconnectPolicy::backoff(Duration::from_secs(self.backoff_max_secs.max(1)))
            } else {
                ReconnectPolicy::Never
            },
        }
    }
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let w: u32 = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let h: u32 = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    if w == 0 || h == 0 {
        return Err("resolution must be non-zero".to_string());
    }
    Ok((w, h))
}
