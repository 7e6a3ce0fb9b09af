//! nvrlink: log in to a network video device and pull its streams.
//!
//! # Commands
//!
//! - `login` - Authenticate and print the stream URL
//! - `live` - Stream a channel live
//! - `playback` - Stream recorded footage of a channel

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use nvrlink_cli::{commands, init_logging, load_config};
use nvrlink_ipc::{ClientConfig, StreamTarget};

#[derive(Parser)]
#[command(name = "nvrlink")]
#[command(version)]
#[command(about = "Network video device stream client", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Login user
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Login password
    #[arg(short, long, global = true)]
    password: Option<String>,

    /// Reconnect when the stream connection drops
    #[arg(long, global = true)]
    recoverable: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate and print the stream URL
    Login,

    /// Stream a channel live
    Live {
        /// Channel number
        #[arg(long, default_value_t = 1)]
        channel: u32,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Stream recorded footage
    Playback {
        /// Channel number
        #[arg(long, default_value_t = 1)]
        channel: u32,

        /// Start time (RFC 3339)
        #[arg(long)]
        start: DateTime<Utc>,

        /// End time (RFC 3339)
        #[arg(long)]
        end: DateTime<Utc>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
}

impl Cli {
    fn apply_flags(&self, config: &mut ClientConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(user) = &self.user {
            config.username = user.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if self.recoverable {
            config.recoverable = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_flags(&mut config);

    info!(host = %config.host, protocol = ?config.protocol, "nvrlink starting");

    match cli.command {
        Commands::Login => commands::login(&config).await,
        Commands::Live { channel, duration } => {
            commands::stream(
                &config,
                StreamTarget::RealPlay { channel },
                duration.map(Duration::from_secs),
            )
            .await
        }
        Commands::Playback {
            channel,
            start,
            end,
            duration,
        } => {
            if end <= start {
                anyhow::bail!("Playback end must be after start");
            }
            commands::stream(
                &config,
                StreamTarget::Playback {
                    channel,
                    start,
                    end,
                },
                duration.map(Duration::from_secs),
            )
            .await
        }
    }
}
