//! nvrlink command-line front end.

pub mod commands;
mod config;

pub use config::{apply_env, load_config};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "nvrlink=info,nvrlink_cli=info,nvrlink_engine=debug,nvrlink_auth=info,nvrlink_transport=info,nvrlink_decode=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
