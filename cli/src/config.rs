//! Client configuration loading.
//!
//! Sources, lowest precedence first:
//! - TOML config file
//! - `NVRLINK_*` environment variables
//! - command-line flags (applied by the binary)

use std::path::Path;

use anyhow::{bail, Context, Result};

use nvrlink_ipc::{AuthProtocol, ClientConfig};

/// Load configuration from an optional TOML file, then the environment.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => ClientConfig::default(),
    };

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Override `config` from `NVRLINK_*` variables returned by `lookup`.
pub fn apply_env(
    config: &mut ClientConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(host) = lookup("NVRLINK_HOST") {
        config.host = host;
    }
    if let Some(port) = lookup("NVRLINK_HTTP_PORT") {
        config.http_port = port.parse().context("Invalid NVRLINK_HTTP_PORT")?;
    }
    if let Some(port) = lookup("NVRLINK_WS_PORT") {
        config.ws_port = port.parse().context("Invalid NVRLINK_WS_PORT")?;
    }
    if let Some(username) = lookup("NVRLINK_USERNAME") {
        config.username = username;
    }
    if let Some(password) = lookup("NVRLINK_PASSWORD") {
        config.password = password;
    }
    if let Some(proxy) = lookup("NVRLINK_PROXY") {
        config.proxy = (!proxy.is_empty()).then_some(proxy);
    }
    if let Some(protocol) = lookup("NVRLINK_PROTOCOL") {
        config.protocol = parse_protocol(&protocol)?;
    }
    if let Some(recoverable) = lookup("NVRLINK_RECOVERABLE") {
        config.recoverable = recoverable
            .parse()
            .context("Invalid NVRLINK_RECOVERABLE")?;
    }
    Ok(())
}

/// Parse `v1` or `v2`.
pub(crate) fn parse_protocol(value: &str) -> Result<AuthProtocol> {
    match value.to_ascii_lowercase().as_str() {
        "v1" => Ok(AuthProtocol::V1),
        "v2" => Ok(AuthProtocol::V2),
        other => bail!("Unknown auth protocol: {other}"),
    }
}
