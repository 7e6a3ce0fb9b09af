//! Subcommand handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{info, instrument, warn};

use nvrlink_auth::{IsapiClient, SessionAuthenticator};
use nvrlink_decode::NullWorker;
use nvrlink_engine::StreamSession;
use nvrlink_ipc::{ClientConfig, EventKind, StreamEvent, StreamState, StreamTarget};
use nvrlink_transport::WsConnector;

/// Interval between metrics reports while streaming.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn authenticator(config: &ClientConfig) -> Result<Arc<SessionAuthenticator<IsapiClient>>> {
    let api = IsapiClient::new(config).context("Failed to create control API client")?;
    Ok(Arc::new(SessionAuthenticator::new(api, config)))
}

/// Log in, report the stream URL, and log out again.
#[instrument(skip(config), fields(host = %config.host))]
pub async fn login(config: &ClientConfig) -> Result<()> {
    let auth = authenticator(config)?;

    auth.login().await.context("Login failed")?;
    println!("Logged in to {} as {}", config.host, config.username);

    let url = auth.stream_url().await.context("Failed to build stream URL")?;
    println!("Stream URL: {url}");

    if let Err(e) = auth.logout().await {
        warn!("Logout failed: {}", e);
    }
    Ok(())
}

/// Stream `target` until interrupted, the session closes, or `duration` elapses.
#[instrument(skip(config), fields(host = %config.host))]
pub async fn stream(
    config: &ClientConfig,
    target: StreamTarget,
    duration: Option<Duration>,
) -> Result<()> {
    let auth = authenticator(config)?;
    auth.login().await.context("Login failed")?;

    let mut session = StreamSession::new(config.clone());
    session.subscribe(EventKind::Close, |event| {
        if let StreamEvent::Close { reason } = event {
            println!("Stream closed: {reason}");
        }
    });
    session.subscribe(EventKind::StateChanged, |event| {
        if let StreamEvent::StateChanged { previous, current } = event {
            info!("Session {} -> {}", previous.name(), current.name());
        }
    });

    let opened = session
        .open(target, WsConnector::new(), auth.clone(), NullWorker::new())
        .await;
    if let Err(e) = opened {
        session.destroy().await;
        let _ = auth.logout().await;
        return Err(e).context("Failed to open stream");
    }

    let deadline = async {
        match duration {
            Some(duration) => sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut report = interval(REPORT_INTERVAL);
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poll = interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("Duration elapsed");
                break;
            }
            _ = report.tick() => print_metrics(&session),
            _ = poll.tick() => {
                if matches!(session.state(), StreamState::Closed | StreamState::Errored { .. }) {
                    break;
                }
            }
        }
    }

    print_metrics(&session);
    session.destroy().await;

    if let Err(e) = auth.logout().await {
        warn!("Logout failed: {}", e);
    }
    Ok(())
}

fn print_metrics(session: &StreamSession) {
    let m = session.metrics();
    println!(
        "[{}] {} bytes, {} chunks ({} rejected, {} throttled), {} frames, {:.1} fps, buffer {:.0}%, {} reconnects, up {}s",
        session.state().name(),
        m.bytes_received,
        m.chunks_ingested,
        m.chunks_rejected,
        m.chunks_throttled,
        m.frames_decoded,
        m.fps,
        m.buffer_fullness_percent,
        m.reconnects,
        m.uptime_seconds,
    );
}
