//! Manual session commands
//!
//! When the daemon is up these go over IPC so its in-memory state stays the
//! source of truth; otherwise they act on the store directly.

use anyhow::{Context, Result};
use chrono::Duration;
use presence_core::{
    config::Config,
    ipc::{IpcRequest, IpcResponse},
    CurrentSession, Tracker,
};
use presence_storage::duration_from_secs;
use std::{io::Write, ops::RangeInclusive, path::Path};

use super::daemon::daemon_client;
use super::helpers::{format_duration, format_time};

/// Accepted `live --interval` values in seconds
pub const LIVE_INTERVAL_RANGE: RangeInclusive<f64> = 0.2..=3600.0;

/// Parse `live --interval`, rejecting values outside [`LIVE_INTERVAL_RANGE`]
pub fn parse_live_interval(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if LIVE_INTERVAL_RANGE.contains(&secs) {
        Ok(secs)
    } else {
        Err(format!(
            "interval must be between {} and {} seconds",
            LIVE_INTERVAL_RANGE.start(),
            LIVE_INTERVAL_RANGE.end()
        ))
    }
}

/// Open the store with the user's configuration
pub fn open_tracker(data_dir: &Path) -> Result<Tracker> {
    let config = Config::load(&Config::path_in(data_dir))?;
    Tracker::open(&config, data_dir).context("Failed to open presence database")
}

/// Open the store for reading only, leaving writes to the running daemon
pub fn open_tracker_read_only(data_dir: &Path) -> Result<Tracker> {
    let config = Config::load(&Config::path_in(data_dir))?;
    Tracker::open_read_only(&config, data_dir).context("Failed to open presence database")
}

/// Send `request` to the daemon, or `None` when no daemon answers
async fn ask_daemon(data_dir: &Path, request: IpcRequest) -> Option<IpcResponse> {
    let client = daemon_client(data_dir)?;
    match client.send_command(request).await {
        Ok(response) => Some(response),
        Err(e) => {
            log::warn!("Daemon not responding ({e}); using the database directly");
            None
        }
    }
}

pub async fn start(data_dir: &Path) -> Result<()> {
    let (started, start) = match ask_daemon(data_dir, IpcRequest::StartSession).await {
        Some(IpcResponse::SessionStarted { started, start }) => (started, start),
        Some(other) => anyhow::bail!("Unexpected response from daemon: {other:?}"),
        None => {
            let tracker = open_tracker(data_dir)?;
            let started = tracker.start_session();
            (started, tracker.session_manager().current_session())
        }
    };

    match (started, start) {
        (true, Some(start)) => println!("Session started at {}.", format_time(start)),
        (false, Some(start)) => println!(
            "A session was just started at {}; ignoring duplicate.",
            format_time(start)
        ),
        (_, None) => println!("Session could not be started."),
    }
    Ok(())
}

pub async fn stop(data_dir: &Path) -> Result<()> {
    let duration = match ask_daemon(data_dir, IpcRequest::EndSession).await {
        Some(IpcResponse::SessionEnded { duration_seconds }) => {
            duration_seconds.map(duration_from_secs)
        }
        Some(other) => anyhow::bail!("Unexpected response from daemon: {other:?}"),
        None => open_tracker(data_dir)?.end_session(),
    };

    match duration {
        Some(duration) => println!("Session stopped. Duration: {}", format_duration(duration)),
        None => println!("No session in progress."),
    }
    Ok(())
}

struct Snapshot {
    current: Option<CurrentSession>,
    today_total: Duration,
}

async fn snapshot(data_dir: &Path) -> Result<Snapshot> {
    match ask_daemon(data_dir, IpcRequest::Status).await {
        Some(IpcResponse::Status {
            current,
            today_total_seconds,
            ..
        }) => Ok(Snapshot {
            current,
            today_total: duration_from_secs(today_total_seconds),
        }),
        Some(other) => anyhow::bail!("Unexpected response from daemon: {other:?}"),
        None => {
            let tracker = open_tracker(data_dir)?;
            Ok(Snapshot {
                current: tracker.current_session_info(),
                today_total: tracker.today_total_with_open(),
            })
        }
    }
}

pub async fn current(data_dir: &Path) -> Result<()> {
    let snapshot = snapshot(data_dir).await?;
    match &snapshot.current {
        Some(session) => {
            println!("Session started: {}", format_time(session.start));
            println!("Now: {}", format_time(session.now));
            println!("Duration: {}", format_duration(session.duration()));
        }
        None => println!("No active session."),
    }
    println!("Today: {}", format_duration(snapshot.today_total));
    Ok(())
}

/// Redraw the current session on one line until Ctrl-C
///
/// `interval_secs` is checked by the argument parser against [`LIVE_INTERVAL_RANGE`].
pub async fn live(data_dir: &Path, interval_secs: f64) -> Result<()> {
    let interval = std::time::Duration::try_from_secs_f64(
        interval_secs.clamp(*LIVE_INTERVAL_RANGE.start(), *LIVE_INTERVAL_RANGE.end()),
    )
    .unwrap_or(std::time::Duration::from_secs(1));
    let mut stdout = std::io::stdout();

    loop {
        let line = match snapshot(data_dir).await {
            Ok(Snapshot {
                current: Some(session),
                ..
            }) => format!(
                "Session started: {} | Duration: {}",
                format_time(session.start),
                format_duration(session.duration())
            ),
            Ok(_) => "No active session. Taking a break...".to_string(),
            Err(e) => format!("Error: {e:#}"),
        };
        print!("\r\x1b[K{line}");
        stdout.flush()?;

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\nLive session display stopped.");
                return Ok(());
            }
        }
    }
}
