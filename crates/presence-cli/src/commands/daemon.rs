/// Daemon lifecycle management commands
use anyhow::{Context, Result};
use presence_core::{
    config::Config,
    daemon_control::DaemonControl,
    ipc::{self, socket_path, DaemonIpcHandler, IpcClient, IpcRequest, IpcResponse},
    monitor::create_monitor,
    Clock, Daemon, SystemClock, Tracker,
};
use presence_storage::duration_from_secs;
use std::{
    env, fs,
    path::Path,
    process::{Command, Stdio},
    sync::Arc,
    time::Duration,
};
use sysinfo::{Pid, System};

use super::helpers::{format_duration, format_time};

const LOG_FILE: &str = "presence.log";
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Client for a daemon that currently has its socket up
pub fn daemon_client(data_dir: &Path) -> Option<IpcClient> {
    let sock_path = socket_path(data_dir);
    sock_path.exists().then(|| IpcClient::new(&sock_path))
}

fn process_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid))
}

pub fn start_daemon(data_dir: &Path) -> Result<()> {
    let control = DaemonControl::new(data_dir);
    let sock_path = socket_path(data_dir);

    // 1. Check if daemon is already running
    match control.get_pid() {
        Ok(Some(pid)) if process_alive(pid) => {
            log::info!("Daemon is already running (PID: {pid}).");
            return Ok(());
        }
        Ok(Some(_)) | Err(_) => {
            log::warn!("Removing stale PID file.");
            control.remove_pid()?;
        }
        Ok(None) => {}
    }

    // 2. Clean up old socket if it exists
    if sock_path.exists() {
        log::warn!("Removing stale socket file.");
        fs::remove_file(&sock_path)?;
    }

    log::info!("Starting presence daemon...");

    // 3. Spawn a detached process running the daemon loop
    let current_exe = env::current_exe()?;
    let child = Command::new(current_exe)
        .args(["daemon", "run"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn daemon process")?;

    // 4. In parent process, write PID and exit
    log::info!("Daemon process started with PID: {}", child.id());
    control.write_pid(child.id())?;

    Ok(())
}

/// Entry point of `presence daemon run`
pub async fn run_daemon_process(data_dir: &Path, verbose: bool) -> Result<()> {
    if let Err(e) = setup_daemon_logging(data_dir, verbose) {
        init_stderr_logging(verbose);
        log::warn!("Could not open daemon log file, logging to stderr: {e:#}");
    }
    log::info!("Daemon process started (PID: {}).", std::process::id());

    if let Err(e) = daemon_main_logic(data_dir).await {
        log::error!("Daemon main logic exited with a fatal error: {e:#}");
        return Err(e);
    }

    Ok(())
}

async fn daemon_main_logic(data_dir: &Path) -> Result<()> {
    let config = Config::load(&Config::path_in(data_dir))?;
    let tracker = Arc::new(Tracker::open(&config, data_dir)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut daemon = Daemon::new(
        config.daemon,
        create_monitor(),
        tracker.session_manager().clone(),
        clock,
    )?;

    let handler = Arc::new(DaemonIpcHandler::new(tracker, daemon.handle()));
    let sock_path = socket_path(data_dir);
    let listen_path = sock_path.clone();
    let ipc_task = tokio::spawn(async move {
        if let Err(e) = ipc::listen(handler, &listen_path).await {
            log::error!("IPC listener failed: {e}");
        }
    });

    let result = daemon.run().await;

    ipc_task.abort();
    if sock_path.exists() {
        if let Err(e) = fs::remove_file(&sock_path) {
            log::warn!("Failed to remove socket {}: {e}", sock_path.display());
        }
    }
    result
}

pub async fn stop_daemon(data_dir: &Path) -> Result<()> {
    let control = DaemonControl::new(data_dir);
    let sock_path = socket_path(data_dir);
    let pid = control.get_pid().unwrap_or_else(|e| {
        log::warn!("Ignoring unreadable PID file: {e:#}");
        None
    });

    let Some(client) = daemon_client(data_dir) else {
        if let Some(pid) = pid.filter(|pid| process_alive(*pid)) {
            log::warn!("Daemon (PID: {pid}) has no socket. Force killing...");
            kill(pid);
        } else {
            log::info!("Daemon is not running.");
        }
        control.remove_pid()?;
        return Ok(());
    };

    log::info!("Stopping presence daemon...");
    match client.send_command(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Shutdown) => {
            log::info!("Daemon shutdown signal sent. Waiting for process to exit...");
            if let Some(pid) = pid {
                wait_or_kill(pid).await;
            } else {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
        Ok(resp) => log::error!("Received unexpected response from daemon: {resp:?}"),
        Err(e) => {
            log::error!("Failed to send shutdown command: {e}. Forcing cleanup.");
            if let Some(pid) = pid.filter(|pid| process_alive(*pid)) {
                kill(pid);
            }
        }
    }

    // Cleanup
    control.remove_pid()?;
    if sock_path.exists() {
        fs::remove_file(&sock_path)?;
    }

    Ok(())
}

async fn wait_or_kill(pid: u32) {
    let step = Duration::from_millis(200);
    let mut waited = Duration::ZERO;
    while waited < STOP_GRACE {
        if !process_alive(pid) {
            log::info!("Daemon stopped successfully.");
            return;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    log::warn!("Daemon did not stop gracefully. Force killing...");
    kill(pid);
}

fn kill(pid: u32) {
    let mut sys = System::new();
    if sys.refresh_process(Pid::from_u32(pid)) {
        if let Some(process) = sys.process(Pid::from_u32(pid)) {
            process.kill();
            log::info!("Process {pid} killed.");
        }
    }
}

pub async fn show_status(data_dir: &Path) -> Result<()> {
    let Some(client) = daemon_client(data_dir) else {
        println!("Daemon Status: Not running");
        return Ok(());
    };

    match client.send_command(IpcRequest::Status).await {
        Ok(IpcResponse::Status {
            running,
            active,
            screen_locked,
            current,
            today_total_seconds,
        }) => {
            println!(
                "Daemon Status: {}",
                if running { "Running" } else { "Stopping" }
            );
            println!("  User: {}", if active { "Active" } else { "Away" });
            if screen_locked {
                println!("  Screen: Locked");
            }
            match current {
                Some(session) => println!(
                    "  Session: since {} ({})",
                    format_time(session.start),
                    format_duration(session.duration())
                ),
                None => println!("  Session: None"),
            }
            println!(
                "  Today: {}",
                format_duration(duration_from_secs(today_total_seconds))
            );
        }
        Ok(_) => anyhow::bail!("Unexpected response from daemon"),
        Err(e) => {
            log::error!("Failed to get status: {e}");
            println!("Daemon Status: Not running (or not responding)");
        }
    }
    Ok(())
}

fn log_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

pub fn init_stderr_logging(verbose: bool) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(verbose)))
        .format_timestamp_secs()
        .init();
}

fn setup_daemon_logging(data_dir: &Path, verbose: bool) -> Result<()> {
    use std::fs::{create_dir_all, OpenOptions};

    let log_path = data_dir.join(LOG_FILE);

    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(verbose)))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .init();

    Ok(())
}
