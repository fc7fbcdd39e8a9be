use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
};

use crate::{
    daemon::DaemonHandle,
    tracker::{CurrentSession, Tracker},
};

pub const SOCKET_FILE: &str = "presence.sock";

#[must_use]
pub fn socket_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SOCKET_FILE)
}

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcRequest {
    Status,
    StartSession,
    EndSession,
    Shutdown,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum IpcResponse {
    Status {
        running: bool,
        active: bool,
        screen_locked: bool,
        current: Option<CurrentSession>,
        today_total_seconds: f64,
    },
    SessionStarted {
        started: bool,
        start: Option<DateTime<Local>>,
    },
    SessionEnded {
        duration_seconds: Option<f64>,
    },
    Shutdown,
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// Send one request and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or replies with garbage
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path).await?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

/// Serves CLI requests against the daemon's own session state
pub struct DaemonIpcHandler {
    tracker: Arc<Tracker>,
    daemon: DaemonHandle,
}

impl DaemonIpcHandler {
    #[must_use]
    pub fn new(tracker: Arc<Tracker>, daemon: DaemonHandle) -> Self {
        Self { tracker, daemon }
    }

    #[must_use]
    pub fn respond(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Status => IpcResponse::Status {
                running: !self.daemon.is_stopping(),
                active: self.daemon.is_active(),
                screen_locked: self.daemon.is_locked(),
                current: self.tracker.current_session_info(),
                today_total_seconds: duration_secs(self.tracker.today_total_with_open()),
            },
            IpcRequest::StartSession => {
                let started = self.tracker.start_session();
                IpcResponse::SessionStarted {
                    started,
                    start: self.tracker.session_manager().current_session(),
                }
            }
            IpcRequest::EndSession => IpcResponse::SessionEnded {
                duration_seconds: self.tracker.end_session().map(duration_secs),
            },
            IpcRequest::Shutdown => {
                log::info!("Shutdown requested over IPC");
                self.daemon.stop();
                IpcResponse::Shutdown
            }
        }
    }

    /// Answer one request on `stream`
    ///
    /// # Errors
    ///
    /// Returns an error if the reply cannot be encoded or written
    pub async fn handle(&self, stream: &mut UnixStream, request: IpcRequest) -> Result<()> {
        let response = self.respond(request);
        let encoded = bincode::serialize(&response)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}

#[allow(clippy::cast_precision_loss)]
fn duration_secs(duration: chrono::Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

/// Accept connections on `sock_path` until the task is dropped
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn listen(handler: Arc<DaemonIpcHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;
    log::info!("IPC listening on {}", sock_path.display());

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    match stream.read_to_end(&mut buf).await {
                        Ok(n) if n > 0 => match bincode::deserialize::<IpcRequest>(&buf) {
                            Ok(request) => {
                                if let Err(e) = handler.handle(&mut stream, request).await {
                                    log::error!("IPC handle error: {e}");
                                }
                            }
                            Err(e) => {
                                log::error!("IPC deserialize error: {e}");
                            }
                        },
                        Ok(_) => {} // Connection closed
                        Err(e) => {
                            log::error!("IPC read error: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}
