pub mod clock;
pub mod config;
pub mod daemon;
pub mod daemon_control;
pub mod ipc;
pub mod monitor;
pub mod session_manager;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError, DaemonConfig, StorageConfig, UnknownIdlePolicy};
pub use daemon::{Daemon, DaemonHandle};
pub use session_manager::SessionManager;
pub use tracker::{CurrentSession, HistoryStats, Tracker};
