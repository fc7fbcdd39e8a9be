use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub mod unsupported;

/// Upper bound for any single platform query
pub const PLATFORM_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Asynchronous notification from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Screen locked (`true`) or unlocked (`false`)
    Lock(bool),
    /// About to suspend (`true`) or resumed (`false`)
    Sleep(bool),
}

/// Where monitors post lock and sleep notifications
pub type EventSender = mpsc::UnboundedSender<PlatformEvent>;

/// System monitor trait for platform-specific implementations
///
/// No method fails: every query degrades to a safe default and logs instead.
#[async_trait]
pub trait SystemMonitor: Send + Sync {
    /// Seconds since the OS booted, or 0 when unknown
    async fn uptime(&self) -> f64;

    /// Time since the last input event, `None` when the platform cannot tell
    async fn idle_time(&self) -> Option<Duration>;

    /// Post every lock/unlock transition to `events`; returns the lock state right now
    async fn subscribe_lock(&self, events: EventSender) -> bool;

    /// Post suspend/resume notifications to `events`, best effort
    async fn subscribe_sleep(&self, events: EventSender);
}

/// Await `fut` for at most [`PLATFORM_QUERY_TIMEOUT`], returning `default` on expiry
pub async fn bounded<T, F>(what: &str, fut: F, default: T) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(PLATFORM_QUERY_TIMEOUT, fut).await {
        Ok(value) => value,
        Err(_) => {
            log::warn!("{what} timed out after {PLATFORM_QUERY_TIMEOUT:?}, using fallback");
            default
        }
    }
}

/// Create platform-specific monitor
#[must_use]
pub fn create_monitor() -> Box<dyn SystemMonitor> {
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::MacOSMonitor::new())
    }

    #[cfg(target_os = "linux")]
    {
        Box::new(linux::LinuxMonitor::new())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Box::new(unsupported::UnsupportedMonitor)
    }
}
