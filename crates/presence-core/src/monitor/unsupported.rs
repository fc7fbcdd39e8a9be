use async_trait::async_trait;
use std::time::Duration;

use super::{EventSender, SystemMonitor};

/// Fallback for platforms without uptime or idle support
pub struct UnsupportedMonitor;

#[async_trait]
impl SystemMonitor for UnsupportedMonitor {
    async fn uptime(&self) -> f64 {
        log::warn!("System uptime not supported on this platform");
        0.0
    }

    async fn idle_time(&self) -> Option<Duration> {
        None
    }

    async fn subscribe_lock(&self, _events: EventSender) -> bool {
        log::warn!("Lock detection not supported on this platform");
        false
    }

    async fn subscribe_sleep(&self, _events: EventSender) {
        log::warn!("Sleep detection not supported on this platform; using elapsed-gap detection");
    }
}
