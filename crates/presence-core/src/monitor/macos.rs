use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{EventSender, SystemMonitor};

// CoreGraphics bindings for idle time detection
#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventSourceSecondsSinceLastEventType(
        source_state_id: u32,
        event_type: u32,
    ) -> f64;
}

// CGEventSourceStateID
const K_CG_EVENT_SOURCE_STATE_COMBINED_SESSION_STATE: u32 = 0;

// CGEventType - we check for any HID (Human Interface Device) event
const K_CG_ANY_INPUT_EVENT_TYPE: u32 = u32::MAX; // kCGAnyInputEventType

pub struct MacOSMonitor;

impl MacOSMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Get system idle time in seconds using CoreGraphics API
    /// This returns the time since the last keyboard/mouse/trackpad event
    fn get_system_idle_seconds() -> f64 {
        unsafe {
            CGEventSourceSecondsSinceLastEventType(
                K_CG_EVENT_SOURCE_STATE_COMBINED_SESSION_STATE,
                K_CG_ANY_INPUT_EVENT_TYPE,
            )
        }
    }

    /// Boot time from `kern.boottime`, as seconds since the epoch
    fn boot_time_secs() -> Option<i64> {
        let mut mib = [libc::CTL_KERN, libc::KERN_BOOTTIME];
        let mut boot = libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        let mut size = std::mem::size_of::<libc::timeval>();
        let rc = unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                2,
                std::ptr::addr_of_mut!(boot).cast(),
                &mut size,
                std::ptr::null_mut(),
                0,
            )
        };
        if rc != 0 || boot.tv_sec == 0 {
            return None;
        }
        Some(boot.tv_sec)
    }
}

impl Default for MacOSMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemMonitor for MacOSMonitor {
    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    async fn uptime(&self) -> f64 {
        let Some(boot) = Self::boot_time_secs() else {
            log::error!("Failed to read kern.boottime");
            return 0.0;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        (now as i64 - boot).max(0) as f64
    }

    async fn idle_time(&self) -> Option<Duration> {
        let idle = Self::get_system_idle_seconds();
        if idle.is_finite() && idle >= 0.0 {
            Some(Duration::from_secs_f64(idle))
        } else {
            None
        }
    }

    async fn subscribe_lock(&self, _events: EventSender) -> bool {
        log::warn!("Lock notifications are not available on macOS; lock detection disabled");
        false
    }

    async fn subscribe_sleep(&self, _events: EventSender) {
        log::info!("Sleep notifications are not available on macOS; using elapsed-gap detection");
    }
}
