use crate::{
    clock::Clock,
    config::{ConfigError, DaemonConfig, UnknownIdlePolicy},
    monitor::{PlatformEvent, SystemMonitor},
    session_manager::SessionManager,
};
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local};
use presence_storage::seconds_between;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, MissedTickBehavior};

/// Elapsed gaps at or above this are treated as clock jumps, not suspends
const MAX_SLEEP_GAP_SECS: f64 = 24.0 * 60.0 * 60.0;

/// A boot this long after the last daemon heartbeat counts as a cold start
const FRESH_BOOT_QUIET_MINUTES: i64 = 10;

/// Shared view of the daemon for stop requests and status queries
#[derive(Clone, Default)]
pub struct DaemonHandle {
    shutdown_signal: Arc<AtomicBool>,
    wake: Arc<Notify>,
    active: Arc<AtomicBool>,
    locked: Arc<AtomicBool>,
}

impl DaemonHandle {
    /// Ask the daemon loop to finish after its current step
    pub fn stop(&self) {
        self.shutdown_signal.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.shutdown_signal.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

/// Decide whether the machine was cold-booted since the daemon last ran
#[must_use]
pub fn is_fresh_boot(
    uptime_secs: f64,
    now: DateTime<Local>,
    last_seen: Option<DateTime<Local>>,
    boot_detection_limit_secs: f64,
) -> bool {
    if uptime_secs <= 0.0 || uptime_secs >= boot_detection_limit_secs {
        return false;
    }
    #[allow(clippy::cast_possible_truncation)]
    let boot_time = now - ChronoDuration::milliseconds((uptime_secs * 1000.0) as i64);
    match last_seen {
        None => true,
        Some(seen) => boot_time - seen > ChronoDuration::minutes(FRESH_BOOT_QUIET_MINUTES),
    }
}

/// Polling state machine turning platform signals into session transitions
pub struct Daemon {
    config: DaemonConfig,
    monitor: Box<dyn SystemMonitor>,
    session_manager: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    handle: DaemonHandle,
    events_tx: mpsc::UnboundedSender<PlatformEvent>,
    events_rx: mpsc::UnboundedReceiver<PlatformEvent>,
    is_active: bool,
    screen_locked: bool,
    last_check: DateTime<Local>,
    last_uptime: f64,
}

impl Daemon {
    /// Build a daemon; the configuration is validated here and never again
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is out of range
    pub fn new(
        config: DaemonConfig,
        monitor: Box<dyn SystemMonitor>,
        session_manager: Arc<SessionManager>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let now = clock.now();

        Ok(Self {
            config,
            monitor,
            session_manager,
            clock,
            handle: DaemonHandle::default(),
            events_tx,
            events_rx,
            is_active: false,
            screen_locked: false,
            last_check: now,
            last_uptime: 0.0,
        })
    }

    #[must_use]
    pub fn handle(&self) -> DaemonHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    #[must_use]
    pub fn screen_locked(&self) -> bool {
        self.screen_locked
    }

    /// Run until Ctrl-C or [`DaemonHandle::stop`], closing the session on the way out
    ///
    /// # Errors
    ///
    /// Currently infallible; returns `Result` for the caller's `?` chain
    pub async fn run(&mut self) -> Result<()> {
        self.startup().await;

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(
            "Daemon started (poll every {:?}, idle threshold {:?})",
            self.config.poll_interval(),
            self.config.idle_threshold()
        );

        while !self.handle.is_stopping() {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                () = self.handle.wake.notified() => {}
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    self.handle.stop();
                }
            }
        }

        self.shutdown();
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }

    /// Fresh-boot detection, initial session and event subscriptions
    pub async fn startup(&mut self) {
        let now = self.clock.now();
        let uptime = self.monitor.uptime().await;
        self.last_uptime = uptime;
        self.last_check = now;

        let last_seen = self.session_manager.last_seen();
        if is_fresh_boot(uptime, now, last_seen, self.config.boot_detection_limit_secs) {
            log::info!("Fresh boot detected (uptime {uptime:.0}s, last seen {last_seen:?})");
            self.session_manager.discard_session();
            self.session_manager.start_session();
        } else if self.session_manager.current_session().is_none() {
            log::info!("No open session at startup; assuming presence");
            self.session_manager.start_session();
        }
        self.is_active = true;

        if self.config.monitor_lock_and_sleep {
            let locked = self.monitor.subscribe_lock(self.events_tx.clone()).await;
            self.monitor.subscribe_sleep(self.events_tx.clone()).await;
            if locked {
                log::info!("Screen already locked at startup");
                self.handle_event(PlatformEvent::Lock(true)).await;
            }
        }
        self.publish();
    }

    /// One poll step
    pub async fn tick(&mut self) {
        self.session_manager.check_day_rollover();

        let now = self.clock.now();
        let prev_check = self.last_check;
        let elapsed = seconds_between(prev_check, now);

        if elapsed > self.config.sleep_detection_threshold_secs && elapsed < MAX_SLEEP_GAP_SECS {
            log::info!(
                "Detected sleep via elapsed gap ({elapsed:.1}s > {:.1}s, active: {})",
                self.config.sleep_detection_threshold_secs,
                self.is_active
            );
            if self.is_active && self.session_manager.current_session().is_some() {
                self.session_manager.end_session_at(prev_check);
            }
            self.is_active = false;
        }
        self.last_check = now;

        let uptime = self.monitor.uptime().await;
        if uptime > 0.0 && self.last_uptime > 0.0 && uptime < self.last_uptime {
            log::info!("System reboot detected (uptime {uptime:.0}s < {:.0}s)", self.last_uptime);
            if self.config.end_session_on_restart
                && self.session_manager.current_session().is_some()
            {
                self.session_manager.end_session();
                self.is_active = false;
                log::info!("Session ended due to system restart");
            }
        }
        if uptime > 0.0 {
            self.last_uptime = uptime;
        }

        if self.config.monitor_lock_and_sleep && self.screen_locked {
            log::debug!("Screen locked; skipping idle evaluation");
        } else {
            self.evaluate_idle().await;
        }

        self.session_manager.record_last_seen(now);
        self.session_manager.save_state(false);
        self.publish();
    }

    async fn current_idle(&self) -> Duration {
        match self.monitor.idle_time().await {
            Some(idle) => idle,
            None => match self.config.unknown_idle_policy {
                UnknownIdlePolicy::AssumeActive => Duration::ZERO,
                UnknownIdlePolicy::AssumeIdle => Duration::MAX,
            },
        }
    }

    async fn evaluate_idle(&mut self) {
        let idle = self.current_idle().await;
        let threshold = self.config.idle_threshold();

        if self.is_active {
            if idle >= threshold {
                self.session_manager.end_session();
                self.is_active = false;
                log::info!("Session ended due to inactivity (idle {idle:?} >= {threshold:?})");
            }
        } else if idle < threshold {
            self.is_active = true;
            if let Some(start) = self.session_manager.current_session() {
                log::info!("User active; continuing session opened at {start}");
            } else {
                self.session_manager.start_session();
                log::info!("Session started due to user activity (idle {idle:?} < {threshold:?})");
            }
        }
    }

    /// Apply a lock or sleep notification
    pub async fn handle_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::Lock(true) => {
                log::info!("Screen locked - ending session (active: {})", self.is_active);
                if self.session_manager.current_session().is_some() {
                    self.session_manager.end_session();
                }
                self.is_active = false;
                self.screen_locked = true;
            }
            PlatformEvent::Lock(false) => {
                log::info!("Screen unlocked (active: {})", self.is_active);
                self.screen_locked = false;
                if !self.is_active {
                    let idle = self.current_idle().await;
                    let threshold = self.config.idle_threshold();
                    if idle < threshold {
                        self.session_manager.start_session();
                        self.is_active = true;
                        log::info!("Session started after unlock (idle {idle:?} < {threshold:?})");
                    } else {
                        log::info!("Unlocked but still idle ({idle:?} >= {threshold:?})");
                    }
                }
            }
            PlatformEvent::Sleep(true) => {
                log::info!("System preparing for sleep - ending session (active: {})", self.is_active);
                if self.session_manager.current_session().is_some() {
                    self.session_manager.end_session();
                }
                self.is_active = false;
            }
            PlatformEvent::Sleep(false) => {
                log::info!("System resumed from sleep");
            }
        }
        self.publish();
    }

    /// Close the session and flush state
    pub fn shutdown(&mut self) {
        self.handle.shutdown_signal.store(true, Ordering::SeqCst);
        if self.is_active && self.session_manager.current_session().is_some() {
            self.session_manager.end_session();
            log::info!("Session ended due to daemon exit");
        }
        self.is_active = false;
        self.session_manager.save_state(true);
        self.session_manager.record_last_seen(self.clock.now());
        self.publish();
    }

    fn publish(&self) {
        self.handle.active.store(self.is_active, Ordering::SeqCst);
        self.handle.locked.store(self.screen_locked, Ordering::SeqCst);
    }
}
