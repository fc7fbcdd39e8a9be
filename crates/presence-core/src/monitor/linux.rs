use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{bounded, EventSender, PlatformEvent, SystemMonitor};

/// A D-Bus screensaver service that can report and signal lock state
struct ScreenSaverBackend {
    dest: &'static str,
    path: &'static str,
}

const SCREENSAVER_BACKENDS: [ScreenSaverBackend; 2] = [
    ScreenSaverBackend {
        dest: "org.gnome.ScreenSaver",
        path: "/org/gnome/ScreenSaver",
    },
    ScreenSaverBackend {
        dest: "org.freedesktop.ScreenSaver",
        path: "/org/freedesktop/ScreenSaver",
    },
];

/// Linux monitor backed by procfs and the session/system D-Bus (via `gdbus`)
pub struct LinuxMonitor;

impl LinuxMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn gdbus_call(
        bus: &str,
        dest: &str,
        path: &str,
        method: &str,
        args: &[&str],
    ) -> Option<String> {
        let mut cmd = Command::new("gdbus");
        cmd.args(["call", bus, "--dest", dest, "--object-path", path, "--method", method])
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = cmd.output();

        match bounded(method, output, Err(std::io::ErrorKind::TimedOut.into())).await {
            Ok(out) if out.status.success() => {
                Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
            }
            Ok(out) => {
                log::debug!(
                    "gdbus call {method} failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                None
            }
            Err(e) => {
                log::debug!("gdbus call {method} could not run: {e}");
                None
            }
        }
    }

    async fn mutter_idle() -> Option<Duration> {
        let reply = Self::gdbus_call(
            "--session",
            "org.gnome.Mutter.IdleMonitor",
            "/org/gnome/Mutter/IdleMonitor/Core",
            "org.gnome.Mutter.IdleMonitor.GetIdletime",
            &[],
        )
        .await?;
        parse_gvariant_u64(&reply).map(Duration::from_millis)
    }

    async fn screensaver_idle() -> Option<Duration> {
        let reply = Self::gdbus_call(
            "--session",
            "org.freedesktop.ScreenSaver",
            "/org/freedesktop/ScreenSaver",
            "org.freedesktop.ScreenSaver.GetSessionIdleTime",
            &[],
        )
        .await?;
        parse_gvariant_u64(&reply).map(Duration::from_secs)
    }

    /// Older ScreenSaver services only expose an `IdleTime` property, in seconds
    async fn screensaver_idle_property() -> Option<Duration> {
        let reply = Self::gdbus_call(
            "--session",
            "org.freedesktop.ScreenSaver",
            "/org/freedesktop/ScreenSaver",
            "org.freedesktop.DBus.Properties.Get",
            &["org.freedesktop.ScreenSaver", "IdleTime"],
        )
        .await?;
        parse_gvariant_u64(&reply).map(Duration::from_secs)
    }

    /// Follow `gdbus monitor` output, forwarding every line that `parse` maps to an event
    fn spawn_signal_watch(
        bus: &'static str,
        dest: &'static str,
        path: &'static str,
        events: EventSender,
        parse: fn(&str) -> Option<PlatformEvent>,
    ) -> bool {
        let child = Command::new("gdbus")
            .args(["monitor", bus, "--dest", dest, "--object-path", path])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                log::warn!("Could not start gdbus monitor for {dest}: {e}");
                return false;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            log::warn!("gdbus monitor for {dest} has no stdout");
            return false;
        };

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = parse(&line) {
                            log::debug!("{dest} signal: {event:?}");
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        log::warn!("gdbus monitor for {dest} exited");
                        break;
                    }
                    Err(e) => {
                        log::warn!("Reading gdbus monitor for {dest} failed: {e}");
                        break;
                    }
                }
            }
            let _ = child.kill().await;
        });
        true
    }
}

impl Default for LinuxMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemMonitor for LinuxMonitor {
    async fn uptime(&self) -> f64 {
        let read = tokio::fs::read_to_string("/proc/uptime");
        match bounded("read /proc/uptime", read, Err(std::io::ErrorKind::TimedOut.into())).await {
            Ok(contents) => parse_proc_uptime(&contents).unwrap_or_else(|| {
                log::error!("Unexpected /proc/uptime contents: {contents:?}");
                0.0
            }),
            Err(e) => {
                log::error!("Failed to read system uptime: {e}");
                0.0
            }
        }
    }

    async fn idle_time(&self) -> Option<Duration> {
        if let Some(idle) = Self::mutter_idle().await {
            return Some(idle);
        }
        if let Some(idle) = Self::screensaver_idle().await {
            return Some(idle);
        }
        Self::screensaver_idle_property().await
    }

    async fn subscribe_lock(&self, events: EventSender) -> bool {
        for backend in &SCREENSAVER_BACKENDS {
            let method = format!("{}.GetActive", backend.dest);
            let Some(reply) =
                Self::gdbus_call("--session", backend.dest, backend.path, &method, &[]).await
            else {
                continue;
            };
            let locked = parse_gvariant_bool(&reply).unwrap_or(false);

            if Self::spawn_signal_watch(
                "--session",
                backend.dest,
                backend.path,
                events.clone(),
                parse_active_changed,
            ) {
                log::info!("Using {} for lock detection (locked={locked})", backend.dest);
                return locked;
            }
        }
        log::warn!("No ScreenSaver D-Bus interface available; lock detection disabled");
        false
    }

    async fn subscribe_sleep(&self, events: EventSender) {
        if Self::spawn_signal_watch(
            "--system",
            "org.freedesktop.login1",
            "/org/freedesktop/login1",
            events,
            parse_prepare_for_sleep,
        ) {
            log::info!("Subscribed to logind PrepareForSleep for sleep detection");
        } else {
            log::warn!("Could not subscribe to logind PrepareForSleep; using elapsed-gap detection");
        }
    }
}

/// First field of `/proc/uptime`
fn parse_proc_uptime(contents: &str) -> Option<f64> {
    contents.split_whitespace().next()?.parse().ok()
}

/// Strip the tuple wrapper from a `gdbus call` reply such as `(uint64 1234,)`,
/// plus the variant brackets a property read adds, as in `(<uint32 1234>,)`
fn gvariant_body(reply: &str) -> &str {
    reply
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim_end_matches(',')
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
}

fn parse_gvariant_u64(reply: &str) -> Option<u64> {
    gvariant_body(reply)
        .split_whitespace()
        .last()
        .and_then(|n| n.parse().ok())
}

fn parse_gvariant_bool(reply: &str) -> Option<bool> {
    match gvariant_body(reply) {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Extract the argument of a signal line, e.g. `... .ActiveChanged (true,)`
fn signal_argument(line: &str, member: &str) -> Option<bool> {
    let (_, args) = line.split_once(member)?;
    parse_gvariant_bool(args)
}

fn parse_active_changed(line: &str) -> Option<PlatformEvent> {
    signal_argument(line, ".ActiveChanged").map(PlatformEvent::Lock)
}

fn parse_prepare_for_sleep(line: &str) -> Option<PlatformEvent> {
    signal_argument(line, ".PrepareForSleep").map(PlatformEvent::Sleep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_uptime() {
        assert_eq!(parse_proc_uptime("35.24 120.11\n"), Some(35.24));
        assert_eq!(parse_proc_uptime(""), None);
    }

    #[test]
    fn test_parse_gvariant_numbers() {
        assert_eq!(parse_gvariant_u64("(uint64 15230,)"), Some(15230));
        assert_eq!(parse_gvariant_u64("(uint32 42,)\n"), Some(42));
        assert_eq!(parse_gvariant_u64("()"), None);
    }

    #[test]
    fn test_parse_property_reply() {
        assert_eq!(parse_gvariant_u64("(<uint32 87>,)"), Some(87));
        assert_eq!(parse_gvariant_u64("(<uint32 0>,)\n"), Some(0));
        assert_eq!(parse_gvariant_bool("(<true>,)"), Some(true));
    }

    #[test]
    fn test_parse_gvariant_bool() {
        assert_eq!(parse_gvariant_bool("(true,)"), Some(true));
        assert_eq!(parse_gvariant_bool("(false,)"), Some(false));
        assert_eq!(parse_gvariant_bool("(uint32 1,)"), None);
    }

    #[test]
    fn test_parse_lock_signal_lines() {
        let line = "/org/gnome/ScreenSaver: org.gnome.ScreenSaver.ActiveChanged (true,)";
        assert_eq!(parse_active_changed(line), Some(PlatformEvent::Lock(true)));

        let line = "/org/freedesktop/ScreenSaver: org.freedesktop.ScreenSaver.ActiveChanged (false,)";
        assert_eq!(parse_active_changed(line), Some(PlatformEvent::Lock(false)));

        let line = "/org/gnome/ScreenSaver: org.gnome.ScreenSaver.WakeUpScreen ()";
        assert_eq!(parse_active_changed(line), None);
    }

    #[test]
    fn test_parse_sleep_signal_lines() {
        let line = "/org/freedesktop/login1: org.freedesktop.login1.Manager.PrepareForSleep (true,)";
        assert_eq!(parse_prepare_for_sleep(line), Some(PlatformEvent::Sleep(true)));

        let line = "/org/freedesktop/login1: org.freedesktop.login1.Manager.PrepareForShutdown (true,)";
        assert_eq!(parse_prepare_for_sleep(line), None);
    }
}
