use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

pub const PID_FILE: &str = "presence.pid";

/// PID file bookkeeping for the background daemon
pub struct DaemonControl {
    pid_file: PathBuf,
}

impl DaemonControl {
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            pid_file: data_dir.join(PID_FILE),
        }
    }

    #[must_use]
    pub fn pid_path(&self) -> &Path {
        &self.pid_file
    }

    fn read_pid(&self) -> anyhow::Result<u32> {
        let contents = fs::read_to_string(&self.pid_file)?;
        contents
            .trim()
            .parse::<u32>()
            .with_context(|| format!("Invalid PID file {}", self.pid_file.display()))
    }

    /// PID recorded by `daemon start`, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the PID file exists but cannot be read or parsed
    pub fn get_pid(&self) -> anyhow::Result<Option<u32>> {
        if !self.pid_file.exists() {
            return Ok(None);
        }
        Ok(Some(self.read_pid()?))
    }

    /// Record the daemon's PID
    ///
    /// # Errors
    ///
    /// Returns an error if the PID file cannot be written
    pub fn write_pid(&self, pid: u32) -> anyhow::Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.pid_file, pid.to_string())?;
        Ok(())
    }

    /// Remove PID file
    ///
    /// # Errors
    ///
    /// Returns an error if the PID file exists but cannot be removed
    pub fn remove_pid(&self) -> anyhow::Result<()> {
        if self.pid_file.exists() {
            fs::remove_file(&self.pid_file)?;
        }
        Ok(())
    }
}
