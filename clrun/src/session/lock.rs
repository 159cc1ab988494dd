// Runtime lock for a project
// Advisory only: records which process last took ownership of .clrun/ and lets
// later processes attach while it lives or steal it once it is gone.

use crate::session::config::StatePaths;
use crate::session::persistence::{atomic_write, atomic_write_json, read_json};
use crate::session::process;
use crate::session::protocol::RuntimeState;
use anyhow::Result;
use chrono::Utc;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// No lock existed; this process now owns it
    Acquired,
    /// The previous owner was dead (or the lock unreadable); this process now owns it
    Stolen { previous_pid: Option<u32> },
    /// A live process already owns the lock
    Attached { pid: u32 },
}

impl LockOutcome {
    pub fn is_owner(&self) -> bool {
        !matches!(self, LockOutcome::Attached { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeLock {
    paths: StatePaths,
    project_root: String,
}

impl RuntimeLock {
    pub fn new(paths: &StatePaths, project_root: &Path) -> Self {
        Self {
            paths: paths.clone(),
            project_root: project_root.to_string_lossy().into_owned(),
        }
    }

    fn recorded_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.paths.runtime_pid)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
    }

    pub fn acquire(&self) -> Result<LockOutcome> {
        self.paths.ensure_dirs()?;

        let mut outcome = LockOutcome::Acquired;
        if self.paths.runtime_lock.exists() {
            let previous_pid = self.recorded_pid();
            match previous_pid {
                Some(pid) if process::is_alive(pid) => {
                    return Ok(LockOutcome::Attached { pid });
                }
                _ => {
                    tracing::debug!(?previous_pid, "stealing stale runtime lock");
                    self.remove_files(true);
                    outcome = LockOutcome::Stolen { previous_pid };
                }
            }
        }

        let pid = std::process::id();
        let state = RuntimeState {
            pid,
            started_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            project_root: self.project_root.clone(),
        };

        atomic_write(
            &self.paths.runtime_lock,
            &format!("{}\n{}", pid, state.started_at.timestamp_millis()),
        )?;
        atomic_write(&self.paths.runtime_pid, &pid.to_string())?;
        atomic_write_json(&self.paths.runtime_json, &state)?;

        Ok(outcome)
    }

    pub fn release(&self) {
        self.remove_files(true);
    }

    pub fn read_runtime_state(&self) -> Option<RuntimeState> {
        read_json(&self.paths.runtime_json)
    }

    /// Lock exists and its owner is alive
    pub fn is_runtime_active(&self) -> bool {
        self.recorded_pid().is_some_and(process::is_alive)
    }

    /// Remove lock files whose pid is dead or unreadable
    ///
    /// Returns whether anything was removed. `runtime.json` is kept as a
    /// record of the last runtime.
    pub fn cleanup_stale_lock(&self) -> bool {
        if !self.paths.runtime_pid.exists() {
            return false;
        }
        match self.recorded_pid() {
            Some(pid) if process::is_alive(pid) => false,
            _ => {
                self.remove_files(false);
                true
            }
        }
    }

    fn remove_files(&self, include_state: bool) {
        let mut files = vec![&self.paths.runtime_lock, &self.paths.runtime_pid];
        if include_state {
            files.push(&self.paths.runtime_json);
        }
        for file in files {
            let _ = fs::remove_file(file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Far above any default pid_max
    const DEAD_PID: u32 = 999_999_999;

    fn test_lock() -> (RuntimeLock, StatePaths, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = StatePaths::new(temp_dir.path());
        (RuntimeLock::new(&paths, temp_dir.path()), paths, temp_dir)
    }

    #[test]
    fn test_acquire_fresh_lock() {
        let (lock, paths, _temp) = test_lock();

        assert_eq!(lock.acquire().unwrap(), LockOutcome::Acquired);

        let contents = fs::read_to_string(&paths.runtime_lock).unwrap();
        let mut parts = contents.lines();
        assert_eq!(parts.next().unwrap(), std::process::id().to_string());
        assert!(parts.next().unwrap().parse::<i64>().is_ok());

        let state = lock.read_runtime_state().unwrap();
        assert_eq!(state.pid, std::process::id());
        assert_eq!(state.version, env!("CARGO_PKG_VERSION"));
        assert!(lock.is_runtime_active());
    }

    #[test]
    fn test_live_owner_means_attach() {
        let (lock, _paths, _temp) = test_lock();
        lock.acquire().unwrap();

        let outcome = lock.acquire().unwrap();
        assert_eq!(
            outcome,
            LockOutcome::Attached {
                pid: std::process::id()
            }
        );
        assert!(!outcome.is_owner());
    }

    #[test]
    fn test_dead_owner_is_stolen() {
        let (lock, paths, _temp) = test_lock();
        paths.ensure_dirs().unwrap();
        fs::write(&paths.runtime_lock, format!("{DEAD_PID}\n0")).unwrap();
        fs::write(&paths.runtime_pid, DEAD_PID.to_string()).unwrap();

        let outcome = lock.acquire().unwrap();
        assert_eq!(
            outcome,
            LockOutcome::Stolen {
                previous_pid: Some(DEAD_PID)
            }
        );
        assert_eq!(lock.read_runtime_state().unwrap().pid, std::process::id());
    }

    #[test]
    fn test_corrupt_lock_is_stolen() {
        let (lock, paths, _temp) = test_lock();
        paths.ensure_dirs().unwrap();
        fs::write(&paths.runtime_lock, "garbage").unwrap();
        fs::write(&paths.runtime_pid, "not-a-pid").unwrap();

        assert_eq!(
            lock.acquire().unwrap(),
            LockOutcome::Stolen { previous_pid: None }
        );
    }

    #[test]
    fn test_release_and_stale_cleanup() {
        let (lock, paths, _temp) = test_lock();
        lock.acquire().unwrap();
        assert!(!lock.cleanup_stale_lock());

        lock.release();
        assert!(!paths.runtime_lock.exists());
        assert!(!lock.is_runtime_active());
        assert!(lock.read_runtime_state().is_none());

        fs::write(&paths.runtime_pid, DEAD_PID.to_string()).unwrap();
        fs::write(&paths.runtime_lock, "x").unwrap();
        assert!(lock.cleanup_stale_lock());
        assert!(!paths.runtime_pid.exists());
        assert!(!paths.runtime_lock.exists());
    }
}
