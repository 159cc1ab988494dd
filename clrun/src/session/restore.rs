// Restore a suspended session by starting a fresh worker with --restore

use crate::session::config::Config;
use crate::session::error::SessionError;
use crate::session::persistence::SessionRegistry;
use crate::session::process;
use crate::session::protocol::{SessionStatus, TerminalId};
use crate::session::worker::WorkerArgs;
use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// The new worker published itself as running
    Ready { worker_pid: u32 },
    /// The worker was started but did not report in time; state is unknown
    Pending { spawned_pid: u32 },
}

/// Poll `check` every `interval` until it yields a value or `timeout` passes
pub fn poll_until<T>(
    timeout: Duration,
    interval: Duration,
    mut check: impl FnMut() -> Option<T>,
) -> Option<T> {
    let start = Instant::now();
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        std::thread::sleep(interval.min(timeout.saturating_sub(start.elapsed())));
    }
}

pub fn restore_session(config: &Config, terminal_id: TerminalId) -> Result<RestoreOutcome> {
    let registry = SessionRegistry::new(&config.paths);
    let session = registry
        .read(terminal_id)
        .ok_or(SessionError::NotFound { terminal_id })?;

    if session.status != SessionStatus::Suspended {
        return Err(SessionError::NotRunning {
            terminal_id,
            status: session.status,
        }
        .into());
    }

    // A saved directory may have been removed while the session slept
    let cwd = session
        .saved_state
        .as_ref()
        .map(|s| s.cwd.clone())
        .filter(|dir| Path::new(dir).is_dir())
        .unwrap_or_else(|| session.cwd.clone());

    let mut args = WorkerArgs::new(
        terminal_id,
        &session.command,
        PathBuf::from(&cwd),
        config.project_root.clone(),
        &session.shell,
        &config.timings,
    );
    args.restore = true;

    let spawned_pid = process::spawn_detached(&config.worker_path, &args.to_args(), &config.project_root)
        .map_err(|e| SessionError::Spawn(format!("{e:#}")))?;
    tracing::info!(%terminal_id, spawned_pid, cwd = %cwd, "restoring suspended session");

    let previous_worker = session.worker_pid;
    let timings = &config.timings;
    let ready = poll_until(timings.restore_timeout, timings.restore_poll, || {
        registry
            .read(terminal_id)
            .filter(|s| s.status == SessionStatus::Running && s.worker_pid != previous_worker)
            .map(|s| s.worker_pid)
    });

    Ok(match ready {
        Some(worker_pid) => RestoreOutcome::Ready { worker_pid },
        None => {
            tracing::warn!(%terminal_id, spawned_pid, "restored worker did not report in time");
            RestoreOutcome::Pending { spawned_pid }
        }
    })
}
