// Caller-facing session errors

use crate::session::protocol::{SessionStatus, TerminalId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {terminal_id} not found")]
    NotFound { terminal_id: TerminalId },

    #[error("Session {terminal_id} is {status}, not running")]
    NotRunning {
        terminal_id: TerminalId,
        status: SessionStatus,
    },

    #[error("Worker process {pid} for session {terminal_id} is not alive")]
    WorkerNotAlive { terminal_id: TerminalId, pid: u32 },

    #[error("Unknown key name(s): {}", .unknown.join(", "))]
    InvalidKeys { unknown: Vec<String> },

    #[error("Failed to start worker: {0}")]
    Spawn(String),
}

impl SessionError {
    /// Output of the session can still be read even though input is refused
    pub fn can_read_history(&self) -> bool {
        matches!(
            self,
            SessionError::NotRunning { .. } | SessionError::WorkerNotAlive { .. }
        )
    }

    /// Suggestions for what to do next
    pub fn hints(&self) -> Vec<String> {
        match self {
            SessionError::NotFound { .. } => {
                vec!["Run `clrun status` to list known sessions".to_string()]
            }
            SessionError::NotRunning { terminal_id, status } => match status {
                SessionStatus::Exited => vec![
                    format!("The command finished; you can still read output with `clrun tail {terminal_id}`"),
                    "Start a new session with `clrun run <command>` to continue".to_string(),
                ],
                SessionStatus::Killed => vec![
                    "The session was killed; start a new one with `clrun run <command>`".to_string(),
                    format!("Earlier output is still readable with `clrun tail {terminal_id}`"),
                ],
                SessionStatus::Detached => vec![
                    "The session was orphaned after a crash and accepts no more input".to_string(),
                    format!("Read the buffer with `clrun tail {terminal_id}`"),
                ],
                SessionStatus::Running | SessionStatus::Suspended => Vec::new(),
            },
            SessionError::WorkerNotAlive { terminal_id, .. } => vec![
                "Run `clrun status` to reconcile session state".to_string(),
                format!("Read the buffer with `clrun tail {terminal_id}`"),
            ],
            SessionError::InvalidKeys { .. } => vec![format!(
                "Valid keys: {}",
                crate::session::keys::key_names().join(", ")
            )],
            SessionError::Spawn(_) => {
                vec!["Check that clrun-worker is installed next to clrun or set CLRUN_WORKER_BIN".to_string()]
            }
        }
    }
}
