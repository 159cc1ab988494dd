// Caller-side session operations
// Each function is one short-lived CLI action against the shared .clrun/ state.
// Nothing here holds state between calls; the files are the source of truth.

use crate::session::buffer::{split_lines, BufferLog};
use crate::session::config::Config;
use crate::session::error::SessionError;
use crate::session::keys::{resolve_keys, KEY_PRIORITY};
use crate::session::ledger::Ledger;
use crate::session::lock::RuntimeLock;
use crate::session::maintenance::cleanup_stale_temps;
use crate::session::persistence::SessionRegistry;
use crate::session::process;
use crate::session::protocol::{
    LedgerEventType, QueueEntry, RuntimeState, Session, SessionStatus, TerminalId,
    RAW_INPUT_PREFIX,
};
use crate::session::queue::QueueStore;
use crate::session::recovery::recover_sessions;
use crate::session::restore::{poll_until, restore_session, RestoreOutcome};
use crate::session::worker::WorkerArgs;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lines of output collected after creating a session
const CREATE_OUTPUT_LINES: usize = 50;

// ============================================================================
// Advisories
// ============================================================================

/// Warnings for input that probably lost a shell-expanded variable
pub fn input_warnings(input: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    let trimmed = input.trim();

    if trimmed.is_empty() {
        warnings.push(
            "Input is empty. If you meant to send a variable like $MY_VAR, single-quote it \
             so your shell does not expand it: clrun input <id> 'echo $MY_VAR'"
                .to_string(),
        );
    }

    if matches!(trimmed, "echo" | "printf" | "cat") {
        warnings.push(format!(
            "Input \"{trimmed}\" looks like a command missing its argument. \
             Single-quote shell variables: clrun input <id> 'echo $MY_VAR'"
        ));
    }

    warnings
}

pub fn command_warnings(command: &str) -> Vec<String> {
    if command.trim().is_empty() {
        vec!["Command is empty. Provide a command to run: clrun run <command>".to_string()]
    } else {
        Vec::new()
    }
}

fn clean_lines(text: &str) -> Vec<String> {
    split_lines(text)
        .into_iter()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect()
}

// ============================================================================
// Create
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
    pub terminal_id: TerminalId,
    pub command: String,
    pub cwd: PathBuf,
    /// Last status seen; `None` if the worker never wrote its record
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub worker_pid: u32,
    pub output: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Start a new session running `command` in `cwd`
///
/// Returns once the session produced output, exited, or the first-output
/// wait elapsed.
pub fn create_session(config: &Config, command: &str, cwd: &Path) -> Result<CreatedSession> {
    config.ensure_dirs()?;

    let lock = RuntimeLock::new(&config.paths, &config.project_root);
    let outcome = lock.acquire()?;
    tracing::debug!(?outcome, "runtime lock");

    let recovery = recover_sessions(&config.paths)?;
    if recovery.recovered > 0 {
        tracing::info!(recovered = recovery.recovered, "recovered orphaned sessions");
    }

    match cleanup_stale_temps(&config.paths.root) {
        Ok(stats) if stats.deleted > 0 => tracing::debug!(deleted = stats.deleted, "cleaned stale temp files"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "stale temp cleanup failed"),
    }

    let terminal_id = Uuid::new_v4();
    QueueStore::new(&config.paths).init(terminal_id)?;

    let args = WorkerArgs::new(
        terminal_id,
        command,
        cwd.to_path_buf(),
        config.project_root.clone(),
        &config.shell,
        &config.timings,
    );
    let worker_pid = process::spawn_detached(&config.worker_path, &args.to_args(), cwd)
        .map_err(|e| SessionError::Spawn(format!("{e:#}")))?;
    tracing::info!(%terminal_id, worker_pid, command, "spawned worker");

    let registry = SessionRegistry::new(&config.paths);
    let buffer = BufferLog::new(config.paths.buffer_file(terminal_id));
    let timings = &config.timings;

    let exited = poll_until(timings.first_output_timeout, timings.first_output_poll, || {
        let session = registry.read(terminal_id);
        if session.as_ref().is_some_and(|s| s.status == SessionStatus::Exited) {
            return Some(true);
        }
        (buffer.line_count() > 0).then_some(false)
    });
    if exited == Some(false) {
        std::thread::sleep(timings.first_output_settle);
    }

    let session = registry.read(terminal_id);
    Ok(CreatedSession {
        terminal_id,
        command: command.to_string(),
        cwd: cwd.to_path_buf(),
        status: session.as_ref().map(|s| s.status),
        exit_code: session.as_ref().and_then(|s| s.last_exit_code),
        worker_pid,
        output: clean_lines(&buffer.tail_lines(CREATE_OUTPUT_LINES).join("\n")),
        warnings: command_warnings(command),
    })
}

// ============================================================================
// Input and keys
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct InputReceipt {
    pub terminal_id: TerminalId,
    pub entry: QueueEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestoreOutcome>,
    pub pending: usize,
    /// Output the session produced while we waited
    pub output: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

enum Delivery<'a> {
    Text { input: &'a str, priority: i64 },
    Override { input: &'a str },
    Keys { names: &'a [String], sequence: String },
}

/// Queue text for a session; `override_queue` discards everything still pending
pub fn send_input(
    config: &Config,
    terminal_id: TerminalId,
    input: &str,
    priority: i64,
    override_queue: bool,
) -> Result<InputReceipt> {
    let delivery = if override_queue {
        Delivery::Override { input }
    } else {
        Delivery::Text { input, priority }
    };
    let mut receipt = deliver(config, terminal_id, delivery)?;
    receipt.warnings = input_warnings(input);
    Ok(receipt)
}

/// Queue named keys as one raw sequence
pub fn send_keys(config: &Config, terminal_id: TerminalId, names: &[String]) -> Result<InputReceipt> {
    let sequence = resolve_keys(names)?;
    deliver(config, terminal_id, Delivery::Keys { names, sequence })
}

fn deliver(config: &Config, terminal_id: TerminalId, delivery: Delivery<'_>) -> Result<InputReceipt> {
    recover_sessions(&config.paths)?;

    let registry = SessionRegistry::new(&config.paths);
    let queue = QueueStore::new(&config.paths);
    let ledger = Ledger::new(&config.paths);
    let buffer = BufferLog::new(config.paths.buffer_file(terminal_id));

    let session = registry
        .read(terminal_id)
        .ok_or(SessionError::NotFound { terminal_id })?;

    match session.status {
        SessionStatus::Running => {
            if !process::is_alive(session.worker_pid) {
                return Err(SessionError::WorkerNotAlive {
                    terminal_id,
                    pid: session.worker_pid,
                }
                .into());
            }
        }
        SessionStatus::Suspended => {}
        status => return Err(SessionError::NotRunning { terminal_id, status }.into()),
    }

    let offset = buffer.size();

    let (entry, cancelled) = match &delivery {
        Delivery::Text { input, priority } => {
            let entry = queue.enqueue(terminal_id, input, *priority)?;
            ledger.log(
                LedgerEventType::InputQueued,
                Some(terminal_id),
                Some(json!({ "queue_id": entry.queue_id, "input": input, "priority": priority })),
            );
            (entry, None)
        }
        Delivery::Override { input } => {
            let (entry, cancelled) = queue.enqueue_override(terminal_id, input)?;
            ledger.log(
                LedgerEventType::InputOverride,
                Some(terminal_id),
                Some(json!({ "queue_id": entry.queue_id, "input": input, "cancelled_count": cancelled })),
            );
            (entry, Some(cancelled))
        }
        Delivery::Keys { names, sequence } => {
            let entry = queue.enqueue(
                terminal_id,
                &format!("{RAW_INPUT_PREFIX}{sequence}"),
                KEY_PRIORITY,
            )?;
            ledger.log(
                LedgerEventType::KeySent,
                Some(terminal_id),
                Some(json!({ "keys": names, "sequence_length": sequence.len() })),
            );
            (entry, None)
        }
    };

    // Input is queued first so the restored worker finds it on its first drain
    let restore = if session.status == SessionStatus::Suspended {
        Some(restore_session(config, terminal_id)?)
    } else {
        if !process::wake(session.worker_pid) {
            tracing::debug!(%terminal_id, pid = session.worker_pid, "wake signal not delivered");
        }
        None
    };

    std::thread::sleep(config.timings.response_wait);
    let (data, _) = buffer.read_since(offset)?;

    Ok(InputReceipt {
        terminal_id,
        entry,
        cancelled,
        restore,
        pending: queue.pending_count(terminal_id),
        output: clean_lines(&String::from_utf8_lossy(&data)),
        warnings: Vec::new(),
    })
}

// ============================================================================
// Kill
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum KillOutcome {
    Killed {
        worker_signalled: bool,
        pty_signalled: bool,
    },
    /// Session had already exited or been killed; nothing was changed
    AlreadyTerminated { status: SessionStatus },
}

/// Terminate a session; safe to repeat
pub fn kill_session(config: &Config, terminal_id: TerminalId) -> Result<KillOutcome> {
    let registry = SessionRegistry::new(&config.paths);
    let session = registry
        .read(terminal_id)
        .ok_or(SessionError::NotFound { terminal_id })?;

    if matches!(session.status, SessionStatus::Exited | SessionStatus::Killed) {
        return Ok(KillOutcome::AlreadyTerminated {
            status: session.status,
        });
    }

    let worker_signalled = process::is_alive(session.worker_pid) && process::terminate(session.worker_pid);
    let pty_signalled = process::is_alive(session.pid) && process::terminate(session.pid);

    // Processes may already be gone; the record is overwritten regardless
    registry.update(terminal_id, |s| {
        s.status = SessionStatus::Killed;
        s.last_activity_at = Utc::now();
    })?;

    tracing::info!(%terminal_id, worker_signalled, pty_signalled, "session killed");
    Ledger::new(&config.paths).log(
        LedgerEventType::SessionKilled,
        Some(terminal_id),
        Some(json!({ "worker_killed": worker_signalled, "pty_killed": pty_signalled })),
    );

    Ok(KillOutcome::Killed {
        worker_signalled,
        pty_signalled,
    })
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub terminal_id: TerminalId,
    pub command: String,
    pub cwd: String,
    pub status: SessionStatus,
    pub pid: u32,
    pub worker_pid: u32,
    pub worker_alive: bool,
    pub queue_length: usize,
    pub last_exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub running: usize,
    pub suspended: usize,
    pub exited: usize,
    pub killed: usize,
    pub detached: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub project_root: PathBuf,
    pub runtime: Option<RuntimeState>,
    pub runtime_active: bool,
    pub recovered: usize,
    pub summary: StatusCounts,
    pub sessions: Vec<SessionSummary>,
}

pub fn status(config: &Config) -> Result<StatusReport> {
    let lock = RuntimeLock::new(&config.paths, &config.project_root);
    let mut report = StatusReport {
        project_root: config.project_root.clone(),
        runtime: lock.read_runtime_state(),
        runtime_active: lock.is_runtime_active(),
        recovered: 0,
        summary: StatusCounts::default(),
        sessions: Vec::new(),
    };

    if !config.paths.root.exists() {
        return Ok(report);
    }

    report.recovered = recover_sessions(&config.paths)?.recovered;

    let queue = QueueStore::new(&config.paths);
    for session in SessionRegistry::new(&config.paths).list() {
        let counts = &mut report.summary;
        counts.total += 1;
        match session.status {
            SessionStatus::Running => counts.running += 1,
            SessionStatus::Suspended => counts.suspended += 1,
            SessionStatus::Exited => counts.exited += 1,
            SessionStatus::Killed => counts.killed += 1,
            SessionStatus::Detached => counts.detached += 1,
        }

        report.sessions.push(SessionSummary {
            worker_alive: process::is_alive(session.worker_pid),
            queue_length: queue.pending_count(session.terminal_id),
            terminal_id: session.terminal_id,
            command: session.command,
            cwd: session.cwd,
            status: session.status,
            pid: session.pid,
            worker_pid: session.worker_pid,
            last_exit_code: session.last_exit_code,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
        });
    }

    Ok(report)
}

// ============================================================================
// Reads
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BufferView {
    pub terminal_id: TerminalId,
    pub command: String,
    pub status: SessionStatus,
    pub last_exit_code: Option<i32>,
    pub lines: Vec<String>,
    pub total_lines: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferDelta {
    pub terminal_id: TerminalId,
    pub status: SessionStatus,
    pub output: String,
    /// Offset to pass to the next call
    pub next_offset: u64,
}

fn existing_session(config: &Config, terminal_id: TerminalId) -> Result<(Session, BufferLog)> {
    let session = SessionRegistry::new(&config.paths)
        .read(terminal_id)
        .ok_or(SessionError::NotFound { terminal_id })?;
    Ok((session, BufferLog::new(config.paths.buffer_file(terminal_id))))
}

fn view(session: Session, buffer: &BufferLog, lines: Vec<String>) -> BufferView {
    BufferView {
        terminal_id: session.terminal_id,
        command: session.command,
        status: session.status,
        last_exit_code: session.last_exit_code,
        lines: lines
            .into_iter()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect(),
        total_lines: buffer.line_count(),
    }
}

pub fn tail(config: &Config, terminal_id: TerminalId, lines: usize) -> Result<BufferView> {
    let (session, buffer) = existing_session(config, terminal_id)?;
    let tail = buffer.tail_lines(lines);
    Ok(view(session, &buffer, tail))
}

pub fn head(config: &Config, terminal_id: TerminalId, lines: usize) -> Result<BufferView> {
    let (session, buffer) = existing_session(config, terminal_id)?;
    let head = buffer.head_lines(lines);
    Ok(view(session, &buffer, head))
}

pub fn buffer_since(config: &Config, terminal_id: TerminalId, offset: u64) -> Result<BufferDelta> {
    let (session, buffer) = existing_session(config, terminal_id)?;
    let (data, next_offset) = buffer.read_since(offset)?;
    Ok(BufferDelta {
        terminal_id,
        status: session.status,
        output: String::from_utf8_lossy(&data).into_owned(),
        next_offset,
    })
}
