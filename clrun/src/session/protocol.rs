// Session protocol - shared structs for worker <-> caller communication
// Every struct here is persisted as JSON under .clrun/ and is the only channel
// between the detached worker and short-lived CLI invocations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique terminal identifier
pub type TerminalId = Uuid;

/// Marker prefix for queue entries whose payload is written verbatim
pub const RAW_INPUT_PREFIX: &str = "\u{0}RAW\u{0}";

/// Priority reserved for override entries; normal inputs should stay below it
pub const OVERRIDE_PRIORITY: i64 = i64::MAX;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// A live worker owns the PTY
    Running,
    /// The shell exited on its own
    Exited,
    /// Terminated on request
    Killed,
    /// Idle worker shut down gracefully; resumable
    Suspended,
    /// Owning processes vanished without a clean transition
    Detached,
}

impl SessionStatus {
    /// No further input can be delivered to this incarnation or any later one
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Exited | SessionStatus::Killed | SessionStatus::Detached
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Exited => "exited",
            SessionStatus::Killed => "killed",
            SessionStatus::Suspended => "suspended",
            SessionStatus::Detached => "detached",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "exited" => Ok(SessionStatus::Exited),
            "killed" => Ok(SessionStatus::Killed),
            "suspended" => Ok(SessionStatus::Suspended),
            "detached" => Ok(SessionStatus::Detached),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Shell state captured right before an idle suspension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedState {
    pub cwd: String,
    pub env: BTreeMap<String, String>,
    pub captured_at: DateTime<Utc>,
}

/// Session metadata stored in `sessions/<id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub terminal_id: TerminalId,
    pub created_at: DateTime<Utc>,
    pub cwd: String,
    /// Command line the session was started with
    pub command: String,
    pub shell: String,
    pub status: SessionStatus,
    /// PID of the shell running inside the PTY
    pub pid: u32,
    /// PID of the worker process that owns the PTY
    pub worker_pid: u32,
    pub queue_length: usize,
    pub last_exit_code: Option<i32>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_state: Option<SavedState>,
}

impl Session {
    pub fn new(
        terminal_id: TerminalId,
        command: String,
        cwd: String,
        shell: String,
        pid: u32,
        worker_pid: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            terminal_id,
            created_at: now,
            cwd,
            command,
            shell,
            status: SessionStatus::Running,
            pid,
            worker_pid,
            queue_length: 0,
            last_exit_code: None,
            last_activity_at: now,
            saved_state: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    Normal,
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Sent,
    Cancelled,
}

/// What the worker should write to the PTY for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Written verbatim
    Raw(&'a str),
    /// Written followed by a carriage return
    Line(&'a str),
}

/// One unit of pending input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: Uuid,
    pub input: String,
    pub priority: i64,
    pub mode: QueueMode,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(input: String, priority: i64, mode: QueueMode) -> Self {
        Self {
            queue_id: Uuid::new_v4(),
            input,
            priority,
            mode,
            status: QueueStatus::Queued,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    pub fn is_raw(&self) -> bool {
        self.input.starts_with(RAW_INPUT_PREFIX)
    }

    pub fn payload(&self) -> Payload<'_> {
        match self.input.strip_prefix(RAW_INPUT_PREFIX) {
            Some(raw) => Payload::Raw(raw),
            None => Payload::Line(&self.input),
        }
    }

    /// Input as it should appear in logs and the ledger
    pub fn display_input(&self) -> &str {
        if self.is_raw() {
            "[raw keys]"
        } else {
            &self.input
        }
    }
}

/// Contents of `queues/<id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueFile {
    pub terminal_id: TerminalId,
    pub entries: Vec<QueueEntry>,
}

impl QueueFile {
    pub fn empty(terminal_id: TerminalId) -> Self {
        Self {
            terminal_id,
            entries: Vec::new(),
        }
    }
}

/// Contents of `runtime.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub version: String,
    pub project_root: String,
}

/// Audit event names written to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEventType {
    #[serde(rename = "runtime.started")]
    RuntimeStarted,
    #[serde(rename = "runtime.stopped")]
    RuntimeStopped,
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.exited")]
    SessionExited,
    #[serde(rename = "session.killed")]
    SessionKilled,
    #[serde(rename = "session.detached")]
    SessionDetached,
    #[serde(rename = "session.suspended")]
    SessionSuspended,
    #[serde(rename = "session.restored")]
    SessionRestored,
    #[serde(rename = "input.queued")]
    InputQueued,
    #[serde(rename = "input.sent")]
    InputSent,
    #[serde(rename = "input.cancelled")]
    InputCancelled,
    #[serde(rename = "input.override")]
    InputOverride,
    #[serde(rename = "key.sent")]
    KeySent,
    #[serde(rename = "error")]
    Error,
}

/// One line of `ledger/events.log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub timestamp: DateTime<Utc>,
    pub event: LedgerEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<TerminalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
