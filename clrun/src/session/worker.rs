// Worker supervisor: owns one PTY for one session incarnation
//
// Runs a single-threaded event loop over:
// - PTY output (appended to the buffer)
// - a queue poll tick and SIGUSR1 wake-ups (queue drain)
// - an idle check tick (suspend with state capture)
// - PTY exit, SIGTERM and SIGINT (terminal transitions)

use crate::session::buffer::BufferLog;
use crate::session::config::{StatePaths, Timings};
use crate::session::ledger::Ledger;
use crate::session::persistence::SessionRegistry;
use crate::session::protocol::{
    LedgerEventType, Payload, SavedState, Session, SessionStatus, TerminalId,
};
use crate::session::queue::QueueStore;
use crate::session::runtime::{PtyEvent, PtyRuntime, ShellSpec};
use crate::session::shell_state;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const RESTORED_MARKER: &str = "\n--- session restored ---\n";
pub const SUSPENDED_MARKER: &str = "\n--- session suspended (idle timeout) ---\n";

/// Command line of the `clrun-worker` binary
#[derive(Debug, Clone, Parser)]
#[command(name = "clrun-worker", about = "Detached PTY supervisor for one clrun session")]
pub struct WorkerArgs {
    pub terminal_id: TerminalId,
    pub command: String,
    pub cwd: PathBuf,
    pub project_root: PathBuf,

    /// Resume a suspended session from its saved state
    #[arg(long)]
    pub restore: bool,

    #[arg(long, default_value = "/bin/sh")]
    pub shell: String,

    #[arg(long, default_value_t = 300_000)]
    pub idle_timeout_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    pub idle_check_ms: u64,

    #[arg(long, default_value_t = 200)]
    pub queue_poll_ms: u64,

    #[arg(long, default_value_t = 600)]
    pub capture_wait_ms: u64,
}

impl WorkerArgs {
    pub fn new(
        terminal_id: TerminalId,
        command: &str,
        cwd: PathBuf,
        project_root: PathBuf,
        shell: &str,
        timings: &Timings,
    ) -> Self {
        Self {
            terminal_id,
            command: command.to_string(),
            cwd,
            project_root,
            restore: false,
            shell: shell.to_string(),
            idle_timeout_ms: timings.idle_timeout.as_millis() as u64,
            idle_check_ms: timings.idle_check_interval.as_millis() as u64,
            queue_poll_ms: timings.queue_poll_interval.as_millis() as u64,
            capture_wait_ms: timings.capture_wait.as_millis() as u64,
        }
    }

    /// Arguments to pass to the worker binary
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--shell={}", self.shell),
            format!("--idle-timeout-ms={}", self.idle_timeout_ms),
            format!("--idle-check-ms={}", self.idle_check_ms),
            format!("--queue-poll-ms={}", self.queue_poll_ms),
            format!("--capture-wait-ms={}", self.capture_wait_ms),
        ];
        if self.restore {
            args.push("--restore".to_string());
        }
        // Commands may start with '-'
        args.push("--".to_string());
        args.extend([
            self.terminal_id.to_string(),
            self.command.clone(),
            self.cwd.to_string_lossy().into_owned(),
            self.project_root.to_string_lossy().into_owned(),
        ]);
        args
    }

    pub fn timings(&self) -> Timings {
        Timings {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            idle_check_interval: Duration::from_millis(self.idle_check_ms.max(1)),
            queue_poll_interval: Duration::from_millis(self.queue_poll_ms.max(1)),
            capture_wait: Duration::from_millis(self.capture_wait_ms),
            ..Timings::default()
        }
    }
}

/// How the worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Exited { exit_code: Option<i32> },
    Killed { signal: &'static str },
    Suspended { saved_state: bool },
}

#[cfg(unix)]
struct Signals {
    wake: tokio::signal::unix::Signal,
    term: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            wake: signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?,
            term: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
            int: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
        })
    }
}

struct Worker {
    id: TerminalId,
    args: WorkerArgs,
    timings: Timings,
    paths: StatePaths,
    registry: SessionRegistry,
    queue: QueueStore,
    buffer: BufferLog,
    ledger: Ledger,
    pty: PtyRuntime,
    events: mpsc::UnboundedReceiver<PtyEvent>,
    last_activity: Instant,
}

/// Run a worker until its session exits, is killed or suspends
pub async fn run(args: WorkerArgs) -> Result<WorkerExit> {
    // Handlers go in before our pid is published in the session record
    #[cfg(unix)]
    let mut signals = Signals::install()?;

    let id = args.terminal_id;
    let timings = args.timings();
    let paths = StatePaths::new(&args.project_root);
    paths.ensure_dirs().context("Failed to create state directory")?;

    let registry = SessionRegistry::new(&paths);
    let ledger = Ledger::new(&paths);
    let buffer = BufferLog::new(paths.buffer_file(id));

    let previous = if args.restore { registry.read(id) } else { None };
    let saved_state = previous.as_ref().and_then(|s| s.saved_state.clone());
    let cwd = spawn_cwd(saved_state.as_ref(), previous.as_ref(), &args.cwd);

    if !args.restore {
        buffer.init()?;
    }

    let (pty, events) = match PtyRuntime::spawn(&ShellSpec::new(&args.shell, &cwd)) {
        Ok(spawned) => spawned,
        Err(e) => {
            ledger.log(
                LedgerEventType::Error,
                Some(id),
                Some(json!({ "stage": "spawn", "error": e.to_string() })),
            );
            return Err(e);
        }
    };
    let pty_pid = pty.pid().unwrap_or(0);

    let mut session = Session::new(
        id,
        args.command.clone(),
        cwd.to_string_lossy().into_owned(),
        args.shell.clone(),
        pty_pid,
        std::process::id(),
    );
    if let Some(previous) = &previous {
        session.created_at = previous.created_at;
    }
    session.queue_length = QueueStore::new(&paths).pending_count(id);
    registry.write(&session)?;

    tracing::info!(
        terminal_id = %id,
        pid = pty_pid,
        cwd = %cwd.display(),
        restore = args.restore,
        "worker started"
    );
    if !args.restore {
        ledger.log(
            LedgerEventType::SessionCreated,
            Some(id),
            Some(json!({ "command": args.command, "cwd": cwd, "pid": pty_pid })),
        );
    }

    let mut worker = Worker {
        id,
        queue: QueueStore::new(&paths),
        timings,
        paths,
        registry,
        buffer,
        ledger,
        pty,
        events,
        args,
        last_activity: Instant::now(),
    };

    tokio::time::sleep(worker.timings.startup_settle).await;
    match &saved_state {
        Some(state) => worker.replay_state(state)?,
        None => worker.pty.write(format!("{}\n", worker.args.command))?,
    }

    #[cfg(unix)]
    let exit = worker.event_loop(&mut signals).await;
    #[cfg(not(unix))]
    let exit = worker.event_loop().await;
    exit
}

/// Directory for a new shell: saved cwd, then the previous record's cwd, then
/// the requested one, whichever still exists first
fn spawn_cwd(saved: Option<&SavedState>, previous: Option<&Session>, requested: &Path) -> PathBuf {
    saved
        .map(|s| PathBuf::from(&s.cwd))
        .into_iter()
        .chain(previous.map(|s| PathBuf::from(&s.cwd)))
        .chain(std::iter::once(requested.to_path_buf()))
        .find(|p| p.is_dir())
        .unwrap_or_else(|| requested.to_path_buf())
}

/// Running -> exited; `false` if a kill or suspension got there first
fn record_exit(
    registry: &SessionRegistry,
    id: TerminalId,
    exit_code: Option<i32>,
) -> Result<bool> {
    let mut applied = false;
    registry.update(id, |s| {
        if s.status == SessionStatus::Running {
            s.status = SessionStatus::Exited;
            s.last_exit_code = exit_code;
            s.queue_length = 0;
            s.last_activity_at = Utc::now();
            applied = true;
        }
    })?;
    Ok(applied)
}

/// Running -> suspended; `false` if the session was killed meanwhile
fn record_suspension(
    registry: &SessionRegistry,
    id: TerminalId,
    saved_state: Option<SavedState>,
) -> Result<bool> {
    let mut applied = false;
    registry.update(id, |s| {
        if s.status == SessionStatus::Running {
            s.status = SessionStatus::Suspended;
            s.last_activity_at = Utc::now();
            s.saved_state = saved_state;
            applied = true;
        }
    })?;
    Ok(applied)
}

impl Worker {
    fn replay_state(&mut self, state: &SavedState) -> Result<()> {
        if let Some(line) = shell_state::export_line(&state.env) {
            self.pty.write(line)?;
        }
        self.append(RESTORED_MARKER.as_bytes());

        let restored_vars = shell_state::restorable_vars(&state.env).len();
        tracing::info!(terminal_id = %self.id, cwd = %state.cwd, restored_vars, "session restored");
        self.ledger.log(
            LedgerEventType::SessionRestored,
            Some(self.id),
            Some(json!({
                "restored_cwd": state.cwd,
                "restored_vars": restored_vars,
                "worker_pid": std::process::id(),
            })),
        );
        Ok(())
    }

    #[cfg(unix)]
    async fn event_loop(mut self, signals: &mut Signals) -> Result<WorkerExit> {
        let (mut queue_tick, mut idle_tick) = self.tickers();

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(PtyEvent::Output(data)) => self.on_output(&data),
                    Some(PtyEvent::Exited { exit_code }) => return Ok(self.on_exit(exit_code).await),
                    None => return Ok(self.on_exit(None).await),
                },
                _ = queue_tick.tick() => self.drain_queue(),
                _ = signals.wake.recv() => {
                    self.last_activity = Instant::now();
                    self.drain_queue();
                }
                _ = idle_tick.tick() => {
                    if self.last_activity.elapsed() >= self.timings.idle_timeout {
                        return Ok(self.suspend().await);
                    }
                }
                _ = signals.term.recv() => return Ok(self.on_signal("SIGTERM")),
                _ = signals.int.recv() => return Ok(self.on_signal("SIGINT")),
            }
        }
    }

    #[cfg(not(unix))]
    async fn event_loop(mut self) -> Result<WorkerExit> {
        let (mut queue_tick, mut idle_tick) = self.tickers();

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(PtyEvent::Output(data)) => self.on_output(&data),
                    Some(PtyEvent::Exited { exit_code }) => return Ok(self.on_exit(exit_code).await),
                    None => return Ok(self.on_exit(None).await),
                },
                _ = queue_tick.tick() => self.drain_queue(),
                _ = idle_tick.tick() => {
                    if self.last_activity.elapsed() >= self.timings.idle_timeout {
                        return Ok(self.suspend().await);
                    }
                }
                _ = tokio::signal::ctrl_c() => return Ok(self.on_signal("SIGINT")),
            }
        }
    }

    fn tickers(&self) -> (tokio::time::Interval, tokio::time::Interval) {
        let now = Instant::now();
        let mut queue_tick = interval_at(
            now + self.timings.queue_poll_interval,
            self.timings.queue_poll_interval,
        );
        queue_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut idle_tick = interval_at(
            now + self.timings.idle_check_interval,
            self.timings.idle_check_interval,
        );
        idle_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        (queue_tick, idle_tick)
    }

    fn append(&self, data: &[u8]) {
        if let Err(e) = self.buffer.append(data) {
            tracing::warn!(terminal_id = %self.id, error = %e, "buffer append failed");
        }
    }

    fn on_output(&mut self, data: &[u8]) {
        self.append(data);
        self.last_activity = Instant::now();
        if let Err(e) = self
            .registry
            .update(self.id, |s| s.last_activity_at = Utc::now())
        {
            tracing::debug!(terminal_id = %self.id, error = %e, "activity update failed");
        }
    }

    /// Write every queued entry to the PTY in priority order
    fn drain_queue(&mut self) {
        if let Err(e) = self.try_drain_queue() {
            // Queue file may be mid-rewrite by a caller; next tick retries
            tracing::warn!(terminal_id = %self.id, error = %e, "queue drain failed");
        }
    }

    fn try_drain_queue(&mut self) -> Result<()> {
        let mut sent_any = false;
        while let Some(entry) = self.queue.next_queued(self.id) {
            match entry.payload() {
                Payload::Raw(bytes) => self.pty.write(bytes)?,
                Payload::Line(line) => self.pty.write(format!("{line}\r"))?,
            }
            self.queue.mark_sent(self.id, entry.queue_id)?;
            self.last_activity = Instant::now();
            sent_any = true;

            tracing::debug!(terminal_id = %self.id, queue_id = %entry.queue_id, "input sent");
            self.ledger.log(
                LedgerEventType::InputSent,
                Some(self.id),
                Some(json!({
                    "queue_id": entry.queue_id,
                    "input": entry.display_input(),
                })),
            );
        }

        let pending = self.queue.pending_count(self.id);
        let needs_update = sent_any
            || self
                .registry
                .read(self.id)
                .is_some_and(|s| s.queue_length != pending);
        if needs_update {
            self.registry.update(self.id, |s| s.queue_length = pending)?;
        }
        Ok(())
    }

    /// Keep appending output that is still in flight, up to `grace`
    async fn drain_output(&mut self, grace: Duration) {
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = self.events.recv() => match event {
                    Some(PtyEvent::Output(data)) => self.append(&data),
                    Some(PtyEvent::Exited { .. }) => {}
                    None => break,
                },
            }
        }
    }

    async fn on_exit(mut self, exit_code: Option<i32>) -> WorkerExit {
        self.drain_output(self.timings.exit_grace).await;

        match record_exit(&self.registry, self.id, exit_code) {
            Ok(true) => {
                tracing::info!(terminal_id = %self.id, ?exit_code, "shell exited");
                self.ledger.log(
                    LedgerEventType::SessionExited,
                    Some(self.id),
                    Some(json!({ "exit_code": exit_code })),
                );
            }
            Ok(false) => {
                tracing::info!(terminal_id = %self.id, ?exit_code, "shell exited after session left running");
            }
            Err(e) => {
                tracing::error!(terminal_id = %self.id, error = %e, "failed to record exit");
            }
        }
        WorkerExit::Exited { exit_code }
    }

    fn on_signal(mut self, signal: &'static str) -> WorkerExit {
        self.pty.kill();

        let result = self.registry.update(self.id, |s| {
            s.status = SessionStatus::Killed;
            s.last_activity_at = Utc::now();
        });
        if let Err(e) = result {
            tracing::error!(terminal_id = %self.id, error = %e, "failed to record kill");
        }

        tracing::info!(terminal_id = %self.id, signal, "worker terminated");
        self.ledger.log(
            LedgerEventType::SessionKilled,
            Some(self.id),
            Some(json!({ "signal": signal })),
        );
        WorkerExit::Killed { signal }
    }

    /// Ask the shell for its cwd and env, then shut down as suspended
    async fn suspend(mut self) -> WorkerExit {
        tracing::info!(terminal_id = %self.id, "idle timeout reached, suspending");

        let saved_state = self.capture_state().await;
        let captured = saved_state.is_some();

        let data = match &saved_state {
            Some(state) => json!({
                "saved_cwd": state.cwd,
                "saved_env_count": state.env.len(),
            }),
            None => json!({ "capture_failed": true }),
        };

        match record_suspension(&self.registry, self.id, saved_state) {
            Ok(true) => {
                self.ledger
                    .log(LedgerEventType::SessionSuspended, Some(self.id), Some(data));
                self.append(SUSPENDED_MARKER.as_bytes());
            }
            Ok(false) => {
                tracing::info!(terminal_id = %self.id, "session left running during capture, not suspending");
            }
            Err(e) => {
                tracing::error!(terminal_id = %self.id, error = %e, "failed to record suspension");
            }
        }

        self.pty.kill();
        tokio::time::sleep(self.timings.exit_grace).await;

        WorkerExit::Suspended {
            saved_state: captured,
        }
    }

    /// Two-file handshake with the shell; `None` when neither file appeared
    async fn capture_state(&mut self) -> Option<SavedState> {
        let (cwd_file, env_file) = self.paths.capture_files(self.id);
        let _ = std::fs::remove_file(&cwd_file);
        let _ = std::fs::remove_file(&env_file);

        if let Err(e) = self
            .pty
            .write(shell_state::capture_commands(&cwd_file, &env_file))
        {
            tracing::warn!(terminal_id = %self.id, error = %e, "could not request state capture");
            return None;
        }

        self.drain_output(self.timings.capture_wait).await;

        let cwd = std::fs::read_to_string(&cwd_file).ok();
        let env = std::fs::read(&env_file).ok();
        let _ = std::fs::remove_file(&cwd_file);
        let _ = std::fs::remove_file(&env_file);

        if cwd.is_none() && env.is_none() {
            tracing::warn!(terminal_id = %self.id, "shell did not answer state capture");
            return None;
        }

        Some(SavedState {
            cwd: cwd
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| self.args.cwd.to_string_lossy().into_owned()),
            env: env
                .map(|bytes| shell_state::parse_env_dump(&bytes))
                .unwrap_or_default(),
            captured_at: Utc::now(),
        })
    }
}
