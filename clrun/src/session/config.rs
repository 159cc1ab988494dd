// Configuration for a project's session state
// Resolves the project root, the .clrun/ state layout, the shell to spawn and
// the timing knobs shared by callers and workers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

/// Name of the per-project state directory
pub const STATE_DIR_NAME: &str = ".clrun";

/// Files and directories that mark a project root
const PROJECT_INDICATORS: &[&str] = &[
    "package.json",
    ".git",
    "Cargo.toml",
    "go.mod",
    "pyproject.toml",
    "Makefile",
];

/// Every path under `<project>/.clrun/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
    pub runtime_lock: PathBuf,
    pub runtime_pid: PathBuf,
    pub runtime_json: PathBuf,
    pub sessions_dir: PathBuf,
    pub queues_dir: PathBuf,
    pub buffers_dir: PathBuf,
    pub ledger_dir: PathBuf,
    pub events_log: PathBuf,
    pub logs_dir: PathBuf,
}

impl StatePaths {
    pub fn new(project_root: &Path) -> Self {
        let root = project_root.join(STATE_DIR_NAME);
        let ledger_dir = root.join("ledger");
        Self {
            runtime_lock: root.join("runtime.lock"),
            runtime_pid: root.join("runtime.pid"),
            runtime_json: root.join("runtime.json"),
            sessions_dir: root.join("sessions"),
            queues_dir: root.join("queues"),
            buffers_dir: root.join("buffers"),
            events_log: ledger_dir.join("events.log"),
            ledger_dir,
            logs_dir: root.join("logs"),
            root,
        }
    }

    pub fn session_file(&self, id: Uuid) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    pub fn queue_file(&self, id: Uuid) -> PathBuf {
        self.queues_dir.join(format!("{id}.json"))
    }

    pub fn buffer_file(&self, id: Uuid) -> PathBuf {
        self.buffers_dir.join(format!("{id}.log"))
    }

    pub fn worker_log(&self, id: Uuid) -> PathBuf {
        self.logs_dir.join(format!("{id}.worker.log"))
    }

    /// Scratch files the shell writes its cwd and env into before suspension
    pub fn capture_files(&self, id: Uuid) -> (PathBuf, PathBuf) {
        (
            self.sessions_dir.join(format!("{id}.state.cwd")),
            self.sessions_dir.join(format!("{id}.state.env")),
        )
    }

    /// Create the state directory tree (owner-only on Unix)
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.root,
            &self.sessions_dir,
            &self.queues_dir,
            &self.buffers_dir,
            &self.ledger_dir,
            &self.logs_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }
}

/// Fixed delays and thresholds used by workers and callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Inactivity after which a worker suspends its session
    pub idle_timeout: Duration,
    /// How often the worker checks the idle threshold
    pub idle_check_interval: Duration,
    /// Fallback queue drain cadence when no wake signal arrives
    pub queue_poll_interval: Duration,
    /// Delay between spawning the shell and writing the first command
    pub startup_settle: Duration,
    /// Time the shell gets to write its cwd/env dump during suspension
    pub capture_wait: Duration,
    /// Time left for the final buffer writes after the PTY exits
    pub exit_grace: Duration,
    pub restore_timeout: Duration,
    pub restore_poll: Duration,
    pub first_output_timeout: Duration,
    pub first_output_poll: Duration,
    /// Extra wait once the first output arrived, so it can settle
    pub first_output_settle: Duration,
    /// How long input/key calls wait to collect the response output
    pub response_wait: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            idle_check_interval: Duration::from_secs(30),
            queue_poll_interval: Duration::from_millis(200),
            startup_settle: Duration::from_millis(80),
            capture_wait: Duration::from_millis(600),
            exit_grace: Duration::from_millis(100),
            restore_timeout: Duration::from_secs(3),
            restore_poll: Duration::from_millis(100),
            first_output_timeout: Duration::from_secs(5),
            first_output_poll: Duration::from_millis(150),
            first_output_settle: Duration::from_millis(300),
            response_wait: Duration::from_millis(400),
        }
    }
}

/// Configuration for one project's sessions
#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    pub paths: StatePaths,
    /// Shell spawned inside every PTY
    pub shell: String,
    /// Path to the `clrun-worker` binary
    pub worker_path: PathBuf,
    pub timings: Timings,
}

impl Config {
    /// Configuration rooted at an explicit project directory, default settings
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            paths: StatePaths::new(&project_root),
            project_root,
            shell: Self::default_shell(),
            worker_path: resolve_worker_path().unwrap_or_else(|| PathBuf::from(WORKER_BIN_NAME)),
            timings: Timings::default(),
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let project_root = std::env::var("CLRUN_PROJECT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                resolve_project_root(&cwd)
            });

        let mut config = Self::for_project(project_root);

        if let Some(secs) = std::env::var("CLRUN_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            config.timings.idle_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Get the default shell to use for sessions
    pub fn default_shell() -> String {
        if let Ok(shell) = std::env::var("CLRUN_SHELL") {
            return shell;
        }

        #[cfg(unix)]
        {
            std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
        }

        #[cfg(not(unix))]
        {
            "powershell.exe".to_string()
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        self.paths.ensure_dirs()
    }
}

/// Walk up from `start` looking for a project marker; falls back to `start`
pub fn resolve_project_root(start: &Path) -> PathBuf {
    let mut current = start.to_path_buf();

    loop {
        let is_root = PROJECT_INDICATORS
            .iter()
            .any(|indicator| current.join(indicator).exists())
            || current.join(STATE_DIR_NAME).exists();
        if is_root {
            return current;
        }

        if !current.pop() {
            break;
        }
    }

    start.to_path_buf()
}

const WORKER_BIN_NAME: &str = if cfg!(windows) {
    "clrun-worker.exe"
} else {
    "clrun-worker"
};

/// Locate the worker binary
///
/// 1. `CLRUN_WORKER_BIN`
/// 2. Next to the current executable (installed side by side with `clrun`)
/// 3. On `PATH`
pub fn resolve_worker_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CLRUN_WORKER_BIN") {
        return Some(PathBuf::from(path));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(WORKER_BIN_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    which::which(WORKER_BIN_NAME).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_paths_layout() {
        let paths = StatePaths::new(Path::new("/work/app"));
        let id = Uuid::nil();

        assert_eq!(paths.root, PathBuf::from("/work/app/.clrun"));
        assert_eq!(paths.runtime_lock, PathBuf::from("/work/app/.clrun/runtime.lock"));
        assert_eq!(paths.events_log, PathBuf::from("/work/app/.clrun/ledger/events.log"));
        assert_eq!(
            paths.session_file(id),
            PathBuf::from(format!("/work/app/.clrun/sessions/{id}.json"))
        );
        assert_eq!(
            paths.queue_file(id),
            PathBuf::from(format!("/work/app/.clrun/queues/{id}.json"))
        );
        assert_eq!(
            paths.buffer_file(id),
            PathBuf::from(format!("/work/app/.clrun/buffers/{id}.log"))
        );
    }

    #[test]
    fn test_capture_files_live_next_to_sessions_but_are_not_json() {
        let paths = StatePaths::new(Path::new("/p"));
        let (cwd_file, env_file) = paths.capture_files(Uuid::nil());
        assert!(cwd_file.starts_with(&paths.sessions_dir));
        assert!(env_file.starts_with(&paths.sessions_dir));
        assert_ne!(cwd_file.extension().and_then(|e| e.to_str()), Some("json"));
        assert_ne!(env_file.extension().and_then(|e| e.to_str()), Some("json"));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_dirs_creates_state_root_with_0700() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let paths = StatePaths::new(temp_dir.path());
        paths.ensure_dirs().unwrap();

        for dir in [&paths.sessions_dir, &paths.queues_dir, &paths.buffers_dir, &paths.ledger_dir] {
            assert!(dir.is_dir(), "{} should exist", dir.display());
        }
        let mode = std::fs::metadata(&paths.root).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn test_resolve_project_root_walks_up_to_marker() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        let nested = temp_dir.path().join("src/deep/er");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(resolve_project_root(&nested), temp_dir.path());
    }

    #[test]
    fn test_resolve_project_root_accepts_existing_state_dir() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(STATE_DIR_NAME)).unwrap();
        let nested = temp_dir.path().join("a");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(resolve_project_root(&nested), temp_dir.path());
    }

    #[test]
    fn test_default_timings_match_documented_values() {
        let timings = Timings::default();
        assert_eq!(timings.idle_timeout, Duration::from_secs(300));
        assert_eq!(timings.queue_poll_interval, Duration::from_millis(200));
        assert_eq!(timings.capture_wait, Duration::from_millis(600));
    }
}
