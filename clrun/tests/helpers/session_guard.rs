use super::polling::{wait_until, WaitError};
use clrun_lib::session::buffer::BufferLog;
use clrun_lib::session::client;
use clrun_lib::session::config::Config;
use clrun_lib::session::persistence::SessionRegistry;
use clrun_lib::session::process;
use clrun_lib::session::protocol::{Session, TerminalId};
use std::path::Path;
use std::time::Duration;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Config for a throwaway project using the freshly built worker and /bin/sh.
pub fn test_config(project_root: &Path) -> Config {
    let mut config = Config::for_project(project_root);
    config.worker_path = env!("CARGO_BIN_EXE_clrun-worker").into();
    config.shell = "/bin/sh".to_string();
    config.timings.queue_poll_interval = Duration::from_millis(50);
    config.timings.first_output_timeout = Duration::from_secs(3);
    config.timings.first_output_settle = Duration::from_millis(100);
    config.timings.response_wait = Duration::from_millis(100);
    config
}

/// RAII wrapper that kills the session's processes when the test ends.
pub struct SessionGuard {
    config: Config,
    pub id: TerminalId,
}

impl SessionGuard {
    pub fn create(config: &Config, command: &str, cwd: &Path) -> Self {
        let created = client::create_session(config, command, cwd).expect("create session");
        Self {
            config: config.clone(),
            id: created.terminal_id,
        }
    }

    pub fn session(&self) -> Option<Session> {
        SessionRegistry::new(&self.config.paths).read(self.id)
    }

    pub fn output(&self) -> String {
        BufferLog::new(self.config.paths.buffer_file(self.id)).read_all()
    }

    /// Wait until the session record satisfies `predicate`.
    pub fn wait_for_session<F>(&self, what: &str, predicate: F) -> Result<Session, WaitError>
    where
        F: Fn(&Session) -> bool,
    {
        wait_until(what, WAIT_TIMEOUT, || match self.session() {
            Some(session) if predicate(&session) => Ok(session),
            Some(session) => Err(format!("{:?}", session.status)),
            None => Err("no session record".to_string()),
        })
    }

    /// Wait until the buffer contains `needle`.
    pub fn wait_for_output(&self, needle: &str) -> Result<String, WaitError> {
        wait_until(&format!("output {needle:?}"), WAIT_TIMEOUT, || {
            let output = self.output();
            if output.contains(needle) {
                Ok(output)
            } else {
                Err(output)
            }
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(err) = client::kill_session(&self.config, self.id) {
            eprintln!("Failed to clean up session {}: {err:#}", self.id);
        }
    }
}

/// Wait for a process to go away, used to make sure no workers linger.
pub fn wait_for_process_exit(pid: u32) -> bool {
    wait_until("process exit", WAIT_TIMEOUT, || {
        if process::is_alive(pid) {
            Err(format!("pid {pid} still alive"))
        } else {
            Ok(())
        }
    })
    .is_ok()
}
