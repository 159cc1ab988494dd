// Crash recovery: reconcile "running" sessions against live processes
// Any session whose worker and shell are both gone is marked detached.

use crate::session::config::StatePaths;
use crate::session::ledger::Ledger;
use crate::session::persistence::SessionRegistry;
use crate::session::process;
use crate::session::protocol::{LedgerEventType, Session, SessionStatus};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Sessions transitioned to detached by this pass
    pub recovered: usize,
    /// Every detached session, newly or previously
    pub detached: Vec<Session>,
    /// Running sessions with at least one live process
    pub active: Vec<Session>,
}

pub fn recover_sessions(paths: &StatePaths) -> Result<RecoveryReport> {
    let registry = SessionRegistry::new(paths);
    let ledger = Ledger::new(paths);
    let mut report = RecoveryReport::default();

    for session in registry.list() {
        match session.status {
            SessionStatus::Running => {
                if process::is_alive(session.worker_pid) || process::is_alive(session.pid) {
                    report.active.push(session);
                    continue;
                }

                let id = session.terminal_id;
                // Re-check under the fresh read so a concurrent transition wins
                let updated = registry.update(id, |s| {
                    if s.status == SessionStatus::Running {
                        s.status = SessionStatus::Detached;
                        s.last_activity_at = Utc::now();
                    }
                })?;

                let Some(updated) = updated else {
                    continue;
                };
                if updated.status != SessionStatus::Detached {
                    continue;
                }

                tracing::info!(
                    terminal_id = %id,
                    pid = session.pid,
                    worker_pid = session.worker_pid,
                    "orphaned session marked detached"
                );
                ledger.log(
                    LedgerEventType::SessionDetached,
                    Some(id),
                    Some(json!({
                        "reason": "crash_recovery",
                        "original_pid": session.pid,
                        "original_worker_pid": session.worker_pid,
                    })),
                );
                report.recovered += 1;
                report.detached.push(updated);
            }
            SessionStatus::Detached => report.detached.push(session),
            SessionStatus::Exited | SessionStatus::Killed | SessionStatus::Suspended => {}
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    const DEAD_PID: u32 = 999_999_998;

    fn session_with(status: SessionStatus, pid: u32, worker_pid: u32) -> Session {
        let mut session = Session::new(
            Uuid::new_v4(),
            "sleep 100".to_string(),
            "/".to_string(),
            "/bin/sh".to_string(),
            pid,
            worker_pid,
        );
        session.status = status;
        session
    }

    #[test]
    fn test_orphaned_session_becomes_detached() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StatePaths::new(temp_dir.path());
        paths.ensure_dirs().unwrap();
        let registry = SessionRegistry::new(&paths);

        let orphan = session_with(SessionStatus::Running, DEAD_PID, DEAD_PID - 1);
        let live = session_with(SessionStatus::Running, DEAD_PID, std::process::id());
        let exited = session_with(SessionStatus::Exited, DEAD_PID, DEAD_PID);
        for s in [&orphan, &live, &exited] {
            registry.write(s).unwrap();
        }

        let report = recover_sessions(&paths).unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.detached.len(), 1);
        assert_eq!(report.detached[0].terminal_id, orphan.terminal_id);
        assert_eq!(report.active.len(), 1);
        assert_eq!(report.active[0].terminal_id, live.terminal_id);

        assert_eq!(
            registry.read(orphan.terminal_id).unwrap().status,
            SessionStatus::Detached
        );
        assert_eq!(
            registry.read(exited.terminal_id).unwrap().status,
            SessionStatus::Exited
        );

        let events = Ledger::new(&paths).read_events();
        assert_eq!(events.len(), 1);
        let data = events[0].data.as_ref().unwrap();
        assert_eq!(data["reason"], "crash_recovery");
        assert_eq!(data["original_pid"], DEAD_PID);
    }

    #[test]
    fn test_recovery_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StatePaths::new(temp_dir.path());
        paths.ensure_dirs().unwrap();
        let registry = SessionRegistry::new(&paths);
        registry
            .write(&session_with(SessionStatus::Running, DEAD_PID, DEAD_PID))
            .unwrap();

        let first = recover_sessions(&paths).unwrap();
        let second = recover_sessions(&paths).unwrap();

        assert_eq!(first.recovered, 1);
        assert_eq!(second.recovered, 0);
        assert_eq!(second.detached.len(), 1);
        assert_eq!(Ledger::new(&paths).read_events().len(), 1);
    }

    #[test]
    fn test_suspended_sessions_are_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StatePaths::new(temp_dir.path());
        paths.ensure_dirs().unwrap();
        let registry = SessionRegistry::new(&paths);
        let suspended = session_with(SessionStatus::Suspended, DEAD_PID, DEAD_PID);
        registry.write(&suspended).unwrap();

        let report = recover_sessions(&paths).unwrap();
        assert_eq!(report.recovered, 0);
        assert!(report.detached.is_empty());
        assert_eq!(
            registry.read(suspended.terminal_id).unwrap().status,
            SessionStatus::Suspended
        );
    }
}
