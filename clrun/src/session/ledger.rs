// Append-only audit log of lifecycle events (one JSON object per line)

use crate::session::config::StatePaths;
use crate::session::protocol::{LedgerEvent, LedgerEventType, TerminalId};
use anyhow::Result;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(paths: &StatePaths) -> Self {
        Self {
            path: paths.events_log.clone(),
        }
    }

    fn try_log(&self, event: &LedgerEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Record an event; failures are logged and otherwise ignored
    pub fn log(
        &self,
        event: LedgerEventType,
        terminal_id: Option<TerminalId>,
        data: Option<serde_json::Value>,
    ) {
        let record = LedgerEvent {
            timestamp: Utc::now(),
            event,
            terminal_id,
            data,
        };
        if let Err(e) = self.try_log(&record) {
            tracing::warn!(error = %e, event = ?event, "failed to append ledger event");
        }
    }

    /// Every parseable event, oldest first
    pub fn read_events(&self) -> Vec<LedgerEvent> {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    pub fn read_recent(&self, n: usize) -> Vec<LedgerEvent> {
        let events = self.read_events();
        let start = events.len().saturating_sub(n);
        events[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_log_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StatePaths::new(temp_dir.path());
        let ledger = Ledger::new(&paths);
        let id = Uuid::new_v4();

        ledger.log(LedgerEventType::SessionCreated, Some(id), Some(json!({"command": "ls"})));
        ledger.log(LedgerEventType::InputSent, Some(id), None);

        let events = ledger.read_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, LedgerEventType::SessionCreated);
        assert_eq!(events[0].terminal_id, Some(id));
        assert_eq!(events[0].data.as_ref().unwrap()["command"], "ls");
        assert_eq!(events[1].event, LedgerEventType::InputSent);
    }

    #[test]
    fn test_bad_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StatePaths::new(temp_dir.path());
        let ledger = Ledger::new(&paths);

        ledger.log(LedgerEventType::RuntimeStarted, None, None);
        let mut file = OpenOptions::new().append(true).open(&paths.events_log).unwrap();
        file.write_all(b"garbage line\n").unwrap();
        ledger.log(LedgerEventType::SessionKilled, None, None);

        let events = ledger.read_events();
        assert_eq!(events.len(), 2);
        assert_eq!(ledger.read_recent(1)[0].event, LedgerEventType::SessionKilled);
    }
}
