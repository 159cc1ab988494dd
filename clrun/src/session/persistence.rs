// Persistence helpers for the session registry
// Sessions are persisted one file per terminal under .clrun/sessions/ and every
// write goes through write-to-temp + rename so readers in other processes never
// observe a partial file.

use crate::session::config::StatePaths;
use crate::session::protocol::{Session, TerminalId};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Atomically save data to a file using write-to-temp + rename
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Invalid path: {}", path.display()))?;

    // Same directory keeps the rename on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            )
        });
    }

    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    atomic_write(path, &contents)
}

/// Read a JSON file, treating missing, empty or corrupt files as absent
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "unreadable state file");
            }
            return None;
        }
    };

    if contents.trim().is_empty() {
        return None;
    }

    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "corrupt state file treated as absent");
            None
        }
    }
}

/// Session registry persisted to disk, one JSON file per session
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    dir: PathBuf,
}

impl SessionRegistry {
    pub fn new(paths: &StatePaths) -> Self {
        Self {
            dir: paths.sessions_dir.clone(),
        }
    }

    fn path(&self, id: TerminalId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write (create or replace) a session record
    pub fn write(&self, session: &Session) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create sessions directory: {}", self.dir.display())
        })?;
        atomic_write_json(&self.path(session.terminal_id), session)
    }

    /// Get a session by ID; absent when missing or unreadable
    pub fn read(&self, id: TerminalId) -> Option<Session> {
        read_json(&self.path(id))
    }

    /// Read-modify-write a session record
    ///
    /// Returns the updated session, or `None` when no record exists.
    pub fn update<F>(&self, id: TerminalId, f: F) -> Result<Option<Session>>
    where
        F: FnOnce(&mut Session),
    {
        let Some(mut session) = self.read(id) else {
            return Ok(None);
        };
        f(&mut session);
        self.write(&session)?;
        Ok(Some(session))
    }

    /// All readable sessions, oldest first
    pub fn list(&self) -> Vec<Session> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut sessions: Vec<Session> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|p| read_json(&p))
            .collect();

        sessions.sort_by_key(|s| s.created_at);
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::protocol::SessionStatus;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn test_registry() -> (SessionRegistry, StatePaths, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = StatePaths::new(temp_dir.path());
        paths.ensure_dirs().unwrap();
        (SessionRegistry::new(&paths), paths, temp_dir)
    }

    fn sample_session() -> Session {
        Session::new(
            Uuid::new_v4(),
            "npm test".to_string(),
            "/work".to_string(),
            "/bin/sh".to_string(),
            4242,
            4241,
        )
    }

    #[test]
    fn test_registry_roundtrip() {
        let (registry, _paths, _temp) = test_registry();
        let session = sample_session();

        registry.write(&session).unwrap();
        let loaded = registry.read(session.terminal_id).unwrap();

        assert_eq!(loaded, session);
    }

    #[test]
    fn test_update_missing_session_is_none() {
        let (registry, _paths, _temp) = test_registry();
        let result = registry
            .update(Uuid::new_v4(), |s| s.status = SessionStatus::Killed)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_update_persists_mutation() {
        let (registry, _paths, _temp) = test_registry();
        let session = sample_session();
        registry.write(&session).unwrap();

        registry
            .update(session.terminal_id, |s| {
                s.status = SessionStatus::Exited;
                s.last_exit_code = Some(3);
            })
            .unwrap();

        let loaded = registry.read(session.terminal_id).unwrap();
        assert_eq!(loaded.status, SessionStatus::Exited);
        assert_eq!(loaded.last_exit_code, Some(3));
    }

    #[test]
    fn test_corrupt_session_file_reads_as_absent() {
        let (registry, paths, _temp) = test_registry();
        let id = Uuid::new_v4();
        fs::write(paths.session_file(id), "{ not json").unwrap();

        assert!(registry.read(id).is_none());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_list_ignores_non_json_files() {
        let (registry, paths, _temp) = test_registry();
        let session = sample_session();
        registry.write(&session).unwrap();
        let (cwd_file, _) = paths.capture_files(session.terminal_id);
        fs::write(cwd_file, "/tmp\n").unwrap();

        let sessions = registry.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].terminal_id, session.terminal_id);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        atomic_write(&path, "{\"a\":1}").unwrap();
        atomic_write(&path, "{\"a\":2}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":2}");
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
