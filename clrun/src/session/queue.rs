// Per-session input queue
// Entries are never deleted; status moves queued -> sent or queued -> cancelled.
// Every mutation rewrites the whole queue file atomically, so an override's
// cancellations and its new entry become visible in one step.

use crate::session::config::StatePaths;
use crate::session::persistence::{atomic_write_json, read_json};
use crate::session::protocol::{
    QueueEntry, QueueFile, QueueMode, QueueStatus, TerminalId, OVERRIDE_PRIORITY,
};
use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct QueueStore {
    dir: PathBuf,
}

impl QueueStore {
    pub fn new(paths: &StatePaths) -> Self {
        Self {
            dir: paths.queues_dir.clone(),
        }
    }

    fn path(&self, id: TerminalId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Current queue contents; missing or corrupt files read as empty
    pub fn load(&self, id: TerminalId) -> QueueFile {
        read_json(&self.path(id)).unwrap_or_else(|| QueueFile::empty(id))
    }

    fn save(&self, queue: &QueueFile) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        atomic_write_json(&self.path(queue.terminal_id), queue)
    }

    /// Create an empty queue file for a new session
    pub fn init(&self, id: TerminalId) -> Result<()> {
        self.save(&QueueFile::empty(id))
    }

    pub fn enqueue(&self, id: TerminalId, input: &str, priority: i64) -> Result<QueueEntry> {
        let mut queue = self.load(id);
        let entry = QueueEntry::new(input.to_string(), priority, QueueMode::Normal);
        queue.entries.push(entry.clone());
        self.save(&queue)?;
        Ok(entry)
    }

    /// Cancel every queued entry and append one entry ahead of all others
    ///
    /// Returns the new entry and the number of entries cancelled.
    pub fn enqueue_override(&self, id: TerminalId, input: &str) -> Result<(QueueEntry, usize)> {
        let mut queue = self.load(id);

        let mut cancelled = 0;
        for entry in queue
            .entries
            .iter_mut()
            .filter(|e| e.status == QueueStatus::Queued)
        {
            entry.status = QueueStatus::Cancelled;
            cancelled += 1;
        }

        let entry = QueueEntry::new(input.to_string(), OVERRIDE_PRIORITY, QueueMode::Override);
        queue.entries.push(entry.clone());
        self.save(&queue)?;

        Ok((entry, cancelled))
    }

    /// Highest priority queued entry; FIFO within a priority
    pub fn next_queued(&self, id: TerminalId) -> Option<QueueEntry> {
        let queue = self.load(id);
        queue
            .entries
            .into_iter()
            .enumerate()
            .filter(|(_, e)| e.status == QueueStatus::Queued)
            .min_by(|(ia, a), (ib, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(ia.cmp(ib))
            })
            .map(|(_, e)| e)
    }

    /// Mark an entry sent; already-sent entries keep their first timestamp
    pub fn mark_sent(&self, id: TerminalId, queue_id: Uuid) -> Result<()> {
        let mut queue = self.load(id);
        let Some(entry) = queue.entries.iter_mut().find(|e| e.queue_id == queue_id) else {
            return Ok(());
        };
        if entry.status == QueueStatus::Sent {
            return Ok(());
        }
        entry.status = QueueStatus::Sent;
        entry.sent_at = Some(Utc::now());
        self.save(&queue)
    }

    pub fn pending_count(&self, id: TerminalId) -> usize {
        self.load(id)
            .entries
            .iter()
            .filter(|e| e.status == QueueStatus::Queued)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (QueueStore, StatePaths, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = StatePaths::new(temp_dir.path());
        paths.ensure_dirs().unwrap();
        (QueueStore::new(&paths), paths, temp_dir)
    }

    fn drain(store: &QueueStore, id: TerminalId) -> Vec<String> {
        let mut sent = Vec::new();
        while let Some(entry) = store.next_queued(id) {
            store.mark_sent(id, entry.queue_id).unwrap();
            sent.push(entry.input);
        }
        sent
    }

    #[test]
    fn test_drains_by_priority_regardless_of_enqueue_order() {
        let (store, _paths, _temp) = test_store();
        let id = Uuid::new_v4();
        store.init(id).unwrap();

        store.enqueue(id, "p1", 1).unwrap();
        store.enqueue(id, "p5", 5).unwrap();
        store.enqueue(id, "p3", 3).unwrap();

        assert_eq!(drain(&store, id), vec!["p5", "p3", "p1"]);
        assert_eq!(store.pending_count(id), 0);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let (store, _paths, _temp) = test_store();
        let id = Uuid::new_v4();

        for input in ["first", "second", "third", "fourth"] {
            store.enqueue(id, input, 0).unwrap();
        }

        assert_eq!(drain(&store, id), vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_override_cancels_all_queued() {
        let (store, _paths, _temp) = test_store();
        let id = Uuid::new_v4();

        store.enqueue(id, "a", 0).unwrap();
        let sent = store.enqueue(id, "b", 10).unwrap();
        store.mark_sent(id, sent.queue_id).unwrap();
        store.enqueue(id, "c", 2).unwrap();
        store.enqueue(id, "d", 7).unwrap();

        let (entry, cancelled) = store.enqueue_override(id, "q").unwrap();
        assert_eq!(cancelled, 3);
        assert_eq!(entry.priority, i64::MAX);
        assert_eq!(entry.mode, QueueMode::Override);

        assert_eq!(store.pending_count(id), 1);
        assert_eq!(store.next_queued(id).unwrap().queue_id, entry.queue_id);

        let queue = store.load(id);
        let statuses: Vec<_> = queue.entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                QueueStatus::Cancelled,
                QueueStatus::Sent,
                QueueStatus::Cancelled,
                QueueStatus::Cancelled,
                QueueStatus::Queued,
            ]
        );
    }

    #[test]
    fn test_override_on_empty_queue() {
        let (store, _paths, _temp) = test_store();
        let id = Uuid::new_v4();
        let (_, cancelled) = store.enqueue_override(id, "y").unwrap();
        assert_eq!(cancelled, 0);
        assert_eq!(store.pending_count(id), 1);
    }

    #[test]
    fn test_mark_sent_is_idempotent() {
        let (store, _paths, _temp) = test_store();
        let id = Uuid::new_v4();
        let entry = store.enqueue(id, "ls", 0).unwrap();

        store.mark_sent(id, entry.queue_id).unwrap();
        let first = store.load(id).entries[0].sent_at;
        store.mark_sent(id, entry.queue_id).unwrap();
        let second = store.load(id).entries[0].sent_at;

        assert!(first.is_some());
        assert_eq!(first, second);
        store.mark_sent(id, Uuid::new_v4()).unwrap();
    }

    #[test]
    fn test_corrupt_queue_reads_as_empty() {
        let (store, paths, _temp) = test_store();
        let id = Uuid::new_v4();
        std::fs::write(paths.queue_file(id), "[[[").unwrap();

        assert!(store.next_queued(id).is_none());
        assert_eq!(store.pending_count(id), 0);

        store.enqueue(id, "recovered", 0).unwrap();
        assert_eq!(store.pending_count(id), 1);
    }

    #[test]
    fn test_queue_file_shape() {
        let (store, paths, _temp) = test_store();
        let id = Uuid::new_v4();
        store.enqueue(id, "echo hi", 0).unwrap();

        let raw = std::fs::read_to_string(paths.queue_file(id)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["terminal_id"], id.to_string());
        let entry = &value["entries"][0];
        for field in ["queue_id", "input", "priority", "mode", "status", "created_at", "sent_at"] {
            assert!(entry.get(field).is_some(), "missing {field}");
        }
        assert_eq!(entry["mode"], "normal");
        assert_eq!(entry["status"], "queued");
    }
}
