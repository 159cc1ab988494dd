// Housekeeping for the state directory

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Temp files older than this are assumed abandoned by a dead writer
const CLEANUP_AGE_THRESHOLD: Duration = Duration::from_secs(3600);

/// Upper bound on files inspected per cleanup pass
const CLEANUP_SCAN_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub deleted: usize,
    pub scanned: usize,
    pub hit_limit: bool,
}

/// Delete stale `*.tmp.*` files left behind by interrupted atomic writes
pub fn cleanup_stale_temps(state_dir: &Path) -> io::Result<CleanupStats> {
    let mut stats = CleanupStats::default();
    if !state_dir.exists() {
        return Ok(stats);
    }

    let now = SystemTime::now();

    // .clrun/<kind>/<file>
    for entry in walkdir::WalkDir::new(state_dir)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if stats.scanned >= CLEANUP_SCAN_LIMIT {
            tracing::warn!(
                limit = CLEANUP_SCAN_LIMIT,
                dir = %state_dir.display(),
                "hit temp cleanup scan limit"
            );
            stats.hit_limit = true;
            return Ok(stats);
        }

        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        stats.scanned += 1;

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.contains(".tmp.") {
            continue;
        }

        let age = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > CLEANUP_AGE_THRESHOLD) && fs::remove_file(path).is_ok() {
            tracing::debug!(path = %path.display(), "removed stale temp file");
            stats.deleted += 1;
        }
    }

    Ok(stats)
}
