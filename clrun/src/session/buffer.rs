// Append-only output log for one session
// The worker is the only writer; callers read by byte offset or by lines.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BufferLog {
    path: PathBuf,
}

impl BufferLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create or truncate the log
    pub fn init(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, b"")
            .with_context(|| format!("Failed to init buffer: {}", self.path.display()))
    }

    pub fn append(&self, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open buffer: {}", self.path.display()))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Current size in bytes; 0 when the log does not exist
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Bytes appended after `offset`, plus the offset to pass next time
    pub fn read_since(&self, offset: u64) -> Result<(Vec<u8>, u64)> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), offset)),
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata()?.len();
        if offset >= size {
            return Ok((Vec::new(), offset.max(size)));
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::with_capacity((size - offset) as usize);
        file.take(size - offset).read_to_end(&mut data)?;
        let next = offset + data.len() as u64;
        Ok((data, next))
    }

    pub fn read_all(&self) -> String {
        fs::read(&self.path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }

    pub fn tail_lines(&self, n: usize) -> Vec<String> {
        let lines = self.lines();
        let start = lines.len().saturating_sub(n);
        lines[start..].to_vec()
    }

    pub fn head_lines(&self, n: usize) -> Vec<String> {
        self.lines().into_iter().take(n).collect()
    }

    pub fn line_count(&self) -> usize {
        self.lines().len()
    }

    fn lines(&self) -> Vec<String> {
        split_lines(&self.read_all())
    }
}

/// Split on `\n`, dropping the empty element after a trailing newline
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}
