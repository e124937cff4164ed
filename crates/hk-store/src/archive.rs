//! Bounded rotation archive.
//!
//! One directory per profile. Entries are named `{seq:010}-{epoch_secs}.fch`
//! so lexical order is insertion order. Before an insert, the oldest entries
//! are dropped until fewer than `retention` remain.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::atomic::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Insertion sequence number, starting at 1
    pub seq: u64,
    /// Seconds since the Unix epoch when the entry was archived
    pub archived_at: u64,
    pub size: u64,
    pub path: PathBuf,
}

impl ArchiveEntry {
    fn parse(path: PathBuf, size: u64) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(".fch")?;
        let (seq, ts) = stem.split_once('-')?;
        Some(Self {
            seq: seq.parse().ok()?,
            archived_at: ts.parse().ok()?,
            size,
            path,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct BackupArchive {
    root: PathBuf,
    retention: usize,
}

impl BackupArchive {
    /// `retention == 0` disables archiving.
    pub fn new(root: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    fn dir_for(&self, stem: &str) -> PathBuf {
        self.root.join(stem)
    }

    /// Entries for one profile, oldest first.
    pub fn entries(&self, stem: &str) -> Result<Vec<ArchiveEntry>> {
        let dir = self.dir_for(stem);
        let read = match std::fs::read_dir(&dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing archive: {}", dir.display())),
        };

        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.with_context(|| format!("reading archive: {}", dir.display()))?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            if let Some(parsed) = ArchiveEntry::parse(entry.path(), meta.len()) {
                entries.push(parsed);
            }
        }
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    /// Append `payload` as the newest entry, evicting the oldest first.
    /// Returns `None` when archiving is disabled.
    pub fn push(&self, stem: &str, payload: &[u8]) -> Result<Option<ArchiveEntry>> {
        if self.retention == 0 {
            return Ok(None);
        }

        let mut entries = self.entries(stem)?;
        let next_seq = entries.last().map_or(1, |e| e.seq + 1);

        while entries.len() >= self.retention {
            let oldest = entries.remove(0);
            std::fs::remove_file(&oldest.path)
                .with_context(|| format!("evicting archive entry: {}", oldest.path.display()))?;
            tracing::debug!(entry = %oldest.path.display(), "evicted archive entry");
        }

        let archived_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = self
            .dir_for(stem)
            .join(format!("{next_seq:010}-{archived_at}.fch"));
        write_atomic(&path, payload)?;

        Ok(Some(ArchiveEntry {
            seq: next_seq,
            archived_at,
            size: payload.len() as u64,
            path,
        }))
    }

    pub fn read(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        read_file(&entry.path)
    }

    /// Profiles that have an archive directory.
    pub fn stems(&self) -> Result<Vec<String>> {
        let read = match std::fs::read_dir(&self.root) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("listing archives: {}", self.root.display()))
            }
        };
        let mut stems = Vec::new();
        for entry in read {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                stems.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        stems.sort();
        Ok(stems)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading archive entry: {}", path.display()))
}
