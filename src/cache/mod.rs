//! Session store for retext
//!
//! Persists run history, file snapshots and small key-value entries to the
//! `.retext/` directory of the project.
//!
//! # Error Handling
//!
//! Store operations are best-effort from the engine's point of view. The
//! pipeline logs failures and carries on because:
//! - A run's result never depends on what was recorded here
//! - The `.retext/` directory might not be writable
//!
//! Callers that need the data should handle the returned errors.

use crate::util::content_hash;
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, Instant};

const CACHE_DIR: &str = ".retext";
const STORE_FILE: &str = "store.json";
const SESSIONS_DIR: &str = "sessions";
const SNAPSHOT_PREFIX: &str = "snapshot:";
const CACHE_LOCK_TIMEOUT_SECS: u64 = 5;
const CACHE_LOCK_RETRY_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreEntry {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

/// One row of a session's modification history (JSONL)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub file: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub approach: String,
    pub success: bool,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// A file's content at snapshot time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub content: String,
    pub hash: String,
}

impl FileSnapshot {
    pub fn new(content: String) -> Self {
        let hash = content_hash(&content);
        Self { content, hash }
    }
}

/// The store manager
pub struct Cache {
    cache_dir: PathBuf,
}

struct CacheLock {
    file: std::fs::File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl Cache {
    /// Create a store manager for a project
    pub fn new(project_root: &Path) -> Self {
        let cache_dir = project_root.join(CACHE_DIR);
        Self { cache_dir }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Ensure the store directory exists
    fn ensure_dir(&self) -> anyhow::Result<()> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir)?;
        }
        self.ensure_ignored()?;
        Ok(())
    }

    /// Add the store directory to an existing `.gitignore`
    fn ensure_ignored(&self) -> anyhow::Result<()> {
        let Some(repo_root) = self.cache_dir.parent() else {
            return Ok(());
        };
        let gitignore_path = repo_root.join(".gitignore");
        if gitignore_path.exists() {
            append_ignore_entry(&gitignore_path, ".retext/")?;
        }
        Ok(())
    }

    fn lock(&self, exclusive: bool) -> anyhow::Result<CacheLock> {
        if exclusive {
            self.ensure_dir()?;
        } else if !self.cache_dir.exists() {
            return Err(anyhow::anyhow!("Store directory missing"));
        }

        let lock_path = self.cache_dir.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false) // Lock file content doesn't matter, just the lock
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= StdDuration::from_secs(CACHE_LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for store lock ({}s)",
                            CACHE_LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(StdDuration::from_millis(CACHE_LOCK_RETRY_MS));
                }
            }
        }

        Ok(CacheLock { file })
    }

    fn read_entries(&self) -> HashMap<String, StoreEntry> {
        fs::read_to_string(self.cache_dir.join(STORE_FILE))
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    fn write_entries(&self, entries: &HashMap<String, StoreEntry>) -> anyhow::Result<()> {
        let content = serde_json::to_string(entries)?;
        write_atomic(&self.cache_dir.join(STORE_FILE), &content)
    }

    /// Store a value under `key` for `ttl`
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> anyhow::Result<()> {
        let _lock = self.lock(true)?;
        let now = Utc::now();
        let mut entries = self.read_entries();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            StoreEntry {
                value: serde_json::to_value(value)?,
                expires_at: now + ttl,
            },
        );
        self.write_entries(&entries)
    }

    /// Fetch a live value; expired or undecodable entries read as missing
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let _lock = self.lock(false).ok()?;
        let entry = self.read_entries().remove(key)?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        serde_json::from_value(entry.value).ok()
    }

    /// Delete `key`, returning whether a live entry was removed
    pub fn remove(&self, key: &str) -> anyhow::Result<bool> {
        if !self.cache_dir.exists() {
            return Ok(false);
        }
        let _lock = self.lock(true)?;
        let mut entries = self.read_entries();
        let removed = entries
            .remove(key)
            .is_some_and(|entry| entry.expires_at > Utc::now());
        self.write_entries(&entries)?;
        Ok(removed)
    }

    /// Append one history record (JSONL) for a session
    pub fn append_history(&self, session_id: &str, record: &HistoryRecord) -> anyhow::Result<()> {
        let _lock = self.lock(true)?;
        let dir = self.cache_dir.join(SESSIONS_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.jsonl", sanitize_session_id(session_id)));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let row = serde_json::to_string(record)?;
        writeln!(file, "{}", row)?;
        Ok(())
    }

    /// All history records of a session, oldest first; unreadable rows are skipped
    pub fn load_history(&self, session_id: &str) -> Vec<HistoryRecord> {
        let path = self
            .cache_dir
            .join(SESSIONS_DIR)
            .join(format!("{}.jsonl", sanitize_session_id(session_id)));
        let Ok(_lock) = self.lock(false) else {
            return Vec::new();
        };
        fs::read_to_string(&path)
            .map(|content| {
                content
                    .lines()
                    .filter_map(|line| serde_json::from_str(line).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record file contents for a session
    pub fn save_snapshot(
        &self,
        session_id: &str,
        files: &BTreeMap<String, FileSnapshot>,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        self.set(&format!("{}{}", SNAPSHOT_PREFIX, session_id), files, ttl)
    }

    pub fn load_snapshot(&self, session_id: &str) -> Option<BTreeMap<String, FileSnapshot>> {
        self.get(&format!("{}{}", SNAPSHOT_PREFIX, session_id))
    }
}

/// Snapshot the given project-relative files; unreadable files are left out
pub fn snapshot_files(root: &Path, files: &[PathBuf]) -> BTreeMap<String, FileSnapshot> {
    files
        .iter()
        .filter_map(|relative| {
            let content = fs::read_to_string(root.join(relative)).ok()?;
            Some((
                relative.to_string_lossy().to_string(),
                FileSnapshot::new(content),
            ))
        })
        .collect()
}

/// Files whose current content no longer matches the snapshot
pub fn changed_since(root: &Path, snapshot: &BTreeMap<String, FileSnapshot>) -> Vec<String> {
    snapshot
        .iter()
        .filter(|(relative, snap)| {
            fs::read_to_string(root.join(relative.as_str()))
                .map(|current| content_hash(&current) != snap.hash)
                .unwrap_or(true)
        })
        .map(|(relative, _)| relative.clone())
        .collect()
}

fn sanitize_session_id(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn append_ignore_entry(path: &Path, entry: &str) -> anyhow::Result<()> {
    let content = fs::read_to_string(path).unwrap_or_default();
    let already_present = content.lines().any(|line| {
        let trimmed = line.trim();
        trimmed == entry || trimmed == CACHE_DIR
    });
    if already_present {
        return Ok(());
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if !content.trim().is_empty() && !content.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "# retext session store")?;
    writeln!(file, "{}", entry)?;
    Ok(())
}

fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    // Set restrictive permissions on Unix before renaming
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600); // Owner read/write only
        let _ = std::fs::set_permissions(&tmp_path, perms);
    }

    #[cfg(windows)]
    {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
