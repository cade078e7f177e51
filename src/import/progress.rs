use crate::error::ImportError;
use crate::import::dates::DateKey;
use crate::import::day::DayStats;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// The durable checkpoint of an import run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    #[serde(rename = "group_jid")]
    pub group_id: String,
    pub start_date: DateKey,
    pub end_date: DateKey,
    #[serde(default, deserialize_with = "empty_date_as_none")]
    pub last_processed_date: Option<DateKey>,
    #[serde(default)]
    pub processed_dates: Vec<DateKey>,
    #[serde(default)]
    pub failed_dates: BTreeMap<DateKey, String>,
    #[serde(default)]
    pub total_messages: u64,
    /// Episodes submitted, whether or not ingestion succeeded.
    #[serde(default)]
    pub total_episodes: u64,
    #[serde(default)]
    pub total_episodes_succeeded: u64,
    #[serde(default)]
    pub failed_attempts: BTreeMap<DateKey, u32>,
    pub start_time: DateTime<Utc>,
}

fn empty_date_as_none<'de, D>(deserializer: D) -> Result<Option<DateKey>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| DateKey::parse(&s).map_err(serde::de::Error::custom))
        .transpose()
}

impl Progress {
    pub fn new(group_id: &str, start: DateKey, end: DateKey, now: DateTime<Utc>) -> Self {
        Self {
            group_id: group_id.to_string(),
            start_date: start,
            end_date: end,
            last_processed_date: None,
            processed_dates: Vec::new(),
            failed_dates: BTreeMap::new(),
            total_messages: 0,
            total_episodes: 0,
            total_episodes_succeeded: 0,
            failed_attempts: BTreeMap::new(),
            start_time: now,
        }
    }

    pub fn is_processed(&self, date: &DateKey) -> bool {
        self.processed_dates.iter().any(|d| d == date)
    }

    pub fn record_success(&mut self, date: &DateKey, stats: &DayStats) {
        self.failed_dates.remove(date);
        self.failed_attempts.remove(date);
        if !self.is_processed(date) {
            self.processed_dates.push(date.clone());
        }
        self.last_processed_date = Some(date.clone());
        self.total_messages += stats.messages as u64;
        self.total_episodes += stats.episodes_attempted as u64;
        self.total_episodes_succeeded += stats.episodes_succeeded as u64;
    }

    pub fn record_failure(&mut self, date: &DateKey, error: &str) {
        self.failed_dates.insert(date.clone(), error.to_string());
        *self.failed_attempts.entry(date.clone()).or_insert(0) += 1;
    }

    /// Dates from `planned` still to attempt, in planned order.
    ///
    /// Failed dates are retried unless `max_attempts` is non-zero and their
    /// failure count has reached it.
    pub fn remaining(&self, planned: &[DateKey], max_attempts: u32) -> Vec<DateKey> {
        let processed: HashSet<&DateKey> = self.processed_dates.iter().collect();
        planned
            .iter()
            .filter(|date| !processed.contains(date))
            .filter(|date| !self.attempts_exhausted(date, max_attempts))
            .cloned()
            .collect()
    }

    pub fn attempts_exhausted(&self, date: &DateKey, max_attempts: u32) -> bool {
        max_attempts > 0 && self.failed_attempts.get(date).copied().unwrap_or(0) >= max_attempts
    }

    pub fn exhausted_dates(&self, max_attempts: u32) -> Vec<DateKey> {
        self.failed_dates
            .keys()
            .filter(|date| self.attempts_exhausted(date, max_attempts))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn create(&self, group_id: &str, start: DateKey, end: DateKey) -> Progress {
        Progress::new(group_id, start, end, Utc::now())
    }

    pub fn load(&self) -> Result<Progress> {
        if !self.path.exists() {
            return Err(ImportError::CheckpointUnavailable(self.path.display().to_string()).into());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let parsed: Progress = serde_json::from_str(&raw).map_err(|err| {
            ImportError::CheckpointCorrupt(format!("{}: {err}", self.path.display()))
        })?;
        Ok(parsed)
    }

    /// Replace the checkpoint with a full snapshot of `progress`.
    pub fn save(&self, progress: &Progress) -> Result<PathBuf> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let data = serde_json::to_string_pretty(progress)?;

        let mut tmp = NamedTempFile::new_in(&parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        tmp.write_all(format!("{data}\n").as_bytes())
            .with_context(|| format!("failed to write {}", tmp.path().display()))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("failed to sync {}", tmp.path().display()))?;
        tmp.persist(&self.path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(self.path.clone())
    }
}

/// Exclusive lock held for the lifetime of an import run.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open import lock {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return Err(ImportError::AlreadyRunning(path.display().to_string()).into());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to lock import file {}", path.display()));
            }
        }

        file.set_len(0)
            .with_context(|| format!("failed to truncate import lock {}", path.display()))?;
        writeln!(&mut file, "{}", std::process::id())
            .with_context(|| format!("failed to write import lock {}", path.display()))?;

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
