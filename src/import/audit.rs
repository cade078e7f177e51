use crate::import::day::DayStats;
use crate::import::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_AUDIT_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
pub const AUDIT_LOG_FILE: &str = "import-audit.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayOutcome {
    Processed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub group_jid: String,
    pub date: String,
    pub outcome: DayOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DayStats>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

pub fn audit_log_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(AUDIT_LOG_FILE)
}

pub fn append_event(
    logs_dir: &Path,
    group_id: &str,
    date: &str,
    outcome: DayOutcome,
    stats: Option<&DayStats>,
    message: &str,
) -> Result<()> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create {}", logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        group_jid: group_id.to_string(),
        date: date.to_string(),
        outcome,
        stats: stats.cloned(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = audit_log_path(logs_dir);
    maybe_rotate_log(&path);

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

fn maybe_rotate_log(path: &Path) {
    if let Ok(meta) = fs::metadata(path)
        && meta.len() >= MAX_AUDIT_LOG_SIZE
    {
        let backup = format!("{}.1", path.display());
        let _ = fs::rename(path, backup);
    }
}

#[cfg(test)]
mod tests {
    use super::{DayOutcome, append_event, audit_log_path};
    use crate::import::day::DayStats;
    use tempfile::tempdir;

    #[test]
    fn appends_one_json_line_per_event() {
        let tmp = tempdir().expect("tempdir");
        let logs = tmp.path().join("logs");
        let stats = DayStats {
            date: "2024-01-01".to_string(),
            messages: 4,
            topics: 2,
            episodes_attempted: 2,
            episodes_succeeded: 2,
            elapsed_ms: 10,
        };
        append_event(&logs, "g@g.us", "2024-01-01", DayOutcome::Processed, Some(&stats), "")
            .expect("append");
        append_event(&logs, "g@g.us", "2024-01-02", DayOutcome::Failed, None, "db locked")
            .expect("append");

        let raw = std::fs::read_to_string(audit_log_path(&logs)).expect("read");
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["outcome"], "processed");
        assert_eq!(lines[0]["stats"]["messages"], 4);
        assert!(lines[0].get("message").is_none());
        assert_eq!(lines[1]["outcome"], "failed");
        assert_eq!(lines[1]["message"], "db locked");
        assert!(lines[1].get("stats").is_none());
    }
}
