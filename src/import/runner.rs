use crate::error::ImportError;
use crate::import::audit::{self, DayOutcome};
use crate::import::dates::{DateKey, RangeSpec, plan_range};
use crate::import::day::{DayProcessor, DayStats};
use crate::import::progress::{Progress, ProgressStore};
use crate::import::shutdown::CancellationToken;
use crate::import::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub group_id: Option<String>,
    pub range: Option<RangeSpec>,
    pub resume: bool,
}

/// Everything decided before the first date is attempted.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub progress: Progress,
    pub planned: Vec<DateKey>,
    pub remaining: Vec<DateKey>,
    pub resumed: bool,
    /// A fresh run will replace a checkpoint already on disk.
    pub replaces_checkpoint: bool,
}

/// Load or create the checkpoint and work out which dates to attempt.
pub fn prepare(
    store: &ProgressStore,
    options: &RunOptions,
    tz: Tz,
    now: DateTime<Utc>,
    max_attempts: u32,
) -> Result<RunPlan> {
    let group_id = options
        .group_id
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty());

    if options.resume {
        let progress = store.load()?;
        if let Some(group_id) = group_id
            && group_id != progress.group_id
        {
            return Err(ImportError::Configuration(format!(
                "--group-jid {group_id} does not match checkpoint group {}",
                progress.group_id
            ))
            .into());
        }
        let planned = plan_range(progress.start_date.as_str(), progress.end_date.as_str())?;
        let remaining = progress.remaining(&planned, max_attempts);
        return Ok(RunPlan {
            progress,
            planned,
            remaining,
            resumed: true,
            replaces_checkpoint: false,
        });
    }

    let group_id = group_id.ok_or_else(|| {
        ImportError::Configuration("--group-jid is required".to_string())
    })?;
    let range = options.range.as_ref().ok_or_else(|| {
        ImportError::Configuration(
            "either --days-back OR both --start-date and --end-date must be provided".to_string(),
        )
    })?;
    let (start, end) = range.resolve(tz, now)?;
    let planned = plan_range(start.as_str(), end.as_str())?;
    let progress = store.create(group_id, start, end);
    Ok(RunPlan {
        remaining: planned.clone(),
        planned,
        progress,
        resumed: false,
        replaces_checkpoint: store.exists(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub group_id: String,
    pub start_date: DateKey,
    pub end_date: DateKey,
    pub planned: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub processed_total: usize,
    pub total_messages: u64,
    pub total_episodes: u64,
    pub total_episodes_succeeded: u64,
    pub failed_dates: BTreeMap<DateKey, String>,
    pub exhausted_dates: Vec<DateKey>,
    pub checkpoint: PathBuf,
    pub days: Vec<DayStats>,
}

pub struct ImportRunner<'a> {
    store: &'a ProgressStore,
    processor: &'a DayProcessor<'a>,
    token: &'a CancellationToken,
    tz: Tz,
    delay: Duration,
    max_attempts: u32,
    logs_dir: Option<&'a Path>,
}

impl<'a> ImportRunner<'a> {
    pub fn new(
        store: &'a ProgressStore,
        processor: &'a DayProcessor<'a>,
        token: &'a CancellationToken,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            processor,
            token,
            tz,
            delay: Duration::ZERO,
            max_attempts: 0,
            logs_dir: None,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn audit_to(mut self, logs_dir: &'a Path) -> Self {
        self.logs_dir = Some(logs_dir);
        self
    }

    fn audit(
        &self,
        group_id: &str,
        date: &DateKey,
        outcome: DayOutcome,
        stats: Option<&DayStats>,
        message: &str,
    ) {
        let Some(logs_dir) = self.logs_dir else {
            return;
        };
        if let Err(err) =
            audit::append_event(logs_dir, group_id, date.as_str(), outcome, stats, message)
        {
            warn::emit(WarnEvent {
                code: "AUDIT_WRITE",
                stage: "audit",
                date: date.as_str(),
                topic: "",
                reason: "append-failed",
                err: &format!("{err:#}"),
            });
        }
    }

    /// Attempt every remaining date in order, saving the checkpoint after
    /// each one. Stops early when the token is cancelled.
    pub fn run(&self, plan: RunPlan, group_name: &str) -> Result<RunSummary> {
        let RunPlan {
            mut progress,
            planned,
            remaining,
            ..
        } = plan;
        self.store
            .save(&progress)
            .context("failed to write initial checkpoint")?;

        let total = remaining.len();
        let mut days = Vec::new();
        let mut attempted = 0usize;
        let mut failed = 0usize;
        let mut cancelled = false;

        for (position, date) in remaining.iter().enumerate() {
            if self.token.is_cancelled() {
                cancelled = true;
                tracing::warn!(date = %date, "import cancelled before starting date");
                self.audit(&progress.group_id, date, DayOutcome::Cancelled, None, "interrupted");
                break;
            }

            tracing::info!(date = %date, position = position + 1, total, "processing date");
            match self
                .processor
                .process(date, &progress.group_id, group_name, self.tz)
            {
                Ok(stats) => {
                    progress.record_success(date, &stats);
                    tracing::info!(
                        date = %date,
                        messages = stats.messages,
                        topics = stats.topics,
                        episodes = stats.episodes_attempted,
                        episodes_succeeded = stats.episodes_succeeded,
                        elapsed_ms = stats.elapsed_ms,
                        "date processed"
                    );
                    self.audit(&progress.group_id, date, DayOutcome::Processed, Some(&stats), "");
                    days.push(stats);
                }
                Err(err) => {
                    failed += 1;
                    let message = err.to_string();
                    progress.record_failure(date, &message);
                    warn::emit(WarnEvent {
                        code: "DAY_FAILED",
                        stage: "fetch",
                        date: date.as_str(),
                        topic: "",
                        reason: "recorded-for-retry",
                        err: &message,
                    });
                    self.audit(&progress.group_id, date, DayOutcome::Failed, None, &message);
                }
            }
            attempted += 1;

            self.store
                .save(&progress)
                .with_context(|| format!("failed to save checkpoint after {date}"))?;

            if position + 1 < total && !self.delay.is_zero() && !self.token.sleep(self.delay) {
                tracing::debug!("inter-date delay interrupted");
            }
        }
        if !cancelled && self.token.is_cancelled() {
            cancelled = true;
            tracing::warn!("import interrupted during the final date; no dates left to skip");
        }

        Ok(RunSummary {
            group_id: progress.group_id.clone(),
            start_date: progress.start_date.clone(),
            end_date: progress.end_date.clone(),
            planned: planned.len(),
            attempted,
            succeeded: attempted - failed,
            failed,
            cancelled,
            processed_total: progress.processed_dates.len(),
            total_messages: progress.total_messages,
            total_episodes: progress.total_episodes,
            total_episodes_succeeded: progress.total_episodes_succeeded,
            exhausted_dates: progress.exhausted_dates(self.max_attempts),
            failed_dates: progress.failed_dates,
            checkpoint: self.store.path().to_path_buf(),
            days,
        })
    }
}
