use anyhow::Result;

use crate::commands::CommandReport;
use crate::import::config::{ConfigOverrides, load_config};
use crate::import::dates::plan_range;
use crate::import::paths::resolve_paths;
use crate::import::progress::{Progress, ProgressStore};

fn describe_progress(report: &mut CommandReport, progress: &Progress, max_attempts: u32) {
    report.detail(format!("group={}", progress.group_id));
    report.detail(format!(
        "range={}..{}",
        progress.start_date, progress.end_date
    ));
    report.detail(format!("started_at={}", progress.start_time.to_rfc3339()));
    if let Some(last) = &progress.last_processed_date {
        report.detail(format!("last_processed_date={last}"));
    }
    let planned = plan_range(progress.start_date.as_str(), progress.end_date.as_str())
        .map(|dates| dates.len())
        .unwrap_or(0);
    report.detail(format!(
        "processed={}/{planned}",
        progress.processed_dates.len()
    ));
    report.detail(format!("total_messages={}", progress.total_messages));
    report.detail(format!(
        "total_episodes={} total_episodes_succeeded={}",
        progress.total_episodes, progress.total_episodes_succeeded
    ));
    for (date, error) in &progress.failed_dates {
        let attempts = progress.failed_attempts.get(date).copied().unwrap_or(0);
        let exhausted = if progress.attempts_exhausted(date, max_attempts) {
            " (retries exhausted)"
        } else {
            ""
        };
        report.detail(format!(
            "failed {date} attempts={attempts}{exhausted}: {error}"
        ));
    }
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");
    report.detail(format!(
        "home={} ({})",
        paths.home.display(),
        if paths.home_is_explicit {
            "WA_IMPORT_HOME"
        } else {
            "working directory"
        }
    ));
    report.detail(format!("checkpoint={}", paths.checkpoint_file.display()));
    report.detail(format!("messages_db={}", paths.messages_db.display()));
    report.detail(format!("contacts_db={}", paths.contacts_db.display()));

    if !paths.messages_db.exists() {
        report.issue(format!(
            "missing message database ({})",
            paths.messages_db.display()
        ));
    }

    let max_attempts = match load_config(paths.clone(), &ConfigOverrides::default()) {
        Ok(config) => {
            report.detail(format!("gateway={}", config.gateway.url));
            report.detail(format!("timezone={}", config.tz.name()));
            config.import.max_attempts
        }
        Err(err) => {
            report.issue(format!("{err:#}"));
            0
        }
    };

    let store = ProgressStore::new(&paths.checkpoint_file);
    if !store.exists() {
        report.detail("no checkpoint found");
        return Ok(report);
    }
    match store.load() {
        Ok(progress) => describe_progress(&mut report, &progress, max_attempts),
        Err(err) => report.issue(format!("{err:#}")),
    }
    Ok(report)
}
