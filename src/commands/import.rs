use anyhow::Result;
use chrono::Utc;
use std::time::Duration;

use crate::bridge::contacts::{SqliteContactDirectory, group_display_name};
use crate::bridge::gateway::HttpGateway;
use crate::bridge::messages::SqliteMessageStore;
use crate::commands::CommandReport;
use crate::error::ImportError;
use crate::import::config::{ConfigOverrides, load_config};
use crate::import::dates::RangeSpec;
use crate::import::day::DayProcessor;
use crate::import::paths::resolve_paths;
use crate::import::progress::{ProgressStore, RunLock};
use crate::import::prompts::PromptTemplates;
use crate::import::runner::{ImportRunner, RunOptions, RunPlan, RunSummary, prepare};
use crate::import::shutdown::ShutdownCoordinator;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub group_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub days_back: Option<u32>,
    pub delay_secs: Option<u64>,
    pub resume: bool,
    pub dry_run: bool,
    pub skip_graph: bool,
    pub timezone: Option<String>,
}

/// Range flags as given on the command line; `None` when none were passed.
pub fn range_from_flags(
    start: Option<&str>,
    end: Option<&str>,
    days_back: Option<u32>,
) -> Result<Option<RangeSpec>, ImportError> {
    match (start, end, days_back) {
        (None, None, None) => Ok(None),
        (Some(_), _, Some(_)) | (_, Some(_), Some(_)) => Err(ImportError::Configuration(
            "use either --days-back or --start-date/--end-date, not both".to_string(),
        )),
        (Some(_), None, None) | (None, Some(_), None) => Err(ImportError::Configuration(
            "--start-date and --end-date must be given together".to_string(),
        )),
        _ => RangeSpec::from_parts(start, end, days_back).map(Some),
    }
}

fn describe_plan(report: &mut CommandReport, plan: &RunPlan) {
    let progress = &plan.progress;
    report.detail(format!("group={}", progress.group_id));
    report.detail(format!(
        "range={}..{}",
        progress.start_date, progress.end_date
    ));
    report.detail(format!("resumed={}", plan.resumed));
    report.detail(format!("planned_dates={}", plan.planned.len()));
    report.detail(format!("remaining_dates={}", plan.remaining.len()));
}

pub fn summarize(report: &mut CommandReport, summary: &RunSummary) {
    report.detail(format!(
        "attempted={} succeeded={} failed={}",
        summary.attempted, summary.succeeded, summary.failed
    ));
    report.detail(format!(
        "processed_total={}/{}",
        summary.processed_total, summary.planned
    ));
    report.detail(format!("total_messages={}", summary.total_messages));
    report.detail(format!(
        "total_episodes={} total_episodes_succeeded={}",
        summary.total_episodes, summary.total_episodes_succeeded
    ));
    report.detail(format!("checkpoint={}", summary.checkpoint.display()));
    if summary.cancelled {
        report.detail("cancelled=true; run again with --resume to continue");
    }

    for (date, error) in &summary.failed_dates {
        report.issue(format!("failed date {date}: {error}"));
    }
    for date in &summary.exhausted_dates {
        report.detail(format!("retries exhausted for {date}; skipped on resume"));
    }
    if summary.failed_dates.len() > summary.exhausted_dates.len() {
        report.detail("run again with --resume to retry failed dates");
    }
}

pub fn run(opts: &ImportOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("import");
    let paths = resolve_paths()?;
    let config = load_config(
        paths,
        &ConfigOverrides {
            timezone: opts.timezone.clone(),
            delay_secs: opts.delay_secs,
        },
    )?;

    let range = range_from_flags(
        opts.start_date.as_deref(),
        opts.end_date.as_deref(),
        opts.days_back,
    )?;
    if opts.resume && range.is_some() {
        report.detail("range flags ignored; resuming the checkpoint's range");
    }

    let store = ProgressStore::new(&config.paths.checkpoint_file);
    let plan = prepare(
        &store,
        &RunOptions {
            group_id: opts.group_id.clone(),
            range: if opts.resume { None } else { range },
            resume: opts.resume,
        },
        config.tz,
        Utc::now(),
        config.import.max_attempts,
    )?;
    describe_plan(&mut report, &plan);
    report.detail(format!("timezone={}", config.tz.name()));

    if opts.dry_run {
        report.detail("dry_run=true");
        for date in &plan.remaining {
            report.detail(format!("would_process={date}"));
        }
        return Ok(report);
    }

    let lock = RunLock::acquire(&config.paths.lock_file())?;
    tracing::debug!(lock = %lock.path().display(), "acquired import lock");
    if plan.replaces_checkpoint {
        tracing::warn!(
            checkpoint = %store.path().display(),
            "starting a fresh import over an existing checkpoint"
        );
        report.detail("replaced existing checkpoint");
    }

    let token = ShutdownCoordinator::install()?;
    let fetcher = SqliteMessageStore::new(&config.paths.messages_db);
    let contacts = SqliteContactDirectory::open(&config.paths.contacts_db);
    let gateway = HttpGateway::new(&config.gateway)?;
    let templates = PromptTemplates::load(&config.paths.prompts_dir)?;
    let group_name = group_display_name(&fetcher, &plan.progress.group_id);
    report.detail(format!("group_name={group_name}"));
    if opts.skip_graph {
        report.detail("skip_graph=true");
    }

    let processor = DayProcessor::new(&fetcher, &contacts, &gateway, &templates, &config.gateway)
        .skip_graph(opts.skip_graph);
    let runner = ImportRunner::new(&store, &processor, &token, config.tz)
        .delay(Duration::from_secs(config.import.delay_secs))
        .max_attempts(config.import.max_attempts)
        .audit_to(&config.paths.logs_dir);

    tracing::info!(
        group = %plan.progress.group_id,
        dates = plan.remaining.len(),
        gateway = gateway.url(),
        "starting import"
    );
    let summary = runner.run(plan, &group_name)?;
    summarize(&mut report, &summary);
    Ok(report)
}
