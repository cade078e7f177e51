use chrono::{DateTime, TimeZone, Utc};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use tempfile::tempdir;
use wa_graph_import::bridge::contacts::NoContacts;
use wa_graph_import::bridge::gateway::Gateway;
use wa_graph_import::bridge::messages::{Message, MessageFetcher};
use wa_graph_import::error::{GatewayError, ImportError};
use wa_graph_import::import::config::GatewayConfig;
use wa_graph_import::import::dates::{DateKey, DayBounds, RangeSpec};
use wa_graph_import::import::day::DayProcessor;
use wa_graph_import::import::progress::ProgressStore;
use wa_graph_import::import::prompts::PromptTemplates;
use wa_graph_import::import::runner::{ImportRunner, RunOptions, RunSummary, prepare};
use wa_graph_import::import::shutdown::CancellationToken;

const GROUP: &str = "120363025246125486@g.us";

struct ScriptedStore {
    failing: HashSet<String>,
    cancel_after: Option<(String, CancellationToken)>,
    fetched: RefCell<Vec<String>>,
}

impl ScriptedStore {
    fn new(failing: &[&str]) -> Self {
        Self {
            failing: failing.iter().map(|d| d.to_string()).collect(),
            cancel_after: None,
            fetched: RefCell::new(Vec::new()),
        }
    }

    fn cancelling_on(date: &str, token: &CancellationToken) -> Self {
        Self {
            cancel_after: Some((date.to_string(), token.clone())),
            ..Self::new(&[])
        }
    }
}

impl MessageFetcher for ScriptedStore {
    fn fetch_day(&self, _group: &str, bounds: &DayBounds) -> Result<Vec<Message>, ImportError> {
        let date = bounds.date.to_string();
        self.fetched.borrow_mut().push(date.clone());
        if let Some((on, token)) = &self.cancel_after
            && *on == date
        {
            token.cancel();
        }
        if self.failing.contains(&date) {
            return Err(ImportError::Fetch("database is locked".to_string()));
        }
        let ts = bounds.start.fixed_offset();
        Ok(vec![
            Message::new("1", ts, "111@s.whatsapp.net", format!("hello on {date}"), false),
            Message::new("2", ts, "222@s.whatsapp.net", "hi", true),
        ])
    }
}

struct OkGateway;

impl Gateway for OkGateway {
    fn complete(&self, _prompt: &str, tools: &[String]) -> Result<String, GatewayError> {
        if tools.iter().any(|t| t == "mcp__graphiti") {
            Ok("added".to_string())
        } else {
            Ok(r#"```json
{"greetings": {"messages": [0, 1], "summary": "hellos"}}
```"#
                .to_string())
        }
    }
}

fn key(raw: &str) -> DateKey {
    DateKey::parse(raw).expect("key")
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
}

fn fresh(start: &str, end: &str) -> RunOptions {
    RunOptions {
        group_id: Some(GROUP.to_string()),
        range: Some(RangeSpec::Explicit {
            start: start.to_string(),
            end: end.to_string(),
        }),
        resume: false,
    }
}

fn resume() -> RunOptions {
    RunOptions {
        resume: true,
        ..RunOptions::default()
    }
}

fn run_with(
    checkpoint: &Path,
    fetcher: &ScriptedStore,
    token: &CancellationToken,
    options: &RunOptions,
    max_attempts: u32,
    logs_dir: Option<&Path>,
) -> RunSummary {
    let store = ProgressStore::new(checkpoint);
    let templates = PromptTemplates::default();
    let config = GatewayConfig::default();
    let processor = DayProcessor::new(fetcher, &NoContacts, &OkGateway, &templates, &config);
    let plan = prepare(&store, options, chrono_tz::America::Sao_Paulo, now(), max_attempts)
        .expect("plan");
    let mut runner = ImportRunner::new(&store, &processor, token, chrono_tz::America::Sao_Paulo)
        .max_attempts(max_attempts);
    if let Some(dir) = logs_dir {
        runner = runner.audit_to(dir);
    }
    runner.run(plan, "Family").expect("run")
}

#[test]
fn every_attempted_date_lands_in_exactly_one_bucket() {
    let tmp = tempdir().expect("tempdir");
    let checkpoint = tmp.path().join("store/import-progress.json");
    let token = CancellationToken::new();
    let fetcher = ScriptedStore::new(&["2024-01-02"]);

    let summary = run_with(
        &checkpoint,
        &fetcher,
        &token,
        &fresh("2024-01-01", "2024-01-03"),
        0,
        None,
    );
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.total_messages, 4);
    assert_eq!(summary.total_episodes, 2);
    assert_eq!(summary.total_episodes_succeeded, 2);

    let saved = ProgressStore::new(&checkpoint).load().expect("load");
    assert_eq!(saved.processed_dates, vec![key("2024-01-01"), key("2024-01-03")]);
    assert_eq!(saved.failed_dates.len(), 1);
    assert!(saved.failed_dates[&key("2024-01-02")].contains("database is locked"));
    assert_eq!(saved.processed_dates.len() + saved.failed_dates.len(), 3);
    assert!(
        saved
            .processed_dates
            .iter()
            .all(|d| !saved.failed_dates.contains_key(d))
    );
}

#[test]
fn resume_retries_failed_dates_and_keeps_totals() {
    let tmp = tempdir().expect("tempdir");
    let checkpoint = tmp.path().join("import-progress.json");
    let token = CancellationToken::new();

    run_with(
        &checkpoint,
        &ScriptedStore::new(&["2024-01-01", "2024-01-03"]),
        &token,
        &fresh("2024-01-01", "2024-01-04"),
        0,
        None,
    );

    let retry = ScriptedStore::new(&[]);
    let summary = run_with(&checkpoint, &retry, &token, &resume(), 0, None);
    assert_eq!(*retry.fetched.borrow(), vec!["2024-01-01", "2024-01-03"]);
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.processed_total, 4);
    assert_eq!(summary.total_messages, 8);
    assert!(summary.failed_dates.is_empty());

    let saved = ProgressStore::new(&checkpoint).load().expect("load");
    assert_eq!(
        saved.processed_dates,
        vec![
            key("2024-01-02"),
            key("2024-01-04"),
            key("2024-01-01"),
            key("2024-01-03")
        ]
    );
    assert_eq!(saved.last_processed_date, Some(key("2024-01-03")));
    assert!(saved.failed_dates.is_empty());
}

#[test]
fn resuming_a_finished_run_changes_nothing() {
    let tmp = tempdir().expect("tempdir");
    let checkpoint = tmp.path().join("import-progress.json");
    let token = CancellationToken::new();
    run_with(
        &checkpoint,
        &ScriptedStore::new(&[]),
        &token,
        &fresh("2024-01-01", "2024-01-02"),
        0,
        None,
    );
    let before = ProgressStore::new(&checkpoint).load().expect("load");

    let idle = ScriptedStore::new(&[]);
    let summary = run_with(&checkpoint, &idle, &token, &resume(), 0, None);
    assert_eq!(summary.attempted, 0);
    assert!(idle.fetched.borrow().is_empty());

    let after = ProgressStore::new(&checkpoint).load().expect("load");
    assert_eq!(before, after);
}

#[test]
fn cancellation_lets_the_in_flight_date_finish() {
    let tmp = tempdir().expect("tempdir");
    let checkpoint = tmp.path().join("import-progress.json");
    let token = CancellationToken::new();
    let fetcher = ScriptedStore::cancelling_on("2024-01-02", &token);

    let summary = run_with(
        &checkpoint,
        &fetcher,
        &token,
        &fresh("2024-01-01", "2024-01-04"),
        0,
        None,
    );
    assert!(summary.cancelled);
    assert_eq!(summary.attempted, 2);
    assert_eq!(*fetcher.fetched.borrow(), vec!["2024-01-01", "2024-01-02"]);

    let saved = ProgressStore::new(&checkpoint).load().expect("load");
    assert_eq!(saved.processed_dates, vec![key("2024-01-01"), key("2024-01-02")]);
    assert!(saved.failed_dates.is_empty());

    let rest = ScriptedStore::new(&[]);
    run_with(&checkpoint, &rest, &CancellationToken::new(), &resume(), 0, None);
    assert_eq!(*rest.fetched.borrow(), vec!["2024-01-03", "2024-01-04"]);
}

#[test]
fn cancellation_during_final_date_is_reported() {
    let tmp = tempdir().expect("tempdir");
    let checkpoint = tmp.path().join("import-progress.json");
    let token = CancellationToken::new();
    let fetcher = ScriptedStore::cancelling_on("2024-01-02", &token);

    let summary = run_with(
        &checkpoint,
        &fetcher,
        &token,
        &fresh("2024-01-01", "2024-01-02"),
        0,
        None,
    );
    assert!(summary.cancelled);
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 2);

    let saved = ProgressStore::new(&checkpoint).load().expect("load");
    assert_eq!(saved.processed_dates, vec![key("2024-01-01"), key("2024-01-02")]);
}

#[test]
fn cancellation_before_first_date_attempts_nothing() {
    let tmp = tempdir().expect("tempdir");
    let checkpoint = tmp.path().join("import-progress.json");
    let logs = tmp.path().join("logs");
    let token = CancellationToken::new();
    token.cancel();
    let fetcher = ScriptedStore::new(&[]);

    let summary = run_with(
        &checkpoint,
        &fetcher,
        &token,
        &fresh("2024-01-01", "2024-01-02"),
        0,
        Some(&logs),
    );
    assert!(summary.cancelled);
    assert_eq!(summary.attempted, 0);
    assert!(fetcher.fetched.borrow().is_empty());

    let saved = ProgressStore::new(&checkpoint).load().expect("load");
    assert!(saved.processed_dates.is_empty());
    assert!(saved.failed_dates.is_empty());

    let audit = std::fs::read_to_string(logs.join("import-audit.log")).expect("audit");
    assert_eq!(audit.lines().count(), 1);
    assert!(audit.contains("\"outcome\":\"cancelled\""));
}

#[test]
fn retry_cap_stops_resuming_chronic_failures() {
    let tmp = tempdir().expect("tempdir");
    let checkpoint = tmp.path().join("import-progress.json");
    let token = CancellationToken::new();
    let broken = ScriptedStore::new(&["2024-01-01"]);

    run_with(&checkpoint, &broken, &token, &fresh("2024-01-01", "2024-01-02"), 2, None);
    let second = ScriptedStore::new(&["2024-01-01"]);
    let summary = run_with(&checkpoint, &second, &token, &resume(), 2, None);
    assert_eq!(*second.fetched.borrow(), vec!["2024-01-01"]);
    assert_eq!(summary.exhausted_dates, vec![key("2024-01-01")]);

    let third = ScriptedStore::new(&[]);
    let summary = run_with(&checkpoint, &third, &token, &resume(), 2, None);
    assert!(third.fetched.borrow().is_empty());
    assert_eq!(summary.failed_dates.len(), 1);
}

#[test]
fn audit_log_records_each_day() {
    let tmp = tempdir().expect("tempdir");
    let checkpoint = tmp.path().join("import-progress.json");
    let logs = tmp.path().join("logs");
    run_with(
        &checkpoint,
        &ScriptedStore::new(&["2024-01-02"]),
        &CancellationToken::new(),
        &fresh("2024-01-01", "2024-01-02"),
        0,
        Some(&logs),
    );
    let audit = std::fs::read_to_string(logs.join("import-audit.log")).expect("audit");
    let lines: Vec<serde_json::Value> = audit
        .lines()
        .map(|l| serde_json::from_str(l).expect("json"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["date"], "2024-01-01");
    assert_eq!(lines[0]["outcome"], "processed");
    assert_eq!(lines[0]["stats"]["episodes_attempted"], 1);
    assert_eq!(lines[1]["outcome"], "failed");
}
