use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands;
use crate::env_loader;
use crate::logging;

#[derive(Debug, Parser)]
#[command(name = "wa-graph-import")]
#[command(about = "Resumable day-by-day import of WhatsApp group history into a knowledge graph")]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import a date range, or resume the last checkpoint.
    Import(ImportArgs),
    /// Show the current checkpoint.
    Status,
}

#[derive(Debug, Args, Default)]
pub struct ImportArgs {
    #[arg(long)]
    pub group_jid: Option<String>,
    /// First date to import (YYYY-MM-DD).
    #[arg(long)]
    pub start_date: Option<String>,
    /// Last date to import (YYYY-MM-DD), inclusive.
    #[arg(long)]
    pub end_date: Option<String>,
    /// Import from N days ago up to today.
    #[arg(long)]
    pub days_back: Option<u32>,
    /// Seconds to wait between dates.
    #[arg(long)]
    pub delay: Option<u64>,
    #[arg(long)]
    pub resume: bool,
    #[arg(long)]
    pub dry_run: bool,
    /// Fetch and count messages without calling the gateway.
    #[arg(long, alias = "skip-graphiti")]
    pub skip_graph: bool,
    #[arg(long)]
    pub timezone: Option<String>,
}

fn print_report(report: &commands::CommandReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("command: {}", report.command);
    println!("ok: {}", report.ok);
    if !report.details.is_empty() {
        println!("details:");
        for detail in &report.details {
            println!("- {detail}");
        }
    }
    if !report.issues.is_empty() {
        println!("issues:");
        for issue in &report.issues {
            println!("- {issue}");
        }
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let dotenv = env_loader::load_dotenv();
    let cli = Cli::parse();
    logging::init(cli.verbose);
    tracing::debug!(?dotenv, "environment loaded");

    let report = match &cli.command {
        Command::Import(args) => commands::import::run(&commands::import::ImportOptions {
            group_id: args.group_jid.clone(),
            start_date: args.start_date.clone(),
            end_date: args.end_date.clone(),
            days_back: args.days_back,
            delay_secs: args.delay,
            resume: args.resume,
            dry_run: args.dry_run,
            skip_graph: args.skip_graph,
            timezone: args.timezone.clone(),
        })?,
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)?;

    if report.ok {
        Ok(())
    } else {
        std::process::exit(2);
    }
}
