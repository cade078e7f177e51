use crate::bridge::contacts::{DisplayNameResolver, annotate_messages};
use crate::bridge::gateway::Gateway;
use crate::bridge::messages::MessageFetcher;
use crate::error::ImportError;
use crate::import::config::GatewayConfig;
use crate::import::dates::{DateKey, day_bounds};
use crate::import::episode::EpisodeIngester;
use crate::import::prompts::PromptTemplates;
use crate::import::segment::TopicSegmenter;
use chrono_tz::Tz;
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DayStats {
    pub date: String,
    pub messages: usize,
    pub topics: usize,
    /// Segments submitted for ingestion, regardless of outcome.
    pub episodes_attempted: usize,
    pub episodes_succeeded: usize,
    pub elapsed_ms: u64,
}

/// Fetch → segment → ingest for a single date.
pub struct DayProcessor<'a> {
    fetcher: &'a dyn MessageFetcher,
    resolver: &'a dyn DisplayNameResolver,
    gateway: &'a dyn Gateway,
    templates: &'a PromptTemplates,
    gateway_config: &'a GatewayConfig,
    skip_graph: bool,
}

impl<'a> DayProcessor<'a> {
    pub fn new(
        fetcher: &'a dyn MessageFetcher,
        resolver: &'a dyn DisplayNameResolver,
        gateway: &'a dyn Gateway,
        templates: &'a PromptTemplates,
        gateway_config: &'a GatewayConfig,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            gateway,
            templates,
            gateway_config,
            skip_graph: false,
        }
    }

    pub fn skip_graph(mut self, skip: bool) -> Self {
        self.skip_graph = skip;
        self
    }

    /// Only a failed fetch fails the day; segmentation and ingestion
    /// problems are absorbed.
    pub fn process(
        &self,
        date: &DateKey,
        group_id: &str,
        group_name: &str,
        tz: Tz,
    ) -> Result<DayStats, ImportError> {
        let started = Instant::now();
        let mut stats = DayStats {
            date: date.to_string(),
            ..DayStats::default()
        };

        let bounds = day_bounds(date, tz)?;
        let mut messages = self.fetcher.fetch_day(group_id, &bounds)?;
        stats.messages = messages.len();

        if messages.is_empty() {
            tracing::info!(date = %date, "no messages");
        } else if self.skip_graph {
            tracing::info!(date = %date, messages = stats.messages, "graph ingestion skipped");
        } else {
            annotate_messages(&mut messages, self.resolver);
            let segmenter =
                TopicSegmenter::new(self.gateway, self.templates, &self.gateway_config.read_tools);
            let segments = segmenter.segment(&messages, date.as_str(), group_name);
            stats.topics = segments.len();

            let ingester = EpisodeIngester::new(
                self.gateway,
                self.templates,
                &self.gateway_config.write_tools,
                self.resolver,
            );
            let outcome = ingester.ingest(&segments, &messages, group_name, date.as_str());
            stats.episodes_attempted = outcome.attempted;
            stats.episodes_succeeded = outcome.succeeded;
        }

        stats.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(stats)
    }
}
