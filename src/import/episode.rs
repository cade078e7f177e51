use crate::bridge::contacts::DisplayNameResolver;
use crate::bridge::gateway::Gateway;
use crate::bridge::messages::Message;
use crate::import::prompts::{EpisodePrompt, PromptTemplates, render_episode};
use crate::import::segment::TopicSegment;
use crate::import::warn::{self, WarnEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub attempted: usize,
    pub succeeded: usize,
}

pub fn episode_name(date: &str, label: &str) -> String {
    format!("{date} - {label}")
}

pub fn source_description(group_name: &str) -> String {
    format!("WhatsApp_{group_name}")
}

/// Real name of the account owner, from the first self-authored message
/// found across all segments.
pub fn resolve_self_name(
    segments: &[TopicSegment],
    messages: &[Message],
    resolver: &dyn DisplayNameResolver,
) -> Option<String> {
    let sender = segments
        .iter()
        .flat_map(|segment| segment.indices.iter())
        .filter_map(|i| messages.get(*i))
        .find(|msg| msg.is_from_me)
        .map(|msg| msg.sender.as_str())?;
    resolver.lookup(sender)
}

/// `sender: content` lines in message order. Self-authored lines use
/// `self_name`, or the raw sender id when it is unknown.
pub fn render_transcript(
    segment: &TopicSegment,
    messages: &[Message],
    self_name: Option<&str>,
) -> String {
    segment
        .indices
        .iter()
        .filter_map(|i| messages.get(*i))
        .map(|msg| {
            let name = if msg.is_from_me {
                self_name.unwrap_or(msg.sender.as_str())
            } else {
                msg.sender_name.as_str()
            };
            format!("{name}: {}", msg.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct EpisodeIngester<'a> {
    gateway: &'a dyn Gateway,
    templates: &'a PromptTemplates,
    write_tools: &'a [String],
    resolver: &'a dyn DisplayNameResolver,
}

impl<'a> EpisodeIngester<'a> {
    pub fn new(
        gateway: &'a dyn Gateway,
        templates: &'a PromptTemplates,
        write_tools: &'a [String],
        resolver: &'a dyn DisplayNameResolver,
    ) -> Self {
        Self {
            gateway,
            templates,
            write_tools,
            resolver,
        }
    }

    /// Submit every segment as an episode. A failed segment is logged and
    /// skipped; it still counts as attempted.
    pub fn ingest(
        &self,
        segments: &[TopicSegment],
        messages: &[Message],
        group_name: &str,
        date: &str,
    ) -> IngestOutcome {
        let self_name = resolve_self_name(segments, messages, self.resolver);
        let source = source_description(group_name);
        let mut outcome = IngestOutcome::default();

        for segment in segments {
            outcome.attempted += 1;
            let name = episode_name(date, &segment.label);
            let body = render_transcript(segment, messages, self_name.as_deref());
            let prompt = render_episode(
                &self.templates.episode,
                &EpisodePrompt {
                    episode_name: &name,
                    topic_name: &segment.label,
                    topic_summary: segment.summary.as_deref().unwrap_or(""),
                    group_name,
                    date,
                    episode_body: &body,
                    source_description: &source,
                },
            );

            match self.gateway.complete(&prompt, self.write_tools) {
                Ok(_) => {
                    outcome.succeeded += 1;
                    tracing::info!(
                        date,
                        topic = %segment.label,
                        messages = segment.indices.len(),
                        "added episode"
                    );
                }
                Err(err) => warn::emit(WarnEvent {
                    code: "INGEST_GATEWAY",
                    stage: "ingest",
                    date,
                    topic: &segment.label,
                    reason: "episode-skipped",
                    err: &err.to_string(),
                }),
            }
        }

        tracing::info!(
            date,
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            "episode ingestion finished"
        );
        outcome
    }
}
