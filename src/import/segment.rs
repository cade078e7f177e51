use crate::bridge::gateway::Gateway;
use crate::bridge::messages::Message;
use crate::import::prompts::{PromptTemplates, render_segmentation};
use crate::import::warn::{self, WarnEvent};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A labelled subset of one day's messages, addressed by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSegment {
    pub label: String,
    pub summary: Option<String>,
    /// Ascending, distinct, all `< message count`.
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentationFailure {
    Gateway(String),
    Malformed(String),
    NoValidSegments,
}

impl fmt::Display for SegmentationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway(err) => write!(f, "gateway error: {err}"),
            Self::Malformed(err) => write!(f, "malformed segmentation response: {err}"),
            Self::NoValidSegments => f.write_str("no segment referenced a valid message"),
        }
    }
}

impl SegmentationFailure {
    fn code(&self) -> &'static str {
        match self {
            Self::Gateway(_) => "SEGMENT_GATEWAY",
            Self::Malformed(_) => "SEGMENT_DECODE",
            Self::NoValidSegments => "SEGMENT_EMPTY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentDecode {
    Partition(Vec<TopicSegment>),
    Invalid(SegmentationFailure),
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    #[serde(default)]
    messages: Vec<i64>,
    #[serde(default)]
    summary: Option<String>,
}

/// The body of the first fenced code block, or the whole trimmed input when
/// there is no fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let body = trimmed[open + 3..]
        .trim_start_matches([' ', '\t'])
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Decode a gateway reply into segments over `message_count` messages.
///
/// Out-of-range indices are dropped and segments left empty are removed.
pub fn decode_segments(raw: &str, message_count: usize) -> SegmentDecode {
    let parsed: BTreeMap<String, RawTopic> = match serde_json::from_str(strip_code_fence(raw)) {
        Ok(parsed) => parsed,
        Err(err) => return SegmentDecode::Invalid(SegmentationFailure::Malformed(err.to_string())),
    };

    let segments: Vec<TopicSegment> = parsed
        .into_iter()
        .filter_map(|(label, topic)| {
            let indices: BTreeSet<usize> = topic
                .messages
                .into_iter()
                .filter_map(|i| usize::try_from(i).ok())
                .filter(|i| *i < message_count)
                .collect();
            if indices.is_empty() {
                return None;
            }
            Some(TopicSegment {
                label,
                summary: topic
                    .summary
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                indices: indices.into_iter().collect(),
            })
        })
        .collect();

    if segments.is_empty() {
        SegmentDecode::Invalid(SegmentationFailure::NoValidSegments)
    } else {
        SegmentDecode::Partition(segments)
    }
}

pub fn fallback_label(group_name: &str) -> String {
    format!("{group_name}_daily_conversation")
}

/// One segment holding every message of the day.
pub fn fallback_segment(group_name: &str, message_count: usize) -> TopicSegment {
    TopicSegment {
        label: fallback_label(group_name),
        summary: None,
        indices: (0..message_count).collect(),
    }
}

pub struct TopicSegmenter<'a> {
    gateway: &'a dyn Gateway,
    templates: &'a PromptTemplates,
    read_tools: &'a [String],
}

impl<'a> TopicSegmenter<'a> {
    pub fn new(
        gateway: &'a dyn Gateway,
        templates: &'a PromptTemplates,
        read_tools: &'a [String],
    ) -> Self {
        Self {
            gateway,
            templates,
            read_tools,
        }
    }

    /// Partition a day's messages into topics. Never fails: any gateway or
    /// decode problem yields the single fallback segment.
    pub fn segment(&self, messages: &[Message], date: &str, group_name: &str) -> Vec<TopicSegment> {
        if messages.is_empty() {
            return Vec::new();
        }
        let prompt = render_segmentation(&self.templates.segmentation, date, messages);
        let decoded = match self.gateway.complete(&prompt, self.read_tools) {
            Ok(reply) => decode_segments(&reply, messages.len()),
            Err(err) => SegmentDecode::Invalid(SegmentationFailure::Gateway(err.to_string())),
        };

        match decoded {
            SegmentDecode::Partition(segments) => {
                tracing::info!(date, topics = segments.len(), "segmented messages by topic");
                segments
            }
            SegmentDecode::Invalid(failure) => {
                warn::emit(WarnEvent {
                    code: failure.code(),
                    stage: "segment",
                    date,
                    topic: "",
                    reason: "fallback-single-segment",
                    err: &failure.to_string(),
                });
                vec![fallback_segment(group_name, messages.len())]
            }
        }
    }
}
