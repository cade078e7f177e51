use crate::bridge::messages::Message;
use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::LazyLock;

pub const SEGMENTATION_FILE: &str = "topic-segmentation.md";
pub const EPISODE_FILE: &str = "add-episode.md";

static PLACEHOLDER_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Z_]+)\}\}"));

const DEFAULT_SEGMENTATION: &str = r#"You are analysing one day ({{DATE}}) of a WhatsApp group conversation.
Group the messages below into coherent topics. Every message is prefixed with
its index; refer to messages only by these indices.

Messages (→ sent by me, ← received):
{{MESSAGES}}

Respond with a single JSON object and nothing else. Each key is a short
snake_case topic label; each value has this shape:

{"messages": [<message indices>], "summary": "<one or two sentence summary>"}

Example:
{"weekend_trip": {"messages": [0, 1, 4], "summary": "Planning the weekend trip."}}
"#;

const DEFAULT_EPISODE: &str = r#"Add this WhatsApp conversation segment to Graphiti's memory:

**Instructions:**
Use the mcp__graphiti__add_memory tool with the following parameters:
- name: "{{EPISODE_NAME}}"
- episode_body: "{{EPISODE_BODY}}"
- source: "message"
- source_description: "{{SOURCE_DESCRIPTION}}"

DO NOT SEND group_id as a parameter.
After adding the episode, confirm that it was successfully added to the knowledge graph."#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub segmentation: String,
    pub episode: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            segmentation: DEFAULT_SEGMENTATION.to_string(),
            episode: DEFAULT_EPISODE.to_string(),
        }
    }
}

fn read_override(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read prompt {}", path.display())),
    }
}

impl PromptTemplates {
    /// Built-in templates, replaced by any non-empty override file in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let defaults = Self::default();
        let segmentation = read_override(&dir.join(SEGMENTATION_FILE))?;
        let episode = read_override(&dir.join(EPISODE_FILE))?;
        if segmentation.is_some() || episode.is_some() {
            tracing::debug!(dir = %dir.display(), "using prompt overrides");
        }
        Ok(Self {
            segmentation: segmentation.unwrap_or(defaults.segmentation),
            episode: episode.unwrap_or(defaults.episode),
        })
    }
}

/// One numbered line per message: `<index>. [<time>] <dir> <sender>: <content>`.
pub fn format_message_lines(messages: &[Message]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(index, msg)| {
            let direction = if msg.is_from_me { "→" } else { "←" };
            format!(
                "{index}. [{}] {direction} {}: {}",
                msg.timestamp.format("%H:%M:%S"),
                msg.sender_name,
                msg.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Substitute `{{NAME}}` placeholders in one pass over the template.
/// Inserted values are never rescanned; unknown names stay verbatim.
fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let value_of = |name: &str| values.iter().find(|(key, _)| *key == name).map(|(_, v)| *v);
    match PLACEHOLDER_RE.as_ref() {
        Ok(re) => re
            .replace_all(template, |caps: &Captures<'_>| {
                value_of(&caps[1]).unwrap_or(&caps[0]).to_string()
            })
            .into_owned(),
        Err(_) => values.iter().fold(template.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{{{key}}}}}"), value)
        }),
    }
}

pub fn render_segmentation(template: &str, date: &str, messages: &[Message]) -> String {
    fill_placeholders(
        template,
        &[("DATE", date), ("MESSAGES", &format_message_lines(messages))],
    )
}

#[derive(Debug, Clone)]
pub struct EpisodePrompt<'a> {
    pub episode_name: &'a str,
    pub topic_name: &'a str,
    pub topic_summary: &'a str,
    pub group_name: &'a str,
    pub date: &'a str,
    pub episode_body: &'a str,
    pub source_description: &'a str,
}

pub fn render_episode(template: &str, input: &EpisodePrompt<'_>) -> String {
    let body = input.episode_body.replace('"', "\\\"");
    fill_placeholders(
        template,
        &[
            ("EPISODE_NAME", input.episode_name),
            ("TOPIC_NAME", input.topic_name),
            ("TOPIC_SUMMARY", input.topic_summary),
            ("GROUP_NAME", input.group_name),
            ("DATE", input.date),
            ("EPISODE_BODY", &body),
            ("SOURCE_DESCRIPTION", input.source_description),
        ],
    )
}
