use crate::error::ImportError;
use crate::import::dates::DayBounds;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::PathBuf;

/// One stored group message, already rendered to text.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<FixedOffset>,
    /// Raw participant identifier as stored by the bridge.
    pub sender: String,
    /// Display name; starts as `sender` until names are resolved.
    pub sender_name: String,
    pub content: String,
    pub is_from_me: bool,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<FixedOffset>,
        sender: impl Into<String>,
        content: impl Into<String>,
        is_from_me: bool,
    ) -> Self {
        let sender = sender.into();
        Self {
            id: id.into(),
            timestamp,
            sender_name: sender.clone(),
            sender,
            content: content.into(),
            is_from_me,
        }
    }
}

/// Read-only, day-bounded access to a group's stored messages.
pub trait MessageFetcher {
    /// Messages of `group_id` inside `bounds`, ascending by timestamp.
    fn fetch_day(&self, group_id: &str, bounds: &DayBounds) -> Result<Vec<Message>, ImportError>;

    /// The stored chat name of a group, when the store knows one.
    fn group_name(&self, _group_id: &str) -> Option<String> {
        None
    }
}

// Integer timestamps are unix seconds; text timestamps go through julianday.
const TS_EXPR: &str = "julianday(CASE WHEN typeof(timestamp) = 'integer' \
     THEN datetime(timestamp, 'unixepoch') ELSE timestamp END)";

fn day_query() -> String {
    format!(
        "SELECT id, sender, content, timestamp, is_from_me, media_type, filename
         FROM messages
         WHERE chat_jid = ?1
           AND {TS_EXPR} >= julianday(?2)
           AND {TS_EXPR} <= julianday(?3)
           AND (COALESCE(content, '') != '' OR COALESCE(media_type, '') != '')
         ORDER BY {TS_EXPR} ASC, rowid ASC"
    )
}

fn sqlite_bound(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f+00:00").to_string()
}

pub fn parse_store_timestamp(raw: &Value) -> Option<DateTime<FixedOffset>> {
    match raw {
        Value::Integer(secs) => Utc
            .timestamp_opt(*secs, 0)
            .single()
            .map(|ts| ts.fixed_offset()),
        Value::Text(text) => parse_timestamp_text(text.trim()),
        _ => None,
    }
}

fn parse_timestamp_text(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(text, fmt) {
            return Some(ts);
        }
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Text for a stored row; media rows get a bracketed placeholder.
pub fn render_content(content: &str, media_type: &str, filename: &str) -> String {
    let content = content.trim();
    let media_type = media_type.trim();
    let filename = filename.trim();
    if media_type.is_empty() {
        return content.to_string();
    }
    if !content.is_empty() {
        return if filename.is_empty() {
            format!("[{media_type}] {content}")
        } else {
            format!("[{media_type}: {filename}] {content}")
        };
    }
    match media_type {
        "image" | "video" | "audio" => format!("[{media_type}]"),
        "ptt" => "[audio]".to_string(),
        "document" if !filename.is_empty() => format!("[document: {filename}]"),
        other => format!("[{other}]"),
    }
}

/// The bridge's `messages.db`, opened read-only per query.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    path: PathBuf,
}

impl SqliteMessageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<Connection, ImportError> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| {
            ImportError::Fetch(format!(
                "failed to open message database {}: {err}",
                self.path.display()
            ))
        })
    }
}

struct RawRow {
    id: String,
    sender: String,
    content: String,
    timestamp: Value,
    is_from_me: bool,
    media_type: String,
    filename: String,
}

impl MessageFetcher for SqliteMessageStore {
    fn fetch_day(&self, group_id: &str, bounds: &DayBounds) -> Result<Vec<Message>, ImportError> {
        let conn = self.open()?;
        let query_err = |err: rusqlite::Error| {
            ImportError::Fetch(format!("failed to query messages: {err}"))
        };
        let mut stmt = conn.prepare(&day_query()).map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![
                    group_id,
                    sqlite_bound(bounds.start_utc()),
                    sqlite_bound(bounds.end_utc())
                ],
                |row| {
                    Ok(RawRow {
                        id: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        sender: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        timestamp: row.get::<_, Value>(3)?,
                        is_from_me: row.get::<_, Option<bool>>(4)?.unwrap_or(false),
                        media_type: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                        filename: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    })
                },
            )
            .map_err(query_err)?;

        let mut messages = Vec::new();
        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    tracing::warn!(date = %bounds.date, "failed to scan message row: {err}");
                    continue;
                }
            };
            let Some(timestamp) = parse_store_timestamp(&row.timestamp) else {
                tracing::warn!(date = %bounds.date, id = %row.id, "skipping message with unreadable timestamp");
                continue;
            };
            let content = render_content(&row.content, &row.media_type, &row.filename);
            if content.is_empty() {
                continue;
            }
            messages.push(Message::new(
                row.id,
                timestamp,
                row.sender,
                content,
                row.is_from_me,
            ));
        }

        tracing::debug!(
            group = group_id,
            date = %bounds.date,
            count = messages.len(),
            "retrieved messages"
        );
        Ok(messages)
    }

    fn group_name(&self, group_id: &str) -> Option<String> {
        let conn = self.open().ok()?;
        conn.query_row(
            "SELECT name FROM chats WHERE jid = ?1",
            params![group_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .ok()
        .flatten()
        .flatten()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_store_timestamp, render_content};
    use rusqlite::types::Value;

    #[test]
    fn text_rows_render_verbatim() {
        assert_eq!(render_content("bom dia", "", ""), "bom dia");
    }

    #[test]
    fn media_only_rows_render_placeholders() {
        assert_eq!(render_content("", "image", "a.jpg"), "[image]");
        assert_eq!(render_content("", "ptt", ""), "[audio]");
        assert_eq!(render_content("", "document", "deck.pdf"), "[document: deck.pdf]");
        assert_eq!(render_content("", "document", ""), "[document]");
        assert_eq!(render_content("", "sticker", ""), "[sticker]");
    }

    #[test]
    fn captioned_media_keeps_caption() {
        assert_eq!(
            render_content("see page 3", "document", "deck.pdf"),
            "[document: deck.pdf] see page 3"
        );
    }

    #[test]
    fn parses_bridge_timestamp_formats() {
        let go_style = Value::Text("2024-01-15 10:30:00-03:00".to_string());
        let ts = parse_store_timestamp(&go_style).expect("go style");
        assert_eq!(ts.to_rfc3339(), "2024-01-15T10:30:00-03:00");

        let nanos = Value::Text("2024-01-15 10:30:00.123456789+00:00".to_string());
        assert!(parse_store_timestamp(&nanos).is_some());

        let rfc = Value::Text("2024-01-15T13:30:00Z".to_string());
        assert!(parse_store_timestamp(&rfc).is_some());

        let epoch = Value::Integer(1_705_325_400);
        assert_eq!(
            parse_store_timestamp(&epoch).expect("epoch").to_rfc3339(),
            "2024-01-15T13:30:00+00:00"
        );

        assert!(parse_store_timestamp(&Value::Text("soon".to_string())).is_none());
    }
}
