use crate::bridge::messages::{Message, MessageFetcher};
use regex::{Captures, Regex};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

const USER_SERVER: &str = "@s.whatsapp.net";
const GROUP_SERVER: &str = "@g.us";

static MENTION_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"@(\+?[0-9]{10,15})"));

/// Read-only participant name lookup.
pub trait DisplayNameResolver {
    /// Best known name for `participant`: full name, then first name, then
    /// push name. `None` when the participant is unknown.
    fn lookup(&self, participant: &str) -> Option<String>;
}

/// Resolver that knows nobody; every participant falls back to its id.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContacts;

impl DisplayNameResolver for NoContacts {
    fn lookup(&self, _participant: &str) -> Option<String> {
        None
    }
}

impl DisplayNameResolver for HashMap<String, String> {
    fn lookup(&self, participant: &str) -> Option<String> {
        self.get(participant)
            .or_else(|| self.get(&user_jid(participant)))
            .cloned()
    }
}

/// Contacts stored by the bridge's WhatsApp session database.
pub struct SqliteContactDirectory {
    conn: Option<Connection>,
}

impl SqliteContactDirectory {
    /// Open the directory read-only. A missing or unreadable database yields a
    /// directory that resolves nobody.
    pub fn open(path: &Path) -> Self {
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "contacts database not found; using raw ids");
            return Self { conn: None };
        }
        match Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ) {
            Ok(conn) => Self { conn: Some(conn) },
            Err(err) => {
                tracing::warn!(path = %path.display(), "failed to open contacts database: {err}");
                Self { conn: None }
            }
        }
    }
}

fn first_non_empty(candidates: [Option<String>; 3]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

impl DisplayNameResolver for SqliteContactDirectory {
    fn lookup(&self, participant: &str) -> Option<String> {
        let conn = self.conn.as_ref()?;
        let row = conn
            .query_row(
                "SELECT full_name, first_name, push_name
                 FROM whatsmeow_contacts
                 WHERE their_jid = ?1
                 LIMIT 1",
                params![user_jid(participant)],
                |row| {
                    Ok([
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ])
                },
            )
            .optional();
        match row {
            Ok(found) => found.and_then(first_non_empty),
            Err(err) => {
                tracing::debug!(participant, "contact lookup failed: {err}");
                None
            }
        }
    }
}

/// Full user JID for a participant given either as a JID or a bare number.
pub fn user_jid(participant: &str) -> String {
    let trimmed = participant.trim().trim_start_matches('+');
    if trimmed.contains('@') {
        trimmed.to_string()
    } else {
        format!("{trimmed}{USER_SERVER}")
    }
}

/// Display form of an unknown participant: the bare number for phone JIDs,
/// the raw identifier otherwise.
pub fn fallback_display(participant: &str) -> String {
    match participant.strip_suffix(USER_SERVER) {
        Some(number) if !number.is_empty() => number.to_string(),
        _ => participant.to_string(),
    }
}

/// Per-day memo over a resolver so each distinct sender is looked up once.
pub struct NameCache<'a> {
    resolver: &'a dyn DisplayNameResolver,
    names: HashMap<String, Option<String>>,
}

impl<'a> NameCache<'a> {
    pub fn new(resolver: &'a dyn DisplayNameResolver) -> Self {
        Self {
            resolver,
            names: HashMap::new(),
        }
    }

    pub fn lookup(&mut self, participant: &str) -> Option<String> {
        if let Some(hit) = self.names.get(participant) {
            return hit.clone();
        }
        let found = self.resolver.lookup(participant);
        self.names.insert(participant.to_string(), found.clone());
        found
    }

    pub fn display(&mut self, participant: &str) -> String {
        self.lookup(participant)
            .unwrap_or_else(|| fallback_display(participant))
    }
}

/// Replace `@<phone>` mentions with `@<name>` where the name is known.
pub fn rewrite_mentions(content: &str, names: &mut NameCache<'_>) -> String {
    let re = match MENTION_RE.as_ref() {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    if !re.is_match(content) {
        return content.to_string();
    }
    re.replace_all(content, |caps: &Captures<'_>| {
        let number = caps[1].trim_start_matches('+');
        match names.lookup(&user_jid(number)) {
            Some(name) => format!("@{name}"),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

/// Fill in sender display names and rewrite mentions for one day's messages.
pub fn annotate_messages(messages: &mut [Message], resolver: &dyn DisplayNameResolver) {
    let mut names = NameCache::new(resolver);
    for message in messages.iter_mut() {
        message.sender_name = names.display(&message.sender);
        message.content = rewrite_mentions(&message.content, &mut names);
    }
}

/// Short label for a group the store has no name for.
pub fn derive_group_label(group_id: &str) -> String {
    let local = group_id.strip_suffix(GROUP_SERVER).unwrap_or(group_id);
    let chars: Vec<char> = local.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(8)..].iter().collect();
    format!("Group {tail}")
}

/// Group display name from the store, else a label derived from the id.
pub fn group_display_name(fetcher: &dyn MessageFetcher, group_id: &str) -> String {
    fetcher
        .group_name(group_id)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| derive_group_label(group_id))
}
