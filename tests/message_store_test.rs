use rusqlite::{Connection, params};
use std::path::Path;
use tempfile::tempdir;
use wa_graph_import::bridge::contacts::group_display_name;
use wa_graph_import::bridge::messages::{MessageFetcher, SqliteMessageStore};
use wa_graph_import::error::ImportError;
use wa_graph_import::import::dates::{DateKey, day_bounds};

const GROUP: &str = "120363025246125486@g.us";

fn create_store(path: &Path) -> Connection {
    let conn = Connection::open(path).expect("open");
    conn.execute_batch(
        "CREATE TABLE chats (jid TEXT PRIMARY KEY, name TEXT, last_message_time TIMESTAMP);
         CREATE TABLE messages (
            id TEXT, chat_jid TEXT, sender TEXT, content TEXT, timestamp TIMESTAMP,
            is_from_me BOOLEAN, media_type TEXT, filename TEXT,
            PRIMARY KEY (id, chat_jid)
         );",
    )
    .expect("schema");
    conn
}

fn insert(
    conn: &Connection,
    id: &str,
    chat: &str,
    ts: &str,
    content: &str,
    from_me: bool,
    media: Option<(&str, &str)>,
) {
    conn.execute(
        "INSERT INTO messages (id, chat_jid, sender, content, timestamp, is_from_me, media_type, filename)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            chat,
            "5511999990000@s.whatsapp.net",
            content,
            ts,
            from_me,
            media.map(|m| m.0),
            media.map(|m| m.1),
        ],
    )
    .expect("insert");
}

fn bounds(date: &str) -> wa_graph_import::import::dates::DayBounds {
    day_bounds(
        &DateKey::parse(date).expect("key"),
        chrono_tz::America::Sao_Paulo,
    )
    .expect("bounds")
}

#[test]
fn fetch_day_respects_local_day_boundaries_and_order() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("messages.db");
    let conn = create_store(&db);
    // 02:59 UTC on the 15th is still the 14th in Sao Paulo.
    insert(&conn, "early", GROUP, "2024-01-14 23:59:00-03:00", "late night", false, None);
    insert(&conn, "b", GROUP, "2024-01-15 12:00:00-03:00", "noon", false, None);
    insert(&conn, "a", GROUP, "2024-01-15 03:00:00+00:00", "midnight", true, None);
    insert(&conn, "c", GROUP, "2024-01-15 23:59:59.5-03:00", "last", false, None);
    insert(&conn, "next", GROUP, "2024-01-16 00:00:00-03:00", "tomorrow", false, None);
    insert(&conn, "other", "999@g.us", "2024-01-15 12:00:00-03:00", "elsewhere", false, None);
    drop(conn);

    let store = SqliteMessageStore::new(&db);
    let messages = store.fetch_day(GROUP, &bounds("2024-01-15")).expect("fetch");
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(messages[0].is_from_me);
    assert_eq!(messages[0].content, "midnight");
    assert_eq!(messages[0].sender_name, messages[0].sender);
}

#[test]
fn empty_rows_are_excluded_and_media_gets_placeholders() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("messages.db");
    let conn = create_store(&db);
    insert(&conn, "1", GROUP, "2024-01-15 09:00:00-03:00", "", false, None);
    insert(&conn, "2", GROUP, "2024-01-15 09:01:00-03:00", "", false, Some(("image", "a.jpg")));
    insert(&conn, "3", GROUP, "2024-01-15 09:02:00-03:00", "", false, Some(("document", "deck.pdf")));
    insert(&conn, "4", GROUP, "2024-01-15 09:03:00-03:00", "look", false, Some(("video", "v.mp4")));
    drop(conn);

    let messages = SqliteMessageStore::new(&db)
        .fetch_day(GROUP, &bounds("2024-01-15"))
        .expect("fetch");
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["[image]", "[document: deck.pdf]", "[video: v.mp4] look"]
    );
}

#[test]
fn quiet_day_returns_no_messages() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("messages.db");
    drop(create_store(&db));
    let messages = SqliteMessageStore::new(&db)
        .fetch_day(GROUP, &bounds("2024-01-15"))
        .expect("fetch");
    assert!(messages.is_empty());
}

#[test]
fn missing_database_is_fetch_error() {
    let tmp = tempdir().expect("tempdir");
    let err = SqliteMessageStore::new(tmp.path().join("absent.db"))
        .fetch_day(GROUP, &bounds("2024-01-15"))
        .expect_err("must fail");
    assert!(matches!(err, ImportError::Fetch(_)));
}

#[test]
fn group_name_comes_from_chats_or_id_suffix() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("messages.db");
    let conn = create_store(&db);
    conn.execute(
        "INSERT INTO chats (jid, name) VALUES (?1, ?2)",
        params![GROUP, "Family"],
    )
    .expect("chat");
    drop(conn);

    let store = SqliteMessageStore::new(&db);
    assert_eq!(group_display_name(&store, GROUP), "Family");
    assert_eq!(group_display_name(&store, "120363000011112222@g.us"), "Group 11112222");

    let missing = SqliteMessageStore::new(tmp.path().join("absent.db"));
    assert_eq!(group_display_name(&missing, GROUP), "Group 46125486");
}
