//! Synthetic source databases shaped like the real macOS stores.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use anyhow::Result;
use rusqlite::Connection;

/// 2023-01-01T00:00:00Z in Apple-epoch seconds.
pub const APPLE_2023: f64 = 694_224_000.0;
/// 2023-01-01T00:00:00Z in Unix seconds.
pub const UNIX_2023: i64 = 1_672_531_200;
/// 2023-01-01T00:00:00Z in WebKit-epoch microseconds.
pub const WEBKIT_2023: i64 = 13_317_004_800_000_000;
/// 2023-01-01T00:00:00Z in Apple-epoch nanoseconds.
pub const APPLE_NANOS_2023: i64 = 694_224_000_000_000_000;

const KNOWLEDGEC_SCHEMA: &str = r"
CREATE TABLE ZOBJECT (
  Z_PK INTEGER PRIMARY KEY,
  ZSTREAMNAME TEXT,
  ZVALUESTRING TEXT,
  ZVALUEINTEGER INTEGER,
  ZSTARTDATE REAL,
  ZENDDATE REAL,
  ZSOURCE INTEGER,
  ZSTRUCTUREDMETADATA INTEGER
);
CREATE TABLE ZSOURCE (Z_PK INTEGER PRIMARY KEY, ZDEVICEID TEXT, ZBUNDLEID TEXT);
CREATE TABLE ZSTRUCTUREDMETADATA (
  Z_PK INTEGER PRIMARY KEY,
  Z_DKBLUETOOTHMETADATAKEY__NAME TEXT,
  Z_DKBLUETOOTHMETADATAKEY__ADDRESS TEXT,
  Z_DKBLUETOOTHMETADATAKEY__DEVICETYPE INTEGER,
  Z_DKBLUETOOTHMETADATAKEY__PRODUCTID INTEGER,
  Z_DKINTENTMETADATAKEY__INTENTCLASS TEXT,
  Z_DKINTENTMETADATAKEY__INTENTVERB TEXT
);
";

/// knowledgeC with two app sessions (one inverted), one empty bundle, one
/// bluetooth connection, four notifications (two placeholders), one intent and
/// one backlight event. Without `ZSYNCPEER` unless `with_sync_peers`.
pub fn knowledgec(dir: &Path, with_sync_peers: bool) -> Result<PathBuf> {
    let path = dir.join("knowledgeC.db");
    let conn = Connection::open(&path)?;
    conn.execute_batch(KNOWLEDGEC_SCHEMA)?;
    conn.execute_batch(
        "INSERT INTO ZSOURCE VALUES (1, 'dev-1', NULL);
         INSERT INTO ZSOURCE VALUES (2, NULL, 'com.apple.mail');
         INSERT INTO ZSTRUCTUREDMETADATA VALUES (1, 'AirPods', 'AA:BB:CC', 1, 8194, NULL, NULL);
         INSERT INTO ZSTRUCTUREDMETADATA VALUES (2, NULL, NULL, NULL, NULL, 'INSendMessageIntent', 'SendMessage');",
    )?;

    let rows: [(&str, Option<&str>, Option<i64>, f64, Option<f64>, Option<i64>, Option<i64>); 10] = [
        ("/app/usage", Some("com.apple.Safari"), None, APPLE_2023, Some(APPLE_2023 + 600.0), Some(1), None),
        ("/app/usage", Some("com.apple.Notes"), None, APPLE_2023 + 1000.0, Some(APPLE_2023 + 900.0), Some(1), None),
        ("/app/usage", Some(""), None, APPLE_2023, None, None, None),
        ("/bluetooth/isConnected", None, None, APPLE_2023, Some(APPLE_2023 + 3600.0), None, Some(1)),
        ("/notification/usage", Some("Receive"), None, APPLE_2023 + 10.0, None, Some(2), None),
        ("/notification/usage", Some("Receive"), None, APPLE_2023 + 20.0, None, None, None),
        ("/notification/usage", Some("com.tinyspeck.slackmacgap"), None, APPLE_2023 + 30.0, None, None, None),
        ("/notification/usage", Some("Dismiss"), None, APPLE_2023 + 40.0, None, None, None),
        ("/app/intents", None, None, APPLE_2023 + 50.0, None, Some(2), Some(2)),
        ("/display/isBacklit", None, Some(1), APPLE_2023, Some(APPLE_2023 + 60.0), None, None),
    ];
    for (stream, value, integer, start, end, source, metadata) in rows {
        conn.execute(
            "INSERT INTO ZOBJECT (ZSTREAMNAME, ZVALUESTRING, ZVALUEINTEGER, ZSTARTDATE, ZENDDATE,
                                  ZSOURCE, ZSTRUCTUREDMETADATA)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![stream, value, integer, start, end, source, metadata],
        )?;
    }

    if with_sync_peers {
        conn.execute_batch(
            "CREATE TABLE ZSYNCPEER (Z_PK INTEGER PRIMARY KEY, ZDEVICEID TEXT, ZMODEL TEXT);
             INSERT INTO ZSYNCPEER VALUES (1, 'dev-1', 'MacBookPro18,3');",
        )?;
    }
    Ok(path)
}

/// Chrome history with two valid visits and one empty-URL visit.
pub fn chrome(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("History");
    let conn = Connection::open(&path)?;
    conn.execute_batch(
        "CREATE TABLE urls (id INTEGER PRIMARY KEY, url TEXT, title TEXT);
         CREATE TABLE visits (id INTEGER PRIMARY KEY, url INTEGER, visit_time INTEGER,
                              visit_duration INTEGER, transition INTEGER);
         INSERT INTO urls VALUES (1, 'https://example.com/', 'Example');
         INSERT INTO urls VALUES (2, '', 'Blank');",
    )?;
    conn.execute(
        "INSERT INTO visits (url, visit_time, visit_duration, transition) VALUES
           (1, ?1, 2500000, 1),
           (1, ?2, 0, ?3),
           (2, ?1, 10, 0)",
        rusqlite::params![WEBKIT_2023, WEBKIT_2023 + 60_000_000, 0x3000_0000_i64 | 8],
    )?;
    Ok(path)
}

/// chat.db with one valid chat, message and handle, plus one invalid of each.
pub fn messages(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("chat.db");
    let conn = Connection::open(&path)?;
    conn.execute_batch(
        "CREATE TABLE handle (ROWID INTEGER PRIMARY KEY, id TEXT, service TEXT);
         CREATE TABLE chat (ROWID INTEGER PRIMARY KEY, guid TEXT, chat_identifier TEXT,
                            display_name TEXT);
         CREATE TABLE chat_handle_join (chat_id INTEGER, handle_id INTEGER);
         CREATE TABLE message (ROWID INTEGER PRIMARY KEY, guid TEXT, text TEXT,
                               is_from_me INTEGER, date INTEGER, date_read INTEGER,
                               date_delivered INTEGER, handle_id INTEGER, service TEXT);
         CREATE TABLE chat_message_join (chat_id INTEGER, message_id INTEGER);
         CREATE TABLE attachment (ROWID INTEGER PRIMARY KEY, filename TEXT);
         CREATE TABLE message_attachment_join (message_id INTEGER, attachment_id INTEGER);

         INSERT INTO handle VALUES (1, '+15551234567', 'iMessage');
         INSERT INTO handle VALUES (2, '', 'SMS');
         INSERT INTO chat VALUES (1, 'iMessage;-;+15551234567', '+15551234567', NULL);
         INSERT INTO chat VALUES (2, '', 'broken', NULL);
         INSERT INTO chat_handle_join VALUES (1, 1);
         INSERT INTO attachment VALUES (1, 'photo.heic');
         INSERT INTO message_attachment_join VALUES (1, 1);
         INSERT INTO chat_message_join VALUES (1, 1);
         INSERT INTO chat_message_join VALUES (1, 2);",
    )?;
    conn.execute(
        "INSERT INTO message VALUES
           (1, 'm-1', 'hello', 0, ?1, ?2, ?1, 1, 'iMessage'),
           (2, 'm-2', 'no date', 1, NULL, NULL, NULL, 1, 'iMessage')",
        rusqlite::params![APPLE_NANOS_2023, APPLE_NANOS_2023 + 5_000_000_000],
    )?;
    Ok(path)
}

/// Podcasts library with one followed show, one untitled show, one
/// never-followed show and four episodes (one unplayed, one negative playhead,
/// one without uuid).
pub fn podcasts(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("MTLibrary.sqlite");
    let conn = Connection::open(&path)?;
    conn.execute_batch(
        "CREATE TABLE ZMTPODCAST (Z_PK INTEGER PRIMARY KEY, ZUUID TEXT, ZTITLE TEXT, ZAUTHOR TEXT,
                                  ZFEEDURL TEXT, ZADDEDDATE REAL, ZSUBSCRIBED INTEGER,
                                  ZLASTDATEPLAYED REAL);
         CREATE TABLE ZMTEPISODE (Z_PK INTEGER PRIMARY KEY, ZUUID TEXT, ZTITLE TEXT,
                                  ZPODCAST INTEGER, ZDURATION REAL, ZPLAYHEAD REAL,
                                  ZPLAYCOUNT INTEGER, ZLASTDATEPLAYED REAL, ZPUBDATE REAL);
         INSERT INTO ZMTPODCAST VALUES
           (1, 'show-1', 'Hardcore History', 'Dan Carlin', 'https://feed.example/hh', 694224000.0, 1, NULL),
           (2, 'show-2', NULL, NULL, NULL, NULL, 1, NULL),
           (3, 'show-3', 'Never Followed', NULL, NULL, NULL, 0, NULL);
         INSERT INTO ZMTEPISODE VALUES
           (1, 'ep-1', 'Episode One', 1, 3600.0, 1200.0, 1, 694224000.0, 694000000.0),
           (2, 'ep-2', 'Episode Two', 1, 1800.0, -5.0, 1, NULL, NULL),
           (3, 'ep-3', 'Unplayed', 1, 1800.0, 0.0, 0, NULL, NULL),
           (4, '', 'No Uuid', 1, 60.0, 0.0, 2, NULL, NULL);",
    )?;
    Ok(path)
}
