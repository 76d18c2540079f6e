//! Messages `chat.db`. Dates are Apple-epoch nanoseconds.
//!
//! Chats and messages dedupe on their native `guid`; contacts are hashed from
//! the `handle` row.

use anyhow::{Context, Result};
use footprint_core::{
    apple_nanos_to_unix, native_key, record_hash, Chat, Contact, ExtractCounts, Message, Record,
};
use footprint_store_sqlite::SqliteStore;
use rusqlite::Connection;

use super::MESSAGES;
use crate::collector::{non_empty, run_passes, Collector, PassWriter, SubPass};
use crate::IngestResult;

const CHATS_SQL: &str = r"
SELECT
    c.guid,
    c.chat_identifier,
    c.display_name,
    (SELECT COUNT(*) FROM chat_handle_join WHERE chat_id = c.ROWID) AS participant_count,
    (SELECT MAX(m.date) FROM message m
     JOIN chat_message_join cmj ON m.ROWID = cmj.message_id
     WHERE cmj.chat_id = c.ROWID) AS last_message_date
FROM chat c
";

const MESSAGES_SQL: &str = r"
SELECT
    m.guid,
    m.text,
    m.is_from_me,
    m.date,
    m.date_read,
    m.date_delivered,
    h.id AS handle_id,
    (SELECT c.guid FROM chat_message_join cmj
     JOIN chat c ON cmj.chat_id = c.ROWID
     WHERE cmj.message_id = m.ROWID
     ORDER BY cmj.chat_id
     LIMIT 1) AS chat_guid,
    m.service,
    (SELECT COUNT(*) FROM attachment a
     JOIN message_attachment_join maj ON a.ROWID = maj.attachment_id
     WHERE maj.message_id = m.ROWID) AS attachment_count
FROM message m
LEFT JOIN handle h ON m.handle_id = h.ROWID
ORDER BY m.date
";

const CONTACTS_SQL: &str = r"
SELECT id, service FROM handle ORDER BY ROWID
";

const PASSES: [SubPass; 3] = [
    SubPass { name: "chats", run: extract_chats },
    SubPass { name: "messages", run: extract_messages },
    SubPass { name: "contacts", run: extract_contacts },
];

#[derive(Debug, Default, Clone, Copy)]
pub struct MessagesCollector;

impl Collector for MessagesCollector {
    fn name(&self) -> &'static str {
        MESSAGES
    }

    fn extract(&self, source: &Connection, store: &SqliteStore) -> IngestResult<ExtractCounts> {
        run_passes(MESSAGES, source, store, &PASSES)
    }
}

fn extract_chats(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt = source.prepare(CHATS_SQL).context("failed to prepare chats query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let Some(guid) = native_key(row.get(0)?) else {
            writer.drop_row();
            continue;
        };

        writer.offer(&Record::Chat(Chat {
            record_hash: guid,
            chat_identifier: row.get(1)?,
            display_name: row.get(2)?,
            participant_count: row.get(3)?,
            last_message_time: apple_nanos_to_unix(row.get(4)?),
        }))?;
    }
    Ok(())
}

fn extract_messages(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt = source.prepare(MESSAGES_SQL).context("failed to prepare messages query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let guid = native_key(row.get(0)?);
        let timestamp = apple_nanos_to_unix(row.get(3)?);
        let (Some(guid), Some(timestamp)) = (guid, timestamp) else {
            writer.drop_row();
            continue;
        };
        let is_from_me: Option<i64> = row.get(2)?;
        let attachment_count: Option<i64> = row.get(9)?;

        writer.offer(&Record::Message(Message {
            record_hash: guid,
            text: row.get(1)?,
            is_from_me: is_from_me.map(|flag| flag != 0),
            timestamp,
            date_read: apple_nanos_to_unix(row.get(4)?),
            date_delivered: apple_nanos_to_unix(row.get(5)?),
            handle_id: row.get(6)?,
            chat_id: row.get(7)?,
            service: row.get(8)?,
            has_attachment: attachment_count.is_some_and(|count| count > 0),
        }))?;
    }
    Ok(())
}

fn extract_contacts(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt = source.prepare(CONTACTS_SQL).context("failed to prepare contacts query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let Some(handle_id) = non_empty(row.get(0)?) else {
            writer.drop_row();
            continue;
        };
        let service: Option<String> = row.get(1)?;

        writer.offer(&Record::Contact(Contact {
            record_hash: record_hash(&[Some(handle_id.as_str()), service.as_deref()]),
            handle_id,
            display_name: None,
            service,
        }))?;
    }
    Ok(())
}
