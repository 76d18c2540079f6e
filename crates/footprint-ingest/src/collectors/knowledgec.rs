//! Screen Time store: app usage, bluetooth, notifications, intents, backlight.
//!
//! Every timestamp is Apple-epoch seconds stored as a REAL.

use std::collections::HashMap;

use anyhow::{Context, Result};
use footprint_core::{
    apple_seconds_to_unix, record_hash, AppUsageSession, BluetoothConnection, DisplayStateEvent,
    ExtractCounts, Intent, Notification, Record,
};
use footprint_store_sqlite::SqliteStore;
use rusqlite::Connection;

use super::KNOWLEDGEC;
use crate::collector::{non_empty, run_passes, Collector, PassWriter, SubPass};
use crate::IngestResult;

const DEVICE_MODELS_SQL: &str = r"
SELECT ZDEVICEID, ZMODEL FROM ZSYNCPEER
WHERE ZDEVICEID IS NOT NULL AND ZMODEL IS NOT NULL
";

const APP_USAGE_SQL: &str = r"
SELECT o.ZVALUESTRING, o.ZSTARTDATE, o.ZENDDATE, s.ZDEVICEID
FROM ZOBJECT o
LEFT JOIN ZSOURCE s ON o.ZSOURCE = s.Z_PK
WHERE o.ZSTREAMNAME = '/app/usage'
  AND o.ZVALUESTRING IS NOT NULL
ORDER BY o.ZSTARTDATE
";

const BLUETOOTH_SQL: &str = r"
SELECT o.ZSTARTDATE, o.ZENDDATE,
       sm.Z_DKBLUETOOTHMETADATAKEY__NAME,
       sm.Z_DKBLUETOOTHMETADATAKEY__ADDRESS,
       sm.Z_DKBLUETOOTHMETADATAKEY__DEVICETYPE,
       sm.Z_DKBLUETOOTHMETADATAKEY__PRODUCTID
FROM ZOBJECT o
LEFT JOIN ZSTRUCTUREDMETADATA sm ON o.ZSTRUCTUREDMETADATA = sm.Z_PK
WHERE o.ZSTREAMNAME = '/bluetooth/isConnected'
ORDER BY o.ZSTARTDATE
";

const NOTIFICATIONS_SQL: &str = r"
SELECT o.ZVALUESTRING, o.ZSTARTDATE, s.ZBUNDLEID
FROM ZOBJECT o
LEFT JOIN ZSOURCE s ON o.ZSOURCE = s.Z_PK
WHERE o.ZSTREAMNAME = '/notification/usage'
ORDER BY o.ZSTARTDATE
";

const INTENTS_SQL: &str = r"
SELECT o.ZSTARTDATE,
       sm.Z_DKINTENTMETADATAKEY__INTENTCLASS,
       sm.Z_DKINTENTMETADATAKEY__INTENTVERB,
       s.ZBUNDLEID
FROM ZOBJECT o
LEFT JOIN ZSTRUCTUREDMETADATA sm ON o.ZSTRUCTUREDMETADATA = sm.Z_PK
LEFT JOIN ZSOURCE s ON o.ZSOURCE = s.Z_PK
WHERE o.ZSTREAMNAME = '/app/intents'
ORDER BY o.ZSTARTDATE
";

const DISPLAY_STATE_SQL: &str = r"
SELECT o.ZVALUEINTEGER, o.ZSTARTDATE, o.ZENDDATE
FROM ZOBJECT o
WHERE o.ZSTREAMNAME = '/display/isBacklit'
ORDER BY o.ZSTARTDATE
";

/// Event tokens that stand in for a missing notification bundle.
const NOTIFICATION_PLACEHOLDERS: [&str; 2] = ["Receive", "Dismiss"];

const PASSES: [SubPass; 5] = [
    SubPass { name: "app_usage", run: extract_app_usage },
    SubPass { name: "bluetooth", run: extract_bluetooth },
    SubPass { name: "notifications", run: extract_notifications },
    SubPass { name: "intents", run: extract_intents },
    SubPass { name: "display_state", run: extract_display_state },
];

#[derive(Debug, Default, Clone, Copy)]
pub struct KnowledgeCCollector;

impl Collector for KnowledgeCCollector {
    fn name(&self) -> &'static str {
        KNOWLEDGEC
    }

    fn extract(&self, source: &Connection, store: &SqliteStore) -> IngestResult<ExtractCounts> {
        run_passes(KNOWLEDGEC, source, store, &PASSES)
    }
}

/// Device id to hardware model. Enrichment only: failures yield an empty map.
fn device_models(source: &Connection) -> HashMap<String, String> {
    let load = || -> rusqlite::Result<HashMap<String, String>> {
        let mut stmt = source.prepare(DEVICE_MODELS_SQL)?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    };
    load().unwrap_or_else(|err| {
        tracing::warn!(source = KNOWLEDGEC, error = %err, "device model enrichment unavailable");
        HashMap::new()
    })
}

fn extract_app_usage(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let models = device_models(source);
    let mut stmt = source.prepare(APP_USAGE_SQL).context("failed to prepare app usage query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let bundle_id: Option<String> = row.get(0)?;
        let start: Option<f64> = row.get(1)?;
        let end: Option<f64> = row.get(2)?;
        let device_id: Option<String> = row.get(3)?;

        let (Some(bundle_id), Some(start_time)) = (non_empty(bundle_id), apple_seconds_to_unix(start))
        else {
            writer.drop_row();
            continue;
        };
        let end_time = apple_seconds_to_unix(end);
        let duration_seconds = writer.measure(start_time, end_time);
        let start_text = start_time.to_string();

        writer.offer(&Record::AppUsage(AppUsageSession {
            record_hash: record_hash(&[
                Some(bundle_id.as_str()),
                Some(start_text.as_str()),
                device_id.as_deref(),
            ]),
            duration_seconds,
            device_model: device_id.as_ref().and_then(|id| models.get(id).cloned()),
            bundle_id,
            start_time,
            end_time,
            device_id,
        }))?;
    }
    Ok(())
}

fn extract_bluetooth(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt = source.prepare(BLUETOOTH_SQL).context("failed to prepare bluetooth query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let start: Option<f64> = row.get(0)?;
        let end: Option<f64> = row.get(1)?;
        let device_name: Option<String> = row.get(2)?;
        let device_address: Option<String> = row.get(3)?;
        let device_type: Option<i64> = row.get(4)?;
        let product_id: Option<i64> = row.get(5)?;

        let Some(start_time) = apple_seconds_to_unix(start) else {
            writer.drop_row();
            continue;
        };
        let end_time = apple_seconds_to_unix(end);
        let duration_seconds = writer.measure(start_time, end_time);
        let start_text = start_time.to_string();

        writer.offer(&Record::BluetoothConnection(BluetoothConnection {
            record_hash: record_hash(&[device_address.as_deref(), Some(start_text.as_str())]),
            duration_seconds,
            device_name,
            device_address,
            device_type,
            product_id,
            start_time,
            end_time,
        }))?;
    }
    Ok(())
}

fn extract_notifications(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt =
        source.prepare(NOTIFICATIONS_SQL).context("failed to prepare notifications query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let event_type: Option<String> = row.get(0)?;
        let start: Option<f64> = row.get(1)?;
        let source_bundle: Option<String> = row.get(2)?;

        let bundle_id = non_empty(source_bundle)
            .or_else(|| non_empty(event_type.clone()))
            .filter(|bundle| !NOTIFICATION_PLACEHOLDERS.contains(&bundle.as_str()));
        let (Some(bundle_id), Some(timestamp)) = (bundle_id, apple_seconds_to_unix(start)) else {
            writer.drop_row();
            continue;
        };
        let timestamp_text = timestamp.to_string();

        writer.offer(&Record::Notification(Notification {
            record_hash: record_hash(&[
                Some(bundle_id.as_str()),
                Some(timestamp_text.as_str()),
                event_type.as_deref(),
            ]),
            bundle_id,
            event_type,
            timestamp,
        }))?;
    }
    Ok(())
}

fn extract_intents(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt = source.prepare(INTENTS_SQL).context("failed to prepare intents query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let start: Option<f64> = row.get(0)?;
        let intent_class: Option<String> = row.get(1)?;
        let intent_verb: Option<String> = row.get(2)?;
        let bundle_id: Option<String> = row.get(3)?;

        let Some(timestamp) = apple_seconds_to_unix(start) else {
            writer.drop_row();
            continue;
        };
        let timestamp_text = timestamp.to_string();

        writer.offer(&Record::Intent(Intent {
            record_hash: record_hash(&[
                intent_class.as_deref(),
                bundle_id.as_deref(),
                Some(timestamp_text.as_str()),
            ]),
            intent_class,
            intent_verb,
            bundle_id,
            timestamp,
        }))?;
    }
    Ok(())
}

fn extract_display_state(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt =
        source.prepare(DISPLAY_STATE_SQL).context("failed to prepare display state query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let backlit: Option<i64> = row.get(0)?;
        let start: Option<f64> = row.get(1)?;
        let end: Option<f64> = row.get(2)?;

        let Some(start_time) = apple_seconds_to_unix(start) else {
            writer.drop_row();
            continue;
        };
        let end_time = apple_seconds_to_unix(end);
        let duration_seconds = writer.measure(start_time, end_time);
        let start_text = start_time.to_string();
        let backlit_text = backlit.unwrap_or(0).to_string();

        writer.offer(&Record::DisplayState(DisplayStateEvent {
            record_hash: record_hash(&[Some(start_text.as_str()), Some(backlit_text.as_str())]),
            is_backlit: backlit.map(|value| value != 0),
            duration_seconds,
            start_time,
            end_time,
        }))?;
    }
    Ok(())
}
