//! Chrome `History` database. Visit times are WebKit-epoch microseconds.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use footprint_core::{record_hash, webkit_micros_to_unix, ExtractCounts, Record, WebVisit};
use footprint_store_sqlite::SqliteStore;
use rusqlite::Connection;

use super::CHROME;
use crate::collector::{non_empty, run_passes, Collector, PassWriter, SubPass};
use crate::discovery::newest_chrome_history;
use crate::IngestResult;

const VISITS_SQL: &str = r"
SELECT u.url, u.title, v.visit_time, v.visit_duration, v.transition
FROM visits v
JOIN urls u ON v.url = u.id
ORDER BY v.visit_time
";

const MICROS_PER_SECOND: f64 = 1_000_000.0;

const PASSES: [SubPass; 1] = [SubPass { name: "visits", run: extract_visits }];

#[derive(Debug, Default, Clone, Copy)]
pub struct ChromeCollector;

impl Collector for ChromeCollector {
    fn name(&self) -> &'static str {
        CHROME
    }

    fn discover(&self, home: &Path) -> Option<PathBuf> {
        newest_chrome_history(home)
    }

    fn extract(&self, source: &Connection, store: &SqliteStore) -> IngestResult<ExtractCounts> {
        run_passes(CHROME, source, store, &PASSES)
    }
}

/// Name of the core page transition held in the low byte of `visits.transition`.
#[must_use]
pub fn transition_name(transition: i64) -> &'static str {
    match transition & 0xFF {
        0 => "link",
        1 => "typed",
        2 => "auto_bookmark",
        3 => "auto_subframe",
        4 => "manual_subframe",
        5 => "generated",
        6 => "auto_toplevel",
        7 => "form_submit",
        8 => "reload",
        9 => "keyword",
        10 => "keyword_generated",
        _ => "other",
    }
}

#[allow(clippy::cast_precision_loss)]
fn visit_seconds(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SECOND
}

fn extract_visits(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt = source.prepare(VISITS_SQL).context("failed to prepare visits query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let url: Option<String> = row.get(0)?;
        let title: Option<String> = row.get(1)?;
        let raw_visit_time: Option<i64> = row.get(2)?;
        let duration: Option<i64> = row.get(3)?;
        let transition: Option<i64> = row.get(4)?;

        let (Some(url), Some(raw_visit_time)) = (non_empty(url), raw_visit_time) else {
            writer.drop_row();
            continue;
        };
        let Some(visit_time) = webkit_micros_to_unix(Some(raw_visit_time)) else {
            writer.drop_row();
            continue;
        };
        let raw_text = raw_visit_time.to_string();
        let visit_duration_seconds =
            writer.non_negative("visit_duration_seconds", duration.map(visit_seconds));

        writer.offer(&Record::WebVisit(WebVisit {
            record_hash: record_hash(&[Some(url.as_str()), Some(raw_text.as_str()), Some(CHROME)]),
            url,
            title,
            visit_time,
            visit_duration_seconds,
            transition_type: transition.map(|value| transition_name(value).to_string()),
            browser: CHROME.to_string(),
        }))?;
    }
    Ok(())
}
