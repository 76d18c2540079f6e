//! Apple Podcasts `MTLibrary.sqlite`: followed shows and played episodes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use footprint_core::{
    apple_seconds_to_unix, native_key, ExtractCounts, PodcastEpisode, PodcastShow, Record,
};
use footprint_store_sqlite::SqliteStore;
use rusqlite::Connection;

use super::PODCASTS;
use crate::collector::{non_empty, run_passes, Collector, PassWriter, SubPass};
use crate::discovery::podcasts_library;
use crate::IngestResult;

const SHOWS_SQL: &str = r"
SELECT
    ZUUID,
    ZTITLE,
    ZAUTHOR,
    ZFEEDURL,
    ZADDEDDATE,
    (SELECT COUNT(*) FROM ZMTEPISODE WHERE ZPODCAST = ZMTPODCAST.Z_PK) AS episode_count
FROM ZMTPODCAST
WHERE ZSUBSCRIBED = 1 OR ZLASTDATEPLAYED IS NOT NULL
";

const EPISODES_SQL: &str = r"
SELECT
    e.ZUUID,
    e.ZTITLE,
    p.ZTITLE AS show_title,
    p.ZUUID AS show_uuid,
    e.ZDURATION,
    e.ZPLAYHEAD,
    e.ZPLAYCOUNT,
    e.ZLASTDATEPLAYED,
    e.ZPUBDATE
FROM ZMTEPISODE e
LEFT JOIN ZMTPODCAST p ON e.ZPODCAST = p.Z_PK
WHERE e.ZPLAYCOUNT > 0 OR e.ZPLAYHEAD > 0 OR e.ZLASTDATEPLAYED IS NOT NULL
ORDER BY e.ZLASTDATEPLAYED DESC
";

const PASSES: [SubPass; 2] = [
    SubPass { name: "shows", run: extract_shows },
    SubPass { name: "episodes", run: extract_episodes },
];

#[derive(Debug, Default, Clone, Copy)]
pub struct PodcastsCollector;

impl Collector for PodcastsCollector {
    fn name(&self) -> &'static str {
        PODCASTS
    }

    fn discover(&self, home: &Path) -> Option<PathBuf> {
        podcasts_library(home)
    }

    fn extract(&self, source: &Connection, store: &SqliteStore) -> IngestResult<ExtractCounts> {
        run_passes(PODCASTS, source, store, &PASSES)
    }
}

fn extract_shows(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt = source.prepare(SHOWS_SQL).context("failed to prepare podcast shows query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let uuid = native_key(row.get(0)?);
        let title = non_empty(row.get(1)?);
        // `podcast_shows.title` is NOT NULL.
        let (Some(uuid), Some(title)) = (uuid, title) else {
            writer.drop_row();
            continue;
        };

        writer.offer(&Record::PodcastShow(PodcastShow {
            record_hash: uuid,
            title,
            author: row.get(2)?,
            feed_url: row.get(3)?,
            subscribed_at: apple_seconds_to_unix(row.get(4)?),
            episode_count: row.get(5)?,
        }))?;
    }
    Ok(())
}

fn extract_episodes(source: &Connection, writer: &mut PassWriter<'_>) -> Result<()> {
    let mut stmt =
        source.prepare(EPISODES_SQL).context("failed to prepare podcast episodes query")?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let Some(uuid) = native_key(row.get(0)?) else {
            writer.drop_row();
            continue;
        };
        let duration_seconds = writer.non_negative("duration_seconds", row.get(4)?);
        let played_seconds = writer.non_negative("played_seconds", row.get(5)?);

        writer.offer(&Record::PodcastEpisode(PodcastEpisode {
            record_hash: uuid,
            episode_title: row.get(1)?,
            show_title: row.get(2)?,
            show_uuid: row.get(3)?,
            duration_seconds,
            played_seconds,
            play_count: row.get(6)?,
            last_played_at: apple_seconds_to_unix(row.get(7)?),
            published_at: apple_seconds_to_unix(row.get(8)?),
        }))?;
    }
    Ok(())
}
