mod hashing;
mod intervals;
mod timestamp;

use serde::{Deserialize, Serialize};

pub use hashing::{native_key, record_hash, FIELD_DELIMITER, HASH_PREFIX_BYTES};
pub use intervals::{
    daily_connected_time, merge_intervals, overlong_events, split_by_day, DailyConnection,
    DeviceInterval, Interval, MAX_EVENT_SECONDS,
};
pub use timestamp::{
    apple_nanos_to_unix, apple_seconds_to_unix, now_unix, webkit_micros_to_unix,
    APPLE_EPOCH_OFFSET_SECS, WEBKIT_EPOCH_OFFSET_SECS,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One row of the extraction run ledger.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExtractionRun {
    pub id: i64,
    pub source: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub records_added: u64,
    pub records_skipped: u64,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

/// Per-run tallies returned by a collector.
///
/// `dropped` rows never reached the store; `anomalies` were stored but flagged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExtractCounts {
    pub added: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub anomalies: u64,
}

impl ExtractCounts {
    #[must_use]
    pub fn total_seen(self) -> u64 {
        self.added + self.skipped + self.dropped
    }
}

impl std::ops::AddAssign for ExtractCounts {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.skipped += other.skipped;
        self.dropped += other.dropped;
        self.anomalies += other.anomalies;
    }
}

/// Outcome of measuring `end - start` for an interval-shaped record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanDuration {
    /// `end > start`.
    Positive(i64),
    /// No end, or a zero-length span.
    Absent,
    /// `end < start`; a source-side inconsistency.
    Inverted(i64),
}

impl SpanDuration {
    #[must_use]
    pub fn measure(start: i64, end: Option<i64>) -> Self {
        match end {
            Some(end) if end > start => Self::Positive(end - start),
            Some(end) if end < start => Self::Inverted(end - start),
            _ => Self::Absent,
        }
    }

    /// Stored duration. Inverted spans are never persisted as negative values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds(self) -> Option<f64> {
        match self {
            Self::Positive(seconds) => Some(seconds as f64),
            Self::Absent | Self::Inverted(_) => None,
        }
    }

    #[must_use]
    pub fn is_anomaly(self) -> bool {
        matches!(self, Self::Inverted(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    AppUsage,
    WebVisit,
    BluetoothConnection,
    Notification,
    Message,
    Chat,
    Contact,
    PodcastEpisode,
    PodcastShow,
    Intent,
    DisplayState,
}

impl RecordKind {
    pub const ALL: [Self; 11] = [
        Self::AppUsage,
        Self::WebVisit,
        Self::BluetoothConnection,
        Self::Notification,
        Self::Message,
        Self::Chat,
        Self::Contact,
        Self::PodcastEpisode,
        Self::PodcastShow,
        Self::Intent,
        Self::DisplayState,
    ];

    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            Self::AppUsage => "app_usage",
            Self::WebVisit => "web_visits",
            Self::BluetoothConnection => "bluetooth_connections",
            Self::Notification => "notifications",
            Self::Message => "messages",
            Self::Chat => "chats",
            Self::Contact => "contacts",
            Self::PodcastEpisode => "podcast_episodes",
            Self::PodcastShow => "podcast_shows",
            Self::Intent => "intents",
            Self::DisplayState => "display_state",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppUsageSession {
    pub record_hash: String,
    pub bundle_id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub device_id: Option<String>,
    pub device_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebVisit {
    pub record_hash: String,
    pub url: String,
    pub title: Option<String>,
    pub visit_time: i64,
    pub visit_duration_seconds: Option<f64>,
    pub transition_type: Option<String>,
    pub browser: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BluetoothConnection {
    pub record_hash: String,
    pub device_name: Option<String>,
    pub device_address: Option<String>,
    pub device_type: Option<i64>,
    pub product_id: Option<i64>,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub record_hash: String,
    pub bundle_id: String,
    pub event_type: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub record_hash: String,
    pub text: Option<String>,
    pub is_from_me: Option<bool>,
    pub timestamp: i64,
    pub date_read: Option<i64>,
    pub date_delivered: Option<i64>,
    pub handle_id: Option<String>,
    pub chat_id: Option<String>,
    pub service: Option<String>,
    pub has_attachment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub record_hash: String,
    pub chat_identifier: Option<String>,
    pub display_name: Option<String>,
    pub participant_count: Option<i64>,
    pub last_message_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub record_hash: String,
    pub handle_id: String,
    pub display_name: Option<String>,
    pub service: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodcastEpisode {
    pub record_hash: String,
    pub episode_title: Option<String>,
    pub show_title: Option<String>,
    pub show_uuid: Option<String>,
    pub duration_seconds: Option<f64>,
    pub played_seconds: Option<f64>,
    pub play_count: Option<i64>,
    pub last_played_at: Option<i64>,
    pub published_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodcastShow {
    pub record_hash: String,
    pub title: String,
    pub author: Option<String>,
    pub feed_url: Option<String>,
    pub subscribed_at: Option<i64>,
    pub episode_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Intent {
    pub record_hash: String,
    pub intent_class: Option<String>,
    pub intent_verb: Option<String>,
    pub bundle_id: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayStateEvent {
    pub record_hash: String,
    pub is_backlit: Option<bool>,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub duration_seconds: Option<f64>,
}

/// A normalized record bound for one table of the unified store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    AppUsage(AppUsageSession),
    WebVisit(WebVisit),
    BluetoothConnection(BluetoothConnection),
    Notification(Notification),
    Message(Message),
    Chat(Chat),
    Contact(Contact),
    PodcastEpisode(PodcastEpisode),
    PodcastShow(PodcastShow),
    Intent(Intent),
    DisplayState(DisplayStateEvent),
}

impl Record {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::AppUsage(_) => RecordKind::AppUsage,
            Self::WebVisit(_) => RecordKind::WebVisit,
            Self::BluetoothConnection(_) => RecordKind::BluetoothConnection,
            Self::Notification(_) => RecordKind::Notification,
            Self::Message(_) => RecordKind::Message,
            Self::Chat(_) => RecordKind::Chat,
            Self::Contact(_) => RecordKind::Contact,
            Self::PodcastEpisode(_) => RecordKind::PodcastEpisode,
            Self::PodcastShow(_) => RecordKind::PodcastShow,
            Self::Intent(_) => RecordKind::Intent,
            Self::DisplayState(_) => RecordKind::DisplayState,
        }
    }

    #[must_use]
    pub fn record_hash(&self) -> &str {
        match self {
            Self::AppUsage(r) => &r.record_hash,
            Self::WebVisit(r) => &r.record_hash,
            Self::BluetoothConnection(r) => &r.record_hash,
            Self::Notification(r) => &r.record_hash,
            Self::Message(r) => &r.record_hash,
            Self::Chat(r) => &r.record_hash,
            Self::Contact(r) => &r.record_hash,
            Self::PodcastEpisode(r) => &r.record_hash,
            Self::PodcastShow(r) => &r.record_hash,
            Self::Intent(r) => &r.record_hash,
            Self::DisplayState(r) => &r.record_hash,
        }
    }

    /// Check the invariants every stored record must satisfy.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] when the dedup key or a required text field
    /// is blank, or when a duration is negative or not finite.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.record_hash().trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "{} record_hash MUST be non-empty",
                self.kind().table_name()
            )));
        }

        let (required, durations): (Option<(&str, &str)>, Vec<(&str, Option<f64>)>) = match self {
            Self::AppUsage(r) => (
                Some(("bundle_id", r.bundle_id.as_str())),
                vec![("duration_seconds", r.duration_seconds)],
            ),
            Self::WebVisit(r) => (
                Some(("url", r.url.as_str())),
                vec![("visit_duration_seconds", r.visit_duration_seconds)],
            ),
            Self::BluetoothConnection(r) => (None, vec![("duration_seconds", r.duration_seconds)]),
            Self::Notification(r) => (Some(("bundle_id", r.bundle_id.as_str())), vec![]),
            Self::Contact(r) => (Some(("handle_id", r.handle_id.as_str())), vec![]),
            Self::PodcastShow(r) => (Some(("title", r.title.as_str())), vec![]),
            Self::PodcastEpisode(r) => (
                None,
                vec![("duration_seconds", r.duration_seconds), ("played_seconds", r.played_seconds)],
            ),
            Self::DisplayState(r) => (None, vec![("duration_seconds", r.duration_seconds)]),
            Self::Message(_) | Self::Chat(_) | Self::Intent(_) => (None, vec![]),
        };

        if let Some((field, value)) = required {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "{}.{field} MUST be non-empty",
                    self.kind().table_name()
                )));
            }
        }

        for (field, value) in durations {
            if let Some(seconds) = value {
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(CoreError::Validation(format!(
                        "{}.{field} MUST be a finite, non-negative number of seconds (got {seconds})",
                        self.kind().table_name()
                    )));
                }
            }
        }

        Ok(())
    }
}
