//! Connected-time aggregation: interval union followed by a split at local midnight.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Longest single connection event accepted for aggregation. Longer events are
/// corrupt end times and are left out of [`daily_connected_time`].
pub const MAX_EVENT_SECONDS: i64 = 31 * 86_400;

/// Half-open `[start, end)` span in Unix seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.end <= self.start
    }

    #[must_use]
    pub fn seconds(self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start
        }
    }

    /// Non-empty and no longer than [`MAX_EVENT_SECONDS`].
    #[must_use]
    pub fn is_plausible_event(self) -> bool {
        !self.is_empty() && self.seconds() <= MAX_EVENT_SECONDS
    }
}

/// One raw connection event as read from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInterval {
    pub device: String,
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyConnection {
    pub day: NaiveDate,
    pub device: String,
    pub total_seconds: i64,
    pub connection_count: u32,
}

/// Union of the input intervals as a minimal, sorted, non-overlapping set.
///
/// Empty or inverted intervals are discarded first. Touching intervals
/// (`next.start == current.end`) are merged.
#[must_use]
pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.retain(|interval| !interval.is_empty());
    intervals.sort_unstable();

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(current) if interval.start <= current.end => {
                current.end = current.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Split one interval at local midnight boundaries of `tz`.
///
/// Returns `(local day, seconds within that day)` in day order. The seconds sum to
/// the interval's length. One entry is produced per local day touched, so callers
/// bound the length first.
#[must_use]
pub fn split_by_day<Tz: TimeZone>(interval: Interval, tz: &Tz) -> Vec<(NaiveDate, i64)> {
    let mut segments = Vec::new();
    if interval.is_empty() {
        return segments;
    }
    let Some(mut day) = local_day(tz, interval.start) else {
        return segments;
    };

    let mut cursor = interval.start;
    loop {
        let next_day = day.succ_opt();
        let boundary = next_day
            .and_then(|next| local_midnight(tz, next))
            .map_or(interval.end, |midnight| midnight.min(interval.end));

        if boundary > cursor {
            segments.push((day, boundary - cursor));
            cursor = boundary;
        }
        match next_day {
            Some(next) if cursor < interval.end => day = next,
            _ => break,
        }
    }
    segments
}

/// Per-day, per-device connected time.
///
/// Intervals are grouped by device and merged before splitting, so overlapping
/// events are counted once. Each merged interval adds one connection to the day it
/// starts on only. Events longer than [`MAX_EVENT_SECONDS`] are skipped; count
/// them with [`overlong_events`]. Output is sorted by `(day, device)`.
pub fn daily_connected_time<Tz, I>(events: I, tz: &Tz) -> Vec<DailyConnection>
where
    Tz: TimeZone,
    I: IntoIterator<Item = DeviceInterval>,
{
    let mut by_device: BTreeMap<String, Vec<Interval>> = BTreeMap::new();
    for event in events {
        let interval = Interval::new(event.start, event.end);
        if !interval.is_plausible_event() {
            continue;
        }
        by_device.entry(event.device).or_default().push(interval);
    }

    let mut totals: BTreeMap<(NaiveDate, String), (i64, u32)> = BTreeMap::new();
    for (device, intervals) in by_device {
        for merged in merge_intervals(intervals) {
            for (index, (day, seconds)) in split_by_day(merged, tz).into_iter().enumerate() {
                let entry = totals.entry((day, device.clone())).or_insert((0, 0));
                entry.0 += seconds;
                if index == 0 {
                    entry.1 += 1;
                }
            }
        }
    }

    totals
        .into_iter()
        .map(|((day, device), (total_seconds, connection_count))| DailyConnection {
            day,
            device,
            total_seconds,
            connection_count,
        })
        .collect()
}

/// Number of events [`daily_connected_time`] skips for exceeding [`MAX_EVENT_SECONDS`].
#[must_use]
pub fn overlong_events(events: &[DeviceInterval]) -> usize {
    events
        .iter()
        .filter(|event| Interval::new(event.start, event.end).seconds() > MAX_EVENT_SECONDS)
        .count()
}

fn local_day<Tz: TimeZone>(tz: &Tz, at: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(at, 0).map(|utc| utc.with_timezone(tz).date_naive())
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> Option<i64> {
    let midnight = day.and_hms_opt(0, 0, 0)?;
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => Some(at.timestamp()),
        // Midnight falls inside a DST gap: the day starts at the first valid minute.
        LocalResult::None => (1..=180).find_map(|minutes| {
            tz.from_local_datetime(&(midnight + Duration::minutes(minutes)))
                .earliest()
                .map(|at| at.timestamp())
        }),
    }
}
