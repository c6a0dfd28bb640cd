// Store time source. Every reading is strictly later than the previous one,
// so history entries and render timestamps never tie.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, SecondsFormat, Utc};

#[derive(Debug)]
pub struct Clock {
    source: Source,
    offset_micros: AtomicI64,
    last_micros: AtomicI64,
}

#[derive(Debug)]
enum Source {
    System,
    Manual(i64),
}

impl Clock {
    pub fn system() -> Self {
        Self::with_source(Source::System)
    }

    /// A clock frozen at `start` that only moves via [`Clock::advance`]
    /// (plus one microsecond per reading).
    pub fn manual(start: DateTime<Utc>) -> Self {
        Self::with_source(Source::Manual(start.timestamp_micros()))
    }

    fn with_source(source: Source) -> Self {
        Self { source, offset_micros: AtomicI64::new(0), last_micros: AtomicI64::new(i64::MIN) }
    }

    /// Shift all later readings forward by `by`.
    pub fn advance(&self, by: Duration) {
        let micros = by.num_microseconds().unwrap_or(i64::MAX);
        self.offset_micros.fetch_add(micros, Ordering::SeqCst);
    }

    pub fn now(&self) -> DateTime<Utc> {
        let reading = self.raw_micros().saturating_add(self.offset_micros.load(Ordering::SeqCst));
        let previous = self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(reading.max(last.saturating_add(1)))
            })
            .unwrap_or(reading);
        let issued = reading.max(previous.saturating_add(1));
        DateTime::from_timestamp_micros(issued).unwrap_or_else(Utc::now)
    }

    /// Make every later reading strictly after `at`, whatever the
    /// underlying source says.
    pub fn observe(&self, at: DateTime<Utc>) {
        self.last_micros.fetch_max(at.timestamp_micros(), Ordering::SeqCst);
    }

    fn raw_micros(&self) -> i64 {
        match self.source {
            Source::System => Utc::now().timestamp_micros(),
            Source::Manual(start) => start,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

/// Fixed-width RFC 3339 text, so SQL string comparison orders timestamps.
pub fn encode_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    raw.parse::<DateTime<Utc>>()
}
