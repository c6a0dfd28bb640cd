// Per-page version history: a timestamped chain of snapshots and patches.
//
// Entry 0 is always a full snapshot. Later entries are patches against the
// previous entry, with a fresh snapshot every SNAPSHOT_INTERVAL entries so a
// point-in-time lookup never replays more than that many patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::{apply_patch_ops, diff_to_patch_ops, PatchError, TextPatchOp};

pub const SNAPSHOT_INTERVAL: usize = 32;

const HISTORY_FORMAT: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("no version exists at or before {0}")]
    NoSuchVersion(DateTime<Utc>),

    #[error("history timestamps must increase: {attempted} is not after {previous}")]
    NonMonotonic { previous: DateTime<Utc>, attempted: DateTime<Utc> },

    #[error("history does not start with a snapshot")]
    MissingBaseSnapshot,

    #[error("unsupported history format {0}")]
    UnsupportedFormat(u32),

    #[error("history patch failed to apply: {0}")]
    Patch(#[from] PatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Revision {
    Snapshot { text: String },
    Patch { ops: Vec<TextPatchOp> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub revision: Revision,
}

/// Persisted form. Decoding replays the chain so a corrupt history is
/// rejected at the storage boundary rather than at first use.
#[derive(Serialize, Deserialize)]
pub struct HistoryRepr {
    pub format: u32,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HistoryRepr", into = "HistoryRepr")]
pub struct VersionedText {
    entries: Vec<HistoryEntry>,
    head: String,
}

impl VersionedText {
    /// Start a chain with `content` as its base snapshot.
    pub fn new(content: &str, at: DateTime<Utc>) -> Self {
        Self {
            entries: vec![HistoryEntry {
                at,
                revision: Revision::Snapshot { text: content.to_owned() },
            }],
            head: content.to_owned(),
        }
    }

    /// Append `content` if it differs from the latest entry.
    ///
    /// Returns `false` when the content is unchanged and nothing was appended.
    pub fn update(&mut self, content: &str, at: DateTime<Utc>) -> Result<bool, HistoryError> {
        let Some(previous) = self.latest_at() else {
            *self = Self::new(content, at);
            return Ok(true);
        };
        if content == self.head {
            return Ok(false);
        }
        if at <= previous {
            return Err(HistoryError::NonMonotonic { previous, attempted: at });
        }

        let revision = if self.entries.len() % SNAPSHOT_INTERVAL == 0 {
            Revision::Snapshot { text: content.to_owned() }
        } else {
            Revision::Patch { ops: diff_to_patch_ops(&self.head, content) }
        };
        self.entries.push(HistoryEntry { at, revision });
        self.head = content.to_owned();
        Ok(true)
    }

    /// Text of the latest entry.
    pub fn current(&self) -> &str {
        &self.head
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.entries.iter().map(|entry| entry.at).collect()
    }

    pub fn latest_at(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|entry| entry.at)
    }

    /// Content of the latest entry whose timestamp is at or before `at`.
    pub fn get_as_of(&self, at: DateTime<Utc>) -> Result<String, HistoryError> {
        let upto = self.entries.partition_point(|entry| entry.at <= at);
        if upto == 0 {
            return Err(HistoryError::NoSuchVersion(at));
        }
        let target = upto - 1;

        let base = self.entries[..=target]
            .iter()
            .rposition(|entry| matches!(entry.revision, Revision::Snapshot { .. }))
            .ok_or(HistoryError::MissingBaseSnapshot)?;

        let mut text = String::new();
        for entry in &self.entries[base..=target] {
            text = apply_revision(&text, &entry.revision)?;
        }
        Ok(text)
    }

    /// Every entry's full text, oldest first.
    pub fn replay(&self) -> Result<Vec<String>, HistoryError> {
        let mut texts = Vec::with_capacity(self.entries.len());
        let mut text = String::new();
        for entry in &self.entries {
            text = apply_revision(&text, &entry.revision)?;
            texts.push(text.clone());
        }
        Ok(texts)
    }
}

fn apply_revision(previous: &str, revision: &Revision) -> Result<String, HistoryError> {
    match revision {
        Revision::Snapshot { text } => Ok(text.clone()),
        Revision::Patch { ops } => Ok(apply_patch_ops(previous, ops)?),
    }
}

impl TryFrom<HistoryRepr> for VersionedText {
    type Error = HistoryError;

    fn try_from(repr: HistoryRepr) -> Result<Self, Self::Error> {
        if repr.format != HISTORY_FORMAT {
            return Err(HistoryError::UnsupportedFormat(repr.format));
        }

        let mut head = String::new();
        let mut previous: Option<DateTime<Utc>> = None;
        for (idx, entry) in repr.entries.iter().enumerate() {
            if idx == 0 && !matches!(entry.revision, Revision::Snapshot { .. }) {
                return Err(HistoryError::MissingBaseSnapshot);
            }
            if let Some(previous) = previous {
                if entry.at <= previous {
                    return Err(HistoryError::NonMonotonic { previous, attempted: entry.at });
                }
            }
            head = apply_revision(&head, &entry.revision)?;
            previous = Some(entry.at);
        }

        Ok(Self { entries: repr.entries, head })
    }
}

impl From<VersionedText> for HistoryRepr {
    fn from(history: VersionedText) -> Self {
        Self { format: HISTORY_FORMAT, entries: history.entries }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp")
            + Duration::minutes(minute)
    }

    #[test]
    fn new_history_has_one_snapshot() {
        let history = VersionedText::new("hello", t(0));
        assert_eq!(history.len(), 1);
        assert_eq!(history.current(), "hello");
        assert!(matches!(history.entries()[0].revision, Revision::Snapshot { .. }));
    }

    #[test]
    fn unchanged_content_is_not_appended() {
        let mut history = VersionedText::new("hello", t(0));
        assert!(!history.update("hello", t(1)).unwrap());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn changed_content_is_stored_as_patch() {
        let mut history = VersionedText::new("hello", t(0));
        assert!(history.update("hello world", t(1)).unwrap());
        assert_eq!(history.len(), 2);
        assert_eq!(history.current(), "hello world");
        assert!(matches!(history.entries()[1].revision, Revision::Patch { .. }));
    }

    #[test]
    fn rejects_non_increasing_timestamps() {
        let mut history = VersionedText::new("a", t(5));
        let err = history.update("b", t(5)).unwrap_err();
        assert_eq!(err, HistoryError::NonMonotonic { previous: t(5), attempted: t(5) });
    }

    #[test]
    fn get_as_of_returns_latest_entry_not_after_target() {
        let mut history = VersionedText::new("one", t(0));
        history.update("two", t(10)).unwrap();
        history.update("three", t(20)).unwrap();

        assert_eq!(history.get_as_of(t(0)).unwrap(), "one");
        assert_eq!(history.get_as_of(t(9)).unwrap(), "one");
        assert_eq!(history.get_as_of(t(10)).unwrap(), "two");
        assert_eq!(history.get_as_of(t(15)).unwrap(), "two");
        assert_eq!(history.get_as_of(t(500)).unwrap(), "three");
    }

    #[test]
    fn get_as_of_before_first_entry_fails() {
        let history = VersionedText::new("one", t(10));
        assert_eq!(history.get_as_of(t(9)), Err(HistoryError::NoSuchVersion(t(9))));
    }

    #[test]
    fn get_as_of_on_empty_history_fails() {
        let history = VersionedText::default();
        assert!(matches!(history.get_as_of(t(0)), Err(HistoryError::NoSuchVersion(_))));
    }

    #[test]
    fn periodic_snapshots_bound_replay() {
        let mut history = VersionedText::new("v0", t(0));
        for i in 1..=(SNAPSHOT_INTERVAL as i64 + 3) {
            history.update(&format!("v{i}"), t(i)).unwrap();
        }

        assert!(matches!(
            history.entries()[SNAPSHOT_INTERVAL].revision,
            Revision::Snapshot { .. }
        ));
        let last = SNAPSHOT_INTERVAL as i64 + 3;
        assert_eq!(history.get_as_of(t(last)).unwrap(), format!("v{last}"));
        assert_eq!(history.get_as_of(t(7)).unwrap(), "v7");
    }

    #[test]
    fn json_round_trip_replays_head() {
        let mut history = VersionedText::new("alpha", t(0));
        history.update("alpha beta", t(1)).unwrap();
        history.update("beta", t(2)).unwrap();

        let json = serde_json::to_string(&history).unwrap();
        let decoded: VersionedText = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, history);
        assert_eq!(decoded.current(), "beta");
    }

    #[test]
    fn decoding_rejects_chain_without_base_snapshot() {
        let json = format!(
            r#"{{"format":1,"entries":[{{"at":"{}","revision":{{"kind":"patch","ops":[]}}}}]}}"#,
            t(0).to_rfc3339()
        );
        let err = serde_json::from_str::<VersionedText>(&json).unwrap_err();
        assert!(err.to_string().contains("snapshot"), "unexpected error: {err}");
    }

    #[test]
    fn decoding_rejects_unknown_format() {
        let err = serde_json::from_str::<VersionedText>(r#"{"format":9,"entries":[]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unsupported history format 9"));
    }
}
