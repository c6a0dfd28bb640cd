use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::VersionedText;
use crate::ids::PageId;

// ── Pages ──────────────────────────────────────────────────────────

/// A stored page. `data` always equals `history.current()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub slug: String,
    pub domain: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub data: String,
    pub history: VersionedText,
    pub views: i64,
}

impl Page {
    /// Empty content marks a page as deleted until compaction removes it.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A draft that would write `data` back to this page.
    pub fn draft(&self, data: impl Into<String>) -> PageDraft {
        PageDraft {
            id: self.id.clone(),
            slug: self.slug.clone(),
            domain: self.domain.clone(),
            data: data.into(),
        }
    }
}

/// Input to a save. The store fills in timestamps, history and views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDraft {
    pub id: PageId,
    pub slug: String,
    /// Empty means the public domain.
    #[serde(default)]
    pub domain: String,
    pub data: String,
}

impl PageDraft {
    pub fn new(
        id: PageId,
        slug: impl Into<String>,
        domain: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self { id, slug: slug.into(), domain: domain.into(), data: data.into() }
    }
}

// ── Domains ────────────────────────────────────────────────────────

/// Per-domain display settings, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainOptions {
    pub most_edited: bool,
    pub most_recent: bool,
    pub last_created: bool,
    pub show_search: bool,
    pub css: String,
    pub custom_intro: String,
    pub custom_title: String,
}

impl Default for DomainOptions {
    fn default() -> Self {
        Self {
            most_edited: true,
            most_recent: true,
            last_created: false,
            show_search: true,
            css: String::new(),
            custom_intro: String::new(),
            custom_title: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub id: i64,
    pub name: String,
    pub is_public: bool,
    pub options: DomainOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fill_missing_fields_with_defaults() {
        let options: DomainOptions = serde_json::from_str(r#"{"css":"body{}"}"#).unwrap();
        assert_eq!(options.css, "body{}");
        assert!(options.most_edited);
        assert!(options.show_search);
        assert!(!options.last_created);
    }

    #[test]
    fn options_ignore_unknown_fields() {
        let options: DomainOptions =
            serde_json::from_str(r#"{"legacy_flag":true,"custom_title":"Team"}"#).unwrap();
        assert_eq!(options.custom_title, "Team");
    }

    #[test]
    fn draft_keeps_identity_and_replaces_data() {
        let now = Utc::now();
        let page = Page {
            id: PageId::generate(),
            slug: "notes".into(),
            domain: "team".into(),
            created: now,
            modified: now,
            data: "old".into(),
            history: VersionedText::new("old", now),
            views: 3,
        };

        let draft = page.draft("new");
        assert_eq!(draft.id, page.id);
        assert_eq!(draft.slug, "notes");
        assert_eq!(draft.domain, "team");
        assert_eq!(draft.data, "new");
        assert!(!page.is_empty());
    }
}
