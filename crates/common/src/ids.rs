// Page identifiers: fixed-length, uppercase base32, always led by a letter.
//
// Slugs are lowercased during normalization, so a stored slug can never
// parse as a page id. Typed input is still ambiguous: "NOTESABCDEFGHIJK"
// may be an id or a slug typed in capitals, so lookups that miss by id
// retry by slug.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of characters in every page id.
pub const PAGE_ID_LEN: usize = 16;

const LEADING_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const BODY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageIdError {
    #[error("page id must be {PAGE_ID_LEN} characters, got {0}")]
    Length(usize),

    #[error("page id must start with an uppercase letter")]
    LeadingCharacter,

    #[error("page id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Opaque, globally unique page identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageId(String);

impl PageId {
    /// Mint a fresh random id.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut id = String::with_capacity(PAGE_ID_LEN);
        id.push(char::from(LEADING_ALPHABET[rng.gen_range(0..LEADING_ALPHABET.len())]));
        for _ in 1..PAGE_ID_LEN {
            id.push(char::from(BODY_ALPHABET[rng.gen_range(0..BODY_ALPHABET.len())]));
        }
        Self(id)
    }

    /// Strict format check. Never touches storage.
    pub fn parse(value: &str) -> Result<Self, PageIdError> {
        let len = value.chars().count();
        if len != PAGE_ID_LEN {
            return Err(PageIdError::Length(len));
        }

        let mut chars = value.chars();
        match chars.next() {
            Some(first) if first.is_ascii_uppercase() => {}
            _ => return Err(PageIdError::LeadingCharacter),
        }
        if let Some(bad) = chars.find(|ch| !is_body_char(*ch)) {
            return Err(PageIdError::InvalidCharacter(bad));
        }

        Ok(Self(value.to_owned()))
    }

    /// True when `value` has the page id format.
    pub fn is_page_id(value: &str) -> bool {
        Self::parse(value).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_body_char(ch: char) -> bool {
    ch.is_ascii_uppercase() || ('2'..='7').contains(&ch)
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PageId {
    type Err = PageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PageId {
    type Error = PageIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PageId> for String {
    fn from(id: PageId) -> Self {
        id.0
    }
}

impl AsRef<str> for PageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slug::normalize_slug;

    #[test]
    fn generated_ids_parse() {
        for _ in 0..200 {
            let id = PageId::generate();
            assert_eq!(id.as_str().len(), PAGE_ID_LEN);
            assert_eq!(PageId::parse(id.as_str()), Ok(id));
        }
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = PageId::generate();
        let b = PageId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(PageId::parse("ABC"), Err(PageIdError::Length(3)));
        assert_eq!(PageId::parse(""), Err(PageIdError::Length(0)));
    }

    #[test]
    fn rejects_leading_digit() {
        assert_eq!(PageId::parse("2BCDEFGHJKMNPQRS"), Err(PageIdError::LeadingCharacter));
    }

    #[test]
    fn rejects_lowercase_body() {
        assert_eq!(PageId::parse("Abcdefghjkmnpqrs"), Err(PageIdError::InvalidCharacter('b')));
    }

    #[test]
    fn rejects_digits_outside_base32() {
        assert_eq!(PageId::parse("ABCDEFGHJKMNPQR8"), Err(PageIdError::InvalidCharacter('8')));
    }

    #[test]
    fn normalized_slugs_never_look_like_ids() {
        let id = PageId::generate();
        let slug = normalize_slug(id.as_str()).expect("id text is a valid slug input");
        assert!(!PageId::is_page_id(&slug));
    }

    #[test]
    fn serde_round_trip_validates() {
        let id = PageId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let back: PageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        let bad: Result<PageId, _> = serde_json::from_str("\"not-an-id\"");
        assert!(bad.is_err());
    }
}
