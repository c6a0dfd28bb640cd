// Slug and domain-name canonicalization: NFKC, trim, lowercase, 256 char max.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum allowed slug length in characters.
const MAX_SLUG_CHARS: usize = 256;

/// Maximum allowed domain name length in characters.
const MAX_DOMAIN_CHARS: usize = 64;

/// Name of the always-present anonymous domain.
pub const PUBLIC_DOMAIN: &str = "public";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug exceeds maximum length of {MAX_SLUG_CHARS} characters")]
    TooLong,

    #[error("slug contains a path separator")]
    Separator,

    #[error("slug contains null byte")]
    NullByte,

    #[error("domain name is empty")]
    EmptyDomain,

    #[error("domain name exceeds maximum length of {MAX_DOMAIN_CHARS} characters")]
    DomainTooLong,

    #[error("domain name contains invalid character {0:?}")]
    DomainCharacter(char),
}

/// Normalize a user-chosen page slug for storage and lookup.
///
/// Rules:
/// - Apply Unicode NFKC normalization
/// - Trim surrounding whitespace
/// - Lowercase (so a slug never collides with the uppercase page id format)
/// - Reject `/` and null bytes
/// - Enforce max 256 characters
///
/// An empty slug is allowed; untitled pages are addressed by id.
pub fn normalize_slug(input: &str) -> Result<String, SlugError> {
    if input.contains('\0') {
        return Err(SlugError::NullByte);
    }

    let normalized: String = input.nfkc().collect::<String>().trim().to_lowercase();
    if normalized.contains('/') {
        return Err(SlugError::Separator);
    }
    if normalized.chars().count() > MAX_SLUG_CHARS {
        return Err(SlugError::TooLong);
    }

    Ok(normalized)
}

/// Normalize a domain name. Domain names are case-insensitive and appear in
/// URLs, so they are limited to ASCII alphanumerics, `-` and `_`.
///
/// An empty input maps to the public domain.
pub fn normalize_domain(input: &str) -> Result<String, SlugError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(PUBLIC_DOMAIN.to_owned());
    }
    if trimmed.chars().count() > MAX_DOMAIN_CHARS {
        return Err(SlugError::DomainTooLong);
    }
    if let Some(bad) =
        trimmed.chars().find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
    {
        return Err(SlugError::DomainCharacter(bad));
    }

    Ok(trimmed.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_trims() {
        assert_eq!(normalize_slug("  Meeting Notes ").unwrap(), "meeting notes");
    }

    #[test]
    fn nfkc_folds_compatibility_forms() {
        // U+FB01 LATIN SMALL LIGATURE FI
        assert_eq!(normalize_slug("\u{FB01}le").unwrap(), "file");
    }

    #[test]
    fn empty_slug_is_allowed() {
        assert_eq!(normalize_slug("   ").unwrap(), "");
    }

    #[test]
    fn rejects_separator_and_null() {
        assert_eq!(normalize_slug("a/b"), Err(SlugError::Separator));
        assert_eq!(normalize_slug("a\0b"), Err(SlugError::NullByte));
    }

    #[test]
    fn rejects_overlong_slug() {
        let long = "x".repeat(MAX_SLUG_CHARS + 1);
        assert_eq!(normalize_slug(&long), Err(SlugError::TooLong));
    }

    #[test]
    fn domain_names_are_case_insensitive() {
        assert_eq!(normalize_domain("Team").unwrap(), "team");
        assert_eq!(normalize_domain(" my_team-2 ").unwrap(), "my_team-2");
    }

    #[test]
    fn empty_domain_means_public() {
        assert_eq!(normalize_domain("").unwrap(), PUBLIC_DOMAIN);
    }

    #[test]
    fn domain_rejects_url_unsafe_characters() {
        assert_eq!(normalize_domain("a b"), Err(SlugError::DomainCharacter(' ')));
        assert_eq!(normalize_domain("a/b"), Err(SlugError::DomainCharacter('/')));
    }
}
