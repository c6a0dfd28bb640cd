use folio_common::history::HistoryError;
use folio_common::slug::SlugError;
use folio_common::PageId;
use thiserror::Error;

/// Errors surfaced by [`crate::Store`] operations.
///
/// `Storage` wraps SQL and I/O failures; its context chain names the stage
/// that failed (for example "failed to update page index").
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid session key")]
    InvalidKey,

    #[error("domain `{0}` does not exist")]
    DomainNotFound(String),

    #[error("page {id} belongs to domain `{existing}`")]
    DomainMismatch { id: PageId, existing: String },

    #[error("the public domain cannot be {0}")]
    PublicDomain(&'static str),

    #[error("cached render is stale")]
    Stale,

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Slug(#[from] SlugError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
