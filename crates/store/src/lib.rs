// folio-store: SQLite-backed wiki storage with full-text search, page
// history, domain auth, blobs, a render cache and periodic compaction.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod runtime;
pub mod search;
pub mod store;
pub mod tasks;

pub use clock::Clock;
pub use config::{ConfigError, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use store::{
    blob_id_for, Blob, DomainCredentials, DumpReport, PageLookup, PurgeReport, SearchResult,
    SessionKeyOwner, Store, StoreSettings,
};
pub use tasks::{Task, TaskQueue};
