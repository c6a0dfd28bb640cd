// folio-common: page, domain and history types shared by the Folio crates.

pub mod diff;
pub mod history;
pub mod ids;
pub mod similarity;
pub mod slug;
pub mod types;

pub use history::{HistoryError, VersionedText};
pub use ids::PageId;
pub use types::{DomainInfo, DomainOptions, Page, PageDraft};
