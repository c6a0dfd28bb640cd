pub mod fts;

pub use fts::{match_expression, PageIndex, SearchHit};
