//! Core data model: harvested records and search queries.

mod post;
mod query;

pub use post::{Media, MediaAttachment, MediaKind, PostRecord, UNKNOWN_AUTHOR, UNKNOWN_HANDLE};
pub use query::SearchQuery;
