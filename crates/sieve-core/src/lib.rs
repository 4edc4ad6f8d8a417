//! sieve-core
//!
//! Data model and contracts shared by every retrieval stage: documents keyed
//! by a configured field, scored items, key-unique result lists, the `Stage`
//! and `Embedder` traits, the error taxonomy, and config/corpus loading.

pub mod config;
pub mod error;
pub mod loader;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Embedder, Stage};
pub use types::{Document, Key, Normalization, Query, QueryInput, Ranked, ResultList, ScoredItem, SIMILARITY_FIELD};
