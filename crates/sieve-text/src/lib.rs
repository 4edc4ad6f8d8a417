//! sieve-text
//!
//! Lexical leaves: a tantivy-backed BM25 retriever and an unscored keyword
//! matcher. Both implement `sieve_core::Stage`.
pub mod analysis;
pub mod keyword;
pub mod lexical;

pub use keyword::KeywordRetriever;
pub use lexical::LexicalRetriever;
