use thiserror::Error;

/// Failures surfaced by stages and combinators.
///
/// Combinators never wrap an error coming out of a child; whatever a leaf
/// returns reaches the caller as is, with the failing stage named in it.
#[derive(Debug, Error)]
pub enum Error {
    /// A document lacks the key field, or an item lacks a field the stage needs.
    #[error("schema error in stage '{stage}': {detail}")]
    Schema { stage: String, detail: String },

    /// The leaf's own backend (index, model, remote table) failed.
    #[error("stage '{stage}' failed: {source}")]
    Backend {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("stage '{stage}' returned {actual} result lists for {expected} queries")]
    BatchMismatch { stage: String, expected: usize, actual: usize },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn schema(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Schema { stage: stage.into(), detail: detail.into() }
    }

    pub fn backend(stage: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Backend { stage: stage.into(), source: source.into() }
    }

    /// Name of the stage that raised the error, when there is one.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Schema { stage, .. } | Self::Backend { stage, .. } | Self::BatchMismatch { stage, .. } => Some(stage),
            Self::InvalidQuery(_) | Self::InvalidConfig(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
