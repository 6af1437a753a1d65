//! Error types for shard extraction, search and aggregation.
//!
//! Only construction errors and aggregation-consistency errors surface as
//! [`SearchError`]. Failures of a single (start, trajectory) evaluation are
//! recorded inside its [`SearchData`](crate::search::SearchData) instead.

use thiserror::Error;

use crate::engine::EngineError;

/// Result type alias for crate operations.
pub type SearchResult<T> = Result<T, SearchError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum SearchError {
    // ========== Construction Errors ==========
    /// Constant name not present in the catalog.
    #[error("Unknown constant: {0}")]
    UnknownConstant(String),

    /// Position or form does not match the field's lattice dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The matrix field reported a singular structure that cannot be turned
    /// into a hyperplane arrangement.
    #[error("Malformed matrix field: {0}")]
    MalformedField(String),

    /// A shard handle outlived the extractor that created it.
    #[error("Shard {0} is detached from its extractor")]
    DetachedShard(String),

    // ========== Configuration Errors ==========
    /// Invalid configuration parameter.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========== Numeric Errors ==========
    /// Exact inversion of a walked matrix failed.
    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    // ========== Aggregation Errors ==========
    /// Preference graph still cyclic after deterministic tie-breaking.
    #[error("Cyclic preference graph while aggregating rankings for '{constant}'")]
    PreferenceCycle { constant: String },

    // ========== Collaborator Errors ==========
    /// The external algebra engine failed outside of a per-pair evaluation.
    #[error("Algebra engine error: {0}")]
    Engine(#[from] EngineError),

    /// File IO failure (config loading, result export).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SearchError {
    /// Whether this error should terminate a run.
    ///
    /// Everything reaching the caller as a `SearchError` is fatal except
    /// configuration problems detected before any work started, which a CLI
    /// may choose to report and retry with corrected options.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SearchError::InvalidConfig(_))
    }
}
