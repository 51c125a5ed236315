use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for the simulation core.
///
/// Every fallible path in the engine returns this enum; `.unwrap()`/`.expect()`
/// are reserved for tests. Each variant carries enough context to be actionable.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration: bad XML, version mismatch, missing pair
    /// coverage, duplicate names, undersized primary cell.
    #[error("configuration error: {0}")]
    Config(String),

    /// API used in the wrong lifecycle phase (e.g. adding a species after
    /// initialisation).
    #[error("state violation: {0}")]
    State(String),

    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Numerical issue: NaN/Inf event time, degenerate contact normal,
    /// catastrophic cancellation in a root.
    #[error("numerical error: {0}")]
    Math(String),

    /// Advisory consistency failure from `validate_state` style checks;
    /// carries the number of violations found.
    #[error("invariant violation: {count} error(s): {context}")]
    Invariant { count: usize, context: String },

    /// Propagated I/O errors (config files, compressed streams).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
