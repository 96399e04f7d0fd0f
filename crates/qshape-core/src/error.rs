use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    /// A recognized construct the compiler cannot (yet) turn into a plan.
    #[error("The query expression '{0}' is not supported")]
    NotSupported(String),

    /// The upstream translator handed over a shape it should never produce.
    #[error("Unreachable query shape: {0}")]
    Unreachable(String),

    /// A placeholder in the plan has no entry in the runtime parameter map.
    #[error("No value was bound for query parameter '{0}'")]
    UnboundParameter(String),

    #[error("Liftable constant '{name}' is declared as {declared} but resolves to {actual}")]
    TypeMismatch {
        name: String,
        declared: String,
        actual: String,
    },

    #[error("Hashing error: {0}")]
    Hash(String),

    /// JSON encoding or decoding of model, shape or row data failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
