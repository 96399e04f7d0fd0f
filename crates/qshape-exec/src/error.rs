use thiserror::Error;

use qshape_planner::dsl::DslError;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Core(#[from] qshape_core::error::Error),

    #[error("query definition: {0}")]
    Dsl(#[from] DslError),

    #[error("storage: {0}")]
    Storage(String),

    #[error("materialize: {0}")]
    Materialize(String),

    #[error("a second operation was started on this context instance before a previous operation completed")]
    ConcurrentUse,

    #[error("plan compiled for context '{expected}' cannot run on context '{actual}'")]
    ContextMismatch { expected: String, actual: String },
}
