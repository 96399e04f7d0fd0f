#![forbid(unsafe_code)]
//! qshape-exec: query contexts, enumerables, row shaping and storage.
//!
//! Design:
//! - `runtime::Database` compiles and caches plans; `runtime::Session` is one
//!   context instance with its own identity map and concurrency detector.
//! - `enumerable` instantiates compiled plans lazily: no I/O until the first
//!   `next()`, and every `iter()` is a fresh execution.
//! - `materialize` interprets row shapers over raw rows, resolving identity
//!   per query or through the session's state manager.
//! - `storage` is the collaborator boundary; `memory_storage` is a complete
//!   in-process document store used by the CLI and tests.

pub mod concurrency;
pub mod context;
pub mod enumerable;
pub mod error;
pub mod eval;
pub mod materialize;
pub mod memory_storage;
pub mod metrics;
pub mod runtime;
pub mod storage;

pub use concurrency::{ConcurrencyDetector, ConcurrencyGuard};
pub use context::{QueryContext, StateManager};
pub use enumerable::{QueryEnumerable, QueryIter, QueryingEnumerable, ReadItemQueryingEnumerable};
pub use error::{ExecError, Result};
pub use materialize::{EntityInstance, FromItem, Item};
pub use memory_storage::MemoryDocumentStore;
pub use runtime::{instantiate, Database, Session};
pub use storage::{QueryRequest, ReadItemRequest, Row, StorageClient};
