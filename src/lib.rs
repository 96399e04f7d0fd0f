#![forbid(unsafe_code)]
//! qshape: compile translated document-store queries into reusable,
//! context-independent plans and run them.
//!
//! Layers:
//! - `core`: plan nodes, shapers, model metadata, parameters
//! - `planner`: shaped-query compiler, constant lifting, parameter inlining, plan cache
//! - `exec`: sessions, lazy enumerables, row shaping, storage

pub use qshape_core as core;
pub use qshape_exec as exec;
pub use qshape_planner as planner;

pub use qshape_core::prelude::*;
pub use qshape_exec::{Database, ExecError, Item, MemoryDocumentStore, QueryEnumerable, Session};
pub use qshape_planner::{CompiledPlan, ShapedQueryCompiler};
