#![forbid(unsafe_code)]
//! qshape-core: the data side of query shaping.
//!
//! Everything in here is pure, immutable-after-construction data:
//! - `expr`: translated query plan nodes (`SelectExpression`, `ReadItemExpression`, predicates)
//! - `shaper`: symbolic shaper trees that describe how a row becomes a result item
//! - `model`: entity/property metadata the translator binds against
//! - `params`: runtime parameter maps supplied per execution
//! - `hash`: stable structural hashes used as plan-cache keys
//!
//! No compilation, no I/O. The planner and exec crates build on these types.

pub mod config;
pub mod error;
pub mod expr;
pub mod factory;
pub mod hash;
pub mod id;
pub mod model;
pub mod params;
pub mod prelude;
pub mod shaper;
pub mod types;

/// Version string stamped into explain output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
