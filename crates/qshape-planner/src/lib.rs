#![forbid(unsafe_code)]
//! qshape-planner: translated query plan + shaper → compiled, cacheable plan.
//!
//! Design:
//! - `compile::ShapedQueryCompiler` switches over the two executable plan
//!   kinds (select, point lookup) and rejects everything else.
//! - `binding` replaces symbolic projection bindings with concrete row reads.
//! - `constants` lifts captured services/metadata into re-resolvable slots so
//!   a plan never pins the objects of the compilation that produced it.
//! - `quote` re-expresses point-lookup nodes through those slots.
//! - `inline` runs per execution, burning runtime collection/limit values
//!   into the tree before `sqlgen` renders it.
//! - `cache` shares plans between executions of the same shape.
//!
//! NOTE: no I/O here; the exec crate owns storage and iteration.

pub mod binding;
pub mod cache;
pub mod compile;
pub mod constants;
pub mod dsl;
pub mod inline;
pub mod plan;
pub mod quote;
pub mod sqlgen;

pub use binding::{IdentityMode, RowShaper, ValueAccess};
pub use cache::{CompiledQueryCache, PlanCacheKey};
pub use compile::{CompilerServices, ShapedQueryCompiler};
pub use constants::{
    ConstantTable, ConstantValue, DefaultLiftableConstantFactory, LiftableConstant,
    LiftableConstantFactory, LiftedConstants, LiftedType, MaterializerContext, Resolution,
    ResolvedConstants,
};
pub use dsl::yaml::parse_yaml_query;
pub use inline::{inline_parameters, ParameterInliner};
pub use plan::{CompiledPlan, EnumerableConstructor, QueryingEnumerableArgs, ReadItemEnumerableArgs};
pub use quote::{quote_read_item, QuotedReadItem};
pub use sqlgen::{DocumentQuerySqlGeneratorFactory, QuerySqlGenerator, QuerySqlGeneratorFactory, SqlQuery};
