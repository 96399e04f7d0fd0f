//! Compiled plans: the enumerable constructor call plus its lifted constants.
//!
//! The execution layer instantiates a `QueryingEnumerable` or a
//! `ReadItemQueryingEnumerable` from these argument lists; the field order
//! follows the constructor signatures exactly.

use serde::{Deserialize, Serialize};

use qshape_core::expr::SelectExpression;
use qshape_core::id::{ConstantRef, ContextType};

use crate::binding::RowShaper;
use crate::constants::LiftedConstants;
use crate::quote::QuotedReadItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryingEnumerableArgs {
    pub sql_generator_factory: ConstantRef,
    pub sql_expression_factory: ConstantRef,
    /// Still holds deferred placeholders; inlined per execution.
    pub select: SelectExpression,
    pub shaper: RowShaper,
    pub context_type: ContextType,
    pub partition_key: Option<String>,
    pub standalone_state_manager: bool,
    pub thread_safety_checks_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadItemEnumerableArgs {
    pub read_item: QuotedReadItem,
    pub shaper: RowShaper,
    pub context_type: ContextType,
    pub partition_key: Option<String>,
    pub standalone_state_manager: bool,
    pub thread_safety_checks_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnumerableConstructor {
    Querying(QueryingEnumerableArgs),
    ReadItem(ReadItemEnumerableArgs),
}

impl EnumerableConstructor {
    pub fn type_name(&self) -> &'static str {
        match self {
            EnumerableConstructor::Querying(_) => "QueryingEnumerable",
            EnumerableConstructor::ReadItem(_) => "ReadItemQueryingEnumerable",
        }
    }

    pub fn context_type(&self) -> &ContextType {
        match self {
            EnumerableConstructor::Querying(a) => &a.context_type,
            EnumerableConstructor::ReadItem(a) => &a.context_type,
        }
    }

    pub fn shaper(&self) -> &RowShaper {
        match self {
            EnumerableConstructor::Querying(a) => &a.shaper,
            EnumerableConstructor::ReadItem(a) => &a.shaper,
        }
    }

    pub fn standalone_state_manager(&self) -> bool {
        match self {
            EnumerableConstructor::Querying(a) => a.standalone_state_manager,
            EnumerableConstructor::ReadItem(a) => a.standalone_state_manager,
        }
    }

    pub fn thread_safety_checks_enabled(&self) -> bool {
        match self {
            EnumerableConstructor::Querying(a) => a.thread_safety_checks_enabled,
            EnumerableConstructor::ReadItem(a) => a.thread_safety_checks_enabled,
        }
    }
}

/// Immutable, shareable result of compiling one query shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPlan {
    pub constructor: EnumerableConstructor,
    pub constants: LiftedConstants,
}

impl CompiledPlan {
    /// Human-readable summary used by `explain`.
    pub fn describe(&self) -> String {
        let names: Vec<&str> = self.constants.names().map(|n| n.as_str()).collect();
        format!(
            "{}<{}> constants=[{}] identity_resolution={} thread_safety_checks={}",
            self.constructor.type_name(),
            self.constructor.context_type(),
            names.join(", "),
            self.constructor.standalone_state_manager(),
            self.constructor.thread_safety_checks_enabled(),
        )
    }
}
