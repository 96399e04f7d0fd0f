//! Convenient re-exports for downstream crates.

pub use crate::config::{CompilerConfig, QueryTrackingBehavior, RowLayout};
pub use crate::error::{Error, Result};
pub use crate::expr::{
    BinaryOp, InValues, OrderingExpr, ParameterRef, ProjectionExpr, ProjectionItem,
    QueryExpression, ReadItemExpression, SelectExpression, SetOperationKind, SqlExpr, UnaryOp,
};
pub use crate::factory::{DocumentSqlExpressionFactory, SqlExpressionFactory};
pub use crate::id::{ConstantRef, ContextInstanceId, ContextType};
pub use crate::model::{DataType, EmbeddedNavigation, EntityType, Model, Property, TypeMapping};
pub use crate::params::{ParameterValue, ParameterValues};
pub use crate::shaper::{ShapedQuery, ShaperExpr};
pub use crate::types::{KeyValues, Scalar};
