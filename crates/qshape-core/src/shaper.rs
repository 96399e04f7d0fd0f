//! Symbolic shaper trees.
//!
//! A shaper describes how one row becomes one result item. It refers to the
//! query's projection by position, never to runtime values, so the same
//! shaper is reused by every execution of a cached plan.

use serde::{Deserialize, Serialize};

use crate::expr::QueryExpression;
use crate::model::DataType;
use crate::types::Scalar;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShaperExpr {
    /// Read the scalar projected at `index`.
    ProjectionBinding {
        index: usize,
        data_type: DataType,
        nullable: bool,
    },
    /// Materialize an entity from the entity projection at `binding`.
    Entity {
        entity_type: String,
        binding: usize,
        nullable: bool,
    },
    /// Anonymous/record projection: `new { a, b }`.
    Record(Vec<(String, ShaperExpr)>),
    Constant(Scalar),
}

impl ShaperExpr {
    pub fn binding(index: usize, data_type: DataType) -> Self {
        ShaperExpr::ProjectionBinding {
            index,
            data_type,
            nullable: true,
        }
    }

    pub fn entity(entity_type: impl Into<String>, binding: usize) -> Self {
        ShaperExpr::Entity {
            entity_type: entity_type.into(),
            binding,
            nullable: false,
        }
    }
}

/// A translated query paired with the shaper for its rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapedQuery {
    pub query: QueryExpression,
    pub shaper: ShaperExpr,
}

impl ShapedQuery {
    pub fn new(query: QueryExpression, shaper: ShaperExpr) -> Self {
        Self { query, shaper }
    }
}
