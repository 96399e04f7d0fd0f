//! Translated query plan nodes.
//!
//! The upstream translator produces a `QueryExpression` (what to fetch) and a
//! `ShaperExpr` (how to build each result). Nodes are plain owned trees:
//! rewriting passes build new trees and never mutate a node in place, so a
//! cached plan can be shared by every execution that reuses it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{DataType, EntityType, TypeMapping};
use crate::types::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        use BinaryOp::*;
        match self {
            Equal => "=",
            NotEqual => "!=",
            LessThan => "<",
            LessThanOrEqual => "<=",
            GreaterThan => ">",
            GreaterThanOrEqual => ">=",
            And => "AND",
            Or => "OR",
            Add => "+",
            Subtract => "-",
            Multiply => "*",
            Divide => "/",
            Modulo => "%",
        }
    }

    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Equal | NotEqual | LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

/// A deferred collection parameter feeding an `IN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRef {
    pub name: String,
    /// Declared element type; `Object` when the translator could not infer one.
    pub element_type: DataType,
    /// Element type mapping applied to every inlined literal.
    pub type_mapping: Option<TypeMapping>,
}

/// Source of the values an `IN` compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InValues {
    /// Already concrete literal/expression list.
    List(Vec<SqlExpr>),
    /// A single deferred parameter bound to a runtime collection.
    Parameter(ParameterRef),
    /// Correlated subquery; translated but not yet compilable.
    Subquery(Box<SelectExpression>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlExpr {
    /// Property access on the query source: `c["Address"]["City"]`.
    Column {
        source: String,
        path: Vec<String>,
        data_type: DataType,
        type_mapping: Option<TypeMapping>,
    },
    Constant {
        value: Scalar,
        data_type: DataType,
        type_mapping: Option<TypeMapping>,
    },
    Parameter {
        name: String,
        data_type: DataType,
        type_mapping: Option<TypeMapping>,
    },
    Binary {
        op: BinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
        type_mapping: Option<TypeMapping>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<SqlExpr>,
        type_mapping: Option<TypeMapping>,
    },
    Function {
        name: String,
        args: Vec<SqlExpr>,
        /// Vector/full-text/hybrid scoring functions used in `ORDER BY RANK`.
        is_scoring: bool,
        data_type: DataType,
        type_mapping: Option<TypeMapping>,
    },
    In {
        item: Box<SqlExpr>,
        values: InValues,
    },
}

impl SqlExpr {
    pub fn column(source: impl Into<String>, name: impl Into<String>, data_type: DataType) -> Self {
        SqlExpr::Column {
            source: source.into(),
            path: vec![name.into()],
            data_type,
            type_mapping: None,
        }
    }

    pub fn constant(value: Scalar, type_mapping: Option<TypeMapping>) -> Self {
        let data_type = value.data_type().unwrap_or(DataType::Object);
        SqlExpr::Constant {
            value,
            data_type,
            type_mapping,
        }
    }

    pub fn parameter(name: impl Into<String>, data_type: DataType) -> Self {
        SqlExpr::Parameter {
            name: name.into(),
            data_type,
            type_mapping: None,
        }
    }

    pub fn binary(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            type_mapping: None,
        }
    }

    pub fn in_parameter(item: SqlExpr, parameter: ParameterRef) -> Self {
        SqlExpr::In {
            item: Box::new(item),
            values: InValues::Parameter(parameter),
        }
    }

    pub fn in_list(item: SqlExpr, values: Vec<SqlExpr>) -> Self {
        SqlExpr::In {
            item: Box::new(item),
            values: InValues::List(values),
        }
    }

    pub fn type_mapping(&self) -> Option<&TypeMapping> {
        match self {
            SqlExpr::Column { type_mapping, .. }
            | SqlExpr::Constant { type_mapping, .. }
            | SqlExpr::Parameter { type_mapping, .. }
            | SqlExpr::Binary { type_mapping, .. }
            | SqlExpr::Unary { type_mapping, .. }
            | SqlExpr::Function { type_mapping, .. } => type_mapping.as_ref(),
            SqlExpr::In { .. } => None,
        }
    }

    /// True when the tree still holds a placeholder that must be bound per execution.
    pub fn has_deferred_collection(&self) -> bool {
        match self {
            SqlExpr::In { item, values } => {
                item.has_deferred_collection()
                    || match values {
                        InValues::List(list) => list.iter().any(SqlExpr::has_deferred_collection),
                        InValues::Parameter(_) | InValues::Subquery(_) => true,
                    }
            }
            SqlExpr::Binary { left, right, .. } => {
                left.has_deferred_collection() || right.has_deferred_collection()
            }
            SqlExpr::Unary { operand, .. } => operand.has_deferred_collection(),
            SqlExpr::Function { args, .. } => args.iter().any(SqlExpr::has_deferred_collection),
            SqlExpr::Column { .. } | SqlExpr::Constant { .. } | SqlExpr::Parameter { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingExpr {
    pub expr: SqlExpr,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProjectionItem {
    Scalar(SqlExpr),
    /// A whole entity document (or an embedded sub-object at `path`).
    Entity {
        entity_type: String,
        path: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionExpr {
    pub item: ProjectionItem,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectExpression {
    pub container: String,
    /// Source alias referenced by `SqlExpr::Column::source` (`c`).
    pub alias: String,
    pub projection: Vec<ProjectionExpr>,
    pub predicate: Option<SqlExpr>,
    pub orderings: Vec<OrderingExpr>,
    pub limit: Option<SqlExpr>,
    pub offset: Option<SqlExpr>,
    pub distinct: bool,
}

impl SelectExpression {
    /// `SELECT VALUE c FROM root c` over an entity's container.
    pub fn for_entity(entity_type: &EntityType) -> Self {
        Self {
            container: entity_type.container.clone(),
            alias: "c".into(),
            projection: vec![ProjectionExpr {
                item: ProjectionItem::Entity {
                    entity_type: entity_type.name.clone(),
                    path: vec![],
                },
                alias: "c".into(),
            }],
            predicate: None,
            orderings: vec![],
            limit: None,
            offset: None,
            distinct: false,
        }
    }

    pub fn with_predicate(mut self, predicate: SqlExpr) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_ordering(mut self, expr: SqlExpr, ascending: bool) -> Self {
        self.orderings.push(OrderingExpr { expr, ascending });
        self
    }

    pub fn with_limit(mut self, limit: SqlExpr) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: SqlExpr) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_projection(mut self, projection: Vec<ProjectionExpr>) -> Self {
        self.projection = projection;
        self
    }

    /// Hybrid/vector search: ordered by a scoring function (`ORDER BY RANK`).
    pub fn is_score_ordered(&self) -> bool {
        matches!(
            self.orderings.first(),
            Some(OrderingExpr {
                expr: SqlExpr::Function { is_scoring: true, .. },
                ..
            })
        )
    }
}

/// Point lookup of one document by its full key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadItemExpression {
    pub container: String,
    pub entity_type: Arc<EntityType>,
    /// Property name -> name of the parameter carrying its value.
    pub property_parameters: BTreeMap<String, String>,
}

impl ReadItemExpression {
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self {
            container: entity_type.container.clone(),
            entity_type,
            property_parameters: BTreeMap::new(),
        }
    }

    pub fn with_property_parameter(
        mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
    ) -> Self {
        self.property_parameters
            .insert(property.into(), parameter.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOperationKind {
    Union,
    Intersect,
    Except,
}

/// Top-level translated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryExpression {
    Select(SelectExpression),
    ReadItem(ReadItemExpression),
    /// Produced by the translator for set operators; document stores cannot run it.
    SetOperation {
        kind: SetOperationKind,
        left: Box<SelectExpression>,
        right: Box<SelectExpression>,
    },
}

impl fmt::Display for QueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpression::Select(s) => write!(f, "Select(root {})", s.container),
            QueryExpression::ReadItem(r) => {
                write!(f, "ReadItem({} in {})", r.entity_type.name, r.container)
            }
            QueryExpression::SetOperation { kind, left, right } => write!(
                f,
                "SetOperation({:?}: {} / {})",
                kind, left.container, right.container
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_ordering_is_detected_from_first_ordering() {
        let et = EntityType::new("Doc", "Docs");
        let score = SqlExpr::Function {
            name: "FullTextScore".into(),
            args: vec![SqlExpr::column("c", "Text", DataType::Utf8)],
            is_scoring: true,
            data_type: DataType::Float64,
            type_mapping: None,
        };
        let plain = SelectExpression::for_entity(&et)
            .with_ordering(SqlExpr::column("c", "Id", DataType::Int32), true);
        assert!(!plain.is_score_ordered());
        let ranked = SelectExpression::for_entity(&et).with_ordering(score, false);
        assert!(ranked.is_score_ordered());
    }

    #[test]
    fn deferred_collections_are_found_in_nested_predicates() {
        let inner = SqlExpr::in_parameter(
            SqlExpr::column("c", "Id", DataType::Int32),
            ParameterRef {
                name: "ids".into(),
                element_type: DataType::Int32,
                type_mapping: None,
            },
        );
        let pred = SqlExpr::binary(
            BinaryOp::And,
            SqlExpr::constant(Scalar::Bool(true), None),
            inner,
        );
        assert!(pred.has_deferred_collection());
        assert!(!SqlExpr::column("c", "Id", DataType::Int32).has_deferred_collection());
    }

    #[test]
    fn display_names_the_node_kind() {
        let et = EntityType::new("Doc", "Docs");
        let s = SelectExpression::for_entity(&et);
        let node = QueryExpression::SetOperation {
            kind: SetOperationKind::Union,
            left: Box::new(s.clone()),
            right: Box::new(s),
        };
        assert!(node.to_string().starts_with("SetOperation(Union"));
    }
}
