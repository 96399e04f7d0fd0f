//! Construction helpers for SQL expression nodes that need provider type mappings.

use std::fmt::Debug;

use crate::expr::{InValues, SqlExpr};
use crate::model::{DataType, TypeMapping};
use crate::types::Scalar;

/// Builds expression nodes with the provider's default type mappings applied.
///
/// Rewriting passes go through this instead of constructing literals
/// directly so the provider decides how new constants are typed.
pub trait SqlExpressionFactory: Send + Sync + Debug {
    fn default_type_mapping(&self, data_type: &DataType) -> TypeMapping;

    fn constant(&self, value: Scalar, data_type: DataType, type_mapping: Option<TypeMapping>) -> SqlExpr {
        SqlExpr::Constant {
            value,
            data_type,
            type_mapping,
        }
    }

    /// Fill in a missing mapping from the expression's own type.
    fn apply_default_type_mapping(&self, expr: SqlExpr) -> SqlExpr {
        match expr {
            SqlExpr::Constant {
                value,
                data_type,
                type_mapping: None,
            } => {
                let mapping = self.default_type_mapping(&data_type);
                SqlExpr::Constant {
                    value,
                    data_type,
                    type_mapping: Some(mapping),
                }
            }
            SqlExpr::Parameter {
                name,
                data_type,
                type_mapping: None,
            } => {
                let mapping = self.default_type_mapping(&data_type);
                SqlExpr::Parameter {
                    name,
                    data_type,
                    type_mapping: Some(mapping),
                }
            }
            other => other,
        }
    }

    fn in_list(&self, item: SqlExpr, values: Vec<SqlExpr>) -> SqlExpr {
        SqlExpr::In {
            item: Box::new(item),
            values: InValues::List(values),
        }
    }
}

/// Document-store type mappings (JSON value kinds).
#[derive(Debug, Clone, Default)]
pub struct DocumentSqlExpressionFactory;

impl SqlExpressionFactory for DocumentSqlExpressionFactory {
    fn default_type_mapping(&self, data_type: &DataType) -> TypeMapping {
        let store_type = match data_type {
            DataType::Boolean => "boolean",
            DataType::Int32
            | DataType::Int64
            | DataType::Float32
            | DataType::Float64
            | DataType::Date64
            | DataType::Decimal128 => "number",
            DataType::Utf8 => "string",
            DataType::Binary => "array",
            DataType::Object => "any",
        };
        TypeMapping::new(data_type.clone(), store_type)
    }
}
