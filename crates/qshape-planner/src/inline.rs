//! Per-execution parameter inlining.
//!
//! Replaces deferred placeholders that cannot travel as ordinary bound
//! parameters with literals taken from the runtime parameter map:
//! - `x IN @list` becomes `x IN (v1, v2, ...)`, or the constant `false` when
//!   the bound collection is empty;
//! - on score-ordered selects, `LIMIT @n` / `OFFSET @m` become literals.
//!
//! Everything else is rebuilt structurally unchanged, so running the pass on
//! an already inlined tree returns an equal tree.

use qshape_core::error::{Error, Result};
use qshape_core::expr::{
    InValues, OrderingExpr, ParameterRef, ProjectionExpr, ProjectionItem, SelectExpression,
    SqlExpr,
};
use qshape_core::factory::SqlExpressionFactory;
use qshape_core::model::DataType;
use qshape_core::params::{ParameterValue, ParameterValues};
use qshape_core::types::Scalar;

pub struct ParameterInliner<'a> {
    factory: &'a dyn SqlExpressionFactory,
    parameters: &'a ParameterValues,
}

impl<'a> ParameterInliner<'a> {
    pub fn new(factory: &'a dyn SqlExpressionFactory, parameters: &'a ParameterValues) -> Self {
        Self {
            factory,
            parameters,
        }
    }

    pub fn inline_select(&self, select: &SelectExpression) -> Result<SelectExpression> {
        let score_ordered = select.is_score_ordered();

        let projection = select
            .projection
            .iter()
            .map(|p| {
                Ok(ProjectionExpr {
                    item: match &p.item {
                        ProjectionItem::Scalar(e) => ProjectionItem::Scalar(self.visit(e)?),
                        entity @ ProjectionItem::Entity { .. } => entity.clone(),
                    },
                    alias: p.alias.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let predicate = select.predicate.as_ref().map(|p| self.visit(p)).transpose()?;

        let orderings = select
            .orderings
            .iter()
            .map(|o| {
                Ok(OrderingExpr {
                    expr: self.visit(&o.expr)?,
                    ascending: o.ascending,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let limit = select
            .limit
            .as_ref()
            .map(|l| self.visit_limit_offset(l, score_ordered))
            .transpose()?;
        let offset = select
            .offset
            .as_ref()
            .map(|o| self.visit_limit_offset(o, score_ordered))
            .transpose()?;

        Ok(SelectExpression {
            container: select.container.clone(),
            alias: select.alias.clone(),
            projection,
            predicate,
            orderings,
            limit,
            offset,
            distinct: select.distinct,
        })
    }

    fn visit_limit_offset(&self, expr: &SqlExpr, score_ordered: bool) -> Result<SqlExpr> {
        match expr {
            SqlExpr::Parameter {
                name,
                data_type,
                type_mapping,
            } if score_ordered => {
                let value = self.parameters.scalar(name)?.clone();
                Ok(self
                    .factory
                    .constant(value, data_type.clone(), type_mapping.clone()))
            }
            other => self.visit(other),
        }
    }

    pub fn visit(&self, expr: &SqlExpr) -> Result<SqlExpr> {
        Ok(match expr {
            SqlExpr::In { item, values } => match values {
                InValues::List(list) => SqlExpr::In {
                    item: Box::new(self.visit(item)?),
                    values: InValues::List(
                        list.iter().map(|v| self.visit(v)).collect::<Result<_>>()?,
                    ),
                },
                InValues::Parameter(p) => self.inline_in_parameter(item, p)?,
                InValues::Subquery(_) => {
                    return Err(Error::NotSupported("IN (subquery)".into()));
                }
            },
            SqlExpr::Binary {
                op,
                left,
                right,
                type_mapping,
            } => SqlExpr::Binary {
                op: *op,
                left: Box::new(self.visit(left)?),
                right: Box::new(self.visit(right)?),
                type_mapping: type_mapping.clone(),
            },
            SqlExpr::Unary {
                op,
                operand,
                type_mapping,
            } => SqlExpr::Unary {
                op: *op,
                operand: Box::new(self.visit(operand)?),
                type_mapping: type_mapping.clone(),
            },
            SqlExpr::Function {
                name,
                args,
                is_scoring,
                data_type,
                type_mapping,
            } => SqlExpr::Function {
                name: name.clone(),
                args: args.iter().map(|a| self.visit(a)).collect::<Result<_>>()?,
                is_scoring: *is_scoring,
                data_type: data_type.clone(),
                type_mapping: type_mapping.clone(),
            },
            leaf @ (SqlExpr::Column { .. } | SqlExpr::Constant { .. } | SqlExpr::Parameter { .. }) => {
                leaf.clone()
            }
        })
    }

    fn inline_in_parameter(&self, item: &SqlExpr, p: &ParameterRef) -> Result<SqlExpr> {
        let values: &[Scalar] = match self.parameters.get(&p.name)? {
            ParameterValue::Collection(values) => values.as_slice(),
            // A null collection matches nothing.
            ParameterValue::Scalar(Scalar::Null) => &[],
            ParameterValue::Scalar(_) => {
                return Err(Error::Unreachable(format!(
                    "IN parameter '{}' is bound to a scalar",
                    p.name
                )));
            }
        };

        if values.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::trace!(parameter = %p.name, "empty IN collection folded to false");
            let f = self
                .factory
                .constant(Scalar::Bool(false), DataType::Boolean, None);
            return Ok(self.factory.apply_default_type_mapping(f));
        }

        let constants = values
            .iter()
            .map(|v| {
                let data_type = v.data_type().unwrap_or_else(|| p.element_type.clone());
                self.factory
                    .constant(v.clone(), data_type, p.type_mapping.clone())
            })
            .collect();

        #[cfg(feature = "tracing")]
        tracing::trace!(parameter = %p.name, count = values.len(), "inlined IN collection");

        Ok(self.factory.in_list(self.visit(item)?, constants))
    }
}

/// Inline every deferred placeholder of `select` against `parameters`.
pub fn inline_parameters(
    select: &SelectExpression,
    factory: &dyn SqlExpressionFactory,
    parameters: &ParameterValues,
) -> Result<SelectExpression> {
    ParameterInliner::new(factory, parameters).inline_select(select)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_core::expr::BinaryOp;
    use qshape_core::factory::DocumentSqlExpressionFactory;
    use qshape_core::model::{EntityType, TypeMapping};

    fn ids_in(name: &str, mapping: Option<TypeMapping>) -> SqlExpr {
        SqlExpr::in_parameter(
            SqlExpr::column("c", "Id", DataType::Int32),
            ParameterRef {
                name: name.into(),
                element_type: DataType::Int32,
                type_mapping: mapping,
            },
        )
    }

    fn inline(expr: &SqlExpr, params: &ParameterValues) -> Result<SqlExpr> {
        ParameterInliner::new(&DocumentSqlExpressionFactory, params).visit(expr)
    }

    #[test]
    fn null_collection_folds_to_false() {
        let params = ParameterValues::new().with("ids", Scalar::Null);
        let out = inline(&ids_in("ids", None), &params).unwrap();
        assert!(matches!(
            out,
            SqlExpr::Constant {
                value: Scalar::Bool(false),
                ..
            }
        ));
    }

    #[test]
    fn null_elements_take_the_declared_element_type() {
        let params =
            ParameterValues::new().with("ids", vec![Scalar::I32(4), Scalar::Null]);
        let out = inline(&ids_in("ids", None), &params).unwrap();
        let SqlExpr::In {
            values: InValues::List(list),
            ..
        } = out
        else {
            panic!("expected IN list");
        };
        let types: Vec<_> = list
            .iter()
            .map(|e| match e {
                SqlExpr::Constant { data_type, .. } => data_type.clone(),
                _ => DataType::Object,
            })
            .collect();
        assert_eq!(types, vec![DataType::Int32, DataType::Int32]);
    }

    #[test]
    fn nested_in_under_binary_is_inlined() {
        let pred = SqlExpr::binary(
            BinaryOp::Or,
            SqlExpr::constant(Scalar::Bool(false), None),
            ids_in("ids", None),
        );
        let params = ParameterValues::new().with("ids", vec![Scalar::I32(1)]);
        let out = inline(&pred, &params).unwrap();
        assert!(!out.has_deferred_collection());
    }

    #[test]
    fn scalar_bound_to_in_is_unreachable() {
        let params = ParameterValues::new().with("ids", Scalar::I32(1));
        assert!(matches!(
            inline(&ids_in("ids", None), &params),
            Err(Error::Unreachable(_))
        ));
    }

    #[test]
    fn subquery_in_is_not_supported() {
        let sub = SelectExpression::for_entity(&EntityType::new("Order", "Orders"));
        let expr = SqlExpr::In {
            item: Box::new(SqlExpr::column("c", "Id", DataType::Int32)),
            values: InValues::Subquery(Box::new(sub)),
        };
        assert!(matches!(
            inline(&expr, &ParameterValues::new()),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn limit_parameter_left_alone_without_score_ordering() {
        let select = SelectExpression::for_entity(&EntityType::new("Doc", "Docs"))
            .with_limit(SqlExpr::parameter("take", DataType::Int32));
        let out = inline_parameters(
            &select,
            &DocumentSqlExpressionFactory,
            &ParameterValues::new(),
        )
        .unwrap();
        assert_eq!(out, select);
    }
}
