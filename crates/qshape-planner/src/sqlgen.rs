//! Document-SQL text generation for finalized select expressions.
//!
//! The generator only renders; it never rewrites. Callers hand it a tree that
//! has already gone through parameter inlining, so any `IN` still bound to a
//! collection parameter is rendered as `ARRAY_CONTAINS(@p, x)`.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use qshape_core::error::{Error, Result};
use qshape_core::expr::{
    InValues, OrderingExpr, ProjectionExpr, ProjectionItem, SelectExpression, SqlExpr, UnaryOp,
};
use qshape_core::params::{ParameterValue, ParameterValues};
use qshape_core::types::Scalar;

/// Command text plus the parameters it references, in first-use order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlQuery {
    pub text: String,
    pub parameters: Vec<(String, ParameterValue)>,
}

pub trait QuerySqlGenerator {
    fn get_sql_query(
        &mut self,
        select: &SelectExpression,
        parameters: &ParameterValues,
    ) -> Result<SqlQuery>;
}

pub trait QuerySqlGeneratorFactory: Send + Sync + fmt::Debug {
    fn create(&self) -> Box<dyn QuerySqlGenerator>;
}

#[derive(Debug, Clone, Default)]
pub struct DocumentQuerySqlGeneratorFactory;

impl QuerySqlGeneratorFactory for DocumentQuerySqlGeneratorFactory {
    fn create(&self) -> Box<dyn QuerySqlGenerator> {
        Box::new(DocumentQuerySqlGenerator::default())
    }
}

#[derive(Debug, Default)]
pub struct DocumentQuerySqlGenerator {
    sql: String,
    used: Vec<String>,
}

impl QuerySqlGenerator for DocumentQuerySqlGenerator {
    fn get_sql_query(
        &mut self,
        select: &SelectExpression,
        parameters: &ParameterValues,
    ) -> Result<SqlQuery> {
        self.sql.clear();
        self.used.clear();
        self.visit_select(select)?;

        let mut bound = Vec::with_capacity(self.used.len());
        for name in &self.used {
            bound.push((format!("@{}", name), parameters.get(name)?.clone()));
        }
        Ok(SqlQuery {
            text: std::mem::take(&mut self.sql),
            parameters: bound,
        })
    }
}

impl DocumentQuerySqlGenerator {
    fn visit_select(&mut self, select: &SelectExpression) -> Result<()> {
        self.sql.push_str("SELECT ");
        if select.distinct {
            self.sql.push_str("DISTINCT ");
        }
        match select.projection.as_slice() {
            [] => return Err(Error::Unreachable("select without projection".into())),
            [single] => {
                self.sql.push_str("VALUE ");
                self.visit_projection_item(&single.item, &select.alias)?;
            }
            many => {
                for (i, p) in many.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.visit_projection(p, &select.alias)?;
                }
            }
        }
        let _ = write!(self.sql, " FROM root {}", select.alias);

        if let Some(pred) = &select.predicate {
            self.sql.push_str(" WHERE ");
            self.visit_expr(pred)?;
        }

        if !select.orderings.is_empty() {
            self.visit_orderings(select)?;
        }

        if select.offset.is_some() || select.limit.is_some() {
            self.sql.push_str(" OFFSET ");
            match &select.offset {
                Some(o) => self.visit_expr(o)?,
                None => self.sql.push('0'),
            }
            if let Some(l) = &select.limit {
                self.sql.push_str(" LIMIT ");
                self.visit_expr(l)?;
            }
        }
        Ok(())
    }

    fn visit_orderings(&mut self, select: &SelectExpression) -> Result<()> {
        if select.is_score_ordered() {
            self.sql.push_str(" ORDER BY RANK ");
            let scores: Vec<&OrderingExpr> = select
                .orderings
                .iter()
                .filter(|o| matches!(o.expr, SqlExpr::Function { is_scoring: true, .. }))
                .collect();
            match scores.as_slice() {
                [only] => self.visit_expr(&only.expr)?,
                many => {
                    self.sql.push_str("RRF(");
                    for (i, o) in many.iter().enumerate() {
                        if i > 0 {
                            self.sql.push_str(", ");
                        }
                        self.visit_expr(&o.expr)?;
                    }
                    self.sql.push(')');
                }
            }
            return Ok(());
        }

        self.sql.push_str(" ORDER BY ");
        for (i, o) in select.orderings.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.visit_expr(&o.expr)?;
            self.sql.push_str(if o.ascending { " ASC" } else { " DESC" });
        }
        Ok(())
    }

    fn visit_projection(&mut self, p: &ProjectionExpr, source: &str) -> Result<()> {
        self.visit_projection_item(&p.item, source)?;
        let _ = write!(self.sql, " AS {}", p.alias);
        Ok(())
    }

    fn visit_projection_item(&mut self, item: &ProjectionItem, source: &str) -> Result<()> {
        match item {
            ProjectionItem::Scalar(e) => self.visit_expr(e),
            ProjectionItem::Entity { path, .. } => {
                self.write_path(source, path);
                Ok(())
            }
        }
    }

    fn write_path(&mut self, source: &str, path: &[String]) {
        self.sql.push_str(source);
        for seg in path {
            let _ = write!(self.sql, "[{}]", quote_str(seg));
        }
    }

    fn use_parameter(&mut self, name: &str) {
        let _ = write!(self.sql, "@{}", name);
        if !self.used.iter().any(|u| u == name) {
            self.used.push(name.to_string());
        }
    }

    fn visit_expr(&mut self, expr: &SqlExpr) -> Result<()> {
        match expr {
            SqlExpr::Column { source, path, .. } => self.write_path(source, path),
            SqlExpr::Constant { value, .. } => self.sql.push_str(&literal(value)),
            SqlExpr::Parameter { name, .. } => self.use_parameter(name),
            SqlExpr::Binary {
                op, left, right, ..
            } => {
                self.sql.push('(');
                self.visit_expr(left)?;
                let _ = write!(self.sql, " {} ", op.symbol());
                self.visit_expr(right)?;
                self.sql.push(')');
            }
            SqlExpr::Unary { op, operand, .. } => match op {
                UnaryOp::Not => {
                    self.sql.push_str("NOT (");
                    self.visit_expr(operand)?;
                    self.sql.push(')');
                }
                UnaryOp::Negate => {
                    self.sql.push('-');
                    self.visit_expr(operand)?;
                }
                UnaryOp::IsNull | UnaryOp::IsNotNull => {
                    self.sql.push('(');
                    self.visit_expr(operand)?;
                    self.sql
                        .push_str(if *op == UnaryOp::IsNull { " = null)" } else { " != null)" });
                }
            },
            SqlExpr::Function { name, args, .. } => {
                self.sql.push_str(name);
                self.sql.push('(');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.visit_expr(a)?;
                }
                self.sql.push(')');
            }
            SqlExpr::In { item, values } => match values {
                InValues::List(list) if list.is_empty() => self.sql.push_str("false"),
                InValues::List(list) => {
                    self.visit_expr(item)?;
                    self.sql.push_str(" IN (");
                    for (i, v) in list.iter().enumerate() {
                        if i > 0 {
                            self.sql.push_str(", ");
                        }
                        self.visit_expr(v)?;
                    }
                    self.sql.push(')');
                }
                InValues::Parameter(p) => {
                    self.sql.push_str("ARRAY_CONTAINS(");
                    self.use_parameter(&p.name);
                    self.sql.push_str(", ");
                    self.visit_expr(item)?;
                    self.sql.push(')');
                }
                InValues::Subquery(_) => {
                    return Err(Error::NotSupported("IN (subquery)".into()));
                }
            },
        }
        Ok(())
    }
}

fn quote_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

/// Render a scalar as a document-SQL literal.
pub fn literal(value: &Scalar) -> String {
    match value {
        Scalar::Null => "null".into(),
        Scalar::Bool(b) => b.to_string(),
        Scalar::I32(v) => v.to_string(),
        Scalar::I64(v) => v.to_string(),
        Scalar::F32(v) => v.to_string(),
        Scalar::F64(v) => v.to_string(),
        Scalar::Str(s) => quote_str(s),
        Scalar::Bin(_) => value.to_json().to_string(),
    }
}
