//! YAML -> (Model, ShapedQuery) for tooling and tests.
//!
//! Example:
//! ```yaml
//! config: { tracking: no_tracking_with_identity_resolution }
//! model:
//!   entity_types:
//!     - name: Customer
//!       container: Customers
//!       key: [Id]
//!       properties:
//!         - { name: Id, type: Int32 }
//!         - { name: Name, type: Utf8, nullable: true }
//! query:
//!   op: select
//!   entity: Customer
//!   filter: { in: { property: Id, parameter: ids } }
//!   order_by: [ { property: Name } ]
//!   limit: { value: 10 }
//! ```
//!
//! A `select` without `project` materializes whole entities; with `project`
//! it yields one record per row with the listed properties. `read_item` maps
//! every key property to the parameter carrying its value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use qshape_core::config::{CompilerConfig, QueryTrackingBehavior, RowLayout};
use qshape_core::expr::{
    BinaryOp, ParameterRef, ProjectionExpr, ProjectionItem, QueryExpression, ReadItemExpression,
    SelectExpression, SqlExpr, UnaryOp,
};
use qshape_core::model::{DataType, EmbeddedNavigation, EntityType, Model, Property, TypeMapping};
use qshape_core::shaper::{ShapedQuery, ShaperExpr};
use qshape_core::types::Scalar;

#[derive(Debug, Error)]
pub enum DslError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid query definition: {0}")]
    Invalid(String),

    #[error(transparent)]
    Core(#[from] qshape_core::error::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDocument {
    #[serde(default)]
    pub config: Option<QueryConfigDef>,
    pub model: ModelDef,
    pub query: QueryDef,
}

/// Overrides applied on top of `CompilerConfig::from_env()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfigDef {
    pub context: Option<String>,
    pub tracking: Option<String>,
    pub partition_key: Option<String>,
    pub thread_safety_checks: Option<bool>,
    pub row_layout: Option<RowLayout>,
}

impl QueryConfigDef {
    pub fn apply(&self, cfg: &mut CompilerConfig) -> Result<(), DslError> {
        if let Some(t) = &self.tracking {
            cfg.tracking_behavior = QueryTrackingBehavior::parse(t)?;
        }
        if let Some(pk) = &self.partition_key {
            cfg.partition_key = Some(pk.clone());
        }
        if let Some(v) = self.thread_safety_checks {
            cfg.thread_safety_checks_enabled = v;
        }
        if let Some(layout) = self.row_layout {
            cfg.row_layout = layout;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDef {
    pub entity_types: Vec<EntityTypeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTypeDef {
    pub name: String,
    #[serde(default)]
    pub container: String,
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub partition_key: Option<String>,
    #[serde(default)]
    pub embedded: Vec<EmbeddedDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub json_name: Option<String>,
    #[serde(default)]
    pub store_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedDef {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub collection: bool,
    #[serde(default)]
    pub json_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum QueryDef {
    Select {
        entity: String,
        #[serde(default)]
        filter: Option<PredicateDef>,
        #[serde(default)]
        order_by: Vec<OrderDef>,
        #[serde(default)]
        limit: Option<ValueDef>,
        #[serde(default)]
        offset: Option<ValueDef>,
        #[serde(default)]
        project: Vec<String>,
        #[serde(default)]
        distinct: bool,
    },
    ReadItem {
        entity: String,
        /// Key property -> parameter name.
        keys: BTreeMap<String, String>,
    },
}

/// One predicate node; exactly one key must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PredicateDef {
    #[serde(rename = "in")]
    pub in_values: Option<InDef>,
    pub compare: Option<CompareDef>,
    pub is_null: Option<String>,
    pub and: Vec<PredicateDef>,
    pub or: Vec<PredicateDef>,
    pub not: Option<Box<PredicateDef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InDef {
    pub property: String,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub values: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareDef {
    pub property: String,
    pub op: String,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDef {
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub descending: bool,
    /// Scoring function ordering (`ORDER BY RANK`).
    #[serde(default)]
    pub rank: Option<RankDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankDef {
    pub function: String,
    pub property: String,
    #[serde(default)]
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueDef {
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub model: Model,
    pub shaped: ShapedQuery,
    pub config: QueryConfigDef,
}

pub fn parse_yaml_query(yaml_src: &str) -> Result<ParsedQuery, DslError> {
    let doc: QueryDocument = serde_yaml::from_str(yaml_src)?;
    let model = build_model(&doc.model)?;
    let shaped = build_query(&model, &doc.query)?;
    Ok(ParsedQuery {
        model,
        shaped,
        config: doc.config.unwrap_or_default(),
    })
}

fn parse_dtype(s: &str) -> Result<DataType, DslError> {
    DataType::parse(s).ok_or_else(|| DslError::Invalid(format!("unknown type '{}'", s)))
}

fn build_model(def: &ModelDef) -> Result<Model, DslError> {
    let mut model = Model::new();
    for et in &def.entity_types {
        let mut entity = EntityType::new(&et.name, &et.container);
        for p in &et.properties {
            let data_type = parse_dtype(&p.data_type)?;
            let mut prop = Property::new(&p.name, data_type.clone(), p.nullable);
            if let Some(j) = &p.json_name {
                prop = prop.with_json_name(j);
            }
            if let Some(st) = &p.store_type {
                prop = prop.with_type_mapping(TypeMapping::new(data_type, st));
            }
            entity = entity.with_property(prop);
        }
        entity.key = et.key.clone();
        entity.partition_key = et.partition_key.clone();
        for nav in &et.embedded {
            let mut n = if nav.collection {
                EmbeddedNavigation::collection(&nav.name, &nav.target)
            } else {
                EmbeddedNavigation::reference(&nav.name, &nav.target)
            };
            if let Some(j) = &nav.json_name {
                n.json_name = j.clone();
            }
            entity = entity.with_embedded(n);
        }
        model.add_entity_type(entity);
    }
    model.validate()?;
    Ok(model)
}

/// Resolve a dotted property path (`Address.City`) through owned references.
fn resolve_column(model: &Model, et: &EntityType, path: &str) -> Result<SqlExpr, DslError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = et;
    let mut json_path = Vec::with_capacity(segments.len());
    for (i, seg) in segments.iter().enumerate() {
        if i + 1 == segments.len() {
            let p = current.property(seg)?;
            json_path.push(p.json_name.clone());
            return Ok(SqlExpr::Column {
                source: "c".into(),
                path: json_path,
                data_type: p.data_type.clone(),
                type_mapping: p.type_mapping.clone(),
            });
        }
        let nav = current
            .embedded
            .iter()
            .find(|n| n.name == *seg && !n.is_collection)
            .ok_or_else(|| {
                DslError::Invalid(format!(
                    "'{}' is not an owned reference of '{}'",
                    seg, current.name
                ))
            })?;
        json_path.push(nav.json_name.clone());
        current = model.entity_type(&nav.target)?.as_ref();
    }
    Err(DslError::Invalid("empty property path".into()))
}

fn column_type(expr: &SqlExpr) -> (DataType, Option<TypeMapping>) {
    match expr {
        SqlExpr::Column {
            data_type,
            type_mapping,
            ..
        } => (data_type.clone(), type_mapping.clone()),
        _ => (DataType::Object, None),
    }
}

fn literal(value: &serde_json::Value, data_type: &DataType) -> Scalar {
    Scalar::from_json_as(value, data_type).unwrap_or_else(|| Scalar::from_json(value))
}

fn value_expr(def: &ValueDef, data_type: DataType, mapping: Option<TypeMapping>) -> Result<SqlExpr, DslError> {
    match (&def.parameter, &def.value) {
        (Some(name), None) => Ok(SqlExpr::Parameter {
            name: name.clone(),
            data_type,
            type_mapping: mapping,
        }),
        (None, Some(v)) => Ok(SqlExpr::Constant {
            value: literal(v, &data_type),
            data_type,
            type_mapping: mapping,
        }),
        _ => Err(DslError::Invalid(
            "exactly one of 'parameter' or 'value' must be given".into(),
        )),
    }
}

fn parse_op(op: &str) -> Result<BinaryOp, DslError> {
    Ok(match op {
        "=" | "==" => BinaryOp::Equal,
        "!=" | "<>" => BinaryOp::NotEqual,
        "<" => BinaryOp::LessThan,
        "<=" => BinaryOp::LessThanOrEqual,
        ">" => BinaryOp::GreaterThan,
        ">=" => BinaryOp::GreaterThanOrEqual,
        other => return Err(DslError::Invalid(format!("unknown comparison '{}'", other))),
    })
}

fn build_predicate(model: &Model, et: &EntityType, def: &PredicateDef) -> Result<SqlExpr, DslError> {
    let present = [
        def.in_values.is_some(),
        def.compare.is_some(),
        def.is_null.is_some(),
        !def.and.is_empty(),
        !def.or.is_empty(),
        def.not.is_some(),
    ];
    if present.iter().filter(|p| **p).count() != 1 {
        return Err(DslError::Invalid(
            "a predicate needs exactly one of 'in', 'compare', 'is_null', 'and', 'or', 'not'".into(),
        ));
    }

    if let Some(InDef {
        property,
        parameter,
        values,
    }) = &def.in_values
    {
        let item = resolve_column(model, et, property)?;
        let (data_type, mapping) = column_type(&item);
        return match (parameter, values) {
            (Some(name), None) => Ok(SqlExpr::in_parameter(
                item,
                ParameterRef {
                    name: name.clone(),
                    element_type: data_type,
                    type_mapping: mapping,
                },
            )),
            (None, Some(values)) => {
                let list = values
                    .iter()
                    .map(|v| SqlExpr::Constant {
                        value: literal(v, &data_type),
                        data_type: data_type.clone(),
                        type_mapping: mapping.clone(),
                    })
                    .collect();
                Ok(SqlExpr::in_list(item, list))
            }
            _ => Err(DslError::Invalid(format!(
                "'in' on '{}' needs exactly one of 'parameter' or 'values'",
                property
            ))),
        };
    }

    if let Some(c) = &def.compare {
        let left = resolve_column(model, et, &c.property)?;
        let (data_type, mapping) = column_type(&left);
        let right = value_expr(
            &ValueDef {
                parameter: c.parameter.clone(),
                value: c.value.clone(),
            },
            data_type,
            mapping,
        )?;
        return Ok(SqlExpr::binary(parse_op(&c.op)?, left, right));
    }

    if let Some(property) = &def.is_null {
        return Ok(SqlExpr::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(resolve_column(model, et, property)?),
            type_mapping: None,
        });
    }

    if let Some(inner) = &def.not {
        return Ok(SqlExpr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(build_predicate(model, et, inner)?),
            type_mapping: None,
        });
    }

    if !def.and.is_empty() {
        fold(model, et, &def.and, BinaryOp::And)
    } else {
        fold(model, et, &def.or, BinaryOp::Or)
    }
}

fn fold(model: &Model, et: &EntityType, items: &[PredicateDef], op: BinaryOp) -> Result<SqlExpr, DslError> {
    let mut iter = items.iter();
    let first = iter
        .next()
        .ok_or_else(|| DslError::Invalid(format!("empty '{:?}' predicate", op)))?;
    let mut acc = build_predicate(model, et, first)?;
    for p in iter {
        acc = SqlExpr::binary(op, acc, build_predicate(model, et, p)?);
    }
    Ok(acc)
}

fn build_ordering(model: &Model, et: &EntityType, def: &OrderDef) -> Result<(SqlExpr, bool), DslError> {
    match (&def.property, &def.rank) {
        (Some(p), None) => Ok((resolve_column(model, et, p)?, !def.descending)),
        (None, Some(rank)) => {
            let mut args = vec![resolve_column(model, et, &rank.property)?];
            args.extend(rank.terms.iter().map(|t| SqlExpr::Constant {
                value: Scalar::Str(t.clone()),
                data_type: DataType::Utf8,
                type_mapping: None,
            }));
            Ok((
                SqlExpr::Function {
                    name: rank.function.clone(),
                    args,
                    is_scoring: true,
                    data_type: DataType::Float64,
                    type_mapping: None,
                },
                false,
            ))
        }
        _ => Err(DslError::Invalid(
            "an ordering needs exactly one of 'property' or 'rank'".into(),
        )),
    }
}

fn build_query(model: &Model, def: &QueryDef) -> Result<ShapedQuery, DslError> {
    match def {
        QueryDef::Select {
            entity,
            filter,
            order_by,
            limit,
            offset,
            project,
            distinct,
        } => {
            let et = model.entity_type(entity)?;
            let mut select = SelectExpression::for_entity(et);
            select.distinct = *distinct;
            if let Some(f) = filter {
                select.predicate = Some(build_predicate(model, et, f)?);
            }
            for o in order_by {
                let (expr, ascending) = build_ordering(model, et, o)?;
                select = select.with_ordering(expr, ascending);
            }
            if let Some(l) = limit {
                select.limit = Some(value_expr(l, DataType::Int32, None)?);
            }
            if let Some(o) = offset {
                select.offset = Some(value_expr(o, DataType::Int32, None)?);
            }

            let shaper = if project.is_empty() {
                ShaperExpr::Entity {
                    entity_type: et.name.clone(),
                    binding: 0,
                    nullable: false,
                }
            } else {
                let mut projection = Vec::with_capacity(project.len());
                let mut fields = Vec::with_capacity(project.len());
                for (i, p) in project.iter().enumerate() {
                    let column = resolve_column(model, et, p)?;
                    let (data_type, _) = column_type(&column);
                    let alias = p.replace('.', "_");
                    projection.push(ProjectionExpr {
                        item: ProjectionItem::Scalar(column),
                        alias: alias.clone(),
                    });
                    fields.push((
                        alias,
                        ShaperExpr::ProjectionBinding {
                            index: i,
                            data_type,
                            nullable: true,
                        },
                    ));
                }
                select.projection = projection;
                ShaperExpr::Record(fields)
            };
            Ok(ShapedQuery::new(QueryExpression::Select(select), shaper))
        }
        QueryDef::ReadItem { entity, keys } => {
            let et = model.entity_type(entity)?;
            let mut read_item = ReadItemExpression::new(Arc::clone(et));
            for (property, parameter) in keys {
                read_item = read_item.with_property_parameter(property, parameter);
            }
            Ok(ShapedQuery::new(
                QueryExpression::ReadItem(read_item),
                ShaperExpr::Entity {
                    entity_type: et.name.clone(),
                    binding: 0,
                    nullable: true,
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_core::expr::InValues;

    const CUSTOMERS: &str = r#"
model:
  entity_types:
    - name: Customer
      container: Customers
      key: [Id]
      properties:
        - { name: Id, type: Int32 }
        - { name: Name, type: Utf8, nullable: true }
      embedded:
        - { name: Address, target: Address }
    - name: Address
      properties:
        - { name: City, type: Utf8, nullable: true }
"#;

    #[test]
    fn parses_select_with_in_parameter() {
        let src = format!(
            "{}{}",
            CUSTOMERS,
            r#"
config: { tracking: no_tracking }
query:
  op: select
  entity: Customer
  filter: { in: { property: Id, parameter: ids } }
  order_by: [ { property: Address.City, descending: true } ]
  limit: { value: 5 }
"#
        );
        let parsed = parse_yaml_query(&src).unwrap();
        let QueryExpression::Select(select) = &parsed.shaped.query else {
            panic!("expected select");
        };
        assert!(matches!(
            select.predicate,
            Some(SqlExpr::In {
                values: InValues::Parameter(_),
                ..
            })
        ));
        assert!(matches!(
            &select.orderings[0].expr,
            SqlExpr::Column { path, .. } if path == &vec!["Address".to_string(), "City".to_string()]
        ));
        assert_eq!(parsed.config.tracking.as_deref(), Some("no_tracking"));

        let mut cfg = CompilerConfig::default();
        parsed.config.apply(&mut cfg).unwrap();
        assert_eq!(cfg.tracking_behavior, QueryTrackingBehavior::NoTracking);
    }

    #[test]
    fn projection_builds_a_record_shaper() {
        let src = format!(
            "{}{}",
            CUSTOMERS,
            "query: { op: select, entity: Customer, project: [Id, Name] }\n"
        );
        let parsed = parse_yaml_query(&src).unwrap();
        let ShaperExpr::Record(fields) = &parsed.shaped.shaper else {
            panic!("expected record");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].0, "Name");
    }

    #[test]
    fn read_item_maps_keys_to_parameters() {
        let src = format!(
            "{}{}",
            CUSTOMERS,
            "query: { op: read_item, entity: Customer, keys: { Id: id_0 } }\n"
        );
        let parsed = parse_yaml_query(&src).unwrap();
        let QueryExpression::ReadItem(ri) = &parsed.shaped.query else {
            panic!("expected read item");
        };
        assert_eq!(ri.property_parameters.get("Id").map(String::as_str), Some("id_0"));
    }

    #[test]
    fn unknown_types_and_properties_are_rejected() {
        let bad_type = "model: { entity_types: [ { name: A, properties: [ { name: X, type: Money } ] } ] }\nquery: { op: select, entity: A }\n";
        assert!(matches!(parse_yaml_query(bad_type), Err(DslError::Invalid(_))));

        let bad_prop = format!(
            "{}{}",
            CUSTOMERS,
            "query: { op: select, entity: Customer, filter: { is_null: Email } }\n"
        );
        assert!(matches!(parse_yaml_query(&bad_prop), Err(DslError::Core(_))));
    }
}
