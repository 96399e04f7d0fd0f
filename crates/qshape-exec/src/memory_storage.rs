//! In-memory document store.
//!
//! Holds JSON documents per container and evaluates finalized select trees
//! directly, so the runtime and tests can run queries without a server.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use qshape_core::config::RowLayout;
use qshape_core::expr::{ProjectionItem, SelectExpression, SqlExpr};
use qshape_core::model::EntityType;
use qshape_core::types::Scalar;

use crate::error::{ExecError, Result};
use crate::eval::{eval, json_cmp, read_path, truthy, EvalContext};
use crate::storage::{
    document_id, key_values_of, QueryRequest, ReadItemRequest, Row, StorageClient,
};

/// Weight added to each rank when fusing several scoring functions.
const RRF_K: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
struct StoredDocument {
    id: String,
    partition: Option<String>,
    body: Value,
}

/// Thread-safe in-memory container map.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    containers: Arc<Mutex<HashMap<String, Vec<StoredDocument>>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<StoredDocument>>> {
        self.containers.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store `doc` as an instance of `entity_type`, replacing any document
    /// with the same id and partition.
    pub fn insert_entity(&self, entity_type: &EntityType, doc: Value) -> Result<String> {
        if !doc.is_object() {
            return Err(ExecError::Storage(format!(
                "'{}' documents must be JSON objects",
                entity_type.name
            )));
        }
        let id = document_id(&key_values_of(entity_type, &doc)?)?;
        let partition = match &entity_type.partition_key {
            Some(prop) => {
                let p = entity_type.property(prop)?;
                match Scalar::from_json_as(doc.get(&p.json_name).unwrap_or(&Value::Null), &p.data_type) {
                    Some(Scalar::Null) | None => None,
                    Some(v) => Some(v.to_key_string()),
                }
            }
            None => None,
        };

        let mut containers = self.lock();
        let docs = containers.entry(entity_type.container.clone()).or_default();
        docs.retain(|d| !(d.id == id && d.partition == partition));
        docs.push(StoredDocument {
            id: id.clone(),
            partition,
            body: doc,
        });
        Ok(id)
    }

    /// Load one JSON document per line; blank lines are skipped.
    pub fn load_json_lines<R: BufRead>(&self, entity_type: &EntityType, reader: R) -> Result<usize> {
        let mut n = 0;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| ExecError::Storage(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let doc: Value = serde_json::from_str(&line).map_err(|e| {
                ExecError::Storage(format!("line {}: {}", lineno + 1, e))
            })?;
            self.insert_entity(entity_type, doc)?;
            n += 1;
        }
        Ok(n)
    }

    pub fn len(&self, container: &str) -> usize {
        self.lock().get(container).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().values().all(Vec::is_empty)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn documents(&self, container: &str, partition_key: Option<&str>) -> Vec<Value> {
        self.lock()
            .get(container)
            .map(|docs| {
                docs.iter()
                    .filter(|d| partition_key.is_none() || d.partition.as_deref() == partition_key)
                    .map(|d| d.body.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn eval_count(expr: &SqlExpr, ctx: &EvalContext<'_>, what: &str) -> Result<usize> {
    let v = eval(expr, ctx)?;
    v.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| ExecError::Storage(format!("{} must be a non-negative integer, got {}", what, v)))
}

fn sort_documents(
    select: &SelectExpression,
    docs: Vec<Value>,
    params: &BTreeMap<String, Value>,
) -> Result<Vec<Value>> {
    if select.orderings.is_empty() {
        return Ok(docs);
    }
    let ctx_for = |doc: &'_ Value| -> Result<Vec<Value>> {
        let ctx = EvalContext {
            alias: &select.alias,
            doc,
            params,
        };
        select.orderings.iter().map(|o| eval(&o.expr, &ctx)).collect()
    };

    let mut keyed = docs
        .into_iter()
        .map(|d| Ok((ctx_for(&d)?, d)))
        .collect::<Result<Vec<_>>>()?;

    if select.is_score_ordered() {
        // Only scoring orderings rank; a single one orders by its raw score,
        // several fuse by reciprocal rank. Other orderings break ties.
        let scoring: Vec<usize> = select
            .orderings
            .iter()
            .enumerate()
            .filter(|(_, o)| matches!(o.expr, SqlExpr::Function { is_scoring: true, .. }))
            .map(|(i, _)| i)
            .collect();
        let mut fused = vec![0.0f64; keyed.len()];
        if let [only] = scoring.as_slice() {
            let descending = !select.orderings[*only].ascending;
            for (doc, (values, _)) in keyed.iter().enumerate() {
                let score = values[*only].as_f64().unwrap_or(0.0);
                fused[doc] = if descending { score } else { -score };
            }
        } else {
            for &i in &scoring {
                let ascending = select.orderings[i].ascending;
                let mut idx: Vec<usize> = (0..keyed.len()).collect();
                idx.sort_by(|&a, &b| {
                    let ord = json_cmp(&keyed[a].0[i], &keyed[b].0[i]);
                    if ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
                for (rank, &doc) in idx.iter().enumerate() {
                    fused[doc] += 1.0 / (RRF_K + rank as f64 + 1.0);
                }
            }
        }
        let mut order: Vec<usize> = (0..keyed.len()).collect();
        order.sort_by(|&a, &b| {
            let ord = fused[b].partial_cmp(&fused[a]).unwrap_or(Ordering::Equal);
            if ord != Ordering::Equal {
                return ord;
            }
            for (i, o) in select.orderings.iter().enumerate() {
                if scoring.contains(&i) {
                    continue;
                }
                let ord = json_cmp(&keyed[a].0[i], &keyed[b].0[i]);
                let ord = if o.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        let mut slots: Vec<Option<Value>> = keyed.into_iter().map(|(_, d)| Some(d)).collect();
        return Ok(order.into_iter().filter_map(|i| slots[i].take()).collect());
    }

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, o) in select.orderings.iter().enumerate() {
            let ord = json_cmp(&a[i], &b[i]);
            let ord = if o.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(keyed.into_iter().map(|(_, d)| d).collect())
}

fn project(select: &SelectExpression, ctx: &EvalContext<'_>) -> Result<Vec<Value>> {
    select
        .projection
        .iter()
        .map(|p| match &p.item {
            ProjectionItem::Scalar(expr) => eval(expr, ctx),
            ProjectionItem::Entity { path, .. } => Ok(read_path(ctx.doc, path).clone()),
        })
        .collect()
}

impl StorageClient for MemoryDocumentStore {
    fn execute_query(&self, request: &QueryRequest) -> Result<Vec<Row>> {
        let select = &request.select;
        let params: BTreeMap<String, Value> = request
            .sql
            .parameters
            .iter()
            .map(|(name, v)| (name.trim_start_matches('@').to_string(), v.to_json()))
            .collect();

        let mut docs = Vec::new();
        for doc in self.documents(&request.container, request.partition_key.as_deref()) {
            let keep = match &select.predicate {
                Some(p) => truthy(&eval(
                    p,
                    &EvalContext {
                        alias: &select.alias,
                        doc: &doc,
                        params: &params,
                    },
                )?),
                None => true,
            };
            if keep {
                docs.push(doc);
            }
        }

        let docs = sort_documents(select, docs, &params)?;

        let empty = Value::Null;
        let scalar_ctx = EvalContext {
            alias: &select.alias,
            doc: &empty,
            params: &params,
        };
        let offset = match &select.offset {
            Some(e) => eval_count(e, &scalar_ctx, "OFFSET")?,
            None => 0,
        };
        let limit = match &select.limit {
            Some(e) => Some(eval_count(e, &scalar_ctx, "LIMIT")?),
            None => None,
        };

        let mut projected: Vec<Vec<Value>> = Vec::with_capacity(docs.len());
        for doc in &docs {
            let values = project(
                select,
                &EvalContext {
                    alias: &select.alias,
                    doc,
                    params: &params,
                },
            )?;
            if select.distinct && projected.contains(&values) {
                continue;
            }
            projected.push(values);
        }

        let window = projected
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX));

        Ok(match request.layout {
            RowLayout::Ordinal => window.map(Row::Ordinal).collect(),
            RowLayout::Document => window
                .map(|mut values| {
                    if select.projection.len() == 1 {
                        Row::Document(values.pop().unwrap_or(Value::Null))
                    } else {
                        Row::Document(Value::Object(
                            select
                                .projection
                                .iter()
                                .map(|p| p.alias.clone())
                                .zip(values)
                                .collect(),
                        ))
                    }
                })
                .collect(),
        })
    }

    fn read_item(&self, request: &ReadItemRequest) -> Result<Option<Row>> {
        Ok(self.lock().get(&request.container).and_then(|docs| {
            docs.iter()
                .find(|d| {
                    d.id == request.id
                        && (request.partition_key.is_none()
                            || d.partition == request.partition_key)
                })
                .map(|d| Row::Document(d.body.clone()))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_core::expr::BinaryOp;
    use qshape_core::model::{DataType, Property};
    use qshape_core::params::ParameterValues;
    use qshape_planner::sqlgen::{DocumentQuerySqlGeneratorFactory, QuerySqlGeneratorFactory};

    fn customer() -> EntityType {
        EntityType::new("Customer", "Customers")
            .with_property(Property::new("Id", DataType::Int32, false).with_json_name("id"))
            .with_property(Property::new("Name", DataType::Utf8, true))
            .with_property(Property::new("Region", DataType::Utf8, false))
            .with_key(&["Id"])
            .with_partition_key("Region")
    }

    fn seeded() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        let et = customer();
        for (id, name, region) in [(1, "Ann", "eu"), (2, "Bob", "us"), (3, "Cy", "eu")] {
            store
                .insert_entity(&et, serde_json::json!({ "id": id, "Name": name, "Region": region }))
                .unwrap();
        }
        store
    }

    fn request(select: SelectExpression, params: &ParameterValues, partition: Option<&str>) -> QueryRequest {
        let sql = DocumentQuerySqlGeneratorFactory
            .create()
            .get_sql_query(&select, params)
            .unwrap();
        QueryRequest {
            container: select.container.clone(),
            partition_key: partition.map(str::to_string),
            layout: RowLayout::Document,
            sql,
            select,
        }
    }

    #[test]
    fn filters_orders_and_pages() {
        let store = seeded();
        let select = SelectExpression::for_entity(&customer())
            .with_predicate(SqlExpr::binary(
                BinaryOp::GreaterThan,
                SqlExpr::column("c", "id", DataType::Int32),
                SqlExpr::parameter("min", DataType::Int32),
            ))
            .with_ordering(SqlExpr::column("c", "id", DataType::Int32), false)
            .with_limit(SqlExpr::constant(Scalar::I32(1), None));
        let params = ParameterValues::new().with("min", Scalar::I32(1));
        let rows = store.execute_query(&request(select, &params, None)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], Row::Document(serde_json::json!({ "id": 3, "Name": "Cy", "Region": "eu" })));
    }

    #[test]
    fn partition_key_scopes_queries_and_lookups() {
        let store = seeded();
        let select = SelectExpression::for_entity(&customer());
        let rows = store
            .execute_query(&request(select, &ParameterValues::new(), Some("us")))
            .unwrap();
        assert_eq!(rows.len(), 1);

        let hit = store
            .read_item(&ReadItemRequest {
                container: "Customers".into(),
                partition_key: Some("eu".into()),
                id: "3".into(),
            })
            .unwrap();
        assert!(hit.is_some());
        let miss = store
            .read_item(&ReadItemRequest {
                container: "Customers".into(),
                partition_key: Some("us".into()),
                id: "3".into(),
            })
            .unwrap();
        assert!(miss.is_none());
    }

    fn bio_store() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        let et = customer();
        for (id, name) in [(1, "go"), (2, "rust rust"), (3, "rust"), (4, "go")] {
            store
                .insert_entity(&et, serde_json::json!({ "id": id, "Name": name, "Region": "eu" }))
                .unwrap();
        }
        store
    }

    fn name_score(term: &str) -> SqlExpr {
        SqlExpr::Function {
            name: "FullTextScore".into(),
            args: vec![
                SqlExpr::column("c", "Name", DataType::Utf8),
                SqlExpr::constant(Scalar::Str(term.into()), None),
            ],
            is_scoring: true,
            data_type: DataType::Float64,
            type_mapping: None,
        }
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .filter_map(|r| match r {
                Row::Document(d) => d["id"].as_i64(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn single_score_ordering_honours_direction() {
        let store = bio_store();
        let id = SqlExpr::column("c", "id", DataType::Int32);
        let params = ParameterValues::new();

        let best_first = SelectExpression::for_entity(&customer())
            .with_ordering(name_score("rust"), false)
            .with_ordering(id.clone(), true);
        let rows = store.execute_query(&request(best_first, &params, None)).unwrap();
        assert_eq!(ids(&rows), vec![2, 3, 1, 4]);

        let worst_first = SelectExpression::for_entity(&customer())
            .with_ordering(name_score("rust"), true)
            .with_ordering(id, true);
        let rows = store.execute_query(&request(worst_first, &params, None)).unwrap();
        assert_eq!(ids(&rows), vec![1, 4, 3, 2]);
    }

    #[test]
    fn plain_orderings_only_break_score_ties() {
        let store = bio_store();
        let select = SelectExpression::for_entity(&customer())
            .with_ordering(name_score("rust"), false)
            .with_ordering(SqlExpr::column("c", "id", DataType::Int32), false);
        let rows = store
            .execute_query(&request(select, &ParameterValues::new(), None))
            .unwrap();
        assert_eq!(ids(&rows), vec![2, 3, 4, 1]);
    }

    #[test]
    fn several_scores_fuse_by_reciprocal_rank() {
        let store = bio_store();
        let select = SelectExpression::for_entity(&customer())
            .with_ordering(name_score("rust"), true)
            .with_ordering(name_score("go"), false)
            .with_ordering(SqlExpr::column("c", "id", DataType::Int32), false);
        let rows = store
            .execute_query(&request(select, &ParameterValues::new(), None))
            .unwrap();
        // 2 and 3 fuse to the same score, so the id ordering decides.
        assert_eq!(ids(&rows), vec![1, 4, 3, 2]);
    }

    #[test]
    fn composite_keys_with_separators_stay_distinct() {
        let et = EntityType::new("Pair", "Pairs")
            .with_property(Property::new("A", DataType::Utf8, false))
            .with_property(Property::new("B", DataType::Utf8, false))
            .with_key(&["A", "B"]);
        let store = MemoryDocumentStore::new();
        let first = store
            .insert_entity(&et, serde_json::json!({ "A": "a|b", "B": "c" }))
            .unwrap();
        let second = store
            .insert_entity(&et, serde_json::json!({ "A": "a", "B": "b|c" }))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(store.len("Pairs"), 2);

        let hit = store
            .read_item(&ReadItemRequest {
                container: "Pairs".into(),
                partition_key: None,
                id: first,
            })
            .unwrap();
        assert_eq!(hit, Some(Row::Document(serde_json::json!({ "A": "a|b", "B": "c" }))));
    }

    #[test]
    fn json_lines_load_skips_blank_lines() {
        let store = MemoryDocumentStore::new();
        let data = "{\"id\":1,\"Region\":\"eu\"}\n\n{\"id\":2,\"Region\":\"us\"}\n";
        let n = store.load_json_lines(&customer(), data.as_bytes()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.len("Customers"), 2);
    }
}
