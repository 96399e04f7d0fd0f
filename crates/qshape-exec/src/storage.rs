//! Storage collaborator boundary.
//!
//! Enumerables hand finalized commands to a `StorageClient` and get raw rows
//! back; everything store-specific stays behind this trait.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use qshape_core::config::RowLayout;
use qshape_core::expr::SelectExpression;
use qshape_core::model::EntityType;
use qshape_core::types::Scalar;
use qshape_planner::sqlgen::SqlQuery;

use crate::error::{ExecError, Result};

/// One raw result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Row {
    Document(serde_json::Value),
    Ordinal(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub container: String,
    pub partition_key: Option<String>,
    pub layout: RowLayout,
    pub sql: SqlQuery,
    /// The tree `sql` was rendered from, for stores that evaluate it directly.
    pub select: SelectExpression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadItemRequest {
    pub container: String,
    pub partition_key: Option<String>,
    pub id: String,
}

pub trait StorageClient: Send + Sync + Debug {
    fn execute_query(&self, request: &QueryRequest) -> Result<Vec<Row>>;

    fn read_item(&self, request: &ReadItemRequest) -> Result<Option<Row>>;
}

/// Document id for the given key values: each part's text with `\` and `|`
/// escaped, joined with `|`. Distinct key tuples never share an id.
pub fn document_id(key: &[Scalar]) -> Result<String> {
    if key.is_empty() {
        return Err(ExecError::Storage("document id needs at least one key value".into()));
    }
    if key.iter().any(Scalar::is_null) {
        return Err(ExecError::Storage("document id cannot contain null key values".into()));
    }
    Ok(key
        .iter()
        .map(|part| escape_id_part(&part.to_key_string()))
        .collect::<Vec<_>>()
        .join("|"))
}

fn escape_id_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for ch in part.chars() {
        if ch == '\\' || ch == '|' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Read the key values of `entity_type` out of a stored document.
pub fn key_values_of(entity_type: &EntityType, doc: &serde_json::Value) -> Result<Vec<Scalar>> {
    entity_type
        .key_properties()?
        .into_iter()
        .map(|p| {
            let node = doc.get(&p.json_name).unwrap_or(&serde_json::Value::Null);
            Scalar::from_json_as(node, &p.data_type).ok_or_else(|| {
                ExecError::Storage(format!(
                    "key '{}' of '{}' is not a {:?}",
                    p.name, entity_type.name, p.data_type
                ))
            })
        })
        .collect()
}
