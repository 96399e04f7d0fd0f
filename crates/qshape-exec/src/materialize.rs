//! Row shaping: interpret a `RowShaper` over one raw row.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use qshape_core::types::{KeyValues, Scalar};
use qshape_planner::binding::{EntityRead, IdentityMode, RowShaper, ValueAccess};

use crate::context::StateManager;
use crate::error::{ExecError, Result};
use crate::eval::read_path;
use crate::storage::Row;

/// A materialized entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInstance {
    pub entity_type: String,
    pub values: BTreeMap<String, Scalar>,
    pub embedded: BTreeMap<String, Item>,
}

impl EntityInstance {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            values: BTreeMap::new(),
            embedded: BTreeMap::new(),
        }
    }

    pub fn get(&self, property: &str) -> Option<&Scalar> {
        self.values.get(property)
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.values {
            map.insert(k.clone(), v.to_json());
        }
        for (k, v) in &self.embedded {
            map.insert(k.clone(), v.to_json());
        }
        Value::Object(map)
    }
}

/// One shaped result.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Null,
    Value(Scalar),
    Entity(Arc<EntityInstance>),
    Record(Vec<(String, Item)>),
    List(Vec<Item>),
}

impl Item {
    pub fn to_json(&self) -> Value {
        match self {
            Item::Null => Value::Null,
            Item::Value(s) => s.to_json(),
            Item::Entity(e) => e.to_json(),
            Item::Record(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Item::List(items) => Value::Array(items.iter().map(Item::to_json).collect()),
        }
    }
}

/// Result element types an enumerable can yield.
pub trait FromItem: Sized {
    fn from_item(item: Item) -> Result<Self>;
}

impl FromItem for Item {
    fn from_item(item: Item) -> Result<Self> {
        Ok(item)
    }
}

impl FromItem for Value {
    fn from_item(item: Item) -> Result<Self> {
        Ok(item.to_json())
    }
}

impl FromItem for Scalar {
    fn from_item(item: Item) -> Result<Self> {
        match item {
            Item::Value(s) => Ok(s),
            Item::Null => Ok(Scalar::Null),
            other => Err(ExecError::Materialize(format!(
                "expected a scalar result, got {:?}",
                other
            ))),
        }
    }
}

impl FromItem for Arc<EntityInstance> {
    fn from_item(item: Item) -> Result<Self> {
        match item {
            Item::Entity(e) => Ok(e),
            other => Err(ExecError::Materialize(format!(
                "expected an entity result, got {:?}",
                other
            ))),
        }
    }
}

impl<T: FromItem> FromItem for Option<T> {
    fn from_item(item: Item) -> Result<Self> {
        match item {
            Item::Null => Ok(None),
            other => T::from_item(other).map(Some),
        }
    }
}

/// Identity resolution state for one enumeration.
pub struct IdentityScope<'a> {
    state_manager: &'a StateManager,
    per_query: Option<BTreeMap<(String, KeyValues), Arc<EntityInstance>>>,
}

impl<'a> IdentityScope<'a> {
    pub fn new(state_manager: &'a StateManager, standalone: bool) -> Self {
        Self {
            state_manager,
            per_query: standalone.then(BTreeMap::new),
        }
    }

    fn lookup(&self, mode: IdentityMode, entity_type: &str, key: &KeyValues) -> Option<Arc<EntityInstance>> {
        match mode {
            IdentityMode::None => None,
            IdentityMode::Tracked => self.state_manager.try_get(entity_type, key),
            IdentityMode::PerQuery => self
                .per_query
                .as_ref()
                .and_then(|m| m.get(&(entity_type.to_string(), key.clone())).cloned()),
        }
    }

    fn record(&mut self, mode: IdentityMode, key: KeyValues, instance: Arc<EntityInstance>) -> Arc<EntityInstance> {
        match mode {
            IdentityMode::None => instance,
            IdentityMode::Tracked => self.state_manager.track(key, instance),
            IdentityMode::PerQuery => match self.per_query.as_mut() {
                Some(m) => Arc::clone(
                    m.entry((instance.entity_type.clone(), key))
                        .or_insert(instance),
                ),
                None => instance,
            },
        }
    }
}

pub fn shape_row(shaper: &RowShaper, row: &Row, scope: &mut IdentityScope<'_>) -> Result<Item> {
    match row {
        Row::Document(doc) => shape_node(shaper, doc, None, scope),
        Row::Ordinal(values) => shape_node(shaper, &Value::Null, Some(values), scope),
    }
}

fn shape_node(
    shaper: &RowShaper,
    node: &Value,
    ordinals: Option<&[Value]>,
    scope: &mut IdentityScope<'_>,
) -> Result<Item> {
    match shaper {
        RowShaper::Read {
            access,
            data_type,
            nullable,
        } => {
            let raw = match (access, ordinals) {
                (ValueAccess::Path(path), None) => read_path(node, path),
                (ValueAccess::Ordinal(i), Some(values)) => values.get(*i).ok_or_else(|| {
                    ExecError::Materialize(format!("row has no ordinal {}", i))
                })?,
                (access, _) => {
                    return Err(ExecError::Materialize(format!(
                        "{:?} does not match the row layout",
                        access
                    )));
                }
            };
            let value = Scalar::from_json_as(raw, data_type).ok_or_else(|| {
                ExecError::Materialize(format!("value {} is not a {:?}", raw, data_type))
            })?;
            if value.is_null() && !nullable {
                return Err(ExecError::Materialize(
                    "null read for a non-nullable value".into(),
                ));
            }
            Ok(Item::Value(value))
        }
        RowShaper::Entity(read) => {
            if ordinals.is_some() {
                return Err(ExecError::Materialize(
                    "entities cannot be read from ordinal rows".into(),
                ));
            }
            shape_entity(read, read_path(node, &read.path), scope)
        }
        RowShaper::Collection { path, element } => match read_path(node, path) {
            Value::Null => Ok(Item::List(vec![])),
            Value::Array(items) => Ok(Item::List(
                items
                    .iter()
                    .map(|i| shape_node(element, i, None, scope))
                    .collect::<Result<_>>()?,
            )),
            other => Err(ExecError::Materialize(format!(
                "expected an array, found {}",
                other
            ))),
        },
        RowShaper::Record(fields) => Ok(Item::Record(
            fields
                .iter()
                .map(|(name, s)| Ok((name.clone(), shape_node(s, node, ordinals, scope)?)))
                .collect::<Result<_>>()?,
        )),
        RowShaper::Constant(v) => Ok(Item::Value(v.clone())),
    }
}

fn read_property(read: &EntityRead, node: &Value, name: &str) -> Result<Scalar> {
    let p = read
        .properties
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ExecError::Materialize(format!("'{}' has no property '{}'", read.entity_type, name)))?;
    let raw = node.get(&p.json_name).unwrap_or(&Value::Null);
    let value = Scalar::from_json_as(raw, &p.data_type).ok_or_else(|| {
        ExecError::Materialize(format!(
            "property '{}.{}' holds {} which is not a {:?}",
            read.entity_type, p.name, raw, p.data_type
        ))
    })?;
    if value.is_null() && !p.nullable {
        return Err(ExecError::Materialize(format!(
            "required property '{}.{}' is missing",
            read.entity_type, p.name
        )));
    }
    Ok(value)
}

fn shape_entity(read: &EntityRead, node: &Value, scope: &mut IdentityScope<'_>) -> Result<Item> {
    if node.is_null() {
        if read.nullable {
            return Ok(Item::Null);
        }
        return Err(ExecError::Materialize(format!(
            "required '{}' entity is missing from the row",
            read.entity_type
        )));
    }

    let key = if read.identity == IdentityMode::None {
        None
    } else {
        let values = read
            .key
            .iter()
            .map(|k| read_property(read, node, k))
            .collect::<Result<Vec<_>>>()?;
        Some(KeyValues(values))
    };
    if let Some(k) = &key {
        if let Some(existing) = scope.lookup(read.identity, &read.entity_type, k) {
            return Ok(Item::Entity(existing));
        }
    }

    let mut instance = EntityInstance::new(read.entity_type.clone());
    for p in &read.properties {
        instance.values.insert(p.name.clone(), read_property(read, node, &p.name)?);
    }
    for (name, s) in &read.embedded {
        instance.embedded.insert(name.clone(), shape_node(s, node, None, scope)?);
    }

    let instance = Arc::new(instance);
    Ok(Item::Entity(match key {
        Some(k) => scope.record(read.identity, k, instance),
        None => instance,
    }))
}
