//! Entity/property metadata the translator binds query plans against.
//!
//! Model building and conventions live elsewhere; this is the read-only
//! result the compiler consumes. Entity types are shared as `Arc`s and
//! compared by value, so a model rebuilt from the same definitions is
//! interchangeable with the original.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
    Date64,
    Decimal128,
    /// No static type is known (e.g. a null element with no declared type).
    Object,
}

impl DataType {
    pub fn parse(s: &str) -> Option<DataType> {
        Some(match s {
            "Boolean" | "bool" => DataType::Boolean,
            "Int32" | "i32" | "int" => DataType::Int32,
            "Int64" | "i64" | "long" => DataType::Int64,
            "Float32" | "f32" => DataType::Float32,
            "Float64" | "f64" | "double" => DataType::Float64,
            "Utf8" | "string" => DataType::Utf8,
            "Binary" | "bytes" => DataType::Binary,
            "Date64" => DataType::Date64,
            "Decimal128" | "decimal" => DataType::Decimal128,
            "Object" | "object" => DataType::Object,
            _ => return None,
        })
    }
}

/// Provider-level mapping of a value: its type plus the store type name the
/// provider renders/binds it as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeMapping {
    pub data_type: DataType,
    pub store_type: String,
}

impl TypeMapping {
    pub fn new(data_type: DataType, store_type: impl Into<String>) -> Self {
        Self {
            data_type,
            store_type: store_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Name of the field in the stored document.
    pub json_name: String,
    #[serde(default)]
    pub type_mapping: Option<TypeMapping>,
}

impl Property {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        let name = name.into();
        Self {
            json_name: name.clone(),
            name,
            data_type,
            nullable,
            type_mapping: None,
        }
    }

    pub fn with_json_name(mut self, json_name: impl Into<String>) -> Self {
        self.json_name = json_name.into();
        self
    }

    pub fn with_type_mapping(mut self, mapping: TypeMapping) -> Self {
        self.type_mapping = Some(mapping);
        self
    }
}

/// An owned type stored inside its owner's document (JSON sub-object or array).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedNavigation {
    pub name: String,
    pub target: String,
    pub json_name: String,
    pub is_collection: bool,
}

impl EmbeddedNavigation {
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            json_name: name.clone(),
            name,
            target: target.into(),
            is_collection: false,
        }
    }

    pub fn collection(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            is_collection: true,
            ..Self::reference(name, target)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    /// Container (collection/table) the type is stored in; empty for owned types.
    pub container: String,
    pub properties: Vec<Property>,
    /// Key property names, in key order.
    pub key: Vec<String>,
    #[serde(default)]
    pub partition_key: Option<String>,
    #[serde(default)]
    pub embedded: Vec<EmbeddedNavigation>,
}

impl EntityType {
    pub fn new(name: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            properties: vec![],
            key: vec![],
            partition_key: None,
            embedded: vec![],
        }
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_key(mut self, key: &[&str]) -> Self {
        self.key = key.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_partition_key(mut self, property: impl Into<String>) -> Self {
        self.partition_key = Some(property.into());
        self
    }

    pub fn with_embedded(mut self, navigation: EmbeddedNavigation) -> Self {
        self.embedded.push(navigation);
        self
    }

    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property(&self, name: &str) -> Result<&Property> {
        self.find_property(name).ok_or_else(|| {
            Error::Model(format!(
                "entity type '{}' has no property '{}'",
                self.name, name
            ))
        })
    }

    pub fn key_properties(&self) -> Result<Vec<&Property>> {
        self.key.iter().map(|k| self.property(k)).collect()
    }
}

/// The set of mapped entity types, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    entity_types: BTreeMap<String, Arc<EntityType>>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.add_entity_type(entity_type);
        self
    }

    pub fn add_entity_type(&mut self, entity_type: EntityType) {
        self.entity_types
            .insert(entity_type.name.clone(), Arc::new(entity_type));
    }

    pub fn find_entity_type(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.entity_types.get(name)
    }

    pub fn entity_type(&self, name: &str) -> Result<&Arc<EntityType>> {
        self.find_entity_type(name)
            .ok_or_else(|| Error::Model(format!("entity type '{}' is not in the model", name)))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.entity_types.values()
    }

    /// Check key/partition/navigation references resolve.
    pub fn validate(&self) -> Result<()> {
        for et in self.entity_types.values() {
            for k in &et.key {
                et.property(k)?;
            }
            if let Some(pk) = &et.partition_key {
                et.property(pk)?;
            }
            for nav in &et.embedded {
                self.entity_type(&nav.target)?;
            }
        }
        Ok(())
    }
}
