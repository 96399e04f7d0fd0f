//! Runtime parameter values supplied per execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Scalar;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Scalar(Scalar),
    Collection(Vec<Scalar>),
}

impl ParameterValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParameterValue::Scalar(s) => s.to_json(),
            ParameterValue::Collection(items) => {
                serde_json::Value::Array(items.iter().map(Scalar::to_json).collect())
            }
        }
    }

    /// Arrays become collections; everything else is a scalar.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Array(items) => {
                ParameterValue::Collection(items.iter().map(Scalar::from_json).collect())
            }
            other => ParameterValue::Scalar(Scalar::from_json(other)),
        }
    }
}

impl From<Scalar> for ParameterValue {
    fn from(s: Scalar) -> Self {
        ParameterValue::Scalar(s)
    }
}

impl From<Vec<Scalar>> for ParameterValue {
    fn from(v: Vec<Scalar>) -> Self {
        ParameterValue::Collection(v)
    }
}

/// Name -> value map. Every placeholder a plan references must be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterValues(BTreeMap<String, ParameterValue>);

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Result<&ParameterValue> {
        self.0
            .get(name)
            .ok_or_else(|| Error::UnboundParameter(name.to_string()))
    }

    /// Scalar lookup; a collection where a scalar is expected is a plan bug.
    pub fn scalar(&self, name: &str) -> Result<&Scalar> {
        match self.get(name)? {
            ParameterValue::Scalar(s) => Ok(s),
            ParameterValue::Collection(_) => Err(Error::Unreachable(format!(
                "parameter '{}' is bound to a collection where a scalar is expected",
                name
            ))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
