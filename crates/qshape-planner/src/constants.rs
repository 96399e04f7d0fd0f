//! Liftable constants: re-resolvable stand-ins for compile-time values.
//!
//! A compiled plan is cached and reused by many executions, possibly from
//! different context instances. It must therefore never hold the live
//! services or metadata objects of the compilation that produced it.
//! Instead each such value is lifted into a `LiftableConstant`: the original
//! value, a data-only `Resolution` describing how to fetch an equivalent value
//! from a fresh `MaterializerContext`, a stable name and a declared type.
//! Freezing a `ConstantTable` drops the originals and keeps only the
//! name/resolution/type triples.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use qshape_core::error::{Error, Result};
use qshape_core::factory::SqlExpressionFactory;
use qshape_core::id::ConstantRef;
use qshape_core::model::{EntityType, Model, Property};

use crate::sqlgen::QuerySqlGeneratorFactory;

/// What a lifted constant may be re-resolved against at execution time.
pub trait MaterializerContext {
    fn model(&self) -> &Model;
    fn sql_generator_factory(&self) -> Arc<dyn QuerySqlGeneratorFactory>;
    fn sql_expression_factory(&self) -> Arc<dyn SqlExpressionFactory>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiftedType {
    SqlGeneratorFactory,
    SqlExpressionFactory,
    EntityType,
    Property,
}

impl fmt::Display for LiftedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LiftedType::SqlGeneratorFactory => "QuerySqlGeneratorFactory",
            LiftedType::SqlExpressionFactory => "SqlExpressionFactory",
            LiftedType::EntityType => "EntityType",
            LiftedType::Property => "Property",
        };
        f.write_str(s)
    }
}

/// A live value captured during compilation.
#[derive(Debug, Clone)]
pub enum ConstantValue {
    SqlGeneratorFactory(Arc<dyn QuerySqlGeneratorFactory>),
    SqlExpressionFactory(Arc<dyn SqlExpressionFactory>),
    EntityType(Arc<EntityType>),
    Property(Property),
}

impl ConstantValue {
    pub fn lifted_type(&self) -> LiftedType {
        match self {
            ConstantValue::SqlGeneratorFactory(_) => LiftedType::SqlGeneratorFactory,
            ConstantValue::SqlExpressionFactory(_) => LiftedType::SqlExpressionFactory,
            ConstantValue::EntityType(_) => LiftedType::EntityType,
            ConstantValue::Property(_) => LiftedType::Property,
        }
    }
}

/// How to re-derive a constant from a materializer context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    SqlGeneratorFactory,
    SqlExpressionFactory,
    EntityType { name: String },
    Property { entity_type: String, property: String },
}

impl Resolution {
    /// Type of the value this resolution yields.
    pub fn produces(&self) -> LiftedType {
        match self {
            Resolution::SqlGeneratorFactory => LiftedType::SqlGeneratorFactory,
            Resolution::SqlExpressionFactory => LiftedType::SqlExpressionFactory,
            Resolution::EntityType { .. } => LiftedType::EntityType,
            Resolution::Property { .. } => LiftedType::Property,
        }
    }

    pub fn resolve(&self, ctx: &dyn MaterializerContext) -> Result<ConstantValue> {
        Ok(match self {
            Resolution::SqlGeneratorFactory => {
                ConstantValue::SqlGeneratorFactory(ctx.sql_generator_factory())
            }
            Resolution::SqlExpressionFactory => {
                ConstantValue::SqlExpressionFactory(ctx.sql_expression_factory())
            }
            Resolution::EntityType { name } => {
                ConstantValue::EntityType(Arc::clone(ctx.model().entity_type(name)?))
            }
            Resolution::Property {
                entity_type,
                property,
            } => ConstantValue::Property(
                ctx.model()
                    .entity_type(entity_type)?
                    .property(property)?
                    .clone(),
            ),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LiftableConstant {
    pub original: ConstantValue,
    pub resolution: Resolution,
    pub name: String,
    pub declared: LiftedType,
}

/// Creates liftable constants. Pure construction: type agreement between
/// `resolution` and `declared` is checked later, when the plan is assembled.
pub trait LiftableConstantFactory: Send + Sync + fmt::Debug {
    fn create_liftable_constant(
        &self,
        original: ConstantValue,
        resolution: Resolution,
        name: &str,
        declared: LiftedType,
    ) -> LiftableConstant;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultLiftableConstantFactory;

impl LiftableConstantFactory for DefaultLiftableConstantFactory {
    fn create_liftable_constant(
        &self,
        original: ConstantValue,
        resolution: Resolution,
        name: &str,
        declared: LiftedType,
    ) -> LiftableConstant {
        LiftableConstant {
            original,
            resolution,
            name: name.to_string(),
            declared,
        }
    }
}

/// Constants collected while compiling one query.
#[derive(Debug, Default)]
pub struct ConstantTable {
    entries: Vec<LiftableConstant>,
}

impl ConstantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constant and return the name the plan refers to it by.
    ///
    /// An identical resolution already in the table is reused; a name taken
    /// by a different resolution gets a numeric suffix.
    pub fn lift(&mut self, constant: LiftableConstant) -> ConstantRef {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.resolution == constant.resolution && e.declared == constant.declared)
        {
            return ConstantRef::new(existing.name.as_str());
        }
        let name = self.unique_name(&constant.name);
        self.entries.push(LiftableConstant { name, ..constant });
        let last = &self.entries[self.entries.len() - 1];
        ConstantRef::new(last.name.as_str())
    }

    fn unique_name(&self, base: &str) -> String {
        let taken = |n: &str| self.entries.iter().any(|e| e.name == n);
        if !taken(base) {
            return base.to_string();
        }
        let mut i = 1usize;
        loop {
            let candidate = format!("{}_{}", base, i);
            if !taken(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every entry to its original value (what an execution in the
    /// compiling context would see).
    pub fn resolve_originals(&self) -> ResolvedConstants {
        ResolvedConstants {
            values: self
                .entries
                .iter()
                .map(|e| (ConstantRef::new(e.name.as_str()), e.original.clone()))
                .collect(),
        }
    }

    /// Type-check and drop the original values.
    pub fn freeze(self) -> Result<LiftedConstants> {
        let mut slots = Vec::with_capacity(self.entries.len());
        for e in self.entries {
            let produced = e.resolution.produces();
            if produced != e.declared {
                return Err(mismatch(&e.name, e.declared, produced));
            }
            let captured = e.original.lifted_type();
            if captured != e.declared {
                return Err(mismatch(&e.name, e.declared, captured));
            }
            slots.push(LiftedSlot {
                name: ConstantRef::new(e.name),
                resolution: e.resolution,
                declared: e.declared,
            });
        }
        Ok(LiftedConstants { slots })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiftedSlot {
    pub name: ConstantRef,
    pub resolution: Resolution,
    pub declared: LiftedType,
}

/// The part of a compiled plan that stands in for captured values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftedConstants {
    slots: Vec<LiftedSlot>,
}

impl LiftedConstants {
    pub fn slots(&self) -> &[LiftedSlot] {
        &self.slots
    }

    pub fn names(&self) -> impl Iterator<Item = &ConstantRef> {
        self.slots.iter().map(|s| &s.name)
    }

    /// Re-derive every constant against `ctx`.
    pub fn resolve(&self, ctx: &dyn MaterializerContext) -> Result<ResolvedConstants> {
        let mut values = BTreeMap::new();
        for slot in &self.slots {
            let value = slot.resolution.resolve(ctx)?;
            let actual = value.lifted_type();
            if actual != slot.declared {
                return Err(mismatch(slot.name.as_str(), slot.declared, actual));
            }
            values.insert(slot.name.clone(), value);
        }
        Ok(ResolvedConstants { values })
    }
}

/// Constants resolved for one execution.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConstants {
    values: BTreeMap<ConstantRef, ConstantValue>,
}

impl ResolvedConstants {
    fn get(&self, name: &ConstantRef) -> Result<&ConstantValue> {
        self.values
            .get(name)
            .ok_or_else(|| Error::Invariant(format!("liftable constant '{}' was never resolved", name)))
    }

    pub fn entity_type(&self, name: &ConstantRef) -> Result<Arc<EntityType>> {
        match self.get(name)? {
            ConstantValue::EntityType(et) => Ok(Arc::clone(et)),
            other => Err(mismatch(name.as_str(), LiftedType::EntityType, other.lifted_type())),
        }
    }

    pub fn property(&self, name: &ConstantRef) -> Result<Property> {
        match self.get(name)? {
            ConstantValue::Property(p) => Ok(p.clone()),
            other => Err(mismatch(name.as_str(), LiftedType::Property, other.lifted_type())),
        }
    }

    pub fn sql_generator_factory(
        &self,
        name: &ConstantRef,
    ) -> Result<Arc<dyn QuerySqlGeneratorFactory>> {
        match self.get(name)? {
            ConstantValue::SqlGeneratorFactory(f) => Ok(Arc::clone(f)),
            other => Err(mismatch(
                name.as_str(),
                LiftedType::SqlGeneratorFactory,
                other.lifted_type(),
            )),
        }
    }

    pub fn sql_expression_factory(&self, name: &ConstantRef) -> Result<Arc<dyn SqlExpressionFactory>> {
        match self.get(name)? {
            ConstantValue::SqlExpressionFactory(f) => Ok(Arc::clone(f)),
            other => Err(mismatch(
                name.as_str(),
                LiftedType::SqlExpressionFactory,
                other.lifted_type(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn mismatch(name: &str, declared: LiftedType, actual: LiftedType) -> Error {
    Error::TypeMismatch {
        name: name.to_string(),
        declared: declared.to_string(),
        actual: actual.to_string(),
    }
}
