//! Projection-binding removal: symbolic shaper -> concrete row shaper.
//!
//! A `ShaperExpr` refers to values by projection position. The `RowShaper`
//! produced here refers to them by where they sit in a row: a path into a
//! JSON document, or an ordinal in a value list. It is a separate type from
//! `ShaperExpr`, so a shaper that still holds a symbolic binding cannot reach
//! the execution layer.

use serde::{Deserialize, Serialize};

use qshape_core::config::{QueryTrackingBehavior, RowLayout};
use qshape_core::error::{Error, Result};
use qshape_core::expr::{ProjectionExpr, ProjectionItem, ReadItemExpression, SelectExpression};
use qshape_core::model::{DataType, EntityType, Model, Property};
use qshape_core::shaper::ShaperExpr;
use qshape_core::types::Scalar;

/// Where a value lives in a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueAccess {
    /// JSON path from the row root; empty for the root itself.
    Path(Vec<String>),
    /// Position in an ordinal row.
    Ordinal(usize),
}

/// How repeated appearances of the same key are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityMode {
    /// Every row materializes a new instance.
    None,
    /// Deduplicate within one result set only.
    PerQuery,
    /// Deduplicate through the context's state manager.
    Tracked,
}

impl IdentityMode {
    pub fn for_tracking(tracking: QueryTrackingBehavior) -> Self {
        match tracking {
            QueryTrackingBehavior::TrackAll => IdentityMode::Tracked,
            QueryTrackingBehavior::NoTrackingWithIdentityResolution => IdentityMode::PerQuery,
            QueryTrackingBehavior::NoTracking => IdentityMode::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRead {
    pub name: String,
    pub json_name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl From<&Property> for PropertyRead {
    fn from(p: &Property) -> Self {
        Self {
            name: p.name.clone(),
            json_name: p.json_name.clone(),
            data_type: p.data_type.clone(),
            nullable: p.nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRead {
    pub entity_type: String,
    /// Path of the entity's document node, relative to the enclosing node.
    pub path: Vec<String>,
    pub nullable: bool,
    pub properties: Vec<PropertyRead>,
    /// Key property names, in key order.
    pub key: Vec<String>,
    pub identity: IdentityMode,
    /// Owned navigations, materialized from sub-objects / nested arrays.
    pub embedded: Vec<(String, RowShaper)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowShaper {
    Read {
        access: ValueAccess,
        data_type: DataType,
        nullable: bool,
    },
    Entity(Box<EntityRead>),
    /// A JSON array at `path`, each element shaped by `element`.
    Collection {
        path: Vec<String>,
        element: Box<RowShaper>,
    },
    Record(Vec<(String, RowShaper)>),
    Constant(Scalar),
}

impl RowShaper {
    /// Entity type names materialized by this shaper, outermost first.
    pub fn entity_types(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_entity_types(&mut out);
        out
    }

    fn collect_entity_types<'s>(&'s self, out: &mut Vec<&'s str>) {
        match self {
            RowShaper::Entity(e) => {
                out.push(&e.entity_type);
                for (_, s) in &e.embedded {
                    s.collect_entity_types(out);
                }
            }
            RowShaper::Collection { element, .. } => element.collect_entity_types(out),
            RowShaper::Record(fields) => {
                for (_, s) in fields {
                    s.collect_entity_types(out);
                }
            }
            RowShaper::Read { .. } | RowShaper::Constant(_) => {}
        }
    }
}

pub trait ProjectionBindingRemover {
    fn remove(&self, shaper: &ShaperExpr) -> Result<RowShaper>;
}

/// Builds entity row shapers, expanding owned navigations.
struct EntityShaperBuilder<'a> {
    model: &'a Model,
}

impl<'a> EntityShaperBuilder<'a> {
    fn build(
        &self,
        entity_type: &EntityType,
        path: Vec<String>,
        nullable: bool,
        identity: IdentityMode,
    ) -> Result<RowShaper> {
        self.build_inner(entity_type, path, nullable, identity, &mut Vec::new())
    }

    fn build_inner(
        &self,
        entity_type: &EntityType,
        path: Vec<String>,
        nullable: bool,
        identity: IdentityMode,
        owners: &mut Vec<String>,
    ) -> Result<RowShaper> {
        if owners.iter().any(|o| *o == entity_type.name) {
            return Err(Error::Model(format!(
                "ownership cycle through entity type '{}'",
                entity_type.name
            )));
        }
        if identity != IdentityMode::None && entity_type.key.is_empty() {
            return Err(Error::Model(format!(
                "entity type '{}' has no key and cannot be identity-resolved",
                entity_type.name
            )));
        }
        entity_type.key_properties()?;

        owners.push(entity_type.name.clone());
        let mut embedded = Vec::with_capacity(entity_type.embedded.len());
        for nav in &entity_type.embedded {
            let target = self.model.entity_type(&nav.target)?;
            let shaper = if nav.is_collection {
                RowShaper::Collection {
                    path: vec![nav.json_name.clone()],
                    element: Box::new(self.build_inner(
                        target,
                        vec![],
                        false,
                        IdentityMode::None,
                        owners,
                    )?),
                }
            } else {
                self.build_inner(
                    target,
                    vec![nav.json_name.clone()],
                    true,
                    IdentityMode::None,
                    owners,
                )?
            };
            embedded.push((nav.name.clone(), shaper));
        }
        owners.pop();

        Ok(RowShaper::Entity(Box::new(EntityRead {
            entity_type: entity_type.name.clone(),
            path,
            nullable,
            properties: entity_type.properties.iter().map(PropertyRead::from).collect(),
            key: entity_type.key.clone(),
            identity,
            embedded,
        })))
    }
}

/// Binding removal for select-based plans.
pub struct SelectBindingRemover<'a> {
    model: &'a Model,
    select: &'a SelectExpression,
    layout: RowLayout,
    identity: IdentityMode,
}

impl<'a> SelectBindingRemover<'a> {
    pub fn new(
        model: &'a Model,
        select: &'a SelectExpression,
        layout: RowLayout,
        identity: IdentityMode,
    ) -> Self {
        Self {
            model,
            select,
            layout,
            identity,
        }
    }

    fn projection(&self, index: usize) -> Result<&ProjectionExpr> {
        self.select.projection.get(index).ok_or_else(|| {
            Error::Unreachable(format!(
                "shaper binds projection {} but the select projects {} value(s)",
                index,
                self.select.projection.len()
            ))
        })
    }

    /// Document path of projection `index` within a row.
    fn base_path(&self, index: usize) -> Result<Vec<String>> {
        let p = self.projection(index)?;
        Ok(if self.select.projection.len() == 1 {
            vec![]
        } else {
            vec![p.alias.clone()]
        })
    }
}

impl<'a> ProjectionBindingRemover for SelectBindingRemover<'a> {
    fn remove(&self, shaper: &ShaperExpr) -> Result<RowShaper> {
        match shaper {
            ShaperExpr::ProjectionBinding {
                index,
                data_type,
                nullable,
            } => {
                if let ProjectionItem::Entity { entity_type, .. } = &self.projection(*index)?.item {
                    return Err(Error::Unreachable(format!(
                        "scalar binding {} targets the '{}' entity projection",
                        index, entity_type
                    )));
                }
                let access = match self.layout {
                    RowLayout::Document => ValueAccess::Path(self.base_path(*index)?),
                    RowLayout::Ordinal => ValueAccess::Ordinal(*index),
                };
                Ok(RowShaper::Read {
                    access,
                    data_type: data_type.clone(),
                    nullable: *nullable,
                })
            }
            ShaperExpr::Entity {
                entity_type,
                binding,
                nullable,
            } => {
                match &self.projection(*binding)?.item {
                    ProjectionItem::Entity {
                        entity_type: projected,
                        ..
                    } if projected == entity_type => {}
                    ProjectionItem::Entity {
                        entity_type: projected,
                        ..
                    } => {
                        return Err(Error::Invariant(format!(
                            "entity shaper for '{}' bound to a '{}' projection",
                            entity_type, projected
                        )));
                    }
                    ProjectionItem::Scalar(_) => {
                        return Err(Error::Unreachable(format!(
                            "entity shaper for '{}' bound to scalar projection {}",
                            entity_type, binding
                        )));
                    }
                }
                if self.layout == RowLayout::Ordinal {
                    return Err(Error::NotSupported(format!(
                        "entity projection of '{}' over ordinal rows",
                        entity_type
                    )));
                }
                let et = self.model.entity_type(entity_type)?;
                EntityShaperBuilder { model: self.model }.build(
                    et,
                    self.base_path(*binding)?,
                    *nullable,
                    self.identity,
                )
            }
            ShaperExpr::Record(fields) => Ok(RowShaper::Record(
                fields
                    .iter()
                    .map(|(name, s)| Ok((name.clone(), self.remove(s)?)))
                    .collect::<Result<_>>()?,
            )),
            ShaperExpr::Constant(v) => Ok(RowShaper::Constant(v.clone())),
        }
    }
}

/// Binding removal for point lookups: one document, read from its root.
pub struct ReadItemBindingRemover<'a> {
    model: &'a Model,
    read_item: &'a ReadItemExpression,
    identity: IdentityMode,
}

impl<'a> ReadItemBindingRemover<'a> {
    pub fn new(model: &'a Model, read_item: &'a ReadItemExpression, identity: IdentityMode) -> Self {
        Self {
            model,
            read_item,
            identity,
        }
    }
}

impl<'a> ProjectionBindingRemover for ReadItemBindingRemover<'a> {
    fn remove(&self, shaper: &ShaperExpr) -> Result<RowShaper> {
        match shaper {
            ShaperExpr::Entity {
                entity_type,
                nullable,
                ..
            } => {
                if *entity_type != self.read_item.entity_type.name {
                    return Err(Error::Invariant(format!(
                        "point lookup of '{}' shaped as '{}'",
                        self.read_item.entity_type.name, entity_type
                    )));
                }
                EntityShaperBuilder { model: self.model }.build(
                    &self.read_item.entity_type,
                    vec![],
                    *nullable,
                    self.identity,
                )
            }
            ShaperExpr::ProjectionBinding { index, .. } => Err(Error::Unreachable(format!(
                "point lookups materialize whole documents; found projection binding {}",
                index
            ))),
            ShaperExpr::Record(fields) => Ok(RowShaper::Record(
                fields
                    .iter()
                    .map(|(name, s)| Ok((name.clone(), self.remove(s)?)))
                    .collect::<Result<_>>()?,
            )),
            ShaperExpr::Constant(v) => Ok(RowShaper::Constant(v.clone())),
        }
    }
}
