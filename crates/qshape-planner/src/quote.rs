//! Quoting point-lookup nodes for reuse across contexts.
//!
//! A `ReadItemExpression` holds the live entity type it was translated
//! against. The quoted form replaces that with liftable constants
//! (`<Entity>EntityType`, `<Property>Property`) and keeps only literal
//! parameter names, so the node can be rebuilt from whichever context
//! executes the cached plan.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use qshape_core::error::Result;
use qshape_core::expr::ReadItemExpression;
use qshape_core::id::ConstantRef;

use crate::constants::{
    ConstantTable, ConstantValue, LiftableConstantFactory, LiftedType, Resolution,
    ResolvedConstants,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotedReadItem {
    pub container: String,
    pub entity_type: ConstantRef,
    /// Lifted property constant paired with the literal parameter name.
    pub property_parameters: Vec<(ConstantRef, String)>,
}

pub fn quote_read_item(
    read_item: &ReadItemExpression,
    factory: &dyn LiftableConstantFactory,
    constants: &mut ConstantTable,
) -> Result<QuotedReadItem> {
    let et = &read_item.entity_type;
    let entity_type = constants.lift(factory.create_liftable_constant(
        ConstantValue::EntityType(Arc::clone(et)),
        Resolution::EntityType {
            name: et.name.clone(),
        },
        &format!("{}EntityType", et.name),
        LiftedType::EntityType,
    ));

    let mut property_parameters = Vec::with_capacity(read_item.property_parameters.len());
    for (property, parameter) in &read_item.property_parameters {
        let p = et.property(property)?;
        let lifted = constants.lift(factory.create_liftable_constant(
            ConstantValue::Property(p.clone()),
            Resolution::Property {
                entity_type: et.name.clone(),
                property: p.name.clone(),
            },
            &format!("{}Property", p.name),
            LiftedType::Property,
        ));
        property_parameters.push((lifted, parameter.clone()));
    }

    Ok(QuotedReadItem {
        container: read_item.container.clone(),
        entity_type,
        property_parameters,
    })
}

impl QuotedReadItem {
    /// Rebuild the node from constants resolved for one execution.
    pub fn resolve(&self, constants: &ResolvedConstants) -> Result<ReadItemExpression> {
        let entity_type = constants.entity_type(&self.entity_type)?;
        let mut property_parameters = BTreeMap::new();
        for (property, parameter) in &self.property_parameters {
            let p = constants.property(property)?;
            property_parameters.insert(p.name, parameter.clone());
        }
        Ok(ReadItemExpression {
            container: self.container.clone(),
            entity_type,
            property_parameters,
        })
    }

    pub fn constant_names(&self) -> impl Iterator<Item = &ConstantRef> {
        std::iter::once(&self.entity_type).chain(self.property_parameters.iter().map(|(c, _)| c))
    }
}
