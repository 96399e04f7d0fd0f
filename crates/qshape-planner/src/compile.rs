//! The shaped-query compiler.
//!
//! `visit_shaped_query` turns a translated plan and its shaper into a
//! `CompiledPlan`. Compilation is pure tree rewriting: it never touches
//! storage and never looks at parameter values, so its output depends only
//! on the shape of the input.

use std::sync::Arc;

use qshape_core::config::CompilerConfig;
use qshape_core::error::{Error, Result};
use qshape_core::expr::{QueryExpression, ReadItemExpression, SelectExpression};
use qshape_core::factory::{DocumentSqlExpressionFactory, SqlExpressionFactory};
use qshape_core::id::{ConstantRef, ContextType};
use qshape_core::model::Model;
use qshape_core::shaper::{ShapedQuery, ShaperExpr};

use crate::binding::{
    IdentityMode, ProjectionBindingRemover, ReadItemBindingRemover, SelectBindingRemover,
};
use crate::constants::{
    ConstantTable, ConstantValue, DefaultLiftableConstantFactory, LiftableConstantFactory,
    LiftedType, Resolution,
};
use crate::plan::{
    CompiledPlan, EnumerableConstructor, QueryingEnumerableArgs, ReadItemEnumerableArgs,
};
use crate::quote::quote_read_item;
use crate::sqlgen::{DocumentQuerySqlGeneratorFactory, QuerySqlGeneratorFactory};

/// Services the compiler lifts into plans.
#[derive(Debug, Clone)]
pub struct CompilerServices {
    pub sql_generator_factory: Arc<dyn QuerySqlGeneratorFactory>,
    pub sql_expression_factory: Arc<dyn SqlExpressionFactory>,
    pub constant_factory: Arc<dyn LiftableConstantFactory>,
}

impl Default for CompilerServices {
    fn default() -> Self {
        Self {
            sql_generator_factory: Arc::new(DocumentQuerySqlGeneratorFactory),
            sql_expression_factory: Arc::new(DocumentSqlExpressionFactory),
            constant_factory: Arc::new(DefaultLiftableConstantFactory),
        }
    }
}

pub struct ShapedQueryCompiler<'a> {
    model: &'a Model,
    services: &'a CompilerServices,
    config: &'a CompilerConfig,
    context_type: ContextType,
}

impl<'a> ShapedQueryCompiler<'a> {
    pub fn new(
        model: &'a Model,
        services: &'a CompilerServices,
        config: &'a CompilerConfig,
        context_type: ContextType,
    ) -> Self {
        Self {
            model,
            services,
            config,
            context_type,
        }
    }

    pub fn visit_shaped_query(&self, shaped: &ShapedQuery) -> Result<CompiledPlan> {
        let plan = match &shaped.query {
            QueryExpression::Select(select) => self.compile_select(select, &shaped.shaper)?,
            QueryExpression::ReadItem(read_item) => {
                self.compile_read_item(read_item, &shaped.shaper)?
            }
            other @ QueryExpression::SetOperation { .. } => {
                return Err(Error::NotSupported(other.to_string()));
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            context = %self.context_type,
            plan = %plan.describe(),
            "compiled shaped query"
        );

        Ok(plan)
    }

    fn identity(&self) -> IdentityMode {
        IdentityMode::for_tracking(self.config.tracking_behavior)
    }

    fn lift_service(
        &self,
        constants: &mut ConstantTable,
        value: ConstantValue,
        resolution: Resolution,
        name: &str,
        declared: LiftedType,
    ) -> ConstantRef {
        constants.lift(
            self.services
                .constant_factory
                .create_liftable_constant(value, resolution, name, declared),
        )
    }

    fn compile_select(&self, select: &SelectExpression, shaper: &ShaperExpr) -> Result<CompiledPlan> {
        if select.projection.is_empty() {
            return Err(Error::Unreachable(format!(
                "select over '{}' has no projection",
                select.container
            )));
        }

        let remover =
            SelectBindingRemover::new(self.model, select, self.config.row_layout, self.identity());
        let shaper = remover.remove(shaper)?;

        let mut constants = ConstantTable::new();
        let sql_generator_factory = self.lift_service(
            &mut constants,
            ConstantValue::SqlGeneratorFactory(Arc::clone(&self.services.sql_generator_factory)),
            Resolution::SqlGeneratorFactory,
            "querySqlGeneratorFactory",
            LiftedType::SqlGeneratorFactory,
        );
        let sql_expression_factory = self.lift_service(
            &mut constants,
            ConstantValue::SqlExpressionFactory(Arc::clone(&self.services.sql_expression_factory)),
            Resolution::SqlExpressionFactory,
            "sqlExpressionFactory",
            LiftedType::SqlExpressionFactory,
        );

        let constructor = EnumerableConstructor::Querying(QueryingEnumerableArgs {
            sql_generator_factory,
            sql_expression_factory,
            select: select.clone(),
            shaper,
            context_type: self.context_type.clone(),
            partition_key: self.config.partition_key.clone(),
            standalone_state_manager: self.config.standalone_identity_resolution(),
            thread_safety_checks_enabled: self.config.thread_safety_checks_enabled,
        });

        Ok(CompiledPlan {
            constructor,
            constants: constants.freeze()?,
        })
    }

    fn compile_read_item(
        &self,
        read_item: &ReadItemExpression,
        shaper: &ShaperExpr,
    ) -> Result<CompiledPlan> {
        let et = &read_item.entity_type;
        for key in &et.key {
            if !read_item.property_parameters.contains_key(key) {
                return Err(Error::Unreachable(format!(
                    "point lookup of '{}' has no parameter for key property '{}'",
                    et.name, key
                )));
            }
        }

        let remover = ReadItemBindingRemover::new(self.model, read_item, self.identity());
        let shaper = remover.remove(shaper)?;

        let mut constants = ConstantTable::new();
        let quoted = quote_read_item(
            read_item,
            self.services.constant_factory.as_ref(),
            &mut constants,
        )?;

        // The quoted node must rebuild the original when resolved in the
        // compiling context.
        if quoted.resolve(&constants.resolve_originals())? != *read_item {
            return Err(Error::Invariant(format!(
                "quoted point lookup of '{}' does not round-trip",
                et.name
            )));
        }

        let constructor = EnumerableConstructor::ReadItem(ReadItemEnumerableArgs {
            read_item: quoted,
            shaper,
            context_type: self.context_type.clone(),
            partition_key: self.config.partition_key.clone(),
            standalone_state_manager: self.config.standalone_identity_resolution(),
            thread_safety_checks_enabled: self.config.thread_safety_checks_enabled,
        });

        Ok(CompiledPlan {
            constructor,
            constants: constants.freeze()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_core::config::QueryTrackingBehavior;
    use qshape_core::expr::SetOperationKind;
    use qshape_core::model::{DataType, EntityType, Property};

    fn model() -> Model {
        Model::new().with_entity_type(
            EntityType::new("Customer", "Customers")
                .with_property(Property::new("Id", DataType::Int32, false))
                .with_key(&["Id"]),
        )
    }

    fn compile(shaped: &ShapedQuery, config: &CompilerConfig) -> Result<CompiledPlan> {
        let m = model();
        let services = CompilerServices::default();
        ShapedQueryCompiler::new(&m, &services, config, ContextType::new("ShopContext"))
            .visit_shaped_query(shaped)
    }

    #[test]
    fn select_lifts_both_generation_services() {
        let m = model();
        let select = SelectExpression::for_entity(m.entity_type("Customer").unwrap());
        let shaped = ShapedQuery::new(
            QueryExpression::Select(select),
            ShaperExpr::entity("Customer", 0),
        );
        let plan = compile(&shaped, &CompilerConfig::default()).unwrap();
        let names: Vec<&str> = plan.constants.names().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["querySqlGeneratorFactory", "sqlExpressionFactory"]);
        assert_eq!(plan.constructor.type_name(), "QueryingEnumerable");
        assert_eq!(plan.constructor.context_type().as_str(), "ShopContext");
    }

    #[test]
    fn tracking_behavior_selects_identity_flag() {
        let m = model();
        let select = SelectExpression::for_entity(m.entity_type("Customer").unwrap());
        let shaped = ShapedQuery::new(
            QueryExpression::Select(select),
            ShaperExpr::entity("Customer", 0),
        );
        let cfg = CompilerConfig {
            tracking_behavior: QueryTrackingBehavior::NoTrackingWithIdentityResolution,
            thread_safety_checks_enabled: false,
            ..CompilerConfig::default()
        };
        let plan = compile(&shaped, &cfg).unwrap();
        assert!(plan.constructor.standalone_state_manager());
        assert!(!plan.constructor.thread_safety_checks_enabled());
    }

    #[test]
    fn set_operations_are_not_supported() {
        let m = model();
        let s = SelectExpression::for_entity(m.entity_type("Customer").unwrap());
        let shaped = ShapedQuery::new(
            QueryExpression::SetOperation {
                kind: SetOperationKind::Union,
                left: Box::new(s.clone()),
                right: Box::new(s),
            },
            ShaperExpr::entity("Customer", 0),
        );
        let err = compile(&shaped, &CompilerConfig::default()).unwrap_err();
        assert!(matches!(&err, Error::NotSupported(n) if n.contains("SetOperation")));
    }

    #[test]
    fn point_lookup_without_full_key_is_unreachable() {
        let m = model();
        let ri = ReadItemExpression::new(Arc::clone(m.entity_type("Customer").unwrap()));
        let shaped = ShapedQuery::new(
            QueryExpression::ReadItem(ri),
            ShaperExpr::entity("Customer", 0),
        );
        assert!(matches!(
            compile(&shaped, &CompilerConfig::default()),
            Err(Error::Unreachable(_))
        ));
    }

    #[test]
    fn empty_projection_is_unreachable() {
        let m = model();
        let select =
            SelectExpression::for_entity(m.entity_type("Customer").unwrap()).with_projection(vec![]);
        let shaped = ShapedQuery::new(QueryExpression::Select(select), ShaperExpr::Record(vec![]));
        assert!(matches!(
            compile(&shaped, &CompilerConfig::default()),
            Err(Error::Unreachable(_))
        ));
    }
}
