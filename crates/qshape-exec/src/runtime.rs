//! Runtime: databases own compilation, sessions own identity and execution.
//!
//! Behavior:
//! - `Database` validates its model and config once, then compiles shaped
//!   queries through a shared `CompiledQueryCache`.
//! - `Session` is one context instance: its own state manager and
//!   concurrency detector, shared by every query it runs.
//! - `instantiate` re-resolves a plan's lifted constants against the
//!   executing context and builds the matching enumerable.

use std::sync::Arc;

use qshape_core::config::CompilerConfig;
use qshape_core::id::{ContextInstanceId, ContextType};
use qshape_core::model::Model;
use qshape_core::params::ParameterValues;
use qshape_core::shaper::ShapedQuery;
use qshape_planner::cache::{CompiledQueryCache, PlanCacheKey};
use qshape_planner::compile::{CompilerServices, ShapedQueryCompiler};
use qshape_planner::plan::{CompiledPlan, EnumerableConstructor};

use crate::concurrency::ConcurrencyDetector;
use crate::context::{QueryContext, StateManager};
use crate::enumerable::{QueryEnumerable, QueryingEnumerable, ReadItemQueryingEnumerable};
use crate::error::Result;
use crate::materialize::FromItem;
use crate::metrics::emit_span;
use crate::storage::StorageClient;

#[derive(Debug)]
struct DatabaseInner {
    model: Arc<Model>,
    config: CompilerConfig,
    services: CompilerServices,
    storage: Arc<dyn StorageClient>,
    cache: CompiledQueryCache,
    context_type: ContextType,
}

/// A model bound to a store. Cheap to clone; clones share the plan cache.
#[derive(Debug, Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(
        context_type: ContextType,
        model: Model,
        config: CompilerConfig,
        storage: Arc<dyn StorageClient>,
    ) -> Result<Self> {
        Self::with_services(context_type, model, config, storage, CompilerServices::default())
    }

    pub fn with_services(
        context_type: ContextType,
        model: Model,
        config: CompilerConfig,
        storage: Arc<dyn StorageClient>,
        services: CompilerServices,
    ) -> Result<Self> {
        model.validate()?;
        config.validate()?;
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                model: Arc::new(model),
                cache: CompiledQueryCache::new(config.plan_cache_capacity),
                config,
                services,
                storage,
                context_type,
            }),
        })
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.inner.model
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.inner.config
    }

    pub fn context_type(&self) -> &ContextType {
        &self.inner.context_type
    }

    pub fn plan_cache(&self) -> &CompiledQueryCache {
        &self.inner.cache
    }

    /// Compile `shaped`, reusing a cached plan for the same shape.
    pub fn compile(&self, shaped: &ShapedQuery) -> Result<Arc<CompiledPlan>> {
        let inner = &self.inner;
        let key = PlanCacheKey::new(shaped, &inner.context_type, &inner.config)?;
        let plan = inner.cache.get_or_compile(key, || {
            ShapedQueryCompiler::new(
                &inner.model,
                &inner.services,
                &inner.config,
                inner.context_type.clone(),
            )
            .visit_shaped_query(shaped)
        })?;
        Ok(plan)
    }

    /// Open a new context instance.
    pub fn session(&self) -> Session {
        let session = Session {
            id: ContextInstanceId::new(),
            db: self.clone(),
            state_manager: Arc::new(StateManager::new()),
            detector: Arc::new(ConcurrencyDetector::new()),
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(context = %self.inner.context_type, instance = %session.id, "opened session");
        session
    }
}

/// One context instance.
#[derive(Debug, Clone)]
pub struct Session {
    id: ContextInstanceId,
    db: Database,
    state_manager: Arc<StateManager>,
    detector: Arc<ConcurrencyDetector>,
}

impl Session {
    pub fn id(&self) -> ContextInstanceId {
        self.id
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    pub fn concurrency_detector(&self) -> &Arc<ConcurrencyDetector> {
        &self.detector
    }

    /// Per-execution context carrying `parameters`.
    pub fn query_context(&self, parameters: ParameterValues) -> Arc<QueryContext> {
        let inner = &self.db.inner;
        Arc::new(QueryContext::new(
            self.id,
            inner.context_type.clone(),
            Arc::clone(&inner.model),
            inner.services.clone(),
            Arc::clone(&inner.storage),
            parameters,
            inner.config.tracking_behavior,
            inner.config.row_layout,
            Arc::clone(&self.state_manager),
            Arc::clone(&self.detector),
        ))
    }

    /// Compile (or reuse) the plan for `shaped` and bind it to `parameters`.
    /// Nothing runs until the result is iterated.
    pub fn query<T: FromItem>(
        &self,
        shaped: &ShapedQuery,
        parameters: ParameterValues,
    ) -> Result<QueryEnumerable<T>> {
        let plan = self.db.compile(shaped)?;
        self.execute_plan(&plan, parameters)
    }

    pub fn execute_plan<T: FromItem>(
        &self,
        plan: &CompiledPlan,
        parameters: ParameterValues,
    ) -> Result<QueryEnumerable<T>> {
        instantiate(plan, &self.query_context(parameters))
    }
}

/// Build the enumerable a compiled plan describes, resolving its lifted
/// constants against `ctx`.
pub fn instantiate<T: FromItem>(
    plan: &CompiledPlan,
    ctx: &Arc<QueryContext>,
) -> Result<QueryEnumerable<T>> {
    let constants = plan.constants.resolve(ctx.as_ref())?;
    emit_span(
        "instantiate",
        &[
            ("enumerable", plan.constructor.type_name().to_string()),
            ("constants", constants.len().to_string()),
        ],
    );

    Ok(match &plan.constructor {
        EnumerableConstructor::Querying(args) => {
            QueryEnumerable::Querying(QueryingEnumerable::new(
                Arc::clone(ctx),
                constants.sql_generator_factory(&args.sql_generator_factory)?,
                constants.sql_expression_factory(&args.sql_expression_factory)?,
                args.select.clone(),
                args.shaper.clone(),
                args.context_type.clone(),
                args.partition_key.clone(),
                args.standalone_state_manager,
                args.thread_safety_checks_enabled,
            ))
        }
        EnumerableConstructor::ReadItem(args) => {
            QueryEnumerable::ReadItem(ReadItemQueryingEnumerable::new(
                Arc::clone(ctx),
                args.read_item.resolve(&constants)?,
                args.shaper.clone(),
                args.context_type.clone(),
                args.partition_key.clone(),
                args.standalone_state_manager,
                args.thread_safety_checks_enabled,
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::materialize::{EntityInstance, Item};
    use crate::memory_storage::MemoryDocumentStore;
    use qshape_core::expr::{QueryExpression, ReadItemExpression, SelectExpression};
    use qshape_core::model::{DataType, EntityType, Property};
    use qshape_core::shaper::ShaperExpr;
    use qshape_core::types::Scalar;

    fn model() -> Model {
        Model::new().with_entity_type(
            EntityType::new("Customer", "Customers")
                .with_property(Property::new("Id", DataType::Int32, false).with_json_name("id"))
                .with_property(Property::new("Name", DataType::Utf8, true))
                .with_key(&["Id"]),
        )
    }

    fn database(context: &str, store: &MemoryDocumentStore) -> Database {
        Database::new(
            ContextType::new(context),
            model(),
            CompilerConfig::default(),
            Arc::new(store.clone()),
        )
        .unwrap()
    }

    fn seeded_store() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        let m = model();
        let et = m.entity_type("Customer").unwrap();
        store
            .insert_entity(et, serde_json::json!({ "id": 1, "Name": "Ann" }))
            .unwrap();
        store
            .insert_entity(et, serde_json::json!({ "id": 2, "Name": "Bob" }))
            .unwrap();
        store
    }

    fn all_customers(db: &Database) -> ShapedQuery {
        let select = SelectExpression::for_entity(db.model().entity_type("Customer").unwrap());
        ShapedQuery::new(QueryExpression::Select(select), ShaperExpr::entity("Customer", 0))
    }

    #[test]
    fn tracked_queries_share_instances_within_a_session() {
        let db = database("ShopContext", &seeded_store());
        let session = db.session();
        let shaped = all_customers(&db);

        let first: Vec<Arc<EntityInstance>> =
            session.query(&shaped, ParameterValues::new()).unwrap().to_vec().unwrap();
        let second: Vec<Arc<EntityInstance>> =
            session.query(&shaped, ParameterValues::new()).unwrap().to_vec().unwrap();
        assert_eq!(first.len(), 2);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(session.state_manager().len(), 2);
        assert_eq!(db.plan_cache().misses(), 1);
        assert_eq!(db.plan_cache().hits(), 1);
    }

    #[test]
    fn point_lookup_reads_by_key_parameter() {
        let db = database("ShopContext", &seeded_store());
        let et = Arc::clone(db.model().entity_type("Customer").unwrap());
        let shaped = ShapedQuery::new(
            QueryExpression::ReadItem(ReadItemExpression::new(et).with_property_parameter("Id", "id")),
            ShaperExpr::entity("Customer", 0),
        );
        let session = db.session();
        let hit: Vec<Item> = session
            .query(&shaped, ParameterValues::new().with("id", Scalar::I32(2)))
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(hit.len(), 1);
        let missing: Vec<Item> = session
            .query(&shaped, ParameterValues::new().with("id", Scalar::I32(9)))
            .unwrap()
            .to_vec()
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn plan_from_another_context_type_is_rejected_on_first_read() {
        let store = seeded_store();
        let shop = database("ShopContext", &store);
        let audit = database("AuditContext", &store);
        let plan = shop.compile(&all_customers(&shop)).unwrap();

        let results = audit
            .session()
            .execute_plan::<Item>(&plan, ParameterValues::new())
            .unwrap();
        let err = results.to_vec().unwrap_err();
        assert!(matches!(err, ExecError::ContextMismatch { .. }));
    }

    #[test]
    fn concurrent_use_of_one_session_is_detected() {
        let db = database("ShopContext", &seeded_store());
        let session = db.session();
        let results = session
            .query::<Item>(&all_customers(&db), ParameterValues::new())
            .unwrap();
        let _busy = session.concurrency_detector().enter().unwrap();
        assert!(matches!(
            results.iter().next(),
            Some(Err(ExecError::ConcurrentUse))
        ));
    }
}
