//! Per-execution query context and the tracked identity map.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use qshape_core::config::{QueryTrackingBehavior, RowLayout};
use qshape_core::factory::SqlExpressionFactory;
use qshape_core::id::{ContextInstanceId, ContextType};
use qshape_core::model::Model;
use qshape_core::params::ParameterValues;
use qshape_core::types::KeyValues;
use qshape_planner::compile::CompilerServices;
use qshape_planner::constants::MaterializerContext;
use qshape_planner::sqlgen::QuerySqlGeneratorFactory;

use crate::concurrency::ConcurrencyDetector;
use crate::materialize::EntityInstance;
use crate::storage::StorageClient;

type IdentityKey = (String, KeyValues);

/// Tracked entity instances of one context, keyed by type and key values.
///
/// The first instance materialized for a key wins; later rows with the same
/// key resolve to it.
#[derive(Debug, Default)]
pub struct StateManager {
    entries: Mutex<BTreeMap<IdentityKey, Arc<EntityInstance>>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<IdentityKey, Arc<EntityInstance>>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn try_get(&self, entity_type: &str, key: &KeyValues) -> Option<Arc<EntityInstance>> {
        self.lock()
            .get(&(entity_type.to_string(), key.clone()))
            .cloned()
    }

    /// Start tracking `instance` unless its key is already tracked; returns
    /// the tracked instance either way.
    pub fn track(&self, key: KeyValues, instance: Arc<EntityInstance>) -> Arc<EntityInstance> {
        let mut entries = self.lock();
        Arc::clone(
            entries
                .entry((instance.entity_type.clone(), key))
                .or_insert(instance),
        )
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything one query execution needs from its owning context.
#[derive(Debug)]
pub struct QueryContext {
    pub(crate) instance: ContextInstanceId,
    pub(crate) context_type: ContextType,
    pub(crate) model: Arc<Model>,
    pub(crate) services: CompilerServices,
    pub(crate) storage: Arc<dyn StorageClient>,
    pub(crate) parameters: ParameterValues,
    pub(crate) tracking: QueryTrackingBehavior,
    pub(crate) row_layout: RowLayout,
    pub(crate) state_manager: Arc<StateManager>,
    pub(crate) concurrency: Arc<ConcurrencyDetector>,
}

impl QueryContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: ContextInstanceId,
        context_type: ContextType,
        model: Arc<Model>,
        services: CompilerServices,
        storage: Arc<dyn StorageClient>,
        parameters: ParameterValues,
        tracking: QueryTrackingBehavior,
        row_layout: RowLayout,
        state_manager: Arc<StateManager>,
        concurrency: Arc<ConcurrencyDetector>,
    ) -> Self {
        Self {
            instance,
            context_type,
            model,
            services,
            storage,
            parameters,
            tracking,
            row_layout,
            state_manager,
            concurrency,
        }
    }

    pub fn instance(&self) -> ContextInstanceId {
        self.instance
    }

    pub fn context_type(&self) -> &ContextType {
        &self.context_type
    }

    pub fn parameters(&self) -> &ParameterValues {
        &self.parameters
    }

    pub fn tracking(&self) -> QueryTrackingBehavior {
        self.tracking
    }

    pub fn storage(&self) -> &Arc<dyn StorageClient> {
        &self.storage
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    pub fn concurrency_detector(&self) -> &Arc<ConcurrencyDetector> {
        &self.concurrency
    }
}

impl MaterializerContext for QueryContext {
    fn model(&self) -> &Model {
        &self.model
    }

    fn sql_generator_factory(&self) -> Arc<dyn QuerySqlGeneratorFactory> {
        Arc::clone(&self.services.sql_generator_factory)
    }

    fn sql_expression_factory(&self) -> Arc<dyn SqlExpressionFactory> {
        Arc::clone(&self.services.sql_expression_factory)
    }
}
