//! Compiled-plan cache keyed by query shape.
//!
//! Keys hash the translated tree and shaper, which carry parameter names but
//! never parameter values, so executions differing only in bound values share
//! one plan. Eviction drops the oldest inserted entry once `capacity` is
//! exceeded.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use qshape_core::config::{CompilerConfig, QueryTrackingBehavior, RowLayout};
use qshape_core::error::Result;
use qshape_core::hash::{hash_serde, Hash256};
use qshape_core::id::ContextType;
use qshape_core::shaper::ShapedQuery;

use crate::plan::CompiledPlan;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanCacheKey {
    pub shape: Hash256,
    pub context_type: ContextType,
    pub tracking: QueryTrackingBehavior,
    pub thread_safety_checks_enabled: bool,
    pub partition_key: Option<String>,
    pub row_layout: RowLayout,
}

impl PlanCacheKey {
    pub fn new(shaped: &ShapedQuery, context_type: &ContextType, config: &CompilerConfig) -> Result<Self> {
        Ok(Self {
            shape: hash_serde(shaped)?,
            context_type: context_type.clone(),
            tracking: config.tracking_behavior,
            thread_safety_checks_enabled: config.thread_safety_checks_enabled,
            partition_key: config.partition_key.clone(),
            row_layout: config.row_layout,
        })
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    plans: HashMap<PlanCacheKey, Arc<CompiledPlan>>,
    order: VecDeque<PlanCacheKey>,
}

#[derive(Debug)]
pub struct CompiledQueryCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompiledQueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // Entries are immutable once inserted; a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Return the cached plan for `key`, compiling and inserting it on a miss.
    ///
    /// `compile` runs outside the lock. If two callers race on the same key
    /// the first inserted plan wins and both get it.
    pub fn get_or_compile<F>(&self, key: PlanCacheKey, compile: F) -> Result<Arc<CompiledPlan>>
    where
        F: FnOnce() -> Result<CompiledPlan>,
    {
        if let Some(plan) = self.lock().plans.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "tracing")]
            tracing::trace!(shape = %key.shape.short(), "plan cache hit");
            return Ok(Arc::clone(plan));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "tracing")]
        tracing::trace!(shape = %key.shape.short(), "plan cache miss");
        let plan = Arc::new(compile()?);

        let mut inner = self.lock();
        if let Some(existing) = inner.plans.get(&key) {
            return Ok(Arc::clone(existing));
        }
        inner.plans.insert(key.clone(), Arc::clone(&plan));
        inner.order.push_back(key);
        while inner.plans.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.plans.remove(&oldest);
                }
                None => break,
            }
        }
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.lock().plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.plans.clear();
        inner.order.clear();
    }
}
