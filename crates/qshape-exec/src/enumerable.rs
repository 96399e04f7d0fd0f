//! Lazy, restartable query enumerables.
//!
//! Constructing an enumerable performs no I/O. Each call to `iter()` starts a
//! fresh execution: parameters are inlined, the command is generated, the
//! store is queried on the first `next()`, and rows are shaped one at a time.

use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use qshape_core::expr::{ReadItemExpression, SelectExpression};
use qshape_core::factory::SqlExpressionFactory;
use qshape_core::id::ContextType;
use qshape_planner::binding::RowShaper;
use qshape_planner::inline::inline_parameters;
use qshape_planner::sqlgen::{QuerySqlGeneratorFactory, SqlQuery};

use crate::context::QueryContext;
use crate::error::{ExecError, Result};
use crate::materialize::{shape_row, FromItem, IdentityScope};
use crate::metrics::emit_span;
use crate::storage::{document_id, QueryRequest, ReadItemRequest, Row};

/// Settings shared by both enumerable kinds.
#[derive(Debug, Clone)]
struct Execution {
    ctx: Arc<QueryContext>,
    shaper: RowShaper,
    context_type: ContextType,
    partition_key: Option<String>,
    standalone_state_manager: bool,
    thread_safety_checks_enabled: bool,
}

impl Execution {
    fn check_context(&self) -> Result<()> {
        if self.ctx.context_type != self.context_type {
            return Err(ExecError::ContextMismatch {
                expected: self.context_type.to_string(),
                actual: self.ctx.context_type.to_string(),
            });
        }
        Ok(())
    }
}

trait RowSource {
    fn execution(&self) -> &Execution;
    fn fetch(&self) -> Result<Vec<Row>>;
}

pub struct QueryingEnumerable<T> {
    exec: Execution,
    sql_generator_factory: Arc<dyn QuerySqlGeneratorFactory>,
    sql_expression_factory: Arc<dyn SqlExpressionFactory>,
    select: SelectExpression,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromItem> QueryingEnumerable<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<QueryContext>,
        sql_generator_factory: Arc<dyn QuerySqlGeneratorFactory>,
        sql_expression_factory: Arc<dyn SqlExpressionFactory>,
        select: SelectExpression,
        shaper: RowShaper,
        context_type: ContextType,
        partition_key: Option<String>,
        standalone_state_manager: bool,
        thread_safety_checks_enabled: bool,
    ) -> Self {
        Self {
            exec: Execution {
                ctx,
                shaper,
                context_type,
                partition_key,
                standalone_state_manager,
                thread_safety_checks_enabled,
            },
            sql_generator_factory,
            sql_expression_factory,
            select,
            _marker: PhantomData,
        }
    }

    pub fn iter(&self) -> QueryIter<'_, T> {
        QueryIter::new(self)
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }

    pub fn select(&self) -> &SelectExpression {
        &self.select
    }

    pub fn sql_generator_factory(&self) -> &Arc<dyn QuerySqlGeneratorFactory> {
        &self.sql_generator_factory
    }

    /// Finalize the select for the context's parameters.
    pub fn finalize(&self) -> Result<(SelectExpression, SqlQuery)> {
        let ctx = &self.exec.ctx;
        let select = inline_parameters(
            &self.select,
            self.sql_expression_factory.as_ref(),
            ctx.parameters(),
        )?;
        let sql = self
            .sql_generator_factory
            .create()
            .get_sql_query(&select, ctx.parameters())?;
        Ok((select, sql))
    }
}

impl<T: FromItem> RowSource for QueryingEnumerable<T> {
    fn execution(&self) -> &Execution {
        &self.exec
    }

    fn fetch(&self) -> Result<Vec<Row>> {
        let (select, sql) = self.finalize()?;
        let ctx = &self.exec.ctx;

        #[cfg(feature = "tracing")]
        tracing::trace!(sql = %sql.text, tracking = ?ctx.tracking(), "executing query");

        let request = QueryRequest {
            container: select.container.clone(),
            partition_key: self.exec.partition_key.clone(),
            layout: ctx.row_layout,
            sql,
            select,
        };
        let rows = ctx.storage().execute_query(&request)?;
        emit_span(
            "execute_query",
            &[
                ("container", request.container.clone()),
                ("rows", rows.len().to_string()),
            ],
        );
        Ok(rows)
    }
}

pub struct ReadItemQueryingEnumerable<T> {
    exec: Execution,
    read_item: ReadItemExpression,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromItem> ReadItemQueryingEnumerable<T> {
    pub fn new(
        ctx: Arc<QueryContext>,
        read_item: ReadItemExpression,
        shaper: RowShaper,
        context_type: ContextType,
        partition_key: Option<String>,
        standalone_state_manager: bool,
        thread_safety_checks_enabled: bool,
    ) -> Self {
        Self {
            exec: Execution {
                ctx,
                shaper,
                context_type,
                partition_key,
                standalone_state_manager,
                thread_safety_checks_enabled,
            },
            read_item,
            _marker: PhantomData,
        }
    }

    pub fn iter(&self) -> QueryIter<'_, T> {
        QueryIter::new(self)
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }

    pub fn read_item(&self) -> &ReadItemExpression {
        &self.read_item
    }

    /// Build the point-lookup request for the context's parameters.
    pub fn request(&self) -> Result<ReadItemRequest> {
        let et = &self.read_item.entity_type;
        let params = self.exec.ctx.parameters();

        let mut key = Vec::with_capacity(et.key.len());
        for k in &et.key {
            let param = self.read_item.property_parameters.get(k).ok_or_else(|| {
                ExecError::Materialize(format!("point lookup has no parameter for key '{}'", k))
            })?;
            key.push(params.scalar(param)?.clone());
        }

        let partition_key = match (&self.exec.partition_key, &et.partition_key) {
            (Some(pk), _) => Some(pk.clone()),
            (None, Some(prop)) => match self.read_item.property_parameters.get(prop) {
                Some(param) => Some(params.scalar(param)?.to_key_string()),
                None => None,
            },
            (None, None) => None,
        };

        Ok(ReadItemRequest {
            container: self.read_item.container.clone(),
            partition_key,
            id: document_id(&key)?,
        })
    }
}

impl<T: FromItem> RowSource for ReadItemQueryingEnumerable<T> {
    fn execution(&self) -> &Execution {
        &self.exec
    }

    fn fetch(&self) -> Result<Vec<Row>> {
        let request = self.request()?;
        #[cfg(feature = "tracing")]
        tracing::trace!(id = %request.id, container = %request.container, "reading item");
        let row = self.exec.ctx.storage().read_item(&request)?;
        emit_span(
            "read_item",
            &[
                ("container", request.container.clone()),
                ("found", row.is_some().to_string()),
            ],
        );
        Ok(row.into_iter().collect())
    }
}

/// One execution of an enumerable.
pub struct QueryIter<'a, T> {
    source: &'a dyn RowSource,
    rows: Option<VecDeque<Row>>,
    scope: IdentityScope<'a>,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: FromItem> QueryIter<'a, T> {
    fn new(source: &'a dyn RowSource) -> Self {
        let exec = source.execution();
        Self {
            source,
            rows: None,
            scope: IdentityScope::new(exec.ctx.state_manager(), exec.standalone_state_manager),
            done: false,
            _marker: PhantomData,
        }
    }

    fn step(&mut self) -> Result<Option<T>> {
        let source = self.source;
        let exec = source.execution();
        let _guard = exec
            .ctx
            .concurrency_detector()
            .enter_if(exec.thread_safety_checks_enabled)?;

        if self.rows.is_none() {
            exec.check_context()?;
            self.rows = Some(source.fetch()?.into());
        }
        let Some(row) = self.rows.as_mut().and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        let item = shape_row(&exec.shaper, &row, &mut self.scope)?;
        T::from_item(item).map(Some)
    }
}

impl<'a, T: FromItem> Iterator for QueryIter<'a, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(v)) => Some(Ok(v)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// An instantiated compiled plan.
pub enum QueryEnumerable<T> {
    Querying(QueryingEnumerable<T>),
    ReadItem(ReadItemQueryingEnumerable<T>),
}

impl<T: FromItem> QueryEnumerable<T> {
    pub fn iter(&self) -> QueryIter<'_, T> {
        match self {
            QueryEnumerable::Querying(q) => q.iter(),
            QueryEnumerable::ReadItem(r) => r.iter(),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }

    /// Command text for the context's parameters, without executing it.
    pub fn command_text(&self) -> Result<String> {
        match self {
            QueryEnumerable::Querying(q) => Ok(q.finalize()?.1.text),
            QueryEnumerable::ReadItem(r) => {
                let req = r.request()?;
                Ok(format!(
                    "ReadItem(container={}, id={}, partition_key={})",
                    req.container,
                    req.id,
                    req.partition_key.as_deref().unwrap_or("<none>")
                ))
            }
        }
    }

    /// Bound parameters referenced by the command, keyed without `@`.
    pub fn bound_parameters(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        match self {
            QueryEnumerable::Querying(q) => Ok(q
                .finalize()?
                .1
                .parameters
                .iter()
                .map(|(k, v)| (k.trim_start_matches('@').to_string(), v.to_json()))
                .collect()),
            QueryEnumerable::ReadItem(_) => Ok(BTreeMap::new()),
        }
    }
}
