// Execution Controller
//
// Drives one compiled command against a checked-out native connection:
// publishes the schema mappings it needs, owns a single native statement handle,
// binds placeholder values, splits INSERT parameter rows into bounded batches and
// owns the commit/rollback boundary when the work spans several round trips.

use futures::Stream;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    BoundValue, CompiledCommand, CompiledStatement, ExecutionSettings, RuntimeType, TypeBinding, Value,
};
use crate::services::connection_pool::PooledConnection;
use crate::services::native::{NativeCursor, NativeStatement, SharedConnection};
use crate::services::publication::SchemaPublicationCache;
use crate::services::schema_mapper::NativeSchema;

/// Lifecycle of an execution controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    SchemaPublished,
    StatementOpen,
    Executing,
    Committed,
    RolledBack,
    Closed,
}

/// Result of an update command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// One summed count per compiled statement
    pub counts: Vec<u64>,
    /// Native warnings drained during execution
    pub warnings: Vec<String>,
}

impl UpdateOutcome {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

pub struct ExecutionController {
    id: Uuid,
    connection: SharedConnection,
    settings: ExecutionSettings,
    publication: Arc<SchemaPublicationCache>,
    statement: Option<Box<dyn NativeStatement>>,
    state: ExecutionState,
    warnings: Vec<String>,
}

impl ExecutionController {
    pub fn new(
        connection: SharedConnection,
        publication: Arc<SchemaPublicationCache>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection,
            settings,
            publication,
            statement: None,
            state: ExecutionState::Idle,
            warnings: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Warnings collected so far and not yet handed out with an outcome
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Make sure the store knows every schema mapping the command references
    ///
    /// Each mapping is published at most once across all controllers sharing the
    /// publication cache. A failed publication leaves the mapping unpublished.
    pub async fn publish_schemas(&mut self, schemas: &[Arc<NativeSchema>]) -> EngineResult<()> {
        for schema in schemas {
            let ddl = schema.publication_statement.clone();
            let connection = self.connection.clone();
            let publish = move || async move {
                let mut statement = connection.create_statement().await?;
                let result = statement.execute_update(Some(&ddl)).await;
                if let Err(e) = statement.close().await {
                    tracing::warn!("Failed to close publication statement: {}", e);
                }
                result.map(|_| ())
            };

            self.publication
                .ensure_published(&schema.publication_statement, publish)
                .await
                .map_err(|source| {
                    tracing::error!(
                        "[{}] Failed to publish schema mapping for {}: {}",
                        self.id,
                        schema.logical_table,
                        source
                    );
                    EngineError::SchemaPublication {
                        statement: schema.publication_statement.clone(),
                        source,
                    }
                })?;
        }
        if self.state == ExecutionState::Idle {
            self.state = ExecutionState::SchemaPublished;
        }
        Ok(())
    }

    /// Open a fresh statement handle, closing any live one first
    ///
    /// `Some(sql)` prepares the text; `None` opens a plain statement.
    pub async fn open_statement(&mut self, prepared_sql: Option<&str>) -> EngineResult<()> {
        self.close_statement().await;

        let mut statement = match prepared_sql {
            Some(sql) => self
                .connection
                .prepare_statement(sql)
                .await
                .map_err(|e| EngineError::execution(sql, e))?,
            None => self
                .connection
                .create_statement()
                .await
                .map_err(|e| EngineError::Connection(format!("Failed to create statement: {}", e)))?,
        };

        if let Err(e) = statement.set_fetch_size(self.settings.fetch_size) {
            tracing::debug!("Driver ignored fetch size hint {}: {}", self.settings.fetch_size, e);
        }

        self.statement = Some(statement);
        self.state = ExecutionState::StatementOpen;
        Ok(())
    }

    /// Execute a query, handing the open cursor to the returned results
    ///
    /// The controller is consumed: it stays open until the results are exhausted
    /// or closed.
    pub async fn execute_query(mut self, compiled: &CompiledStatement) -> EngineResult<QueryResults> {
        match self.open_query(compiled).await {
            Ok(cursor) => Ok(QueryResults {
                sql: compiled.sql.clone(),
                output_types: compiled.output_types.clone(),
                controller: self,
                cursor: Some(cursor),
                lease: None,
                rows_read: 0,
            }),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn open_query(&mut self, compiled: &CompiledStatement) -> EngineResult<Box<dyn NativeCursor>> {
        self.publish_schemas(&compiled.schemas).await?;

        let prepared = compiled.has_bound_values();
        self.open_statement(prepared.then_some(compiled.sql.as_str())).await?;
        self.state = ExecutionState::Executing;

        let statement = self.handle()?;
        let cursor = if prepared {
            bind_row(
                &mut **statement,
                &compiled.bound_values,
                compiled.parameter_rows.first().map(Vec::as_slice),
                &compiled.sql,
            )?;
            statement.execute_query(None).await
        } else {
            statement.execute_query(Some(&compiled.sql)).await
        }
        .map_err(|e| EngineError::execution(&compiled.sql, e))?;

        self.drain_warnings();
        Ok(cursor)
    }

    /// Execute an update command, returning one summed count per statement
    pub async fn execute_update(&mut self, compiled: &CompiledCommand) -> EngineResult<UpdateOutcome> {
        if compiled.is_query() {
            return Err(EngineError::Validation("queries must be run with execute_query".into()));
        }
        self.publish_schemas(&compiled.schemas()).await?;

        let round_trips = self.round_trips(compiled);
        let auto_commit = self
            .connection
            .auto_commit()
            .await
            .map_err(|e| EngineError::Connection(format!("Failed to read auto-commit mode: {}", e)))?;

        // Auto-commit connections need an explicit transaction only when the work
        // spans several round trips; manual connections defer to the atomic flag.
        let owns_transaction = if auto_commit {
            round_trips > 1
        } else {
            self.settings.atomic
        };

        if auto_commit && owns_transaction {
            self.connection
                .set_auto_commit(false)
                .await
                .map_err(|e| EngineError::Connection(format!("Failed to suspend auto-commit: {}", e)))?;
        }

        let result = self.run_statements(compiled).await;
        // Updates keep no cursor, so the handle is released before the transaction boundary
        self.close_statement().await;
        let outcome = match result {
            Ok(counts) if owns_transaction => match self.connection.commit().await {
                Ok(()) => {
                    self.state = ExecutionState::Committed;
                    Ok(counts)
                }
                Err(e) => {
                    self.rollback_quietly().await;
                    Err(EngineError::execution("COMMIT", e))
                }
            },
            Ok(counts) => {
                if auto_commit {
                    self.state = ExecutionState::Committed;
                }
                Ok(counts)
            }
            Err(e) => {
                if owns_transaction {
                    self.rollback_quietly().await;
                } else if !auto_commit {
                    tracing::warn!(
                        "[{}] Non-atomic execution failed; completed work is left to the caller's transaction",
                        self.id
                    );
                }
                Err(e)
            }
        };

        if auto_commit && owns_transaction {
            if let Err(e) = self.connection.set_auto_commit(true).await {
                tracing::warn!("[{}] Failed to restore auto-commit: {}", self.id, e);
            }
        }

        let counts = outcome?;
        tracing::info!(
            "[{}] Update affected {} rows in {} round trips",
            self.id,
            counts.iter().sum::<u64>(),
            round_trips
        );
        Ok(UpdateOutcome {
            counts,
            warnings: std::mem::take(&mut self.warnings),
        })
    }

    /// Native round trips needed for a command
    fn round_trips(&self, compiled: &CompiledCommand) -> usize {
        match compiled {
            CompiledCommand::Batch(statements) if statements.iter().all(|s| !s.has_bound_values()) => 1,
            other => other
                .statements()
                .iter()
                .map(|statement| self.chunk_count(statement))
                .sum(),
        }
    }

    fn chunk_count(&self, statement: &CompiledStatement) -> usize {
        let rows = statement.parameter_rows.len();
        if !statement.has_bound_values() || rows == 0 || !statement.is_insert {
            1
        } else {
            rows.div_ceil(self.settings.max_prepared_insert_batch_size.max(1))
        }
    }

    async fn run_statements(&mut self, compiled: &CompiledCommand) -> EngineResult<Vec<u64>> {
        match compiled {
            CompiledCommand::Batch(statements) if statements.iter().all(|s| !s.has_bound_values()) => {
                self.open_statement(None).await?;
                self.state = ExecutionState::Executing;
                let statement = self.handle()?;
                for compiled in statements {
                    statement
                        .add_batch(Some(&compiled.sql))
                        .map_err(|e| EngineError::execution(&compiled.sql, e))?;
                }
                let counts = statement.execute_batch().await.map_err(|e| {
                    let sql = statements
                        .iter()
                        .map(|s| s.sql.as_str())
                        .collect::<Vec<_>>()
                        .join("; ");
                    EngineError::execution(sql, e)
                })?;
                self.drain_warnings();
                Ok(counts)
            }
            other => {
                let mut counts = Vec::with_capacity(other.statements().len());
                for statement in other.statements() {
                    counts.push(self.run_statement(statement).await?);
                }
                Ok(counts)
            }
        }
    }

    async fn run_statement(&mut self, compiled: &CompiledStatement) -> EngineResult<u64> {
        let sql = compiled.sql.as_str();

        if !compiled.has_bound_values() {
            self.open_statement(None).await?;
            self.state = ExecutionState::Executing;
            let count = self
                .handle()?
                .execute_update(Some(sql))
                .await
                .map_err(|e| EngineError::execution(sql, e))?;
            self.drain_warnings();
            return Ok(count);
        }

        self.open_statement(Some(sql)).await?;
        self.state = ExecutionState::Executing;

        if compiled.parameter_rows.is_empty() {
            let statement = self.handle()?;
            bind_row(&mut **statement, &compiled.bound_values, None, sql)?;
            let count = statement
                .execute_update(None)
                .await
                .map_err(|e| EngineError::execution(sql, e))?;
            self.drain_warnings();
            return Ok(count);
        }

        let rows = &compiled.parameter_rows;
        let chunk_size = if compiled.is_insert {
            self.settings.max_prepared_insert_batch_size.max(1)
        } else {
            rows.len()
        };

        let mut total = 0u64;
        for (index, chunk) in rows.chunks(chunk_size).enumerate() {
            let statement = self.handle()?;
            for row in chunk {
                bind_row(&mut **statement, &compiled.bound_values, Some(row), sql)?;
                statement.add_batch(None).map_err(|e| EngineError::execution(sql, e))?;
            }
            let counts = statement.execute_batch().await.map_err(|e| {
                tracing::warn!("[{}] Batch chunk {} of {} rows failed: {}", self.id, index, chunk.len(), e);
                EngineError::execution(sql, e)
            })?;
            total += counts.iter().sum::<u64>();
            tracing::debug!("[{}] Batch chunk {} submitted {} rows", self.id, index, chunk.len());
            self.drain_warnings();
        }
        Ok(total)
    }

    fn handle(&mut self) -> EngineResult<&mut Box<dyn NativeStatement>> {
        self.statement
            .as_mut()
            .ok_or_else(|| EngineError::Internal("no open statement".into()))
    }

    fn drain_warnings(&mut self) {
        let Some(statement) = self.statement.as_mut() else {
            return;
        };
        let warnings = statement.warnings();
        for warning in &warnings {
            tracing::warn!("[{}] Native warning: {}", self.id, warning);
        }
        self.warnings.extend(warnings);
        if let Err(e) = statement.clear_warnings() {
            tracing::warn!("[{}] Failed to clear warnings: {}", self.id, e);
        }
    }

    async fn rollback_quietly(&mut self) {
        if let Err(e) = self.connection.rollback().await {
            tracing::warn!("[{}] Rollback failed: {}", self.id, e);
        }
        self.state = ExecutionState::RolledBack;
    }

    /// Best-effort cancellation of the running statement
    pub async fn cancel(&mut self) {
        if let Some(statement) = self.statement.as_mut() {
            if let Err(e) = statement.cancel().await {
                tracing::debug!("[{}] Cancel not honoured: {}", self.id, e);
            }
        }
    }

    async fn close_statement(&mut self) {
        if let Some(mut statement) = self.statement.take() {
            if let Err(e) = statement.close().await {
                tracing::warn!("[{}] Failed to close statement: {}", self.id, e);
            }
        }
    }

    /// Release the statement handle; failures are logged, never returned
    pub async fn close(&mut self) {
        self.close_statement().await;
        self.state = ExecutionState::Closed;
    }

    /// Close a still-open handle on the current runtime without waiting
    ///
    /// `lease` is held until the close has run so the connection is not handed
    /// to another caller with a live statement on it.
    fn close_detached(&mut self, lease: Option<PooledConnection>) {
        let Some(mut statement) = self.statement.take() else {
            return;
        };
        self.state = ExecutionState::Closed;

        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!("[{}] Closing abandoned statement", id);
                runtime.spawn(async move {
                    if let Err(e) = statement.close().await {
                        tracing::warn!("[{}] Failed to close abandoned statement: {}", id, e);
                    }
                    drop(lease);
                });
            }
            Err(_) => {
                tracing::warn!("[{}] Statement dropped outside a runtime and left to the driver", id);
            }
        }
    }
}

impl Drop for ExecutionController {
    fn drop(&mut self) {
        self.close_detached(None);
    }
}

/// Bind one row of placeholder values, 1-based, in placeholder order
///
/// Values that cannot be coerced to their declared type are bound through the
/// object setter.
fn bind_row(
    statement: &mut dyn NativeStatement,
    bound_values: &[BoundValue],
    row: Option<&[Value]>,
    sql: &str,
) -> EngineResult<()> {
    for (position, bound) in bound_values.iter().enumerate() {
        let value = bound.resolve(row).ok_or_else(|| {
            EngineError::DataConversion(format!(
                "no value for placeholder {} of `{}`",
                position + 1,
                sql
            ))
        })?;
        let (binding, value) = match value.clone().coerce(bound.runtime_type) {
            Ok(coerced) => (TypeBinding::for_type(bound.runtime_type), coerced),
            Err(_) => (TypeBinding::Object, value.clone()),
        };
        statement
            .set_parameter(position + 1, binding, &value)
            .map_err(|e| EngineError::execution(sql, e))?;
    }
    Ok(())
}

/// Lazy, forward-only rows of a query
///
/// Rows are coerced to the declared output types. The underlying controller is
/// closed when the rows run out, on the first error, or on `close`.
pub struct QueryResults {
    sql: String,
    output_types: Vec<RuntimeType>,
    controller: ExecutionController,
    cursor: Option<Box<dyn NativeCursor>>,
    lease: Option<PooledConnection>,
    rows_read: u64,
}

impl QueryResults {
    /// Keep a pooled connection checked out until the results are finished
    pub fn with_lease(mut self, lease: PooledConnection) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn output_types(&self) -> &[RuntimeType] {
        &self.output_types
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn warnings(&self) -> &[String] {
        self.controller.warnings()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }

    pub async fn next_row(&mut self) -> EngineResult<Option<Vec<Value>>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        match cursor.next_row().await {
            Ok(Some(row)) => match self.coerce(row) {
                Ok(row) => {
                    self.rows_read += 1;
                    Ok(Some(row))
                }
                Err(e) => {
                    self.finish().await;
                    Err(e)
                }
            },
            Ok(None) => {
                tracing::debug!("[{}] Query returned {} rows", self.controller.id(), self.rows_read);
                self.finish().await;
                Ok(None)
            }
            Err(e) => {
                self.finish().await;
                Err(EngineError::execution(self.sql.clone(), e))
            }
        }
    }

    fn coerce(&self, row: Vec<Value>) -> EngineResult<Vec<Value>> {
        row.into_iter()
            .enumerate()
            .map(|(i, value)| match self.output_types.get(i) {
                Some(ty) => value.coerce(*ty).map_err(EngineError::DataConversion),
                None => Ok(value),
            })
            .collect()
    }

    /// Read every remaining row
    pub async fn collect(mut self) -> EngineResult<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn into_stream(self) -> impl Stream<Item = EngineResult<Vec<Value>>> {
        futures::stream::unfold(self, |mut results| async move {
            match results.next_row().await {
                Ok(Some(row)) => Some((Ok(row), results)),
                Ok(None) => None,
                Err(e) => Some((Err(e), results)),
            }
        })
    }

    pub async fn cancel(&mut self) {
        self.controller.cancel().await;
    }

    /// Stop reading and release the statement and connection
    pub async fn close(mut self) {
        self.finish().await;
    }

    async fn finish(&mut self) {
        self.cursor = None;
        self.controller.close().await;
        self.lease = None;
    }
}

impl Drop for QueryResults {
    fn drop(&mut self) {
        self.cursor = None;
        let lease = self.lease.take();
        self.controller.close_detached(lease);
    }
}
