use std::sync::Arc;
use std::time::Instant;

use crate::error::EngineResult;
use crate::models::{Catalog, Command, CompiledCommand, ExecutionSettings};
use crate::services::connection_pool::ConnectionPoolManager;
use crate::services::dialect::DialectKind;
use crate::services::executor::{ExecutionController, QueryResults, UpdateOutcome};
use crate::services::translator::TranslationService;
use crate::validation::CommandValidator;

/// Result of executing one command
pub enum ExecutionOutcome {
    /// Lazy rows; the user's connection stays checked out until they are finished
    Rows(QueryResults),
    UpdateCounts(UpdateOutcome),
}

impl ExecutionOutcome {
    pub fn is_rows(&self) -> bool {
        matches!(self, ExecutionOutcome::Rows(_))
    }
}

/// Facade running commands end to end: resolve, compile, check out, execute
pub struct QueryService {
    translator: Arc<TranslationService>,
    pool: Arc<ConnectionPoolManager>,
    catalog: Arc<dyn Catalog>,
    dialect: DialectKind,
    settings: ExecutionSettings,
}

impl QueryService {
    pub fn new(
        translator: Arc<TranslationService>,
        pool: Arc<ConnectionPoolManager>,
        catalog: Arc<dyn Catalog>,
        dialect: DialectKind,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            translator,
            pool,
            catalog,
            dialect,
            settings,
        }
    }

    pub fn dialect(&self) -> DialectKind {
        self.dialect
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Resolve and compile a command without touching the backing store
    pub fn compile(&self, command: Command, settings: Option<ExecutionSettings>) -> EngineResult<CompiledCommand> {
        let settings = settings.unwrap_or(self.settings);
        let mut command = command;
        CommandValidator::resolve(&mut command, self.catalog.as_ref())?;

        let compiled = self
            .translator
            .compile(self.dialect, &command, settings.binding_mode())?;
        for statement in compiled.statements() {
            tracing::debug!(
                "Compiled for {}: {} ({} bound values)",
                self.dialect.as_str(),
                statement.sql,
                statement.placeholder_count()
            );
        }
        Ok(compiled)
    }

    /// Execute a command on behalf of `user`
    ///
    /// `settings` overrides the service defaults for this command only.
    pub async fn execute(
        &self,
        user: &str,
        command: Command,
        settings: Option<ExecutionSettings>,
    ) -> EngineResult<ExecutionOutcome> {
        let start_time = Instant::now();
        let settings = settings.unwrap_or(self.settings);
        let compiled = self.compile(command, Some(settings))?;

        let lease = self.pool.checkout(user).await?;
        let mut controller = ExecutionController::new(lease.shared(), self.translator.publication().clone(), settings);
        tracing::info!("[{}] Executing command for user {}", controller.id(), user);

        match &compiled {
            CompiledCommand::Single(statement) if compiled.is_query() => {
                let results = controller.execute_query(statement).await?;
                tracing::info!(
                    "Query opened in {} ms",
                    start_time.elapsed().as_millis()
                );
                Ok(ExecutionOutcome::Rows(results.with_lease(lease)))
            }
            _ => {
                let outcome = controller.execute_update(&compiled).await;
                controller.close().await;
                let outcome = outcome?;
                tracing::info!(
                    "Update completed in {} ms with counts {:?}",
                    start_time.elapsed().as_millis(),
                    outcome.counts
                );
                Ok(ExecutionOutcome::UpdateCounts(outcome))
            }
        }
    }
}
