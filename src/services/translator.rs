// Translation Service
//
// Owns the dialect registry and the shared compilation caches (schema mappings and
// the publication set) and compiles commands for a target dialect. One instance is
// created at startup and shared by every execution; `clear_caches` resets the
// caches on reconfiguration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CompileError;
use crate::models::{BindingMode, Command, CompiledCommand};
use crate::services::compiler::CommandCompiler;
use crate::services::dialect::{ColumnFamilyDialect, DialectKind, DialectRules, RelationalDialect};
use crate::services::publication::SchemaPublicationCache;
use crate::services::schema_mapper::SchemaMapper;

/// Service for compiling commands into backing store dialects
///
/// # Example
/// ```rust,ignore
/// let service = TranslationService::new();
/// let compiled = service.compile(DialectKind::Relational, &command, BindingMode::Inline)?;
/// ```
pub struct TranslationService {
    /// Registry of dialect rule sets by kind
    dialects: HashMap<DialectKind, Arc<dyn DialectRules>>,
    mapper: Arc<SchemaMapper>,
    publication: Arc<SchemaPublicationCache>,
}

impl TranslationService {
    /// Create a new translation service with the built-in dialects
    pub fn new() -> Self {
        let mut dialects: HashMap<DialectKind, Arc<dyn DialectRules>> = HashMap::new();
        dialects.insert(DialectKind::ColumnFamily, Arc::new(ColumnFamilyDialect::new()));
        dialects.insert(DialectKind::Relational, Arc::new(RelationalDialect::new()));

        let publication = Arc::new(SchemaPublicationCache::new());
        Self {
            dialects,
            mapper: Arc::new(SchemaMapper::new(publication.clone())),
            publication,
        }
    }

    /// Register a custom rule set, replacing any existing one for its kind
    pub fn register_dialect(&mut self, dialect: Arc<dyn DialectRules>) {
        self.dialects.insert(dialect.kind(), dialect);
    }

    pub fn dialect(&self, kind: DialectKind) -> Option<Arc<dyn DialectRules>> {
        self.dialects.get(&kind).cloned()
    }

    /// List all supported dialects
    pub fn supported_dialects(&self) -> Vec<DialectKind> {
        self.dialects.keys().copied().collect()
    }

    /// Compile `command` for the dialect registered under `kind`
    pub fn compile(
        &self,
        kind: DialectKind,
        command: &Command,
        mode: BindingMode,
    ) -> Result<CompiledCommand, CompileError> {
        let dialect = self.dialects.get(&kind).ok_or_else(|| {
            CompileError::InvalidCommand(format!("No dialect registered for {}", kind.as_str()))
        })?;
        CommandCompiler::new(dialect.as_ref(), Some(self.mapper.as_ref()), mode).compile(command)
    }

    pub fn mapper(&self) -> &Arc<SchemaMapper> {
        &self.mapper
    }

    pub fn publication(&self) -> &Arc<SchemaPublicationCache> {
        &self.publication
    }

    /// Drop every cached mapping and publication record
    pub fn clear_caches(&self) {
        self.mapper.clear();
        self.publication.clear();
        tracing::info!("Translation caches cleared");
    }
}

impl Default for TranslationService {
    fn default() -> Self {
        Self::new()
    }
}
