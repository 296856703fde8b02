// Execution Models
//
// Per-command execution settings and the compiled form of a command: dialect text,
// the ordered values that back its placeholders, and the schema mappings the
// backing store must know about before the text can run.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::types::{RuntimeType, Value};
use crate::services::schema_mapper::NativeSchema;

/// Execution settings supplied by the environment for each command
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionSettings {
    /// Bind every bind-eligible literal instead of writing it inline
    #[serde(default)]
    pub use_prepared_statements: bool,

    /// Maximum parameter rows per native batch for INSERT
    #[serde(default = "default_max_batch_size")]
    pub max_prepared_insert_batch_size: usize,

    /// Advisory fetch size forwarded to the native statement
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Whether this controller owns the commit/rollback boundary on a connection
    /// that is already in manual-transaction mode.
    ///
    /// With `atomic = false` a failing batch chunk aborts the remaining chunks but
    /// chunks that already succeeded are neither committed nor rolled back here;
    /// their effects stay in the caller's open transaction.
    #[serde(default = "default_atomic")]
    pub atomic: bool,
}

fn default_max_batch_size() -> usize {
    2048
}

fn default_fetch_size() -> usize {
    1024
}

fn default_atomic() -> bool {
    true
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            use_prepared_statements: false,
            max_prepared_insert_batch_size: default_max_batch_size(),
            fetch_size: default_fetch_size(),
            atomic: default_atomic(),
        }
    }
}

impl ExecutionSettings {
    pub fn binding_mode(&self) -> BindingMode {
        if self.use_prepared_statements {
            BindingMode::Prepared
        } else {
            BindingMode::Inline
        }
    }

    pub fn with_batch_size(mut self, max_prepared_insert_batch_size: usize) -> Self {
        self.max_prepared_insert_batch_size = max_prepared_insert_batch_size.max(1);
        self
    }

    pub fn with_atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub fn with_prepared_statements(mut self, use_prepared_statements: bool) -> Self {
        self.use_prepared_statements = use_prepared_statements;
        self
    }
}

/// How literals are compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    /// Literals are written inline unless their type must be bound
    Inline,
    /// Every bind-eligible literal becomes a placeholder
    Prepared,
}

/// Where the value for a placeholder comes from
#[derive(Debug, Clone, PartialEq)]
pub enum BoundSource {
    Literal(Value),
    /// Index into each parameter row
    Parameter(usize),
}

/// One placeholder's value source and target type, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundValue {
    pub source: BoundSource,
    pub runtime_type: RuntimeType,
}

impl BoundValue {
    /// Resolve the concrete value for one parameter row
    pub fn resolve<'a>(&'a self, row: Option<&'a [Value]>) -> Option<&'a Value> {
        match &self.source {
            BoundSource::Literal(value) => Some(value),
            BoundSource::Parameter(index) => row.and_then(|r| r.get(*index)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Update,
}

/// A single compiled native statement
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    pub sql: String,
    pub bound_values: Vec<BoundValue>,
    pub kind: StatementKind,
    pub is_insert: bool,
    /// Declared output types for queries
    pub output_types: Vec<RuntimeType>,
    /// Native schema mappings referenced by the statement
    pub schemas: Vec<Arc<NativeSchema>>,
    /// Parameter rows; empty when the statement runs once
    pub parameter_rows: Vec<Vec<Value>>,
}

impl CompiledStatement {
    pub fn placeholder_count(&self) -> usize {
        self.bound_values.len()
    }

    pub fn has_bound_values(&self) -> bool {
        !self.bound_values.is_empty()
    }
}

/// Compiled form of a command
#[derive(Debug, Clone)]
pub enum CompiledCommand {
    Single(CompiledStatement),
    Batch(Vec<CompiledStatement>),
}

impl CompiledCommand {
    pub fn statements(&self) -> &[CompiledStatement] {
        match self {
            CompiledCommand::Single(statement) => std::slice::from_ref(statement),
            CompiledCommand::Batch(statements) => statements,
        }
    }

    /// Distinct schema mappings referenced anywhere in the command
    pub fn schemas(&self) -> Vec<Arc<NativeSchema>> {
        let mut schemas: Vec<Arc<NativeSchema>> = Vec::new();
        for schema in self.statements().iter().flat_map(|s| s.schemas.iter()) {
            if !schemas
                .iter()
                .any(|s| s.publication_statement == schema.publication_statement)
            {
                schemas.push(schema.clone());
            }
        }
        schemas
    }

    pub fn is_query(&self) -> bool {
        matches!(self, CompiledCommand::Single(s) if s.kind == StatementKind::Query)
    }
}
