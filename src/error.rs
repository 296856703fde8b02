use thiserror::Error;

use crate::models::RuntimeType;
use crate::services::native::NativeError;

/// Errors raised while compiling a command, always before any native call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("Runtime type '{runtime_type}' has no native mapping for {context}")]
    UnmappedType {
        runtime_type: RuntimeType,
        context: String,
    },

    #[error("Malformed schema annotation '{annotation}' on {element}: {reason}")]
    MalformedAnnotation {
        element: String,
        annotation: String,
        reason: String,
    },

    #[error("Missing metadata: {0}")]
    MissingMetadata(String),

    #[error("Unsupported by the {dialect} dialect: {feature}")]
    Unsupported { dialect: String, feature: String },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl CompileError {
    pub fn unsupported(dialect: &str, feature: impl Into<String>) -> Self {
        CompileError::Unsupported {
            dialect: dialect.to_string(),
            feature: feature.into(),
        }
    }
}

/// Engine error types
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Schema publication failed for `{statement}`: {source}")]
    SchemaPublication {
        statement: String,
        #[source]
        source: NativeError,
    },

    #[error("Execution failed for `{sql}`: {source}")]
    Execution {
        sql: String,
        #[source]
        source: NativeError,
    },

    #[error("Data conversion error: {0}")]
    DataConversion(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn execution(sql: impl Into<String>, source: NativeError) -> Self {
        EngineError::Execution {
            sql: sql.into(),
            source,
        }
    }

    /// The native driver error behind this failure, if any
    pub fn native_cause(&self) -> Option<&NativeError> {
        match self {
            EngineError::SchemaPublication { source, .. } | EngineError::Execution { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Convert config::ConfigError to EngineError
impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
