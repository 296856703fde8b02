// Native Statement Interface
//
// The collaborator surface the execution layer drives: connections that hand out
// plain or prepared statements and control transactions, statements that bind,
// batch and execute, and cursors that yield rows. Each backing store supplies an
// implementation (see `storage::sqlite`).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{TypeBinding, Value};

#[cfg(test)]
pub(crate) mod mock;

/// Error reported by a native driver
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct NativeError {
    pub message: String,
    /// Driver-specific error or state code
    pub code: Option<String>,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

pub type NativeResult<T> = Result<T, NativeError>;

/// A checked-out native connection
///
/// Connections are not reentrant: the pool hands each one to a single execution
/// at a time.
#[async_trait]
pub trait NativeConnection: Send + Sync {
    /// Create a plain statement that executes the text passed to each call
    async fn create_statement(&self) -> NativeResult<Box<dyn NativeStatement>>;

    /// Create a prepared statement for `sql`
    async fn prepare_statement(&self, sql: &str) -> NativeResult<Box<dyn NativeStatement>>;

    async fn auto_commit(&self) -> NativeResult<bool>;

    async fn set_auto_commit(&self, auto_commit: bool) -> NativeResult<()>;

    async fn commit(&self) -> NativeResult<()>;

    async fn rollback(&self) -> NativeResult<()>;

    /// Liveness check used by the pool before handing the connection out again
    async fn is_valid(&self) -> bool {
        true
    }
}

pub type SharedConnection = Arc<dyn NativeConnection>;

/// One native statement handle
///
/// Parameter indexes are 1-based. Methods taking `sql: Option<&str>` expect
/// `Some` on plain statements and `None` on prepared ones.
#[async_trait]
pub trait NativeStatement: Send {
    fn set_parameter(&mut self, index: usize, binding: TypeBinding, value: &Value) -> NativeResult<()>;

    /// Queue the current parameters (prepared) or `sql` (plain) for the next batch
    fn add_batch(&mut self, sql: Option<&str>) -> NativeResult<()>;

    async fn execute_query(&mut self, sql: Option<&str>) -> NativeResult<Box<dyn NativeCursor>>;

    async fn execute_update(&mut self, sql: Option<&str>) -> NativeResult<u64>;

    /// Submit the queued batch in one round trip, returning one count per entry
    async fn execute_batch(&mut self) -> NativeResult<Vec<u64>>;

    fn set_fetch_size(&mut self, rows: usize) -> NativeResult<()>;

    /// Warnings accumulated since the last `clear_warnings`
    fn warnings(&self) -> Vec<String>;

    fn clear_warnings(&mut self) -> NativeResult<()>;

    async fn cancel(&mut self) -> NativeResult<()>;

    async fn close(&mut self) -> NativeResult<()>;
}

/// Forward-only cursor over a query result
#[async_trait]
pub trait NativeCursor: Send {
    async fn next_row(&mut self) -> NativeResult<Option<Vec<Value>>>;
}

/// Cursor over rows the driver has already materialized
#[derive(Debug, Default)]
pub struct BufferedCursor {
    rows: VecDeque<Vec<Value>>,
}

impl BufferedCursor {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self { rows: rows.into() }
    }
}

#[async_trait]
impl NativeCursor for BufferedCursor {
    async fn next_row(&mut self) -> NativeResult<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffered_cursor_is_forward_only() {
        let mut cursor = BufferedCursor::new(vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
        assert_eq!(cursor.next_row().await.unwrap(), Some(vec![Value::Integer(1)]));
        assert_eq!(cursor.next_row().await.unwrap(), Some(vec![Value::Integer(2)]));
        assert_eq!(cursor.next_row().await.unwrap(), None);
        assert_eq!(cursor.next_row().await.unwrap(), None);
    }

    #[test]
    fn test_native_error_code() {
        let err = NativeError::new("table not found").with_code("42P01");
        assert_eq!(err.to_string(), "table not found");
        assert_eq!(err.code.as_deref(), Some("42P01"));
    }
}
