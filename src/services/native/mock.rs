// Recording native driver for tests
//
// Every call is appended to a shared journal so tests can assert on the exact
// sequence of native operations. Failures are injected per batch submission or
// per SQL fragment.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{
    BufferedCursor, NativeConnection, NativeCursor, NativeError, NativeResult, NativeStatement,
};
use crate::models::{TypeBinding, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateStatement,
    Prepare(String),
    Bind(usize, TypeBinding, Value),
    ExecuteQuery(String),
    ExecuteUpdate(String),
    BatchSubmitted(usize),
    SetFetchSize(usize),
    ClearWarnings,
    SetAutoCommit(bool),
    Commit,
    Rollback,
    Cancel,
    Close,
}

#[derive(Debug)]
pub struct MockState {
    pub journal: Vec<Event>,
    pub auto_commit: bool,
    /// Zero-based `execute_batch` call that fails
    pub fail_batch_at: Option<usize>,
    /// Any executed SQL containing this fragment fails
    pub fail_sql_containing: Option<String>,
    pub fail_close: bool,
    pub fail_cancel: bool,
    pub warnings: Vec<String>,
    pub query_rows: Vec<Vec<Value>>,
    pub batches_submitted: usize,
    pub pending_rows: u64,
    pub committed_rows: u64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            journal: Vec::new(),
            auto_commit: true,
            fail_batch_at: None,
            fail_sql_containing: None,
            fail_close: false,
            fail_cancel: false,
            warnings: Vec::new(),
            query_rows: Vec::new(),
            batches_submitted: 0,
            pending_rows: 0,
            committed_rows: 0,
        }
    }
}

impl MockState {
    fn record_effect(&mut self, rows: u64) {
        if self.auto_commit {
            self.committed_rows += rows;
        } else {
            self.pending_rows += rows;
        }
    }

    fn check_sql(&self, sql: &str) -> NativeResult<()> {
        match &self.fail_sql_containing {
            Some(fragment) if sql.contains(fragment.as_str()) => {
                Err(NativeError::new(format!("rejected: {}", sql)).with_code("MOCK"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(configure: impl FnOnce(&mut MockState)) -> Self {
        let connection = Self::new();
        configure(&mut connection.state.lock().unwrap());
        connection
    }

    pub fn journal(&self) -> Vec<Event> {
        self.state.lock().unwrap().journal.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.journal().iter().filter(|e| predicate(e)).count()
    }

    pub fn snapshot<T>(&self, read: impl FnOnce(&MockState) -> T) -> T {
        read(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl NativeConnection for MockConnection {
    async fn create_statement(&self) -> NativeResult<Box<dyn NativeStatement>> {
        self.state.lock().unwrap().journal.push(Event::CreateStatement);
        Ok(Box::new(MockStatement::new(self.state.clone(), None)))
    }

    async fn prepare_statement(&self, sql: &str) -> NativeResult<Box<dyn NativeStatement>> {
        self.state
            .lock()
            .unwrap()
            .journal
            .push(Event::Prepare(sql.to_string()));
        Ok(Box::new(MockStatement::new(self.state.clone(), Some(sql.to_string()))))
    }

    async fn auto_commit(&self) -> NativeResult<bool> {
        Ok(self.state.lock().unwrap().auto_commit)
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> NativeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.journal.push(Event::SetAutoCommit(auto_commit));
        if auto_commit && !state.auto_commit {
            state.committed_rows += state.pending_rows;
            state.pending_rows = 0;
        }
        state.auto_commit = auto_commit;
        Ok(())
    }

    async fn commit(&self) -> NativeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.journal.push(Event::Commit);
        state.committed_rows += state.pending_rows;
        state.pending_rows = 0;
        Ok(())
    }

    async fn rollback(&self) -> NativeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.journal.push(Event::Rollback);
        state.pending_rows = 0;
        Ok(())
    }
}

pub struct MockStatement {
    state: Arc<Mutex<MockState>>,
    prepared_sql: Option<String>,
    params: BTreeMap<usize, Value>,
    batch: Vec<String>,
}

impl MockStatement {
    fn new(state: Arc<Mutex<MockState>>, prepared_sql: Option<String>) -> Self {
        Self {
            state,
            prepared_sql,
            params: BTreeMap::new(),
            batch: Vec::new(),
        }
    }

    fn text(&self, sql: Option<&str>) -> String {
        sql.map(str::to_string)
            .or_else(|| self.prepared_sql.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NativeStatement for MockStatement {
    fn set_parameter(&mut self, index: usize, binding: TypeBinding, value: &Value) -> NativeResult<()> {
        self.state
            .lock()
            .unwrap()
            .journal
            .push(Event::Bind(index, binding, value.clone()));
        self.params.insert(index, value.clone());
        Ok(())
    }

    fn add_batch(&mut self, sql: Option<&str>) -> NativeResult<()> {
        let text = self.text(sql);
        self.batch.push(text);
        Ok(())
    }

    async fn execute_query(&mut self, sql: Option<&str>) -> NativeResult<Box<dyn NativeCursor>> {
        let text = self.text(sql);
        let mut state = self.state.lock().unwrap();
        state.journal.push(Event::ExecuteQuery(text.clone()));
        state.check_sql(&text)?;
        Ok(Box::new(BufferedCursor::new(state.query_rows.clone())))
    }

    async fn execute_update(&mut self, sql: Option<&str>) -> NativeResult<u64> {
        let text = self.text(sql);
        let mut state = self.state.lock().unwrap();
        state.journal.push(Event::ExecuteUpdate(text.clone()));
        state.check_sql(&text)?;
        if text.starts_with("CREATE") {
            return Ok(0);
        }
        state.record_effect(1);
        Ok(1)
    }

    async fn execute_batch(&mut self) -> NativeResult<Vec<u64>> {
        let entries = std::mem::take(&mut self.batch);
        let mut state = self.state.lock().unwrap();
        let call = state.batches_submitted;
        state.batches_submitted += 1;
        state.journal.push(Event::BatchSubmitted(entries.len()));
        if state.fail_batch_at == Some(call) {
            return Err(NativeError::new(format!("batch {} failed", call)).with_code("MOCK"));
        }
        for text in &entries {
            state.check_sql(text)?;
        }
        state.record_effect(entries.len() as u64);
        Ok(vec![1; entries.len()])
    }

    fn set_fetch_size(&mut self, rows: usize) -> NativeResult<()> {
        self.state.lock().unwrap().journal.push(Event::SetFetchSize(rows));
        Ok(())
    }

    fn warnings(&self) -> Vec<String> {
        self.state.lock().unwrap().warnings.clone()
    }

    fn clear_warnings(&mut self) -> NativeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.journal.push(Event::ClearWarnings);
        state.warnings.clear();
        Ok(())
    }

    async fn cancel(&mut self) -> NativeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.journal.push(Event::Cancel);
        if state.fail_cancel {
            return Err(NativeError::new("cancel not supported"));
        }
        Ok(())
    }

    async fn close(&mut self) -> NativeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.journal.push(Event::Close);
        if state.fail_close {
            return Err(NativeError::new("close failed"));
        }
        Ok(())
    }
}
