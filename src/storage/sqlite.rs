use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, InterruptHandle};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{TypeBinding, Value};
use crate::services::connection_pool::ConnectionFactory;
use crate::services::native::{
    BufferedCursor, NativeConnection, NativeCursor, NativeError, NativeResult, NativeStatement,
    SharedConnection,
};

const BATCH_SAVEPOINT: &str = "native_batch";

impl From<rusqlite::Error> for NativeError {
    fn from(err: rusqlite::Error) -> Self {
        let code = err.sqlite_error_code().map(|code| format!("{:?}", code));
        let native = NativeError::new(err.to_string());
        match code {
            Some(code) => native.with_code(code),
            None => native,
        }
    }
}

/// Strip the `sqlite:` / `sqlite://` URL prefix
fn clean_path(url: &str) -> &str {
    if url.starts_with("sqlite:") {
        url.trim_start_matches("sqlite:").trim_start_matches("//")
    } else {
        url
    }
}

/// State shared by a connection and the statements it hands out
struct Session {
    conn: Mutex<Connection>,
    interrupt: InterruptHandle,
    auto_commit: AtomicBool,
}

impl Session {
    /// In manual mode, open a transaction before the first statement runs
    fn begin_if_needed(&self, conn: &Connection) -> rusqlite::Result<()> {
        if !self.auto_commit.load(Ordering::SeqCst) && conn.is_autocommit() {
            tracing::debug!("Opening SQLite transaction");
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }
}

/// SQLite backing store exposed through the native statement interface
/// Uses tokio::Mutex for async-friendly locking
#[derive(Clone)]
pub struct SqliteConnection {
    session: Arc<Session>,
}

impl SqliteConnection {
    /// Open a database file (accepts `sqlite:./path` and `sqlite://path` URLs)
    pub fn open<P: AsRef<Path>>(db_path: P) -> NativeResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy();
        let conn = Connection::open(clean_path(&path_str))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> NativeResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> NativeResult<Self> {
        // Enable foreign key constraints
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let interrupt = conn.get_interrupt_handle();
        Ok(Self {
            session: Arc::new(Session {
                conn: Mutex::new(conn),
                interrupt,
                auto_commit: AtomicBool::new(true),
            }),
        })
    }

    fn statement(&self, sql: Option<String>) -> Box<dyn NativeStatement> {
        Box::new(SqliteStatement {
            session: self.session.clone(),
            prepared_sql: sql,
            params: BTreeMap::new(),
            batch: Vec::new(),
            warnings: Vec::new(),
            closed: false,
        })
    }
}

#[async_trait]
impl NativeConnection for SqliteConnection {
    async fn create_statement(&self) -> NativeResult<Box<dyn NativeStatement>> {
        Ok(self.statement(None))
    }

    async fn prepare_statement(&self, sql: &str) -> NativeResult<Box<dyn NativeStatement>> {
        // Compile once up front so syntax errors surface at prepare time
        let conn = self.session.conn.lock().await;
        conn.prepare_cached(sql)?;
        Ok(self.statement(Some(sql.to_string())))
    }

    async fn auto_commit(&self) -> NativeResult<bool> {
        Ok(self.session.auto_commit.load(Ordering::SeqCst))
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> NativeResult<()> {
        let conn = self.session.conn.lock().await;
        // Switching back to auto-commit commits the open transaction
        if auto_commit && !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        self.session.auto_commit.store(auto_commit, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> NativeResult<()> {
        let conn = self.session.conn.lock().await;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    async fn rollback(&self) -> NativeResult<()> {
        let conn = self.session.conn.lock().await;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        let conn = self.session.conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    }
}

enum BatchEntry {
    Sql(String),
    Params(BTreeMap<usize, Value>),
}

pub struct SqliteStatement {
    session: Arc<Session>,
    prepared_sql: Option<String>,
    params: BTreeMap<usize, Value>,
    batch: Vec<BatchEntry>,
    warnings: Vec<String>,
    closed: bool,
}

impl SqliteStatement {
    fn ensure_open(&self) -> NativeResult<()> {
        if self.closed {
            return Err(NativeError::new("statement is closed"));
        }
        Ok(())
    }

    /// Text to run: the call's SQL on plain statements, the prepared SQL otherwise
    fn text<'a>(&'a self, sql: Option<&'a str>) -> NativeResult<&'a str> {
        self.ensure_open()?;
        sql.or(self.prepared_sql.as_deref())
            .ok_or_else(|| NativeError::new("no SQL supplied to a plain statement"))
    }
}

#[async_trait]
impl NativeStatement for SqliteStatement {
    fn set_parameter(&mut self, index: usize, binding: TypeBinding, value: &Value) -> NativeResult<()> {
        self.ensure_open()?;
        if index == 0 {
            return Err(NativeError::new("parameter indexes start at 1"));
        }
        tracing::trace!("Binding parameter {} as {:?}", index, binding);
        self.params.insert(index, value.clone());
        Ok(())
    }

    fn add_batch(&mut self, sql: Option<&str>) -> NativeResult<()> {
        self.ensure_open()?;
        match (sql, &self.prepared_sql) {
            (Some(sql), None) => self.batch.push(BatchEntry::Sql(sql.to_string())),
            (None, Some(_)) => self.batch.push(BatchEntry::Params(std::mem::take(&mut self.params))),
            _ => return Err(NativeError::new("batch entry does not match the statement kind")),
        }
        Ok(())
    }

    async fn execute_query(&mut self, sql: Option<&str>) -> NativeResult<Box<dyn NativeCursor>> {
        let text = self.text(sql)?.to_string();
        let conn = self.session.conn.lock().await;
        self.session.begin_if_needed(&conn)?;
        let rows = query(&conn, &text, &self.params)?;
        Ok(Box::new(BufferedCursor::new(rows)))
    }

    async fn execute_update(&mut self, sql: Option<&str>) -> NativeResult<u64> {
        let text = self.text(sql)?.to_string();
        let conn = self.session.conn.lock().await;
        self.session.begin_if_needed(&conn)?;
        execute(&conn, &text, &self.params)
    }

    async fn execute_batch(&mut self) -> NativeResult<Vec<u64>> {
        self.ensure_open()?;
        let entries = std::mem::take(&mut self.batch);
        let conn = self.session.conn.lock().await;
        self.session.begin_if_needed(&conn)?;

        // A batch applies completely or not at all
        conn.execute_batch(&format!("SAVEPOINT {}", BATCH_SAVEPOINT))?;
        match run_batch(&conn, self.prepared_sql.as_deref(), &entries) {
            Ok(counts) => {
                conn.execute_batch(&format!("RELEASE {}", BATCH_SAVEPOINT))?;
                Ok(counts)
            }
            Err(e) => {
                if let Err(undo) = conn.execute_batch(&format!(
                    "ROLLBACK TO {0}; RELEASE {0}",
                    BATCH_SAVEPOINT
                )) {
                    tracing::warn!("Failed to undo partial SQLite batch: {}", undo);
                }
                Err(e)
            }
        }
    }

    fn set_fetch_size(&mut self, rows: usize) -> NativeResult<()> {
        // Results are materialized in full; the hint has no effect
        tracing::trace!("Ignoring fetch size {}", rows);
        Ok(())
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }

    fn clear_warnings(&mut self) -> NativeResult<()> {
        self.warnings.clear();
        Ok(())
    }

    async fn cancel(&mut self) -> NativeResult<()> {
        self.session.interrupt.interrupt();
        Ok(())
    }

    async fn close(&mut self) -> NativeResult<()> {
        self.closed = true;
        self.params.clear();
        self.batch.clear();
        Ok(())
    }
}

fn bind(statement: &mut rusqlite::Statement<'_>, params: &BTreeMap<usize, Value>) -> NativeResult<()> {
    for (index, value) in params {
        statement.raw_bind_parameter(*index, to_sql_value(value))?;
    }
    Ok(())
}

fn query(conn: &Connection, sql: &str, params: &BTreeMap<usize, Value>) -> NativeResult<Vec<Vec<Value>>> {
    let mut statement = conn.prepare_cached(sql)?;
    bind(&mut statement, params)?;
    let columns = statement.column_count();

    let mut rows = statement.raw_query();
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for i in 0..columns {
            values.push(from_sql_value(row.get_ref(i)?));
        }
        result.push(values);
    }
    Ok(result)
}

fn execute(conn: &Connection, sql: &str, params: &BTreeMap<usize, Value>) -> NativeResult<u64> {
    let mut statement = conn.prepare_cached(sql)?;
    bind(&mut statement, params)?;
    Ok(statement.raw_execute()? as u64)
}

fn run_batch(conn: &Connection, prepared_sql: Option<&str>, entries: &[BatchEntry]) -> NativeResult<Vec<u64>> {
    let empty = BTreeMap::new();
    entries
        .iter()
        .map(|entry| match (entry, prepared_sql) {
            (BatchEntry::Sql(sql), _) => execute(conn, sql, &empty),
            (BatchEntry::Params(params), Some(sql)) => execute(conn, sql, params),
            (BatchEntry::Params(_), None) => Err(NativeError::new("parameter batch without prepared SQL")),
        })
        .collect()
}

/// Runtime value to SQLite storage class
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::String(s) | Value::Clob(s) | Value::Xml(s) => SqlValue::Text(s.clone()),
        Value::Char(c) => SqlValue::Text(c.to_string()),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Byte(v) => SqlValue::Integer(i64::from(*v)),
        Value::Short(v) => SqlValue::Integer(i64::from(*v)),
        Value::Integer(v) => SqlValue::Integer(i64::from(*v)),
        Value::Long(v) => SqlValue::Integer(*v),
        Value::BigInteger(v) => match i64::try_from(*v) {
            Ok(v) => SqlValue::Integer(v),
            Err(_) => SqlValue::Text(v.to_string()),
        },
        Value::Float(v) => SqlValue::Real(f64::from(*v)),
        Value::Double(v) => SqlValue::Real(*v),
        Value::BigDecimal(d) => SqlValue::Text(d.to_string()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => SqlValue::Text(t.format("%H:%M:%S%.f").to_string()),
        Value::Timestamp(ts) => SqlValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Varbinary(b) | Value::Blob(b) => SqlValue::Blob(b.clone()),
        Value::Object(serde_json::Value::String(s)) => SqlValue::Text(s.clone()),
        Value::Object(json) => SqlValue::Text(json.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Long(v),
        ValueRef::Real(v) => Value::Double(v),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Opens one SQLite connection per user against the configured database
pub struct SqliteConnectionFactory {
    url: String,
}

impl SqliteConnectionFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    async fn connect(&self, user: &str) -> NativeResult<SharedConnection> {
        tracing::info!("Opening SQLite connection to {} for user {}", clean_path(&self.url), user);
        let connection = if clean_path(&self.url) == ":memory:" {
            SqliteConnection::open_in_memory()?
        } else {
            SqliteConnection::open(&self.url)?
        };
        Ok(Arc::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::models::{
        BindingMode, Command, CompiledCommand, ExecutionSettings, Expression, Insert, InsertSource, RuntimeType,
        TableReference,
    };
    use crate::services::compiler::compile;
    use crate::services::connection_pool::ConnectionPoolManager;
    use crate::services::dialect::RelationalDialect;
    use crate::services::executor::ExecutionController;
    use crate::services::fixtures::{people, select_where};
    use crate::services::publication::SchemaPublicationCache;
    use chrono::NaiveDate;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    const PEOPLE_DDL: &str =
        r#"CREATE TABLE "people" ("id" INTEGER PRIMARY KEY, "name" TEXT, "born" TEXT, "photo" BLOB)"#;

    async fn people_db() -> SqliteConnection {
        let connection = SqliteConnection::open_in_memory().unwrap();
        let mut statement = connection.create_statement().await.unwrap();
        statement.execute_update(Some(PEOPLE_DDL)).await.unwrap();
        statement.close().await.unwrap();
        connection
    }

    fn born(i: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(1990, 1, 1).unwrap() + chrono::Days::new(i as u64)
    }

    fn insert_people(ids: impl IntoIterator<Item = i64>) -> CompiledCommand {
        let table = TableReference::new(people());
        let rows = ids
            .into_iter()
            .map(|i| vec![Value::Long(i), Value::String(format!("person-{}", i)), Value::Date(born(i))])
            .collect();
        let command = Command::Insert(Insert {
            columns: vec![table.column("id"), table.column("name"), table.column("born")],
            source: InsertSource::Parameterized {
                values: vec![
                    Expression::parameter(0, RuntimeType::Integer),
                    Expression::parameter(1, RuntimeType::String),
                    Expression::parameter(2, RuntimeType::Date),
                ],
                rows,
            },
            table,
        });
        compile(&command, &RelationalDialect::new(), None, BindingMode::Inline).unwrap()
    }

    async fn row_count(connection: &SqliteConnection) -> i64 {
        let conn = connection.session.conn.lock().await;
        conn.query_row(r#"SELECT COUNT(*) FROM "people""#, [], |row| row.get(0))
            .unwrap()
    }

    fn controller(connection: &SqliteConnection, settings: ExecutionSettings) -> ExecutionController {
        ExecutionController::new(
            Arc::new(connection.clone()),
            Arc::new(SchemaPublicationCache::new()),
            settings,
        )
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("sqlite:./data/app.db"), "./data/app.db");
        assert_eq!(clean_path("sqlite://app.db"), "app.db");
        assert_eq!(clean_path("app.db"), "app.db");
    }

    #[tokio::test]
    async fn test_chunked_insert_then_query() {
        let connection = people_db().await;
        let mut insert = controller(&connection, ExecutionSettings::default().with_batch_size(4));

        let outcome = insert.execute_update(&insert_people(0..10)).await.unwrap();
        assert_eq!(outcome.total(), 10);
        assert_eq!(row_count(&connection).await, 10);
        assert!(connection.auto_commit().await.unwrap());

        let select = select_where(
            people(),
            &["id", "name", "born"],
            "id",
            Expression::literal(Value::Integer(3), RuntimeType::Integer),
        );
        let compiled = compile(&select, &RelationalDialect::new(), None, BindingMode::Inline).unwrap();
        let rows = controller(&connection, ExecutionSettings::default())
            .execute_query(&compiled.statements()[0])
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![vec![
                Value::Integer(3),
                Value::String("person-3".into()),
                Value::Date(born(3)),
            ]]
        );
    }

    #[tokio::test]
    async fn test_failed_chunk_leaves_table_untouched() {
        let connection = people_db().await;
        let mut insert = controller(&connection, ExecutionSettings::default().with_batch_size(3));

        // The third chunk repeats id 1
        let ids = [0, 1, 2, 3, 4, 5, 6, 1, 8, 9];
        let err = insert.execute_update(&insert_people(ids)).await.unwrap_err();

        assert!(matches!(err, EngineError::Execution { .. }));
        assert!(err.native_cause().unwrap().code.is_some());
        assert_eq!(row_count(&connection).await, 0);
        assert!(connection.auto_commit().await.unwrap());
    }

    #[tokio::test]
    async fn test_manual_transaction_rollback() {
        let connection = people_db().await;
        assert_ok!(connection.set_auto_commit(false).await);

        let mut insert = controller(&connection, ExecutionSettings::default().with_atomic(false));
        assert_ok!(insert.execute_update(&insert_people(0..2)).await);
        assert_eq!(row_count(&connection).await, 2);

        assert_ok!(connection.rollback().await);
        assert_eq!(row_count(&connection).await, 0);
    }

    #[tokio::test]
    async fn test_closed_statement_rejects_work() {
        let connection = SqliteConnection::open_in_memory().unwrap();
        let mut statement = connection.create_statement().await.unwrap();
        assert_ok!(statement.close().await);
        assert_err!(statement.execute_update(Some("SELECT 1")).await);
    }

    #[tokio::test]
    async fn test_prepare_reports_syntax_errors() {
        let connection = SqliteConnection::open_in_memory().unwrap();
        assert!(connection.prepare_statement("SELEC nothing").await.is_err());
    }

    #[tokio::test]
    async fn test_file_database_through_pool() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("native.db").display());
        let pool = ConnectionPoolManager::new(Arc::new(SqliteConnectionFactory::new(url.clone())));

        {
            let lease = pool.checkout("alice").await.unwrap();
            let mut statement = lease.create_statement().await.unwrap();
            statement.execute_update(Some(PEOPLE_DDL)).await.unwrap();
            let mut insert = ExecutionController::new(
                lease.shared(),
                Arc::new(SchemaPublicationCache::new()),
                ExecutionSettings::default(),
            );
            insert.execute_update(&insert_people(0..3)).await.unwrap();
        }

        // A fresh connection sees the committed rows
        let reopened = SqliteConnection::open(&url).unwrap();
        assert_eq!(row_count(&reopened).await, 3);
    }
}
