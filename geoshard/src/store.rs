//! Per-shard SQLite storage
//!
//! Each shard owns exactly one `rusqlite::Connection` behind a mutex, and
//! every statement runs on tokio's blocking pool so the async executor is
//! never stalled by SQLite work. Queries take JSON parameter maps and
//! return JSON rows, so the routing layer above never touches SQLite types
//! directly. File-backed shards run in WAL mode; `:memory:` shards are
//! used by tests and ephemeral deployments.

use crate::error::{Result, ShardError};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ToSql};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct ShardStore {
    shard_id: String,
    conn: Arc<Mutex<Connection>>,
    in_flight: Arc<AtomicU32>,
}

impl ShardStore {
    /// Open the backing database for a shard. `:memory:` opens an
    /// in-process database; anything else is treated as a file path.
    pub fn open(shard_id: impl Into<String>, connection_string: &str) -> Result<Self> {
        let shard_id = shard_id.into();
        let conn = if connection_string == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = std::path::Path::new(connection_string).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open(connection_string)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn
        };
        conn.pragma_update(None, "foreign_keys", "ON")?;
        debug!(shard_id = %shard_id, path = %connection_string, "opened shard store");
        Ok(Self {
            shard_id,
            conn: Arc::new(Mutex::new(conn)),
            in_flight: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Run `f` against the connection on the blocking pool. The async side
    /// only awaits the join handle, so a caller's deadline can fire while a
    /// statement is queued or executing; the statement itself runs to
    /// completion on its blocking thread.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let in_flight = Arc::clone(&self.in_flight);
        let shard_id = self.shard_id.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = InFlightGuard::enter(in_flight);
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|err| ShardError::Backend(format!("shard {shard_id} worker failed: {err}")))?
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Statements currently executing against this store
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Execute a single statement. Row-returning statements yield one JSON
    /// object per row; others yield a single `{"rows_affected": n}` object.
    pub async fn execute(&self, sql: &str, params: &HashMap<String, Value>) -> Result<Vec<Value>> {
        let sql = sql.to_string();
        let params = params.clone();
        self.run_blocking(move |conn| run_statement(conn, &sql, &params))
            .await
    }

    /// Execute statements atomically: all of them commit or none do.
    /// Results are flattened in statement order.
    pub async fn execute_in_transaction(
        &self,
        statements: &[(String, HashMap<String, Value>)],
    ) -> Result<Vec<Value>> {
        let statements = statements.to_vec();
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;

            let mut rows = Vec::new();
            let mut failed = None;
            for (sql, params) in &statements {
                match run_statement(&tx, sql, params) {
                    Ok(mut statement_rows) => rows.append(&mut statement_rows),
                    Err(err) => {
                        failed = Some(err);
                        break;
                    }
                }
            }

            match failed {
                Some(err) => {
                    tx.rollback()?;
                    Err(err)
                }
                None => {
                    tx.commit()?;
                    Ok(rows)
                }
            }
        })
        .await
    }

    /// Run a multi-statement SQL script, used for schema setup
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.run_blocking(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    /// Liveness probe
    pub async fn ping(&self) -> Result<()> {
        self.run_blocking(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    /// Current database size, from the page counters
    pub async fn data_size_bytes(&self) -> Result<u64> {
        self.run_blocking(|conn| {
            let size: i64 = conn.query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )?;
            Ok(size.max(0) as u64)
        })
        .await
    }

    /// Count rows in a table, used by removal drain checks
    pub async fn count_rows(&self, table: &str) -> Result<u64> {
        if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ShardError::Backend(format!("invalid table name: {table}")));
        }
        let table = table.to_string();
        self.run_blocking(move |conn| {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

struct InFlightGuard {
    counter: Arc<AtomicU32>,
}

impl InFlightGuard {
    fn enter(counter: Arc<AtomicU32>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Prepare, bind and run one statement against a connection. Parameters
/// not referenced by the SQL are silently dropped, so callers can reuse
/// one parameter map across a statement group.
fn run_statement(
    conn: &Connection,
    sql: &str,
    params: &HashMap<String, Value>,
) -> Result<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;

    let mut bound: Vec<(String, SqlValue)> = Vec::new();
    for (name, value) in params {
        let placeholder = if name.starts_with(':') {
            name.clone()
        } else {
            format!(":{name}")
        };
        if stmt.parameter_index(&placeholder)?.is_some() {
            bound.push((placeholder, json_to_sql(value)));
        }
    }
    let bind_refs: Vec<(&str, &dyn ToSql)> = bound
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect();

    if stmt.column_count() == 0 {
        let affected = stmt.execute(&bind_refs[..])?;
        return Ok(vec![json!({ "rows_affected": affected })]);
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(&bind_refs[..])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::new();
        for (i, column) in columns.iter().enumerate() {
            object.insert(column.clone(), sql_ref_to_json(row.get_ref(i)?));
        }
        out.push(Value::Object(object));
    }
    Ok(out)
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Arrays and objects are stored as their JSON text
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(hex::encode(b)),
    }
}
