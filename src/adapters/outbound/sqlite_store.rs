//! SQLite Store
//!
//! Implements StoreAdapter using SQLite as the durable primary store.
//! Records are JSON documents, one table per collection, addressed through
//! json_extract. Toggle collections carry a unique expression index over
//! their (actor, target) pair so concurrent duplicate inserts surface as
//! constraint violations.

use crate::domain::errors::StoreError;
use crate::domain::operation::{Filter, Operation, OperationKind, OperationOutcome, Payload};
use crate::domain::ports::StoreAdapter;
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// SQLite-backed store adapter.
///
/// Every call runs on the blocking pool with its own connection; the file
/// is opened in WAL mode with a busy timeout so concurrent writers queue
/// instead of failing immediately.
pub struct SqliteStore {
    name: String,
    db_path: String,
    probe_collection: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and switch it to WAL mode.
    pub async fn open(db_path: impl Into<String>) -> Result<Self> {
        let db_path = db_path.into();
        let path = db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = open_connection(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(())
        })
        .await??;

        Ok(Self {
            name: "sqlite".to_string(),
            db_path,
            probe_collection: "users".to_string(),
        })
    }

    /// Set the adapter name reported in logs and errors.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the collection probed for liveness.
    pub fn with_probe_collection(mut self, collection: impl Into<String>) -> Self {
        self.probe_collection = collection.into();
        self
    }

    /// Declare a uniqueness constraint on (actor field, target field) for a
    /// collection, creating the table and its unique pair index.
    pub async fn ensure_unique(
        &self,
        collection: &str,
        actor_field: &str,
        target_field: &str,
    ) -> Result<()> {
        let table = validate_identifier(collection).map_err(anyhow::Error::msg)?;
        let actor = validate_identifier(actor_field).map_err(anyhow::Error::msg)?;
        let target = validate_identifier(target_field).map_err(anyhow::Error::msg)?;
        let path = self.db_path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = open_connection(&path)?;
            ensure_table(&conn, &table)?;
            conn.execute_batch(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS \"idx_{table}_{actor}_{target}\" \
                 ON \"{table}\" (json_extract(doc, '$.{actor}'), json_extract(doc, '$.{target}'))",
            ))?;
            Ok(())
        })
        .await??;
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, op: &Operation) -> OperationOutcome {
        let op = op.clone();
        let path = self.db_path.clone();
        let name = self.name.clone();
        match tokio::task::spawn_blocking(move || run_operation(&path, &name, &op)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(StoreError::unknown(
                &self.name,
                format!("blocking task failed: {}", e),
            )),
        }
    }

    async fn probe(&self) -> OperationOutcome {
        let op = Operation::read_many_limit(&self.probe_collection, 1);
        self.execute(&op).await
    }
}

fn open_connection(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

fn ensure_table(conn: &Connection, table: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (id TEXT PRIMARY KEY, doc TEXT NOT NULL)",
    ))
}

fn run_operation(path: &str, store: &str, op: &Operation) -> OperationOutcome {
    let table = validate_identifier(&op.collection)
        .map_err(|m| StoreError::validation(store, m))?;
    let conn = open_connection(path).map_err(|e| classify(store, e))?;
    ensure_table(&conn, &table).map_err(|e| classify(store, e))?;

    match op.kind {
        OperationKind::ReadOne => read_one(&conn, store, &table, op),
        OperationKind::ReadMany => read_many(&conn, store, &table, op),
        OperationKind::Insert => insert(&conn, store, &table, op),
        OperationKind::Update => update(&conn, store, &table, op),
        OperationKind::Delete => delete(&conn, store, &table, op),
        OperationKind::Exists => exists(&conn, store, &table, op),
    }
}

fn read_one(conn: &Connection, store: &str, table: &str, op: &Operation) -> OperationOutcome {
    let (where_sql, params) = where_clause(&op.filter);
    let sql = format!("SELECT doc FROM \"{table}\"{where_sql} LIMIT 1");
    let doc: Result<String, rusqlite::Error> =
        conn.query_row(&sql, params_from_iter(params), |row| row.get(0));
    match doc {
        Ok(text) => Ok(Payload::Record(parse_doc(store, &text)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::not_found(
            store,
            format!("no record in {} matches filter", op.collection),
        )),
        Err(e) => Err(classify(store, e)),
    }
}

fn read_many(conn: &Connection, store: &str, table: &str, op: &Operation) -> OperationOutcome {
    let (where_sql, mut params) = where_clause(&op.filter);
    let sql = format!(
        "SELECT doc FROM \"{table}\"{where_sql} \
         ORDER BY json_extract(doc, '$.created_at') DESC LIMIT ?"
    );
    // Clamped: a wrapped negative limit would read as unbounded.
    params.push(SqlValue::Integer(
        i64::try_from(op.effective_limit()).unwrap_or(i64::MAX),
    ));

    let mut stmt = conn.prepare(&sql).map_err(|e| classify(store, e))?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| row.get::<_, String>(0))
        .map_err(|e| classify(store, e))?;

    let mut records = Vec::new();
    for row in rows {
        let text = row.map_err(|e| classify(store, e))?;
        records.push(parse_doc(store, &text)?);
    }
    Ok(Payload::Records(records))
}

fn insert(conn: &Connection, store: &str, table: &str, op: &Operation) -> OperationOutcome {
    let record = stamp_record(store, op.payload.as_ref())?;
    let id = record
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::validation(store, "record id must be a string"))?
        .to_string();
    let doc = record.to_string();

    let sql = format!("INSERT INTO \"{table}\" (id, doc) VALUES (?, ?)");
    conn.execute(&sql, rusqlite::params![id, doc])
        .map_err(|e| classify(store, e))?;
    Ok(Payload::Record(record))
}

fn update(conn: &Connection, store: &str, table: &str, op: &Operation) -> OperationOutcome {
    let patch = match op.payload.as_ref() {
        Some(patch @ Value::Object(_)) => patch.to_string(),
        Some(_) => {
            return Err(StoreError::validation(
                store,
                "update payload must be a json object",
            ))
        }
        None => return Err(StoreError::validation(store, "update requires a payload")),
    };
    let (where_sql, mut params) = where_clause(&op.filter);
    // json_patch merges recursively; a null patch value removes the field
    let sql = format!("UPDATE \"{table}\" SET doc = json_patch(doc, ?){where_sql} RETURNING doc");
    params.insert(0, SqlValue::Text(patch));

    let doc: Result<String, rusqlite::Error> =
        conn.query_row(&sql, params_from_iter(params), |row| row.get(0));
    match doc {
        Ok(text) => Ok(Payload::Record(parse_doc(store, &text)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::not_found(
            store,
            format!("no record in {} matches filter", op.collection),
        )),
        Err(e) => Err(classify(store, e)),
    }
}

fn delete(conn: &Connection, store: &str, table: &str, op: &Operation) -> OperationOutcome {
    let (where_sql, params) = where_clause(&op.filter);
    let sql = format!("DELETE FROM \"{table}\"{where_sql}");
    let deleted = conn
        .execute(&sql, params_from_iter(params))
        .map_err(|e| classify(store, e))?;
    if deleted == 0 {
        return Err(StoreError::not_found(
            store,
            format!("no record in {} matches filter", op.collection),
        ));
    }
    Ok(Payload::Deleted(deleted as u64))
}

fn exists(conn: &Connection, store: &str, table: &str, op: &Operation) -> OperationOutcome {
    let (where_sql, params) = where_clause(&op.filter);
    let sql = format!("SELECT EXISTS(SELECT 1 FROM \"{table}\"{where_sql})");
    let found: Result<i64, rusqlite::Error> =
        conn.query_row(&sql, params_from_iter(params), |row| row.get(0));
    match found {
        Ok(v) => Ok(Payload::Exists(v != 0)),
        Err(e) => Err(classify(store, e)),
    }
}

/// Build a WHERE clause from the filter. Id clauses hit the primary key
/// column directly; everything else goes through json_extract with the
/// path bound as a parameter.
fn where_clause(filter: &Filter) -> (String, Vec<SqlValue>) {
    if filter.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut predicates = Vec::new();
    let mut params = Vec::new();
    for (field, value) in &filter.clauses {
        if field == "id" {
            predicates.push("id = ?".to_string());
            params.push(to_sql_value(value));
        } else {
            predicates.push("json_extract(doc, ?) = ?".to_string());
            params.push(SqlValue::Text(format!("$.{}", field)));
            params.push(to_sql_value(value));
        }
    }
    (format!(" WHERE {}", predicates.join(" AND ")), params)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn parse_doc(store: &str, text: &str) -> Result<Value, StoreError> {
    serde_json::from_str(text)
        .map_err(|e| StoreError::unknown(store, format!("corrupt document: {}", e)))
}

/// Fill in `id` and `created_at` when the payload omits them.
fn stamp_record(store: &str, payload: Option<&Value>) -> Result<Value, StoreError> {
    let mut record = match payload {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(_) => {
            return Err(StoreError::validation(
                store,
                "insert payload must be a json object",
            ))
        }
        None => return Err(StoreError::validation(store, "insert requires a payload")),
    };
    if let Value::Object(map) = &mut record {
        if !map.contains_key("id") {
            map.insert("id".to_string(), Value::from(Uuid::new_v4().to_string()));
        }
        if !map.contains_key("created_at") {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            map.insert("created_at".to_string(), Value::from(millis));
        }
    }
    Ok(record)
}

/// Collection and field names become SQL identifiers; restrict them to
/// alphanumerics and underscores.
fn validate_identifier(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("identifier must not be empty".to_string());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid identifier: {}", name));
    }
    Ok(name.to_string())
}

fn classify(store: &str, e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) => match f.code {
            ErrorCode::ConstraintViolation => {
                StoreError::conflict(store, format!("constraint violation: {}", e))
            }
            ErrorCode::CannotOpen
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::NotADatabase => {
                StoreError::unreachable(store, format!("database unavailable: {}", e))
            }
            ErrorCode::TypeMismatch => {
                StoreError::validation(store, format!("type mismatch: {}", e))
            }
            _ => StoreError::unknown(store, e.to_string()),
        },
        rusqlite::Error::QueryReturnedNoRows => StoreError::not_found(store, "no rows"),
        _ => StoreError::unknown(store, e.to_string()),
    }
}
