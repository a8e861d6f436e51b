//! Embedded relational backend
//!
//! One `items` table holds every entity: the primary key columns, the
//! full attribute map as a JSON payload, and one nullable column pair
//! per configured physical index id. Index columns mirror the derived
//! index attributes inside the payload and are resynced after every
//! payload mutation; a NULL pair is how sparse-index absence is
//! represented, and index queries filter it out.
//!
//! All access goes through a single connection behind a
//! `parking_lot::Mutex`. Conditional writes and write groups run inside
//! an immediate transaction so condition evaluation and application see
//! one consistent snapshot.

use crate::backend::{StoreBackend, TransactOp};
use crate::translate::{condition_sql, update_sql};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use tracing::{debug, info};
use unitable_core::{
    index_partition_attr, index_sort_attr, Condition, Item, QueryRequest, SortCondition,
    StoreError, Update, ATTR_ENTITY, ATTR_PK, ATTR_SK,
};

/// Map a driver error into the backend-neutral error type
fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Sqlite(e.to_string())
}

fn decode_payload(payload: &str) -> Result<Item, StoreError> {
    serde_json::from_str(payload).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode_payload(item: &Item) -> Result<String, StoreError> {
    serde_json::to_string(item).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Physical index ids become column names; only the shape a descriptor
/// would have accepted is allowed into SQL identifiers.
fn validate_column_id(id: &str) -> Result<(), StoreError> {
    let mut chars = id.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::Backend(format!(
            "'{id}' is not a valid physical index id"
        )))
    }
}

/// SQLite-backed store
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    physical_ids: Vec<String>,
}

impl SqliteBackend {
    /// Open (or create) a database file with the given physical index ids
    pub fn open(
        path: impl AsRef<Path>,
        physical_ids: &[&str],
    ) -> Result<SqliteBackend, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(sql_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sql_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(sql_err)?;
        info!(path = %path.as_ref().display(), "opened sqlite store");
        Self::with_connection(conn, physical_ids)
    }

    /// Open an in-memory database (tests, throwaway stores)
    pub fn open_in_memory(physical_ids: &[&str]) -> Result<SqliteBackend, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::with_connection(conn, physical_ids)
    }

    fn with_connection(conn: Connection, physical_ids: &[&str]) -> Result<SqliteBackend, StoreError> {
        for id in physical_ids {
            validate_column_id(id)?;
        }
        let backend = SqliteBackend {
            conn: Mutex::new(conn),
            physical_ids: physical_ids.iter().map(|s| s.to_string()).collect(),
        };
        backend.create_schema()?;
        Ok(backend)
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let mut columns = vec![
            "pk TEXT NOT NULL".to_string(),
            "sk TEXT NOT NULL".to_string(),
            "payload TEXT NOT NULL".to_string(),
        ];
        for id in &self.physical_ids {
            columns.push(format!("{} TEXT", index_partition_attr(id)));
            columns.push(format!("{} TEXT", index_sort_attr(id)));
        }
        columns.push("PRIMARY KEY (pk, sk)".to_string());
        let ddl = format!("CREATE TABLE IF NOT EXISTS items ({})", columns.join(", "));
        conn.execute(&ddl, []).map_err(sql_err)?;

        for id in &self.physical_ids {
            let ddl = format!(
                "CREATE INDEX IF NOT EXISTS ix_{id} ON items ({}, {}, sk)",
                index_partition_attr(id),
                index_sort_attr(id)
            );
            conn.execute(&ddl, []).map_err(sql_err)?;
        }
        Ok(())
    }

    /// Physically stored row count (soft-deleted included); test support
    pub fn row_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .map_err(sql_err)?;
        Ok(count as usize)
    }

    /// Index column values of an item, in declaration order (pk, sk per id)
    ///
    /// Null or absent attributes bind as SQL NULL; that is the sparse
    /// representation index queries exclude.
    fn index_column_values(&self, item: &Item) -> Vec<SqlValue> {
        let mut values = Vec::with_capacity(self.physical_ids.len() * 2);
        for id in &self.physical_ids {
            for attr in [index_partition_attr(id), index_sort_attr(id)] {
                match item.get_str(&attr) {
                    Some(s) => values.push(SqlValue::Text(s.to_string())),
                    None => values.push(SqlValue::Null),
                }
            }
        }
        values
    }

    fn get_in_conn(
        conn: &Connection,
        partition_key: &str,
        sort_key: &str,
    ) -> Result<Option<Item>, StoreError> {
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM items WHERE pk = ? AND sk = ?",
                params![partition_key, sort_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        payload.as_deref().map(decode_payload).transpose()
    }

    /// Evaluate a write condition against the stored row (or absence)
    ///
    /// Present rows are checked natively: a `SELECT 1` with the
    /// translated fragment must match. Absent rows fall back to the
    /// shared holds-on-missing rule.
    fn check_in_conn(
        conn: &Connection,
        partition_key: &str,
        sort_key: &str,
        condition: Option<&Condition>,
        require_existing: bool,
    ) -> Result<bool, StoreError> {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM items WHERE pk = ? AND sk = ?",
                params![partition_key, sort_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;

        if exists.is_none() {
            if require_existing {
                return Ok(false);
            }
            return Ok(condition.map_or(true, Condition::holds_on_missing));
        }

        let Some(condition) = condition else {
            return Ok(true);
        };
        let (frag, frag_params) = condition_sql(condition)?;
        let sql = format!("SELECT 1 FROM items WHERE pk = ? AND sk = ? AND ({frag})");
        let mut sql_params = vec![
            SqlValue::Text(partition_key.to_string()),
            SqlValue::Text(sort_key.to_string()),
        ];
        sql_params.extend(frag_params);
        let hit: Option<i64> = conn
            .query_row(&sql, params_from_iter(sql_params), |row| row.get(0))
            .optional()
            .map_err(sql_err)?;
        Ok(hit.is_some())
    }

    /// Unconditional full-row write (condition already checked)
    fn write_in_conn(&self, conn: &Connection, item: &Item) -> Result<(), StoreError> {
        let pk = item
            .get_str(ATTR_PK)
            .ok_or_else(|| StoreError::Backend("item is missing its 'pk' attribute".to_string()))?
            .to_string();
        let sk = item
            .get_str(ATTR_SK)
            .ok_or_else(|| StoreError::Backend("item is missing its 'sk' attribute".to_string()))?
            .to_string();

        let mut columns = vec!["pk".to_string(), "sk".to_string(), "payload".to_string()];
        for id in &self.physical_ids {
            columns.push(index_partition_attr(id));
            columns.push(index_sort_attr(id));
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO items ({}) VALUES ({placeholders})",
            columns.join(", ")
        );

        let mut sql_params = vec![
            SqlValue::Text(pk),
            SqlValue::Text(sk),
            SqlValue::Text(encode_payload(item)?),
        ];
        sql_params.extend(self.index_column_values(item));
        conn.execute(&sql, params_from_iter(sql_params))
            .map_err(sql_err)?;
        Ok(())
    }

    /// Apply an update to the payload, then resync the index columns
    /// from the new payload. Returns the post-write item.
    fn update_in_conn(
        &self,
        conn: &Connection,
        partition_key: &str,
        sort_key: &str,
        update: &Update,
        condition: Option<&Condition>,
    ) -> Result<Item, StoreError> {
        let (payload_expr, payload_params) = update_sql(update)?;
        let (frag, frag_params) = match condition {
            Some(c) => condition_sql(c)?,
            None => ("1".to_string(), Vec::new()),
        };
        let sql = format!(
            "UPDATE items SET payload = {payload_expr} WHERE pk = ? AND sk = ? AND ({frag})"
        );
        let mut sql_params = payload_params;
        sql_params.push(SqlValue::Text(partition_key.to_string()));
        sql_params.push(SqlValue::Text(sort_key.to_string()));
        sql_params.extend(frag_params);

        let changed = conn
            .execute(&sql, params_from_iter(sql_params))
            .map_err(sql_err)?;
        if changed == 0 {
            // Missing row and rejected condition are indistinguishable
            // here; both are condition failures per the contract.
            return Err(StoreError::ConditionFailed);
        }

        let item = Self::get_in_conn(conn, partition_key, sort_key)?
            .ok_or_else(|| StoreError::Backend("updated row disappeared".to_string()))?;

        if !self.physical_ids.is_empty() {
            let assignments = self
                .physical_ids
                .iter()
                .map(|id| {
                    format!(
                        "{} = ?, {} = ?",
                        index_partition_attr(id),
                        index_sort_attr(id)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("UPDATE items SET {assignments} WHERE pk = ? AND sk = ?");
            let mut sql_params = self.index_column_values(&item);
            sql_params.push(SqlValue::Text(partition_key.to_string()));
            sql_params.push(SqlValue::Text(sort_key.to_string()));
            conn.execute(&sql, params_from_iter(sql_params))
                .map_err(sql_err)?;
        }
        Ok(item)
    }
}

/// Sort-key range as a SQL fragment over the given column
fn sort_fragment(column: &str, sort: &SortCondition) -> (String, Vec<SqlValue>) {
    match sort {
        SortCondition::Gt(v) => (
            format!("{column} > ?"),
            vec![SqlValue::Text(v.clone())],
        ),
        SortCondition::Gte(v) => (
            format!("{column} >= ?"),
            vec![SqlValue::Text(v.clone())],
        ),
        SortCondition::Lt(v) => (
            format!("{column} < ?"),
            vec![SqlValue::Text(v.clone())],
        ),
        SortCondition::Lte(v) => (
            format!("{column} <= ?"),
            vec![SqlValue::Text(v.clone())],
        ),
        SortCondition::Between(lo, hi) => (
            format!("{column} >= ? AND {column} <= ?"),
            vec![SqlValue::Text(lo.clone()), SqlValue::Text(hi.clone())],
        ),
        SortCondition::BeginsWith(prefix) => (
            format!("substr({column}, 1, length(?)) = ?"),
            vec![
                SqlValue::Text(prefix.clone()),
                SqlValue::Text(prefix.clone()),
            ],
        ),
    }
}

impl StoreBackend for SqliteBackend {
    fn get_item(
        &self,
        partition_key: &str,
        sort_key: &str,
        _consistent: bool,
    ) -> Result<Option<Item>, StoreError> {
        let conn = self.conn.lock();
        Self::get_in_conn(&conn, partition_key, sort_key)
    }

    fn put_item(&self, item: Item, condition: Option<&Condition>) -> Result<(), StoreError> {
        let pk = item
            .get_str(ATTR_PK)
            .ok_or_else(|| StoreError::Backend("item is missing its 'pk' attribute".to_string()))?
            .to_string();
        let sk = item
            .get_str(ATTR_SK)
            .ok_or_else(|| StoreError::Backend("item is missing its 'sk' attribute".to_string()))?
            .to_string();

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sql_err)?;
        if !Self::check_in_conn(&tx, &pk, &sk, condition, false)? {
            return Err(StoreError::ConditionFailed);
        }
        self.write_in_conn(&tx, &item)?;
        tx.commit().map_err(sql_err)
    }

    fn update_item(
        &self,
        partition_key: &str,
        sort_key: &str,
        update: &Update,
        condition: Option<&Condition>,
    ) -> Result<Item, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sql_err)?;
        let item = self.update_in_conn(&tx, partition_key, sort_key, update, condition)?;
        tx.commit().map_err(sql_err)?;
        Ok(item)
    }

    fn query(&self, request: &QueryRequest) -> Result<Vec<Item>, StoreError> {
        let (pk_column, sk_column) = match &request.index {
            None => (ATTR_PK.to_string(), ATTR_SK.to_string()),
            Some(id) => {
                if !self.physical_ids.iter().any(|p| p == id) {
                    return Err(StoreError::Backend(format!(
                        "unknown physical index id '{id}'"
                    )));
                }
                (index_partition_attr(id), index_sort_attr(id))
            }
        };

        let mut sql = format!("SELECT payload FROM items WHERE {pk_column} = ?");
        let mut sql_params = vec![SqlValue::Text(request.partition_key.clone())];
        if request.index.is_some() {
            // Sparse rule: unmaterialized rows never match an index query
            sql.push_str(&format!(" AND {sk_column} IS NOT NULL"));
        }
        if let Some(sort) = &request.sort {
            let (frag, p) = sort_fragment(&sk_column, sort);
            sql.push_str(&format!(" AND {frag}"));
            sql_params.extend(p);
        }
        let dir = if request.scan_forward { "ASC" } else { "DESC" };
        if request.index.is_some() {
            sql.push_str(&format!(" ORDER BY {sk_column} {dir}, sk {dir}"));
        } else {
            sql.push_str(&format!(" ORDER BY sk {dir}"));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(sql_params), |row| {
                row.get::<_, String>(0)
            })
            .map_err(sql_err)?;

        let mut items = Vec::new();
        for payload in rows {
            // Filter runs before the limit, so truncate after filtering
            if request.limit == Some(items.len()) {
                break;
            }
            let item = decode_payload(&payload.map_err(sql_err)?)?;
            if let Some(filter) = &request.filter {
                if !filter.matches(&item) {
                    continue;
                }
            }
            items.push(item);
        }

        debug!(
            partition = %request.partition_key,
            index = request.index.as_deref().unwrap_or("primary"),
            results = items.len(),
            "sqlite query"
        );
        Ok(items)
    }

    fn transact(&self, ops: Vec<TransactOp>) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sql_err)?;

        // Phase 1: every condition against pre-transaction state
        for (position, op) in ops.iter().enumerate() {
            let passed = match op {
                TransactOp::Put { item, condition } => {
                    let pk = item.get_str(ATTR_PK).ok_or_else(|| {
                        StoreError::Backend("item is missing its 'pk' attribute".to_string())
                    })?;
                    let sk = item.get_str(ATTR_SK).ok_or_else(|| {
                        StoreError::Backend("item is missing its 'sk' attribute".to_string())
                    })?;
                    Self::check_in_conn(&tx, pk, sk, condition.as_ref(), false)?
                }
                TransactOp::Update {
                    partition_key,
                    sort_key,
                    condition,
                    ..
                } => Self::check_in_conn(&tx, partition_key, sort_key, condition.as_ref(), true)?,
            };
            if !passed {
                return Err(StoreError::TransactionCanceled {
                    reason: format!("operation {position} failed its condition"),
                });
            }
        }

        // Phase 2: apply all writes
        for op in &ops {
            match op {
                TransactOp::Put { item, .. } => self.write_in_conn(&tx, item)?,
                TransactOp::Update {
                    partition_key,
                    sort_key,
                    update,
                    ..
                } => {
                    self.update_in_conn(&tx, partition_key, sort_key, update, None)?;
                }
            }
        }
        tx.commit().map_err(sql_err)
    }

    fn clear_entity(&self, entity: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let path = format!("$.\"{ATTR_ENTITY}\"");
        let removed = conn
            .execute(
                "DELETE FROM items WHERE json_extract(payload, ?) = ?",
                params![path, entity],
            )
            .map_err(sql_err)?;
        info!(entity, removed, "cleared entity rows");
        Ok(removed)
    }
}
