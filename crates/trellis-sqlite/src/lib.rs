//! Relational backend for Trellis, over SQLite
//!
//! One table per registered class (a column per field; reference and list
//! fields store the referent's integer id), plus two bookkeeping tables: an
//! object-type registry (`ObjTable`) and a single generic ordered
//! list-membership table (`ObjLists`) shared by every list regardless of
//! element type.
//!
//! List insertion and removal are index-shift SQL updates
//! (`idx = idx ± 1 WHERE …`), keeping positions contiguous and gap-free for
//! correct range queries. Batched creation runs inside one transaction, so a
//! failed batch leaves no rows behind.
//!
//! The connection lives behind a `tokio::sync::Mutex`, serializing statement
//! execution against the single connection.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use trellis_core::{
    BatchEntry, BatchMap, FieldKind, ListSlice, ObjectId, ObjectStore, RawGraph, RawObject,
    Result, SchemaRegistry, TrellisError,
};

const TYPE_OBJECT: &str = "object";
const TYPE_LIST: &str = "list";

fn db_err(e: rusqlite::Error) -> TrellisError {
    TrellisError::Backend(e.to_string())
}

fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Str => "TEXT",
        FieldKind::Int | FieldKind::Bool => "INTEGER",
        FieldKind::Float => "REAL",
        FieldKind::Ref(_) | FieldKind::List => "INTEGER",
    }
}

fn json_to_sql(
    kind: FieldKind,
    value: &serde_json::Value,
    field: &str,
) -> Result<rusqlite::types::Value> {
    use rusqlite::types::Value as Sql;
    if value.is_null() {
        return Ok(Sql::Null);
    }
    let sql = match kind {
        FieldKind::Str => value.as_str().map(|s| Sql::Text(s.to_string())),
        FieldKind::Int => value.as_i64().map(Sql::Integer),
        FieldKind::Float => value.as_f64().map(Sql::Real),
        FieldKind::Bool => value.as_bool().map(|b| Sql::Integer(b as i64)),
        FieldKind::Ref(_) | FieldKind::List => value.as_i64().map(Sql::Integer),
    };
    sql.ok_or_else(|| {
        TrellisError::SchemaViolation(format!(
            "field '{}' has incompatible value {}",
            field, value
        ))
    })
}

fn sql_to_json(kind: FieldKind, value: rusqlite::types::Value) -> serde_json::Value {
    use rusqlite::types::Value as Sql;
    match (kind, value) {
        (_, Sql::Null) => serde_json::Value::Null,
        (FieldKind::Bool, Sql::Integer(i)) => serde_json::json!(i != 0),
        (_, Sql::Integer(i)) => serde_json::json!(i),
        (_, Sql::Real(f)) => serde_json::json!(f),
        (_, Sql::Text(s)) => serde_json::json!(s),
        (_, Sql::Blob(_)) => serde_json::Value::Null,
    }
}

fn lookup(conn: &Connection, id: ObjectId) -> Result<(String, String)> {
    conn.query_row(
        "SELECT type, subtype FROM ObjTable WHERE id = ?1",
        params![id.0],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => TrellisError::NotFound(format!("object {}", id)),
        other => db_err(other),
    })
}

fn alloc(conn: &Connection, typ: &str, subtype: &str) -> Result<ObjectId> {
    conn.execute(
        "INSERT INTO ObjTable (type, subtype, createTime) VALUES (?1, ?2, ?3)",
        params![typ, subtype, chrono::Utc::now().timestamp_millis()],
    )
    .map_err(db_err)?;
    Ok(ObjectId(conn.last_insert_rowid()))
}

fn require_list(conn: &Connection, id: ObjectId) -> Result<()> {
    let (typ, _) = lookup(conn, id)?;
    if typ != TYPE_LIST {
        return Err(TrellisError::SchemaViolation(format!(
            "object {} is not a list",
            id
        )));
    }
    Ok(())
}

fn list_len(conn: &Connection, list_id: ObjectId) -> Result<usize> {
    conn.query_row(
        "SELECT COUNT(*) FROM ObjLists WHERE listId = ?1 AND removed = 0",
        params![list_id.0],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as usize)
    .map_err(db_err)
}

fn list_page(
    conn: &Connection,
    list_id: ObjectId,
    from: usize,
    count: usize,
) -> Result<Vec<ObjectId>> {
    let mut stmt = conn
        .prepare(
            "SELECT itemId FROM ObjLists
             WHERE listId = ?1 AND removed = 0 AND idx >= ?2 AND idx < ?3
             ORDER BY idx",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(
            params![list_id.0, from as i64, (from + count) as i64],
            |row| row.get::<_, i64>(0).map(ObjectId),
        )
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

fn resolve_key(
    ids: &HashMap<String, ObjectId>,
    value: &serde_json::Value,
    field: &str,
) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Null => Ok(serde_json::Value::Null),
        serde_json::Value::String(key) => ids
            .get(key)
            .map(|id| serde_json::json!(id.0))
            .ok_or_else(|| {
                TrellisError::SchemaViolation(format!(
                    "unknown local key '{}' in field '{}'",
                    key, field
                ))
            }),
        other => Err(TrellisError::SchemaViolation(format!(
            "field '{}' expects a local key, got {}",
            field, other
        ))),
    }
}

fn update_fields(
    conn: &Connection,
    desc: &trellis_core::SchemaDescriptor,
    id: ObjectId,
    fields: &serde_json::Map<String, serde_json::Value>,
) -> Result<()> {
    let mut sets = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for (name, kind) in desc.fields {
        let Some(value) = fields.get(*name) else {
            continue;
        };
        values.push(json_to_sql(*kind, value, name)?);
        sets.push(format!("\"{}\" = ?{}", name, values.len()));
    }
    if sets.is_empty() {
        return Ok(());
    }
    values.push(rusqlite::types::Value::Integer(id.0));
    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE id = ?{}",
        desc.class_id,
        sets.join(", "),
        values.len()
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(db_err)?;
    Ok(())
}

fn read_fields(
    conn: &Connection,
    desc: &trellis_core::SchemaDescriptor,
    id: ObjectId,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut columns = vec!["id".to_string()];
    columns.extend(desc.fields.iter().map(|(name, _)| format!("\"{}\"", name)));
    let sql = format!(
        "SELECT {} FROM \"{}\" WHERE id = ?1",
        columns.join(", "),
        desc.class_id
    );
    conn.query_row(&sql, params![id.0], |row| {
        let mut map = serde_json::Map::new();
        for (i, (name, kind)) in desc.fields.iter().enumerate() {
            let value: rusqlite::types::Value = row.get(i + 1)?;
            map.insert(name.to_string(), sql_to_json(*kind, value));
        }
        Ok(map)
    })
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            TrellisError::NotFound(format!("object {}", id))
        }
        other => db_err(other),
    })
}

fn collect(
    conn: &Connection,
    registry: &SchemaRegistry,
    id: ObjectId,
    from: usize,
    count: usize,
    graph: &mut RawGraph,
    visited: &mut HashSet<ObjectId>,
) -> Result<()> {
    if !visited.insert(id) {
        return Ok(());
    }
    let (typ, subtype) = lookup(conn, id)?;
    if typ == TYPE_LIST {
        let total = list_len(conn, id)?;
        let items = list_page(conn, id, from, count)?;
        graph.lists.insert(
            id,
            ListSlice {
                items: items.clone(),
                total,
            },
        );
        for item in items {
            collect(conn, registry, item, from, count, graph, visited)?;
        }
        return Ok(());
    }

    let desc = registry.get(&subtype)?;
    let fields = read_fields(conn, &desc, id)?;
    for (name, kind) in desc.fields {
        if matches!(kind, FieldKind::Ref(_) | FieldKind::List) {
            if let Some(child) = fields.get(*name).and_then(|v| v.as_i64()) {
                collect(conn, registry, ObjectId(child), from, count, graph, visited)?;
            }
        }
    }
    graph.objects.insert(
        id,
        RawObject {
            id,
            class_id: subtype,
            fields: serde_json::Value::Object(fields),
        },
    );
    Ok(())
}

/// SQLite-backed object store.
///
/// Class tables are created for the classes registered at open time; call
/// [`SqliteStore::sync_schema`] after late registrations.
pub struct SqliteStore {
    registry: Arc<SchemaRegistry>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database, enables WAL mode, and runs the
    /// idempotent migrations for every registered class.
    pub fn open(path: impl AsRef<Path>, registry: Arc<SchemaRegistry>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TrellisError::Backend(format!("creating database directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_err)?;

        Self::migrate(&conn, &registry)?;
        tracing::info!("sqlite store opened at {}", path.display());
        Ok(Self {
            registry,
            conn: Mutex::new(conn),
        })
    }

    /// Re-runs the idempotent migrations, creating tables for classes
    /// registered after open.
    pub async fn sync_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        Self::migrate(&conn, &self.registry)
    }

    fn migrate(conn: &Connection, registry: &SchemaRegistry) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ObjTable (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                type        TEXT NOT NULL,
                subtype     TEXT NOT NULL,
                createTime INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ObjLists (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                removed INTEGER NOT NULL DEFAULT 0,
                idx     INTEGER NOT NULL,
                listId  INTEGER NOT NULL,
                itemId  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_objlists_membership
                ON ObjLists(listId, removed, idx);",
        )
        .map_err(db_err)?;

        for class_id in registry.classes() {
            let desc = registry.get(&class_id)?;
            let mut columns = vec!["id INTEGER PRIMARY KEY".to_string()];
            for (name, kind) in desc.fields {
                columns.push(format!("\"{}\" {}", name, column_type(*kind)));
            }
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
                class_id,
                columns.join(", ")
            );
            conn.execute(&ddl, []).map_err(db_err)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("classes", &self.registry.classes().len())
            .finish()
    }
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn find_object(&self, id: ObjectId) -> Result<RawObject> {
        let conn = self.conn.lock().await;
        let (typ, subtype) = lookup(&conn, id)?;
        if typ != TYPE_OBJECT {
            return Err(TrellisError::SchemaViolation(format!(
                "id {} is a list, not an object",
                id
            )));
        }
        let desc = self.registry.get(&subtype)?;
        let fields = read_fields(&conn, &desc, id)?;
        Ok(RawObject {
            id,
            class_id: subtype,
            fields: serde_json::Value::Object(fields),
        })
    }

    async fn create_object(&self, class_id: &str) -> Result<ObjectId> {
        self.registry.get(class_id)?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let id = alloc(&tx, TYPE_OBJECT, class_id)?;
        tx.execute(
            &format!("INSERT INTO \"{}\" (id) VALUES (?1)", class_id),
            params![id.0],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(id)
    }

    async fn create_objects(&self, batch: BatchMap) -> Result<HashMap<String, ObjectId>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;

        let result = (|| -> Result<HashMap<String, ObjectId>> {
            // Assign every id up front so reference fields can point forward.
            let mut ids = HashMap::new();
            for (key, entry) in &batch {
                let (typ, subtype) = match entry {
                    BatchEntry::Object { class_id, .. } => (TYPE_OBJECT, class_id.as_str()),
                    BatchEntry::List { .. } => (TYPE_LIST, ""),
                };
                let id = alloc(&tx, typ, subtype)?;
                ids.insert(key.clone(), id);
            }

            for (key, entry) in &batch {
                let id = ids[key];
                match entry {
                    BatchEntry::Object { class_id, fields } => {
                        let desc = self.registry.get(class_id)?;
                        tx.execute(
                            &format!("INSERT INTO \"{}\" (id) VALUES (?1)", class_id),
                            params![id.0],
                        )
                        .map_err(db_err)?;

                        let given = fields.as_object().ok_or_else(|| {
                            TrellisError::SchemaViolation(format!(
                                "batch node '{}' fields must be a JSON object",
                                key
                            ))
                        })?;
                        let mut resolved = serde_json::Map::new();
                        for (name, kind) in desc.fields {
                            let Some(value) = given.get(*name) else {
                                continue;
                            };
                            let value = match kind {
                                FieldKind::Ref(_) | FieldKind::List => {
                                    resolve_key(&ids, value, name)?
                                }
                                _ => value.clone(),
                            };
                            resolved.insert((*name).to_string(), value);
                        }
                        update_fields(&tx, &desc, id, &resolved)?;
                    }
                    BatchEntry::List { items } => {
                        for (pos, item_key) in items.iter().enumerate() {
                            let item_id = ids.get(item_key).ok_or_else(|| {
                                TrellisError::SchemaViolation(format!(
                                    "unknown local key '{}' in list '{}'",
                                    item_key, key
                                ))
                            })?;
                            tx.execute(
                                "INSERT INTO ObjLists (removed, idx, listId, itemId)
                                 VALUES (0, ?1, ?2, ?3)",
                                params![pos as i64, id.0, item_id.0],
                            )
                            .map_err(db_err)?;
                        }
                    }
                }
            }
            Ok(ids)
        })();

        match result {
            Ok(ids) => {
                tx.commit().map_err(db_err)?;
                Ok(ids)
            }
            Err(e) => {
                // Dropping the transaction rolls the whole batch back.
                drop(tx);
                Err(e)
            }
        }
    }

    async fn write(&self, id: ObjectId, json: serde_json::Value) -> Result<()> {
        let conn = self.conn.lock().await;
        let (typ, subtype) = lookup(&conn, id)?;
        if typ != TYPE_OBJECT {
            return Err(TrellisError::SchemaViolation(format!(
                "id {} is a list, not an object",
                id
            )));
        }
        let desc = self.registry.get(&subtype)?;
        let serde_json::Value::Object(fields) = json else {
            return Ok(());
        };
        update_fields(&conn, &desc, id, &fields)
    }

    async fn write_array(&self, id: ObjectId, items: Vec<ObjectId>) -> Result<()> {
        let mut conn = self.conn.lock().await;
        require_list(&conn, id)?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM ObjLists WHERE listId = ?1", params![id.0])
            .map_err(db_err)?;
        for (pos, item) in items.iter().enumerate() {
            tx.execute(
                "INSERT INTO ObjLists (removed, idx, listId, itemId) VALUES (0, ?1, ?2, ?3)",
                params![pos as i64, id.0, item.0],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    async fn create_list(&self) -> Result<ObjectId> {
        let conn = self.conn.lock().await;
        alloc(&conn, TYPE_LIST, "")
    }

    async fn append_to_list(
        &self,
        list_id: ObjectId,
        obj_id: ObjectId,
        idx: Option<usize>,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        require_list(&conn, list_id)?;
        let tx = conn.transaction().map_err(db_err)?;

        let len = list_len(&tx, list_id)?;
        let at = idx.unwrap_or(len);
        if at > len {
            return Err(TrellisError::InvalidRange {
                requested: at,
                max: len,
            });
        }
        // Shift the tail up to keep positions contiguous and gap-free.
        tx.execute(
            "UPDATE ObjLists SET idx = idx + 1
             WHERE listId = ?1 AND removed = 0 AND idx >= ?2",
            params![list_id.0, at as i64],
        )
        .map_err(db_err)?;
        tx.execute(
            "INSERT INTO ObjLists (removed, idx, listId, itemId) VALUES (0, ?1, ?2, ?3)",
            params![at as i64, list_id.0, obj_id.0],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(len + 1)
    }

    async fn remove_from_list(&self, list_id: ObjectId, idx: usize) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        require_list(&conn, list_id)?;
        let tx = conn.transaction().map_err(db_err)?;

        let tombstoned = tx
            .execute(
                "UPDATE ObjLists SET removed = 1
                 WHERE listId = ?1 AND removed = 0 AND idx = ?2",
                params![list_id.0, idx as i64],
            )
            .map_err(db_err)?;
        if tombstoned == 0 {
            let len = list_len(&tx, list_id)?;
            return Err(TrellisError::InvalidRange {
                requested: idx,
                max: len.saturating_sub(1),
            });
        }
        tx.execute(
            "UPDATE ObjLists SET idx = idx - 1
             WHERE listId = ?1 AND removed = 0 AND idx > ?2",
            params![list_id.0, idx as i64],
        )
        .map_err(db_err)?;
        let len = list_len(&tx, list_id)?;
        tx.commit().map_err(db_err)?;
        Ok(len)
    }

    async fn get_objects_from_list(
        &self,
        list_id: ObjectId,
        from: usize,
        count: usize,
    ) -> Result<Vec<ObjectId>> {
        let conn = self.conn.lock().await;
        require_list(&conn, list_id)?;
        list_page(&conn, list_id, from, count)
    }

    async fn get_list_size(&self, list_id: ObjectId) -> Result<usize> {
        let conn = self.conn.lock().await;
        require_list(&conn, list_id)?;
        list_len(&conn, list_id)
    }

    async fn load_objects(&self, id: ObjectId, from: usize, count: usize) -> Result<RawGraph> {
        let conn = self.conn.lock().await;
        let mut graph = RawGraph::default();
        let mut visited = HashSet::new();
        collect(&conn, &self.registry, id, from, count, &mut graph, &mut visited)?;
        Ok(graph)
    }
}
