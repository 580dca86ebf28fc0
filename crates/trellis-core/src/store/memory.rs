//! In-memory backend
//!
//! Per-type maps keyed by synthetic incrementing ids. Every call passes
//! through a minimal-delay timer so the backend behaves asynchronously like
//! the others even though its computation is synchronous, keeping the
//! interface symmetric for tests and local use.

use crate::error::{Result, TrellisError};
use crate::object::ObjectId;
use crate::schema::{FieldKind, SchemaRegistry};
use crate::store::{BatchEntry, BatchMap, ListSlice, ObjectStore, RawGraph, RawObject};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredObject {
    class_id: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default)]
struct MemInner {
    next_id: i64,
    objects: HashMap<ObjectId, StoredObject>,
    lists: HashMap<ObjectId, Vec<ObjectId>>,
}

impl MemInner {
    fn alloc(&mut self) -> ObjectId {
        self.next_id += 1;
        ObjectId(self.next_id)
    }
}

/// In-memory object store, schema-aware for batch-reference resolution and
/// recursive loads.
pub struct MemoryStore {
    registry: Arc<SchemaRegistry>,
    inner: Mutex<MemInner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("objects", &inner.objects.len())
            .field("lists", &inner.lists.len())
            .finish()
    }
}

impl MemoryStore {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            inner: Mutex::new(MemInner::default()),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
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

    fn collect(
        inner: &MemInner,
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

        if let Some(items) = inner.lists.get(&id) {
            let page = Self::page(items, from, count);
            graph.lists.insert(
                id,
                ListSlice {
                    items: page.clone(),
                    total: items.len(),
                },
            );
            for item in page {
                Self::collect(inner, registry, item, from, count, graph, visited)?;
            }
            return Ok(());
        }

        let obj = inner
            .objects
            .get(&id)
            .ok_or_else(|| TrellisError::NotFound(format!("object {}", id)))?;
        let desc = registry.get(&obj.class_id)?;
        graph.objects.insert(
            id,
            RawObject {
                id,
                class_id: obj.class_id.clone(),
                fields: serde_json::Value::Object(obj.fields.clone()),
            },
        );

        for (name, kind) in desc.fields {
            match kind {
                FieldKind::Ref(_) | FieldKind::List => {
                    if let Some(child) = obj.fields.get(*name).and_then(|v| v.as_i64()) {
                        Self::collect(
                            inner,
                            registry,
                            ObjectId(child),
                            from,
                            count,
                            graph,
                            visited,
                        )?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn page(items: &[ObjectId], from: usize, count: usize) -> Vec<ObjectId> {
        let end = (from + count).min(items.len());
        if from >= end {
            return Vec::new();
        }
        items[from..end].to_vec()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn find_object(&self, id: ObjectId) -> Result<RawObject> {
        Self::settle().await;
        let inner = self.inner.lock();
        let obj = inner
            .objects
            .get(&id)
            .ok_or_else(|| TrellisError::NotFound(format!("object {}", id)))?;
        Ok(RawObject {
            id,
            class_id: obj.class_id.clone(),
            fields: serde_json::Value::Object(obj.fields.clone()),
        })
    }

    async fn create_object(&self, class_id: &str) -> Result<ObjectId> {
        Self::settle().await;
        self.registry.get(class_id)?;
        let mut inner = self.inner.lock();
        let id = inner.alloc();
        inner.objects.insert(
            id,
            StoredObject {
                class_id: class_id.to_string(),
                fields: serde_json::Map::new(),
            },
        );
        Ok(id)
    }

    async fn create_objects(&self, batch: BatchMap) -> Result<HashMap<String, ObjectId>> {
        Self::settle().await;
        let mut inner = self.inner.lock();

        // Assign every id up front so reference fields can point forward.
        let mut ids = HashMap::new();
        for key in batch.keys() {
            let id = inner.alloc();
            ids.insert(key.clone(), id);
        }

        // Stage the whole batch before publishing anything, so a bad entry
        // leaves no partial graph behind.
        let mut staged_objects = Vec::new();
        let mut staged_lists = Vec::new();
        for (key, entry) in &batch {
            let id = ids[key];
            match entry {
                BatchEntry::Object { class_id, fields } => {
                    let desc = self.registry.get(class_id)?;
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
                                Self::resolve_key(&ids, value, name)?
                            }
                            _ => value.clone(),
                        };
                        resolved.insert((*name).to_string(), value);
                    }
                    staged_objects.push((
                        id,
                        StoredObject {
                            class_id: class_id.clone(),
                            fields: resolved,
                        },
                    ));
                }
                BatchEntry::List { items } => {
                    let mut children = Vec::with_capacity(items.len());
                    for item in items {
                        children.push(*ids.get(item).ok_or_else(|| {
                            TrellisError::SchemaViolation(format!(
                                "unknown local key '{}' in list '{}'",
                                item, key
                            ))
                        })?);
                    }
                    staged_lists.push((id, children));
                }
            }
        }

        for (id, obj) in staged_objects {
            inner.objects.insert(id, obj);
        }
        for (id, items) in staged_lists {
            inner.lists.insert(id, items);
        }
        Ok(ids)
    }

    async fn write(&self, id: ObjectId, json: serde_json::Value) -> Result<()> {
        Self::settle().await;
        let mut inner = self.inner.lock();
        let obj = inner
            .objects
            .get_mut(&id)
            .ok_or_else(|| TrellisError::NotFound(format!("object {}", id)))?;
        if let serde_json::Value::Object(entries) = json {
            for (name, value) in entries {
                obj.fields.insert(name, value);
            }
        }
        Ok(())
    }

    async fn write_array(&self, id: ObjectId, items: Vec<ObjectId>) -> Result<()> {
        Self::settle().await;
        let mut inner = self.inner.lock();
        if inner.objects.contains_key(&id) {
            return Err(TrellisError::SchemaViolation(format!(
                "object {} is not a list",
                id
            )));
        }
        let list = inner
            .lists
            .get_mut(&id)
            .ok_or_else(|| TrellisError::NotFound(format!("list {}", id)))?;
        *list = items;
        Ok(())
    }

    async fn create_list(&self) -> Result<ObjectId> {
        Self::settle().await;
        let mut inner = self.inner.lock();
        let id = inner.alloc();
        inner.lists.insert(id, Vec::new());
        Ok(id)
    }

    async fn append_to_list(
        &self,
        list_id: ObjectId,
        obj_id: ObjectId,
        idx: Option<usize>,
    ) -> Result<usize> {
        Self::settle().await;
        let mut inner = self.inner.lock();
        if inner.objects.contains_key(&list_id) {
            return Err(TrellisError::SchemaViolation(format!(
                "object {} is not a list",
                list_id
            )));
        }
        let list = inner
            .lists
            .get_mut(&list_id)
            .ok_or_else(|| TrellisError::NotFound(format!("list {}", list_id)))?;
        let at = idx.unwrap_or(list.len());
        if at > list.len() {
            return Err(TrellisError::InvalidRange {
                requested: at,
                max: list.len(),
            });
        }
        list.insert(at, obj_id);
        Ok(list.len())
    }

    async fn remove_from_list(&self, list_id: ObjectId, idx: usize) -> Result<usize> {
        Self::settle().await;
        let mut inner = self.inner.lock();
        let list = inner
            .lists
            .get_mut(&list_id)
            .ok_or_else(|| TrellisError::NotFound(format!("list {}", list_id)))?;
        if idx >= list.len() {
            return Err(TrellisError::InvalidRange {
                requested: idx,
                max: list.len().saturating_sub(1),
            });
        }
        list.remove(idx);
        Ok(list.len())
    }

    async fn get_objects_from_list(
        &self,
        list_id: ObjectId,
        from: usize,
        count: usize,
    ) -> Result<Vec<ObjectId>> {
        Self::settle().await;
        let inner = self.inner.lock();
        let list = inner
            .lists
            .get(&list_id)
            .ok_or_else(|| TrellisError::NotFound(format!("list {}", list_id)))?;
        Ok(Self::page(list, from, count))
    }

    async fn get_list_size(&self, list_id: ObjectId) -> Result<usize> {
        Self::settle().await;
        let inner = self.inner.lock();
        inner
            .lists
            .get(&list_id)
            .map(Vec::len)
            .ok_or_else(|| TrellisError::NotFound(format!("list {}", list_id)))
    }

    async fn load_objects(&self, id: ObjectId, from: usize, count: usize) -> Result<RawGraph> {
        Self::settle().await;
        let inner = self.inner.lock();
        let mut graph = RawGraph::default();
        let mut visited = HashSet::new();
        Self::collect(
            &inner,
            &self.registry,
            id,
            from,
            count,
            &mut graph,
            &mut visited,
        )?;
        Ok(graph)
    }
}
