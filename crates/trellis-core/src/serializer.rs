//! Graph serializer
//!
//! Orchestrates object creation (local graph → one batched remote create),
//! loading (remote graph → hydrated local graph), and a debounced
//! dirty-tracking autosave.

use crate::config::SerializerConfig;
use crate::error::{Result, TrellisError};
use crate::list::{RefList, BLOCK_SIZE};
use crate::object::{DirtySink, Entity, ObjectId, SharedEntity};
use crate::schema::{FieldKind, SchemaRegistry};
use crate::sequence::WorkQueue;
use crate::store::{BatchEntry, BatchMap, ObjectStore, RawGraph};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

type WeakEntity = Weak<parking_lot::RwLock<dyn Entity>>;

#[derive(Default)]
struct TrackerState {
    registered: HashMap<ObjectId, WeakEntity>,
    pending: HashSet<ObjectId>,
    armed: bool,
    history: VecDeque<(ObjectId, u64)>,
}

/// Dirty-tracking context: collects modified objects and flushes each of
/// them with one `write` call after a short debounce window.
///
/// Owned by a [`GraphSerializer`]; objects hold it only as a weak
/// back-reference. Flushes run through a serial work queue so an individual
/// failure is logged and absorbed without stalling later flushes.
pub struct DirtyTracker {
    store: Arc<dyn ObjectStore>,
    debounce: Duration,
    history_limit: usize,
    queue: Arc<WorkQueue>,
    state: Arc<Mutex<TrackerState>>,
}

impl DirtyTracker {
    fn new(store: Arc<dyn ObjectStore>, config: &SerializerConfig) -> Self {
        Self {
            store,
            debounce: Duration::from_millis(config.debounce_ms),
            history_limit: config.history_limit,
            queue: Arc::new(WorkQueue::new()),
            state: Arc::new(Mutex::new(TrackerState::default())),
        }
    }

    /// Makes an attached object reachable for flushing.
    pub fn register(&self, id: ObjectId, entity: &SharedEntity) {
        self.state.lock().registered.insert(id, Arc::downgrade(entity));
    }

    /// Number of objects recorded dirty but not yet flushed.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Most recent flushed `(id, version)` pairs, oldest first.
    pub fn recent_flushes(&self) -> Vec<(ObjectId, u64)> {
        self.state.lock().history.iter().copied().collect()
    }

    /// Flushes everything currently pending and waits for the queue to
    /// settle. Used by tests and orderly shutdown.
    pub async fn flush_now(&self) {
        let state = self.state.clone();
        let store = self.store.clone();
        let history_limit = self.history_limit;
        self.queue
            .push(async move { flush_pending(state, store, history_limit).await });
        self.queue.drain().await;
    }
}

impl DirtySink for DirtyTracker {
    fn mark_dirty(&self, id: ObjectId, _version: u64) {
        let mut state = self.state.lock();
        state.pending.insert(id);
        if state.armed {
            return;
        }
        state.armed = true;
        drop(state);

        let debounce = self.debounce;
        let state = self.state.clone();
        let store = self.store.clone();
        let queue = self.queue.clone();
        let history_limit = self.history_limit;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            queue.push(async move { flush_pending(state, store, history_limit).await });
        });
    }
}

impl std::fmt::Debug for DirtyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyTracker")
            .field("pending", &self.pending())
            .field("debounce", &self.debounce)
            .finish()
    }
}

async fn flush_pending(
    state: Arc<Mutex<TrackerState>>,
    store: Arc<dyn ObjectStore>,
    history_limit: usize,
) -> anyhow::Result<()> {
    let targets: Vec<(ObjectId, Option<WeakEntity>)> = {
        let mut state = state.lock();
        state.armed = false;
        let ids: Vec<ObjectId> = state.pending.drain().collect();
        ids.into_iter()
            .map(|id| (id, state.registered.get(&id).cloned()))
            .collect()
    };
    if targets.is_empty() {
        return Ok(());
    }
    tracing::debug!("flushing {} dirty objects", targets.len());

    for (id, weak) in targets {
        let Some(entity) = weak.and_then(|w| w.upgrade()) else {
            continue;
        };
        let (json, version) = {
            let entity = entity.read();
            (entity.get_json(), entity.version())
        };
        match store.write(id, json).await {
            Ok(()) => {
                let mut state = state.lock();
                state.history.push_back((id, version));
                while state.history.len() > history_limit {
                    state.history.pop_front();
                }
            }
            Err(e) => tracing::warn!(object = %id, "autosave write failed: {}", e),
        }
    }
    Ok(())
}

#[derive(Default)]
struct Flattened {
    batch: BatchMap,
    order: Vec<(String, SharedEntity)>,
    lists: Vec<(String, RefList)>,
    keys: HashMap<usize, String>,
}

fn node_ptr(node: &SharedEntity) -> usize {
    Arc::as_ptr(node) as *const () as usize
}

/// Walks and persists object graphs against a store, using registry
/// metadata for every polymorphic decision.
///
/// Owns the dirty-tracking context; must be constructed inside a tokio
/// runtime so the autosave machinery can spawn its worker.
pub struct GraphSerializer {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn ObjectStore>,
    tracker: Arc<DirtyTracker>,
}

impl std::fmt::Debug for GraphSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSerializer")
            .field("classes", &self.registry.classes().len())
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl GraphSerializer {
    pub fn new(registry: Arc<SchemaRegistry>, store: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(registry, store, SerializerConfig::default())
    }

    pub fn with_config(
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn ObjectStore>,
        config: SerializerConfig,
    ) -> Self {
        let tracker = Arc::new(DirtyTracker::new(store.clone(), &config));
        Self {
            registry,
            store,
            tracker,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<DirtyTracker> {
        &self.tracker
    }

    fn sink(&self) -> Weak<dyn DirtySink> {
        let tracker: Arc<dyn DirtySink> = self.tracker.clone();
        let weak: Weak<dyn DirtySink> = Arc::downgrade(&tracker);
        weak
    }

    /// Creates a full object graph.
    ///
    /// The graph is built locally first, flattened under synthetic local
    /// keys, and submitted as one batched create; real ids are bound only
    /// after every node exists, which keeps referential integrity and
    /// collapses N round trips into one.
    pub async fn make_object(
        &self,
        class_id: &str,
        args: &serde_json::Value,
    ) -> Result<SharedEntity> {
        let desc = self.registry.get(class_id)?;
        let root = (desc.ctor)(args);

        let mut visited = HashSet::new();
        self.complete_graph(&root, &mut visited)?;

        let mut flat = Flattened::default();
        flatten(&root, &mut flat);

        let ids = match self.store.create_objects(flat.batch).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(class = class_id, "graph creation failed: {}", e);
                return Err(e);
            }
        };

        for (key, node) in &flat.order {
            let id = *ids.get(key).ok_or_else(|| {
                TrellisError::Backend(format!("backend returned no id for local key '{}'", key))
            })?;
            node.write().meta_mut().attach(id, Some(self.sink()));
            self.tracker.register(id, node);
        }
        for (key, list) in &flat.lists {
            let id = *ids.get(key).ok_or_else(|| {
                TrellisError::Backend(format!("backend returned no id for local key '{}'", key))
            })?;
            list.attach(self.store.clone(), id, 0);
        }
        Ok(root)
    }

    /// Loads and hydrates the object graph rooted at `id`.
    ///
    /// One recursive fetch returns the raw graph; hydration instantiates
    /// typed objects via the registry, wires reference fields through an
    /// identity cache (cycle-safe), and seeds list fields with the returned
    /// page. Hydrated nodes are attached to the dirty-tracking context, so
    /// mutations on loaded objects persist exactly like created ones.
    pub async fn load_object(&self, id: ObjectId) -> Result<SharedEntity> {
        let graph = self.store.load_objects(id, 0, BLOCK_SIZE).await?;
        let mut cache = HashMap::new();
        self.hydrate(id, &graph, &mut cache)
    }

    // Recursively instantiate every referenced class so the whole graph
    // exists locally before anything is persisted.
    fn complete_graph(&self, node: &SharedEntity, visited: &mut HashSet<usize>) -> Result<()> {
        if !visited.insert(node_ptr(node)) {
            return Ok(());
        }
        let desc = node.read().schema();
        for (name, kind) in desc.fields {
            match kind {
                FieldKind::Ref(class) => {
                    let existing = node.read().get_ref(name);
                    let child = match existing {
                        Some(child) => child,
                        None => {
                            let child_desc = self.registry.get(class)?;
                            let child = (child_desc.ctor)(&serde_json::Value::Null);
                            node.write().set_ref(name, child.clone());
                            child
                        }
                    };
                    self.complete_graph(&child, visited)?;
                }
                FieldKind::List => {
                    if node.read().get_list(name).is_none() {
                        node.write().set_list(name, RefList::detached());
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn hydrate(
        &self,
        id: ObjectId,
        graph: &RawGraph,
        cache: &mut HashMap<ObjectId, SharedEntity>,
    ) -> Result<SharedEntity> {
        if let Some(entity) = cache.get(&id) {
            return Ok(entity.clone());
        }
        let raw = graph.objects.get(&id).ok_or_else(|| {
            TrellisError::NotFound(format!("object {} missing from loaded graph", id))
        })?;
        let desc = self.registry.get(&raw.class_id)?;
        let entity = (desc.ctor)(&serde_json::Value::Null);
        cache.insert(id, entity.clone());
        entity.write().set_json(&raw.fields);

        let empty = serde_json::Map::new();
        let fields = raw.fields.as_object().unwrap_or(&empty);
        for (name, kind) in desc.fields {
            match kind {
                FieldKind::Ref(_) => {
                    if let Some(child_id) = fields.get(*name).and_then(|v| v.as_i64()) {
                        let child_id = ObjectId(child_id);
                        if graph.objects.contains_key(&child_id) {
                            let child = self.hydrate(child_id, graph, cache)?;
                            entity.write().set_ref(name, child);
                        }
                    }
                }
                FieldKind::List => {
                    if let Some(list_id) = fields.get(*name).and_then(|v| v.as_i64()) {
                        let list_id = ObjectId(list_id);
                        let existing = entity.read().get_list(name);
                        let list = match existing {
                            Some(list) => list,
                            None => {
                                let list = RefList::detached();
                                entity.write().set_list(name, list.clone());
                                list
                            }
                        };
                        match graph.lists.get(&list_id) {
                            Some(slice) => {
                                list.attach(self.store.clone(), list_id, slice.total);
                                list.seed(0, slice.items.clone(), slice.total);
                            }
                            None => list.attach(self.store.clone(), list_id, 0),
                        }
                    }
                }
                _ => {}
            }
        }

        entity.write().meta_mut().attach(id, Some(self.sink()));
        self.tracker.register(id, &entity);
        Ok(entity)
    }
}

fn flatten(node: &SharedEntity, flat: &mut Flattened) -> String {
    if let Some(key) = flat.keys.get(&node_ptr(node)) {
        return key.clone();
    }
    let key = Uuid::new_v4().to_string();
    flat.keys.insert(node_ptr(node), key.clone());
    flat.order.push((key.clone(), node.clone()));

    let (desc, mut fields, refs, lists) = {
        let guard = node.read();
        let desc = guard.schema();
        let fields = match guard.get_json() {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        let mut refs = Vec::new();
        let mut lists = Vec::new();
        for (name, kind) in desc.fields {
            match kind {
                FieldKind::Ref(_) => {
                    if let Some(child) = guard.get_ref(name) {
                        refs.push((*name, child));
                    }
                }
                FieldKind::List => {
                    if let Some(list) = guard.get_list(name) {
                        lists.push((*name, list));
                    }
                }
                _ => {}
            }
        }
        (desc, fields, refs, lists)
    };

    for (name, child) in refs {
        let child_key = flatten(&child, flat);
        fields.insert(name.to_string(), serde_json::Value::String(child_key));
    }
    for (name, list) in lists {
        let list_key = Uuid::new_v4().to_string();
        flat.batch
            .insert(list_key.clone(), BatchEntry::List { items: Vec::new() });
        flat.lists.push((list_key.clone(), list));
        fields.insert(name.to_string(), serde_json::Value::String(list_key));
    }
    flat.batch.insert(
        key.clone(),
        BatchEntry::Object {
            class_id: desc.class_id.to_string(),
            fields: serde_json::Value::Object(fields),
        },
    );
    key
}
