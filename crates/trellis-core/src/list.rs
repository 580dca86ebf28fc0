//! Paginated reference list
//!
//! An ordered, block-cached collection of persistent object references. The
//! backend owns the authoritative length; the list caches fixed-size blocks
//! covering whatever window the caller has selected.

use crate::error::{Result, TrellisError};
use crate::object::ObjectId;
use crate::sequence::{sequence, step, Step};
use crate::store::ObjectStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Items per cache block
pub const BLOCK_SIZE: usize = 1000;

/// Largest window `select_range` accepts, guarding against unbounded fetches
pub const MAX_SELECT: usize = 2 * BLOCK_SIZE;

#[derive(Default)]
struct ListInner {
    store: Option<Arc<dyn ObjectStore>>,
    id: Option<ObjectId>,
    length: usize,
    blocks: HashMap<usize, Vec<ObjectId>>,
    window: Option<(usize, usize)>,
}

/// Blocks covering the clamped window `[from, min(from + count, length))`,
/// as an inclusive `(first, last)` pair; `None` for an empty window.
fn covering_blocks(from: usize, count: usize, length: usize) -> Option<(usize, usize)> {
    let end = (from + count).min(length);
    if from >= end {
        return None;
    }
    Some((from / BLOCK_SIZE, (end - 1) / BLOCK_SIZE))
}

/// An ordered, block-cached list of object references.
///
/// Cheaply cloneable; clones share cache and selection state so the list can
/// live inside entity fields. A freshly constructed entity holds a
/// [`RefList::detached`] list that becomes live when the serializer attaches
/// it to a store and a backend id.
#[derive(Clone)]
pub struct RefList {
    inner: Arc<RwLock<ListInner>>,
}

impl RefList {
    /// A list with no backend yet. All reads answer empty/`None` until
    /// [`RefList::attach`] is called.
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ListInner::default())),
        }
    }

    /// Binds the list to a store and backend id. Idempotent like object
    /// attach: already-bound state is never overwritten.
    pub fn attach(&self, store: Arc<dyn ObjectStore>, id: ObjectId, length: usize) {
        let mut inner = self.inner.write();
        if inner.store.is_none() {
            inner.store = Some(store);
        }
        if inner.id.is_none() {
            inner.id = Some(id);
            inner.length = length;
        }
    }

    /// Installs a fetched page during hydration. Pages are block-aligned.
    pub fn seed(&self, from: usize, items: Vec<ObjectId>, total: usize) {
        debug_assert!(from % BLOCK_SIZE == 0, "pages are block-aligned");
        let mut inner = self.inner.write();
        inner.length = total;
        for (i, chunk) in items.chunks(BLOCK_SIZE).enumerate() {
            inner.blocks.insert(from / BLOCK_SIZE + i, chunk.to_vec());
        }
    }

    /// Backend id, `None` while detached.
    pub fn id(&self) -> Option<ObjectId> {
        self.inner.read().id
    }

    /// Current authoritative length.
    pub fn len(&self) -> usize {
        self.inner.read().length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn attached(&self) -> Result<(Arc<dyn ObjectStore>, ObjectId)> {
        let inner = self.inner.read();
        match (inner.store.clone(), inner.id) {
            (Some(store), Some(id)) => Ok((store, id)),
            _ => Err(TrellisError::Backend(
                "list is not attached to a store".to_string(),
            )),
        }
    }

    /// Declares interest in `[from, from + count)` and resolves once every
    /// covering block is cached, issuing one backend fetch per missing block
    /// and none for blocks already present.
    pub async fn select_range(&self, from: usize, count: usize) -> Result<()> {
        if count > MAX_SELECT {
            return Err(TrellisError::InvalidRange {
                requested: count,
                max: MAX_SELECT,
            });
        }
        let (store, id) = self.attached()?;
        let missing: Vec<usize> = {
            let mut inner = self.inner.write();
            inner.window = Some((from, count));
            match covering_blocks(from, count, inner.length) {
                Some((first, last)) => (first..=last)
                    .filter(|block| !inner.blocks.contains_key(block))
                    .collect(),
                None => Vec::new(),
            }
        };
        if missing.is_empty() {
            return Ok(());
        }

        let steps: Vec<Step<(usize, Vec<ObjectId>), TrellisError>> = missing
            .into_iter()
            .map(|block| {
                let store = store.clone();
                step(move |_| async move {
                    tracing::debug!(list = %id, block, "fetching list block");
                    let items = store
                        .get_objects_from_list(id, block * BLOCK_SIZE, BLOCK_SIZE)
                        .await?;
                    Ok((block, items))
                })
            })
            .collect();
        let fetched = sequence(steps).await?;

        let mut inner = self.inner.write();
        for (block, items) in fetched {
            inner.blocks.insert(block, items);
        }
        Ok(())
    }

    /// Read-through accessor. An index whose covering block has not been
    /// fetched yields `None` rather than failing.
    pub fn get(&self, idx: usize) -> Option<ObjectId> {
        let inner = self.inner.read();
        if idx >= inner.length {
            return None;
        }
        inner
            .blocks
            .get(&(idx / BLOCK_SIZE))
            .and_then(|block| block.get(idx % BLOCK_SIZE))
            .copied()
    }

    /// Read-through range accessor; unfetched indices yield `None`.
    pub fn get_items(&self, from: usize, count: usize) -> Vec<Option<ObjectId>> {
        let inner = self.inner.read();
        (from..from + count)
            .map(|idx| {
                if idx >= inner.length {
                    return None;
                }
                inner
                    .blocks
                    .get(&(idx / BLOCK_SIZE))
                    .and_then(|block| block.get(idx % BLOCK_SIZE))
                    .copied()
            })
            .collect()
    }

    /// Inserts `obj_id` at `idx` (append when `None`). On success the entire
    /// cache is discarded and the selected window reloaded; on failure the
    /// cache is left in its prior state.
    pub async fn append(&self, obj_id: ObjectId, idx: Option<usize>) -> Result<usize> {
        let (store, id) = self.attached()?;
        let new_len = store.append_to_list(id, obj_id, idx).await?;
        self.invalidate(new_len);
        self.reload_window().await?;
        Ok(new_len)
    }

    /// Removes the item at `idx`. Same cache policy as [`RefList::append`].
    pub async fn remove(&self, idx: usize) -> Result<usize> {
        let (store, id) = self.attached()?;
        let new_len = store.remove_from_list(id, idx).await?;
        self.invalidate(new_len);
        self.reload_window().await?;
        Ok(new_len)
    }

    // Structural mutations invalidate every cached block, not just the
    // affected one.
    fn invalidate(&self, new_len: usize) {
        let mut inner = self.inner.write();
        inner.length = new_len;
        inner.blocks.clear();
    }

    async fn reload_window(&self) -> Result<()> {
        let window = self.inner.read().window;
        if let Some((from, count)) = window {
            self.select_range(from, count).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RefList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("RefList")
            .field("id", &inner.id)
            .field("length", &inner.length)
            .field("cached_blocks", &inner.blocks.len())
            .field("window", &inner.window)
            .finish()
    }
}
