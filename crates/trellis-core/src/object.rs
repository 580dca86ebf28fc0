//! Persistent object base
//!
//! Per-instance identity, version counter, and a weak back-reference to a
//! dirty-tracking context.

use crate::list::RefList;
use crate::schema::SchemaDescriptor;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// Backend-assigned object identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub i64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A shared handle to any persistent object
pub type SharedEntity = Arc<RwLock<dyn Entity>>;

/// Receives dirty notifications from attached objects.
///
/// Held by objects as a weak back-reference, not an ownership edge.
pub trait DirtySink: Send + Sync {
    fn mark_dirty(&self, id: ObjectId, version: u64);
}

/// Identity, version counter, and optional dirty-tracking context shared by
/// every persistent object.
pub struct ObjectMeta {
    id: Option<ObjectId>,
    version: u64,
    tracker: Option<Weak<dyn DirtySink>>,
}

impl ObjectMeta {
    pub fn new() -> Self {
        Self {
            id: None,
            version: 0,
            tracker: None,
        }
    }

    /// Backend identity, `None` until attached.
    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    /// Monotonically increasing mutation counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_attached(&self) -> bool {
        self.id.is_some()
    }

    /// Records a mutation: bumps the version and, if a context is bound and
    /// an id is assigned, notifies the tracker.
    pub fn modified(&mut self) {
        self.version += 1;
        if let (Some(id), Some(tracker)) = (self.id, self.tracker.as_ref()) {
            if let Some(tracker) = tracker.upgrade() {
                tracker.mark_dirty(id, self.version);
            }
        }
    }

    /// Binds identity and dirty-tracking context. Idempotent: an identity or
    /// context that is already set is never overwritten, so the same attach
    /// path serves both freshly created and freshly loaded objects.
    pub fn attach(&mut self, id: ObjectId, tracker: Option<Weak<dyn DirtySink>>) {
        if self.id.is_none() {
            self.id = Some(id);
        }
        if self.tracker.is_none() {
            if let Some(tracker) = tracker {
                self.tracker = Some(tracker);
            }
        }
    }
}

impl Default for ObjectMeta {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectMeta")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("tracked", &self.tracker.is_some())
            .finish()
    }
}

/// Contract implemented by every persisted entity.
///
/// `get_json` carries only primitive fields; reference and list fields are
/// walked generically via `get_ref`/`get_list` by the serializer. `set_json`
/// must ignore entries it does not recognize as its own primitive fields.
pub trait Entity: Send + Sync {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Downcast support, so callers can recover the concrete type behind a
    /// [`SharedEntity`] handle.
    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    /// Resolved via the owning class, not stored per instance.
    fn schema(&self) -> SchemaDescriptor;

    /// Primitive fields only, as a flat JSON object.
    fn get_json(&self) -> serde_json::Value;

    /// Applies primitive fields during hydration.
    fn set_json(&mut self, json: &serde_json::Value);

    fn get_ref(&self, field: &str) -> Option<SharedEntity>;
    fn set_ref(&mut self, field: &str, value: SharedEntity);

    fn get_list(&self, field: &str) -> Option<RefList>;
    fn set_list(&mut self, field: &str, list: RefList);

    fn id(&self) -> Option<ObjectId> {
        self.meta().id()
    }

    fn version(&self) -> u64 {
        self.meta().version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingSink {
        seen: Mutex<Vec<(ObjectId, u64)>>,
    }

    impl DirtySink for RecordingSink {
        fn mark_dirty(&self, id: ObjectId, version: u64) {
            self.seen.lock().push((id, version));
        }
    }

    #[test]
    fn test_modified_bumps_version_without_tracker() {
        let mut meta = ObjectMeta::new();
        assert_eq!(meta.version(), 0);
        meta.modified();
        meta.modified();
        assert_eq!(meta.version(), 2);
        assert!(meta.id().is_none());
    }

    #[test]
    fn test_modified_notifies_bound_tracker() {
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
        });
        let sink_dyn: Arc<dyn DirtySink> = sink.clone();
        let weak: Weak<dyn DirtySink> = Arc::downgrade(&sink_dyn);

        let mut meta = ObjectMeta::new();
        meta.attach(ObjectId(7), Some(weak));
        meta.modified();
        meta.modified();

        assert_eq!(*sink.seen.lock(), vec![(ObjectId(7), 1), (ObjectId(7), 2)]);
    }

    #[test]
    fn test_attach_is_idempotent() {
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
        });

        let mut meta = ObjectMeta::new();
        meta.attach(ObjectId(1), None);
        // A later attach must not overwrite the identity, and may still bind
        // the context if none was set.
        let sink_dyn: Arc<dyn DirtySink> = sink.clone();
        let weak: Weak<dyn DirtySink> = Arc::downgrade(&sink_dyn);
        meta.attach(ObjectId(2), Some(weak));

        assert_eq!(meta.id(), Some(ObjectId(1)));
        meta.modified();
        assert_eq!(*sink.seen.lock(), vec![(ObjectId(1), 1)]);
    }
}
