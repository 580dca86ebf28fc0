//! Store abstraction
//!
//! The storage contract implemented identically by the in-memory, relational,
//! and remote backends, plus the raw wire/storage representation the
//! serializer hydrates from.

use crate::error::Result;
use crate::object::ObjectId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod memory;

pub use memory::MemoryStore;

/// Flat record for one stored object: class tag plus primitive and
/// reference-id fields. No nested objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObject {
    pub id: ObjectId,
    pub class_id: String,
    /// Flat JSON object: primitives by value, references and lists as ids
    pub fields: serde_json::Value,
}

/// One fetched page of a list: ordered child ids plus the authoritative
/// total count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSlice {
    pub items: Vec<ObjectId>,
    pub total: usize,
}

/// The raw graph returned by a recursive load: concrete object JSON keyed by
/// id, and list membership keyed by list id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawGraph {
    pub objects: HashMap<ObjectId, RawObject>,
    pub lists: HashMap<ObjectId, ListSlice>,
}

/// One node of a batched create. Reference and list fields point at the
/// *local key* of their referent, not a real id; the backend resolves them
/// once every node has an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchEntry {
    Object {
        class_id: String,
        fields: serde_json::Value,
    },
    List {
        items: Vec<String>,
    },
}

/// Local key → node map submitted as one batched create request
pub type BatchMap = HashMap<String, BatchEntry>;

/// The storage contract.
///
/// All methods return futures and reject (never panic) across the async
/// boundary. Mutating list methods return the new authoritative length.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Raw record for one object id.
    async fn find_object(&self, id: ObjectId) -> Result<RawObject>;

    /// Creates one empty object of the given class.
    async fn create_object(&self, class_id: &str) -> Result<ObjectId>;

    /// Batched creation primitive used by graph creation: creates every
    /// node in the map and returns a local-key → real-id map. Atomic: a
    /// failed batch leaves no records behind.
    async fn create_objects(&self, batch: BatchMap) -> Result<HashMap<String, ObjectId>>;

    /// Merges primitive field values into an existing object.
    async fn write(&self, id: ObjectId, json: serde_json::Value) -> Result<()>;

    /// Replaces a list's membership wholesale.
    async fn write_array(&self, id: ObjectId, items: Vec<ObjectId>) -> Result<()>;

    /// Creates an empty list.
    async fn create_list(&self) -> Result<ObjectId>;

    /// Inserts at `idx` (append when `None`); returns the new length.
    async fn append_to_list(
        &self,
        list_id: ObjectId,
        obj_id: ObjectId,
        idx: Option<usize>,
    ) -> Result<usize>;

    /// Removes the item at `idx`; returns the new length.
    async fn remove_from_list(&self, list_id: ObjectId, idx: usize) -> Result<usize>;

    /// Ordered child ids in `[from, from + count)`.
    async fn get_objects_from_list(
        &self,
        list_id: ObjectId,
        from: usize,
        count: usize,
    ) -> Result<Vec<ObjectId>>;

    /// Authoritative list length.
    async fn get_list_size(&self, list_id: ObjectId) -> Result<usize>;

    /// Recursive fetch rooted at `id`. Lists encountered during the walk are
    /// bounded to the `[from, from + count)` page.
    async fn load_objects(&self, id: ObjectId, from: usize, count: usize) -> Result<RawGraph>;
}
