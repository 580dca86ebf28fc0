//! Trellis Core - schema-driven object-graph persistence and synchronization
//!
//! Trellis turns plain typed objects into a client/server-replicated,
//! partially-cached, versioned object graph, backed interchangeably by an
//! in-memory store, a relational database (`trellis-sqlite`), or a remote
//! RPC service (`trellis-remote`).
//!
//! # Architecture
//!
//! Leaf-to-root dependency order:
//!
//! 1. **Async Task Sequencer** (`sequence`): sequential future-chaining used
//!    by every multi-step operation above it
//! 2. **Schema Registry** (`schema`): class identifier → field schema +
//!    constructor
//! 3. **Persistent Object Base** (`object`): identity, version counter, weak
//!    back-reference to the dirty-tracking context
//! 4. **Paginated Reference List** (`list`): ordered, block-cached collection
//!    of object references
//! 5. **Store Abstraction** (`store`): the storage contract plus the
//!    in-memory backend
//! 6. **Graph Serializer** (`serializer`): batched creation, recursive
//!    loading, debounced autosave
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis_core::{GraphSerializer, MemoryStore, ObjectStore, SchemaRegistry};
//!
//! # async fn example() -> trellis_core::Result<()> {
//! let registry = Arc::new(SchemaRegistry::new());
//! // registry.register::<Item>();
//! let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new(registry.clone()));
//! let serializer = GraphSerializer::new(registry, store);
//!
//! let item = serializer
//!     .make_object("Item", &serde_json::json!({ "name": "a" }))
//!     .await?;
//! let id = item.read().id().unwrap();
//! let reloaded = serializer.load_object(id).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod config;
pub mod error;
pub mod list;
pub mod object;
pub mod schema;
pub mod sequence;
pub mod serializer;
pub mod store;

// Re-export commonly used types for convenience
pub use config::SerializerConfig;
pub use error::{Result, TrellisError};
pub use list::{RefList, BLOCK_SIZE, MAX_SELECT};
pub use object::{DirtySink, Entity, ObjectId, ObjectMeta, SharedEntity};
pub use schema::{Describe, FieldKind, SchemaDescriptor, SchemaRegistry};
pub use sequence::WorkQueue;
pub use serializer::{DirtyTracker, GraphSerializer};
pub use store::{
    BatchEntry, BatchMap, ListSlice, MemoryStore, ObjectStore, RawGraph, RawObject,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
