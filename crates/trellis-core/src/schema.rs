//! Schema registry
//!
//! Maps a class identifier to its field schema and constructor. Polymorphic
//! creation resolves through descriptors registered once and keyed by an
//! explicit type tag, never per-call introspection.

use crate::error::{Result, TrellisError};
use crate::object::SharedEntity;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Field type marker for one schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
    /// Reference to another persistent class, by class identifier
    Ref(&'static str),
    /// Paginated reference list
    List,
}

impl FieldKind {
    /// True for fields carried by `get_json`/`set_json`; references and
    /// lists are handled by the graph walkers instead.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            FieldKind::Str | FieldKind::Int | FieldKind::Float | FieldKind::Bool
        )
    }
}

/// Constructor for one persistent class
pub type Constructor = fn(&serde_json::Value) -> SharedEntity;

/// Per-class metadata: identifier, ordered field map, constructor
#[derive(Debug, Clone, Copy)]
pub struct SchemaDescriptor {
    /// Unique class identifier
    pub class_id: &'static str,
    /// Ordered field map
    pub fields: &'static [(&'static str, FieldKind)],
    /// Builds a fresh unattached instance from creation args
    pub ctor: Constructor,
}

impl SchemaDescriptor {
    /// Kind of the named field, if the schema declares it.
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, kind)| *kind)
    }
}

/// Implemented by every persistent class; the registry extracts the
/// associated descriptor at registration time.
pub trait Describe {
    const SCHEMA: SchemaDescriptor;
}

/// Registry of persistent class descriptors.
///
/// Shared as `Arc<SchemaRegistry>` between the serializer and schema-aware
/// backends; constructed explicitly, never a process-wide singleton.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    classes: RwLock<HashMap<String, SchemaDescriptor>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class by its associated schema descriptor.
    pub fn register<T: Describe>(&self) {
        self.insert(T::SCHEMA);
    }

    /// Raw registration. A duplicate class identifier silently replaces the
    /// prior mapping: last registration wins.
    pub fn insert(&self, descriptor: SchemaDescriptor) {
        self.classes
            .write()
            .insert(descriptor.class_id.to_string(), descriptor);
    }

    /// Descriptor for a class identifier.
    pub fn get(&self, class_id: &str) -> Result<SchemaDescriptor> {
        self.classes
            .read()
            .get(class_id)
            .copied()
            .ok_or_else(|| TrellisError::SchemaNotFound(class_id.to_string()))
    }

    /// All registered class identifiers.
    pub fn classes(&self) -> Vec<String> {
        self.classes.read().keys().cloned().collect()
    }
}
