//! Shared fixtures: persistent test classes and a call-counting store.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trellis_core::{
    BatchMap, Describe, Entity, FieldKind, ObjectId, ObjectMeta, ObjectStore, RawGraph, RawObject,
    RefList, Result, SchemaDescriptor, SharedEntity,
};

/// Minimal persistent class: one string field.
pub struct Item {
    meta: ObjectMeta,
    name: String,
}

fn item_ctor(args: &serde_json::Value) -> SharedEntity {
    Arc::new(RwLock::new(Item {
        meta: ObjectMeta::new(),
        name: args
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    }))
}

impl Item {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.meta.modified();
    }
}

impl Describe for Item {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        class_id: "Item",
        fields: &[("name", FieldKind::Str)],
        ctor: item_ctor,
    };
}

impl Entity for Item {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
    fn schema(&self) -> SchemaDescriptor {
        Self::SCHEMA
    }
    fn get_json(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name })
    }
    fn set_json(&mut self, json: &serde_json::Value) {
        if let Some(name) = json.get("name").and_then(|v| v.as_str()) {
            self.name = name.to_string();
        }
    }
    fn get_ref(&self, _field: &str) -> Option<SharedEntity> {
        None
    }
    fn set_ref(&mut self, _field: &str, _value: SharedEntity) {}
    fn get_list(&self, _field: &str) -> Option<RefList> {
        None
    }
    fn set_list(&mut self, _field: &str, _list: RefList) {}
}

pub struct Author {
    meta: ObjectMeta,
    name: String,
}

fn author_ctor(args: &serde_json::Value) -> SharedEntity {
    Arc::new(RwLock::new(Author {
        meta: ObjectMeta::new(),
        name: args
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    }))
}

impl Author {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.meta.modified();
    }
}

impl Describe for Author {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        class_id: "Author",
        fields: &[("name", FieldKind::Str)],
        ctor: author_ctor,
    };
}

impl Entity for Author {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
    fn schema(&self) -> SchemaDescriptor {
        Self::SCHEMA
    }
    fn get_json(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name })
    }
    fn set_json(&mut self, json: &serde_json::Value) {
        if let Some(name) = json.get("name").and_then(|v| v.as_str()) {
            self.name = name.to_string();
        }
    }
    fn get_ref(&self, _field: &str) -> Option<SharedEntity> {
        None
    }
    fn set_ref(&mut self, _field: &str, _value: SharedEntity) {}
    fn get_list(&self, _field: &str) -> Option<RefList> {
        None
    }
    fn set_list(&mut self, _field: &str, _list: RefList) {}
}

/// A class with a reference field and a list field.
pub struct Board {
    meta: ObjectMeta,
    title: String,
    owner: Option<SharedEntity>,
    cards: Option<RefList>,
}

fn board_ctor(args: &serde_json::Value) -> SharedEntity {
    Arc::new(RwLock::new(Board {
        meta: ObjectMeta::new(),
        title: args
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        owner: None,
        cards: None,
    }))
}

impl Board {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.meta.modified();
    }

    pub fn owner(&self) -> Option<SharedEntity> {
        self.owner.clone()
    }

    pub fn cards(&self) -> Option<RefList> {
        self.cards.clone()
    }
}

impl Describe for Board {
    const SCHEMA: SchemaDescriptor = SchemaDescriptor {
        class_id: "Board",
        fields: &[
            ("title", FieldKind::Str),
            ("owner", FieldKind::Ref("Author")),
            ("cards", FieldKind::List),
        ],
        ctor: board_ctor,
    };
}

impl Entity for Board {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
    fn schema(&self) -> SchemaDescriptor {
        Self::SCHEMA
    }
    fn get_json(&self) -> serde_json::Value {
        serde_json::json!({ "title": self.title })
    }
    fn set_json(&mut self, json: &serde_json::Value) {
        if let Some(title) = json.get("title").and_then(|v| v.as_str()) {
            self.title = title.to_string();
        }
    }
    fn get_ref(&self, field: &str) -> Option<SharedEntity> {
        match field {
            "owner" => self.owner.clone(),
            _ => None,
        }
    }
    fn set_ref(&mut self, field: &str, value: SharedEntity) {
        if field == "owner" {
            self.owner = Some(value);
        }
    }
    fn get_list(&self, field: &str) -> Option<RefList> {
        match field {
            "cards" => self.cards.clone(),
            _ => None,
        }
    }
    fn set_list(&mut self, field: &str, list: RefList) {
        if field == "cards" {
            self.cards = Some(list);
        }
    }
}

/// Store wrapper counting backend calls for coalescing/paging assertions.
pub struct CountingStore {
    inner: Arc<dyn ObjectStore>,
    writes: AtomicUsize,
    page_fetches: AtomicUsize,
    last_write: Mutex<Option<(ObjectId, serde_json::Value)>>,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            page_fetches: AtomicUsize::new(0),
            last_write: Mutex::new(None),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub fn last_write(&self) -> Option<(ObjectId, serde_json::Value)> {
        self.last_write.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn find_object(&self, id: ObjectId) -> Result<RawObject> {
        self.inner.find_object(id).await
    }

    async fn create_object(&self, class_id: &str) -> Result<ObjectId> {
        self.inner.create_object(class_id).await
    }

    async fn create_objects(&self, batch: BatchMap) -> Result<HashMap<String, ObjectId>> {
        self.inner.create_objects(batch).await
    }

    async fn write(&self, id: ObjectId, json: serde_json::Value) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.last_write.lock() = Some((id, json.clone()));
        self.inner.write(id, json).await
    }

    async fn write_array(&self, id: ObjectId, items: Vec<ObjectId>) -> Result<()> {
        self.inner.write_array(id, items).await
    }

    async fn create_list(&self) -> Result<ObjectId> {
        self.inner.create_list().await
    }

    async fn append_to_list(
        &self,
        list_id: ObjectId,
        obj_id: ObjectId,
        idx: Option<usize>,
    ) -> Result<usize> {
        self.inner.append_to_list(list_id, obj_id, idx).await
    }

    async fn remove_from_list(&self, list_id: ObjectId, idx: usize) -> Result<usize> {
        self.inner.remove_from_list(list_id, idx).await
    }

    async fn get_objects_from_list(
        &self,
        list_id: ObjectId,
        from: usize,
        count: usize,
    ) -> Result<Vec<ObjectId>> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.get_objects_from_list(list_id, from, count).await
    }

    async fn get_list_size(&self, list_id: ObjectId) -> Result<usize> {
        self.inner.get_list_size(list_id).await
    }

    async fn load_objects(&self, id: ObjectId, from: usize, count: usize) -> Result<RawGraph> {
        self.inner.load_objects(id, from, count).await
    }
}
