//! Full-protocol loopback: the RemoteStore client wired straight into the
//! server-side dispatch over an in-memory store, with every request and
//! response passing through the JSON codec.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use trellis_core::{
    Describe, Entity, FieldKind, GraphSerializer, MemoryStore, ObjectId, ObjectMeta, ObjectStore,
    RefList, Result, SchemaDescriptor, SchemaRegistry, SharedEntity, TrellisError,
};
use trellis_remote::{dispatch, RemoteStore, Transport, WireRequest, WireResponse};

struct Item {
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

/// In-process transport: encodes each request to JSON, decodes it on the
/// "server" side, and dispatches against a memory store.
struct Loopback {
    backing: MemoryStore,
}

#[async_trait]
impl Transport for Loopback {
    async fn call(&self, request: &WireRequest) -> Result<WireResponse> {
        let encoded = serde_json::to_string(request)?;
        let decoded: WireRequest = serde_json::from_str(&encoded)?;
        let response = dispatch(&self.backing, decoded).await;

        // The response passes through the codec too.
        let encoded = serde_json::to_string(&response)?;
        Ok(serde_json::from_str(&encoded)?)
    }
}

fn setup() -> (Arc<SchemaRegistry>, RemoteStore) {
    let registry = Arc::new(SchemaRegistry::new());
    registry.register::<Item>();
    let transport = Arc::new(Loopback {
        backing: MemoryStore::new(registry.clone()),
    });
    (registry, RemoteStore::new(transport))
}

#[tokio::test]
async fn test_remote_round_trip_through_codec() {
    let (registry, remote) = setup();
    let store: Arc<dyn ObjectStore> = Arc::new(remote);
    let serializer = GraphSerializer::new(registry, store.clone());

    let item = serializer
        .make_object("Item", &serde_json::json!({ "name": "a" }))
        .await
        .unwrap();
    let id = item.read().id().unwrap();

    let loaded = serializer.load_object(id).await.unwrap();
    let guard = loaded.read();
    assert_eq!(
        guard.as_any().downcast_ref::<Item>().unwrap().name,
        "a"
    );
}

#[tokio::test]
async fn test_remote_list_operations() {
    let (_registry, remote) = setup();

    let list = remote.create_list().await.unwrap();
    let a = remote.create_object("Item").await.unwrap();
    let b = remote.create_object("Item").await.unwrap();

    assert_eq!(remote.append_to_list(list, a, None).await.unwrap(), 1);
    assert_eq!(remote.append_to_list(list, b, Some(0)).await.unwrap(), 2);
    assert_eq!(
        remote.get_objects_from_list(list, 0, 10).await.unwrap(),
        vec![b, a]
    );
    assert_eq!(remote.get_list_size(list).await.unwrap(), 2);
    assert_eq!(remote.remove_from_list(list, 0).await.unwrap(), 1);

    remote.write_array(list, vec![b, a]).await.unwrap();
    assert_eq!(
        remote.get_objects_from_list(list, 0, 10).await.unwrap(),
        vec![b, a]
    );
}

#[tokio::test]
async fn test_remote_error_kinds_survive_the_wire() {
    let (_registry, remote) = setup();

    let err = remote.find_object(ObjectId(404)).await.unwrap_err();
    assert!(matches!(err, TrellisError::NotFound(_)));

    let err = remote.create_object("Ghost").await.unwrap_err();
    assert!(matches!(err, TrellisError::SchemaNotFound(_)));
}

#[tokio::test]
async fn test_remote_batched_create() {
    let (_registry, remote) = setup();

    let mut batch = trellis_core::BatchMap::new();
    batch.insert(
        "root".to_string(),
        trellis_core::BatchEntry::Object {
            class_id: "Item".to_string(),
            fields: serde_json::json!({ "name": "root" }),
        },
    );
    let ids = remote.create_objects(batch).await.unwrap();
    let raw = remote.find_object(ids["root"]).await.unwrap();
    assert_eq!(raw.fields["name"], "root");
}
