//! End-to-end creation/loading/autosave flows over the in-memory backend.

mod common;

use common::{Author, Board, CountingStore, Item};
use std::sync::Arc;
use std::time::Duration;
use trellis_core::{GraphSerializer, MemoryStore, ObjectStore, SchemaRegistry};

fn setup() -> (GraphSerializer, Arc<CountingStore>) {
    let registry = Arc::new(SchemaRegistry::new());
    registry.register::<Item>();
    registry.register::<Author>();
    registry.register::<Board>();

    let memory = Arc::new(MemoryStore::new(registry.clone()));
    let store = Arc::new(CountingStore::new(memory));
    let serializer = GraphSerializer::new(registry, store.clone() as Arc<dyn ObjectStore>);
    (serializer, store)
}

#[tokio::test]
async fn test_item_create_load_autosave_scenario() {
    let (serializer, store) = setup();

    let item = serializer
        .make_object("Item", &serde_json::json!({ "name": "a" }))
        .await
        .unwrap();
    let id = item.read().id().expect("created object has an id");
    assert_eq!(
        item.read().as_any().downcast_ref::<Item>().unwrap().name(),
        "a"
    );

    let loaded = serializer.load_object(id).await.unwrap();
    assert_eq!(
        loaded.read().as_any().downcast_ref::<Item>().unwrap().name(),
        "a"
    );

    loaded
        .write()
        .as_any_mut()
        .downcast_mut::<Item>()
        .unwrap()
        .set_name("b");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.writes(), 1);
    let (written_id, json) = store.last_write().unwrap();
    assert_eq!(written_id, id);
    assert_eq!(json, serde_json::json!({ "name": "b" }));
}

#[tokio::test]
async fn test_round_trip_resolves_reference_fields() {
    let (serializer, _store) = setup();

    let board = serializer
        .make_object("Board", &serde_json::json!({ "title": "roadmap" }))
        .await
        .unwrap();
    let board_id = board.read().id().unwrap();

    // The referenced Author was instantiated during the creation walk.
    let owner = board
        .read()
        .as_any()
        .downcast_ref::<Board>()
        .unwrap()
        .owner()
        .expect("owner instantiated during creation");
    assert!(owner.read().id().is_some());

    owner
        .write()
        .as_any_mut()
        .downcast_mut::<Author>()
        .unwrap()
        .set_name("ada");
    serializer.tracker().flush_now().await;

    let loaded = serializer.load_object(board_id).await.unwrap();
    let guard = loaded.read();
    let loaded_board = guard.as_any().downcast_ref::<Board>().unwrap();
    assert_eq!(loaded_board.title(), "roadmap");

    let loaded_owner = loaded_board.owner().expect("owner hydrated");
    assert_eq!(
        loaded_owner
            .read()
            .as_any()
            .downcast_ref::<Author>()
            .unwrap()
            .name(),
        "ada"
    );

    // The list field came back attached to its backend list.
    let cards = loaded_board.cards().expect("cards hydrated");
    assert!(cards.id().is_some());
    assert_eq!(cards.len(), 0);
}

#[tokio::test]
async fn test_burst_of_mutations_coalesces_into_one_write() {
    let (serializer, store) = setup();

    let item = serializer
        .make_object("Item", &serde_json::json!({ "name": "v0" }))
        .await
        .unwrap();

    for i in 1..=5 {
        item.write()
            .as_any_mut()
            .downcast_mut::<Item>()
            .unwrap()
            .set_name(format!("v{}", i));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.writes(), 1);
    let (_, json) = store.last_write().unwrap();
    assert_eq!(json, serde_json::json!({ "name": "v5" }));
    assert_eq!(serializer.tracker().pending(), 0);
}

#[tokio::test]
async fn test_loaded_objects_are_bound_to_autosave() {
    let (serializer, store) = setup();

    let item = serializer
        .make_object("Item", &serde_json::json!({ "name": "before" }))
        .await
        .unwrap();
    let id = item.read().id().unwrap();
    drop(item);

    let loaded = serializer.load_object(id).await.unwrap();
    loaded
        .write()
        .as_any_mut()
        .downcast_mut::<Item>()
        .unwrap()
        .set_name("after");
    serializer.tracker().flush_now().await;

    let raw = store.find_object(id).await.unwrap();
    assert_eq!(raw.fields["name"], "after");
    assert!(!serializer.tracker().recent_flushes().is_empty());
}

#[tokio::test]
async fn test_load_unknown_id_fails() {
    let (serializer, _store) = setup();
    let err = serializer
        .load_object(trellis_core::ObjectId(404))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, trellis_core::TrellisError::NotFound(_)));
}
