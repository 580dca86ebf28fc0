//! Server-side dispatch
//!
//! Maps a wire request onto any local [`ObjectStore`] and produces the wire
//! response. A service embeds this behind whatever HTTP/socket listener it
//! runs; the loopback tests drive it directly.

use crate::wire::{WireRequest, WireResponse};
use trellis_core::{ObjectStore, Result, TrellisError};

fn encode<T: serde::Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(TrellisError::from)
}

/// Executes one wire operation against `store`.
pub async fn dispatch(store: &dyn ObjectStore, request: WireRequest) -> WireResponse {
    let op = request.op();
    tracing::debug!(op, "dispatching remote store operation");

    let result: Result<serde_json::Value> = match request {
        WireRequest::FindObject { id } => store.find_object(id).await.and_then(encode),
        WireRequest::CreateObject { subtype } => {
            store.create_object(&subtype).await.and_then(encode)
        }
        WireRequest::CreateObjects { map } => store.create_objects(map).await.and_then(encode),
        WireRequest::Write { id, json } => store.write(id, json).await.and_then(encode),
        WireRequest::WriteArray { id, json } => {
            store.write_array(id, json).await.and_then(encode)
        }
        WireRequest::AppendToList {
            list_id,
            obj_id,
            idx,
        } => store
            .append_to_list(list_id, obj_id, idx)
            .await
            .and_then(encode),
        WireRequest::RemoveFromList { list_id, idx } => {
            store.remove_from_list(list_id, idx).await.and_then(encode)
        }
        WireRequest::GetObjectsFromList { id, from, count } => store
            .get_objects_from_list(id, from, count)
            .await
            .and_then(encode),
        WireRequest::GetListSize { id } => store.get_list_size(id).await.and_then(encode),
        WireRequest::CreateList {} => store.create_list().await.and_then(encode),
        WireRequest::LoadObjects { id, from, count } => {
            store.load_objects(id, from, count).await.and_then(encode)
        }
    };

    match result {
        Ok(value) => WireResponse::success(value),
        Err(e) => {
            tracing::debug!(op, "operation failed: {}", e);
            WireResponse::failure(&e)
        }
    }
}
