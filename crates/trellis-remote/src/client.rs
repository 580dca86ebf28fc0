//! Client-side remote store
//!
//! Every store method is exactly one RPC through the transport. No caching
//! or batching happens here; graph-creation batching and list-page caching
//! both live one layer up, in the serializer and the reference list.

use crate::transport::{HttpTransport, RemoteConfig, Transport};
use crate::wire::WireRequest;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_core::{
    BatchMap, ObjectId, ObjectStore, RawGraph, RawObject, Result, TrellisError,
};

/// Remote object store: a thin RPC client implementing the full store
/// contract.
#[derive(Clone)]
pub struct RemoteStore {
    transport: Arc<dyn Transport>,
}

impl RemoteStore {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Convenience constructor over the default HTTP transport.
    pub fn over_http(config: RemoteConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    async fn call<T: DeserializeOwned>(&self, request: WireRequest) -> Result<T> {
        let response = self.transport.call(&request).await?;
        let value = response.into_result()?;
        serde_json::from_value(value).map_err(TrellisError::from)
    }
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore").finish()
    }
}

#[async_trait]
impl ObjectStore for RemoteStore {
    async fn find_object(&self, id: ObjectId) -> Result<RawObject> {
        self.call(WireRequest::FindObject { id }).await
    }

    async fn create_object(&self, class_id: &str) -> Result<ObjectId> {
        self.call(WireRequest::CreateObject {
            subtype: class_id.to_string(),
        })
        .await
    }

    async fn create_objects(&self, batch: BatchMap) -> Result<HashMap<String, ObjectId>> {
        self.call(WireRequest::CreateObjects { map: batch }).await
    }

    async fn write(&self, id: ObjectId, json: serde_json::Value) -> Result<()> {
        self.call(WireRequest::Write { id, json }).await
    }

    async fn write_array(&self, id: ObjectId, items: Vec<ObjectId>) -> Result<()> {
        self.call(WireRequest::WriteArray { id, json: items }).await
    }

    async fn create_list(&self) -> Result<ObjectId> {
        self.call(WireRequest::CreateList {}).await
    }

    async fn append_to_list(
        &self,
        list_id: ObjectId,
        obj_id: ObjectId,
        idx: Option<usize>,
    ) -> Result<usize> {
        self.call(WireRequest::AppendToList {
            list_id,
            obj_id,
            idx,
        })
        .await
    }

    async fn remove_from_list(&self, list_id: ObjectId, idx: usize) -> Result<usize> {
        self.call(WireRequest::RemoveFromList { list_id, idx }).await
    }

    async fn get_objects_from_list(
        &self,
        list_id: ObjectId,
        from: usize,
        count: usize,
    ) -> Result<Vec<ObjectId>> {
        self.call(WireRequest::GetObjectsFromList {
            id: list_id,
            from,
            count,
        })
        .await
    }

    async fn get_list_size(&self, list_id: ObjectId) -> Result<usize> {
        self.call(WireRequest::GetListSize { id: list_id }).await
    }

    async fn load_objects(&self, id: ObjectId, from: usize, count: usize) -> Result<RawGraph> {
        self.call(WireRequest::LoadObjects { id, from, count }).await
    }
}
