//! Wire protocol: named JSON-encoded operations and the response envelope

use serde::{Deserialize, Serialize};
use trellis_core::{BatchMap, ObjectId, Result, TrellisError};

/// One remote store operation, internally tagged `{"op": ..., "params": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "params", rename_all = "camelCase")]
pub enum WireRequest {
    FindObject {
        id: ObjectId,
    },
    CreateObject {
        subtype: String,
    },
    CreateObjects {
        map: BatchMap,
    },
    Write {
        id: ObjectId,
        json: serde_json::Value,
    },
    WriteArray {
        id: ObjectId,
        json: Vec<ObjectId>,
    },
    #[serde(rename_all = "camelCase")]
    AppendToList {
        list_id: ObjectId,
        obj_id: ObjectId,
        idx: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveFromList {
        list_id: ObjectId,
        idx: usize,
    },
    GetObjectsFromList {
        id: ObjectId,
        from: usize,
        count: usize,
    },
    GetListSize {
        id: ObjectId,
    },
    CreateList {},
    LoadObjects {
        id: ObjectId,
        from: usize,
        count: usize,
    },
}

impl WireRequest {
    /// Operation name as it appears on the wire.
    pub fn op(&self) -> &'static str {
        match self {
            WireRequest::FindObject { .. } => "findObject",
            WireRequest::CreateObject { .. } => "createObject",
            WireRequest::CreateObjects { .. } => "createObjects",
            WireRequest::Write { .. } => "write",
            WireRequest::WriteArray { .. } => "writeArray",
            WireRequest::AppendToList { .. } => "appendToList",
            WireRequest::RemoveFromList { .. } => "removeFromList",
            WireRequest::GetObjectsFromList { .. } => "getObjectsFromList",
            WireRequest::GetListSize { .. } => "getListSize",
            WireRequest::CreateList {} => "createList",
            WireRequest::LoadObjects { .. } => "loadObjects",
        }
    }
}

/// Error payload carried by a failed response, round-tripping the engine's
/// error taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

/// Response envelope: `{ok, result}` on success, `{ok: false, error}` on
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl WireResponse {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: &TrellisError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(WireError {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
    }

    /// Unwraps the envelope back into the engine's error taxonomy.
    pub fn into_result(self) -> Result<serde_json::Value> {
        if self.ok {
            return Ok(self.result.unwrap_or(serde_json::Value::Null));
        }
        match self.error {
            Some(error) => Err(TrellisError::from_kind(&error.kind, error.message)),
            None => Err(TrellisError::Transport(
                "malformed response: not ok and no error".to_string(),
            )),
        }
    }
}
