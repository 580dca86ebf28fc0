//! Trellis Remote - RPC backend for the Trellis object-graph engine
//!
//! Three pieces:
//!
//! - **Wire protocol** (`wire`): named JSON-encoded operations and the
//!   `{ok, result, error}` response envelope, round-tripping the engine's
//!   error taxonomy.
//! - **Transport** (`transport`): the request/response collaborator trait
//!   plus a `reqwest`-based HTTP implementation.
//! - **Client and service** (`client`, `service`): [`RemoteStore`] turns
//!   every store method into exactly one RPC; [`dispatch`] is the server
//!   half, mapping wire requests onto any local store.
//!
//! The client performs no caching or batching of its own; all batching
//! (graph-creation batching, list-page caching) happens one layer up.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod client;
pub mod service;
pub mod transport;
pub mod wire;

pub use client::RemoteStore;
pub use service::dispatch;
pub use transport::{HttpTransport, RemoteConfig, Transport};
pub use wire::{WireError, WireRequest, WireResponse};
