//! Shared match document - the synchronized key/value tree both clients talk through

pub mod memory;
pub mod protocol;
pub mod rtdb;
pub mod tree;

pub use memory::{MemoryConnection, MemoryDocument};
pub use rtdb::RtdbDocument;

use std::future::Future;

use futures::stream::BoxStream;
use serde_json::{json, Map, Value};

/// Stream of full room values; `None` when the room is absent
pub type Subscription = BoxStream<'static, Option<Value>>;

/// Operations the client consumes from the shared document service.
///
/// Paths are `/`-separated with the sanitized room key as first segment.
pub trait MatchDocument: Clone + Send + Sync + 'static {
    /// Point read of the value at `path`
    fn read(&self, path: &str) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Fires with the current value of `room` and again after every change under it
    fn subscribe(&self, room: &str) -> impl Future<Output = Result<Subscription, StoreError>> + Send;

    /// Full overwrite; `Value::Null` deletes
    fn write(&self, path: &str, value: Value) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Shallow merge of `fields` at `path`, sibling fields untouched
    fn merge(
        &self,
        path: &str,
        fields: Map<String, Value>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete `path` if this connection drops without cleaning up
    fn register_cleanup_on_disconnect(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Write only if `path` holds no value. `Ok(false)` means another writer got there first.
    fn guarded_write_if_absent(
        &self,
        path: &str,
        value: Value,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Close the connection, running registered cleanups
    fn disconnect(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Placeholder resolved by the store to its commit time (milliseconds)
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

/// Replace the characters the store reserves for its own path syntax
pub fn sanitize_room_key(room_code: &str) -> String {
    room_code
        .trim()
        .chars()
        .map(|c| match c {
            '.' | '#' | '$' | '[' | ']' | '/' => '_',
            c => c,
        })
        .collect()
}

/// Join path segments with `/`
pub fn path(segments: &[&str]) -> String {
    segments.join("/")
}

/// Outbound mutation produced by the simulation, applied by the writer task
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentWrite {
    Set { path: String, value: Value },
    Merge { path: String, fields: Map<String, Value> },
    Remove { path: String },
    GuardedCreate { path: String, value: Value },
    RegisterCleanup { path: String },
}

impl DocumentWrite {
    pub fn path(&self) -> &str {
        match self {
            DocumentWrite::Set { path, .. }
            | DocumentWrite::Merge { path, .. }
            | DocumentWrite::Remove { path }
            | DocumentWrite::GuardedCreate { path, .. }
            | DocumentWrite::RegisterCleanup { path } => path,
        }
    }

    /// Apply against a document. Returns false only when a guarded create lost.
    pub async fn apply<D: MatchDocument>(self, doc: &D) -> Result<bool, StoreError> {
        match self {
            DocumentWrite::Set { path, value } => doc.write(&path, value).await.map(|_| true),
            DocumentWrite::Merge { path, fields } => doc.merge(&path, fields).await.map(|_| true),
            DocumentWrite::Remove { path } => doc.write(&path, Value::Null).await.map(|_| true),
            DocumentWrite::GuardedCreate { path, value } => {
                doc.guarded_write_if_absent(&path, value).await
            }
            DocumentWrite::RegisterCleanup { path } => {
                doc.register_cleanup_on_disconnect(&path).await.map(|_| true)
            }
        }
    }
}

/// Document store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse document value: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Subscription stream error: {0}")]
    Stream(String),

    #[error("Connection closed")]
    Closed,
}
