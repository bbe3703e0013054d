//! In-process match document with server-side semantics
//!
//! Each client gets its own [`MemoryConnection`]; cleanup registrations run
//! when that connection disconnects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{tree, MatchDocument, StoreError, Subscription};
use crate::util::time::unix_millis;

const WATCH_CAPACITY: usize = 256;

struct Shared {
    root: Mutex<Value>,
    /// Change feeds per room key
    watchers: DashMap<String, broadcast::Sender<Option<Value>>>,
    epoch: Instant,
    base_ms: u64,
    next_connection: AtomicU64,
}

/// The shared document, one per process
#[derive(Clone)]
pub struct MemoryDocument {
    shared: Arc<Shared>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                root: Mutex::new(Value::Object(Map::new())),
                watchers: DashMap::new(),
                epoch: Instant::now(),
                base_ms: unix_millis(),
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    /// Open a client connection
    pub fn connect(&self) -> MemoryConnection {
        let id = self.shared.next_connection.fetch_add(1, Ordering::Relaxed);
        MemoryConnection {
            doc: self.clone(),
            id,
            cleanup: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current value of `path` (test and harness helper)
    pub fn snapshot(&self, path: &str) -> Option<Value> {
        tree::get(&self.shared.root.lock(), path).cloned()
    }

    /// Commit time used for server timestamps
    fn now_ms(&self) -> u64 {
        self.shared.base_ms + self.shared.epoch.elapsed().as_millis() as u64
    }

    /// Run `mutate` on the tree under the lock and notify the touched room
    fn commit<R>(&self, path: &str, mutate: impl FnOnce(&mut Value, u64) -> R) -> R {
        let now = self.now_ms();
        let mut root = self.shared.root.lock();
        let result = mutate(&mut root, now);

        // Notify while still holding the lock so subscribers see commits in order
        if let Some(room) = tree::segments(path).first() {
            if let Some(tx) = self.shared.watchers.get(*room) {
                let _ = tx.send(tree::get(&root, room).cloned());
            }
        }
        result
    }

    fn subscribe_room(&self, room: &str) -> Subscription {
        let (current, rx) = {
            let root = self.shared.root.lock();
            let rx = self
                .shared
                .watchers
                .entry(room.to_string())
                .or_insert_with(|| broadcast::channel(WATCH_CAPACITY).0)
                .subscribe();
            (tree::get(&root, room).cloned(), rx)
        };

        let room = room.to_string();
        let updates = futures::stream::unfold(rx, move |mut rx| {
            let room = room.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(value) => return Some((value, rx)),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(room = %room, lagged = n, "Document subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        futures::stream::once(async move { current })
            .chain(updates)
            .boxed()
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's connection to a [`MemoryDocument`]
#[derive(Clone)]
pub struct MemoryConnection {
    doc: MemoryDocument,
    id: u64,
    cleanup: Arc<Mutex<Vec<String>>>,
}

impl MemoryConnection {
    pub fn document(&self) -> &MemoryDocument {
        &self.doc
    }

    /// Simulate the connection dropping without explicit cleanup
    pub fn drop_connection(&self) {
        let paths: Vec<String> = std::mem::take(&mut *self.cleanup.lock());
        for path in paths {
            debug!(connection = self.id, path = %path, "Running disconnect cleanup");
            self.doc.commit(&path, |root, _| tree::set(root, &path, Value::Null));
        }
    }
}

impl MatchDocument for MemoryConnection {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.doc.snapshot(path))
    }

    async fn subscribe(&self, room: &str) -> Result<Subscription, StoreError> {
        Ok(self.doc.subscribe_room(room))
    }

    async fn write(&self, path: &str, mut value: Value) -> Result<(), StoreError> {
        self.doc.commit(path, |root, now| {
            tree::resolve_server_values(&mut value, now);
            tree::set(root, path, value);
        });
        Ok(())
    }

    async fn merge(&self, path: &str, mut fields: Map<String, Value>) -> Result<(), StoreError> {
        self.doc.commit(path, |root, now| {
            for value in fields.values_mut() {
                tree::resolve_server_values(value, now);
            }
            tree::merge(root, path, fields);
        });
        Ok(())
    }

    async fn register_cleanup_on_disconnect(&self, path: &str) -> Result<(), StoreError> {
        let mut cleanup = self.cleanup.lock();
        if !cleanup.iter().any(|p| p == path) {
            cleanup.push(path.to_string());
        }
        Ok(())
    }

    async fn guarded_write_if_absent(&self, path: &str, mut value: Value) -> Result<bool, StoreError> {
        Ok(self.doc.commit(path, |root, now| {
            if tree::get(root, path).is_some() {
                return false;
            }
            tree::resolve_server_values(&mut value, now);
            tree::set(root, path, value);
            true
        }))
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.drop_connection();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_merge_is_non_destructive() {
        let conn = MemoryDocument::new().connect();
        assert_ok!(conn.write("room/player1", json!({ "name": "Ann", "health": 1800 })).await);
        let fields = json!({ "x": 12 }).as_object().cloned().unwrap();
        assert_ok!(conn.merge("room/player1", fields).await);

        let value = conn.read("room/player1").await.unwrap().unwrap();
        assert_eq!(value, json!({ "name": "Ann", "health": 1800, "x": 12 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_timestamp_resolves_at_commit() {
        let doc = MemoryDocument::new();
        let conn = doc.connect();
        let fields = json!({ "updatedAt": crate::store::server_timestamp() })
            .as_object()
            .cloned()
            .unwrap();
        conn.merge("room/player1", fields.clone()).await.unwrap();
        let first = doc.snapshot("room/player1/updatedAt").unwrap().as_u64().unwrap();

        tokio::time::advance(std::time::Duration::from_millis(500)).await;
        conn.merge("room/player1", fields).await.unwrap();
        let second = doc.snapshot("room/player1/updatedAt").unwrap().as_u64().unwrap();
        assert_eq!(second - first, 500);
    }

    #[tokio::test]
    async fn test_cleanup_runs_on_disconnect_only_for_owner() {
        let doc = MemoryDocument::new();
        let a = doc.connect();
        let b = doc.connect();
        a.write("room/player1", json!({ "name": "a" })).await.unwrap();
        b.write("room/player2", json!({ "name": "b" })).await.unwrap();
        a.register_cleanup_on_disconnect("room/player1").await.unwrap();
        b.register_cleanup_on_disconnect("room/player2").await.unwrap();

        a.drop_connection();
        assert!(doc.snapshot("room/player1").is_none());
        assert!(doc.snapshot("room/player2").is_some());
    }

    #[tokio::test]
    async fn test_subscription_sees_current_then_changes() {
        let doc = MemoryDocument::new();
        let conn = doc.connect();
        conn.write("room/player1", json!({ "name": "a" })).await.unwrap();

        let mut sub = conn.subscribe("room").await.unwrap();
        let first = sub.next().await.unwrap();
        assert_eq!(first, Some(json!({ "player1": { "name": "a" } })));

        conn.write("room", Value::Null).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), None);

        // Other rooms do not notify
        conn.write("other/player1", json!({ "name": "z" })).await.unwrap();
        conn.write("room/player2", json!({ "name": "b" })).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), Some(json!({ "player2": { "name": "b" } })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_guarded_write_race_has_one_winner() {
        for round in 0..50 {
            let doc = MemoryDocument::new();
            let a = doc.connect();
            let b = doc.connect();
            let path = format!("room{round}/winner");

            let pa = path.clone();
            let pb = path.clone();
            let ta = tokio::spawn(async move {
                a.guarded_write_if_absent(&pa, json!({ "name": "a", "reason": "elimination" }))
                    .await
            });
            let tb = tokio::spawn(async move {
                b.guarded_write_if_absent(&pb, json!({ "name": "b", "reason": "afk" }))
                    .await
            });

            let ra = ta.await.unwrap().unwrap();
            let rb = tb.await.unwrap().unwrap();
            assert!(ra ^ rb, "exactly one guarded write must succeed");

            let stored = doc.snapshot(&path).unwrap();
            let expected = if ra { "a" } else { "b" };
            assert_eq!(stored["name"], expected);
        }
    }
}
