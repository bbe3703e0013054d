//! Realtime Database REST client
//!
//! Point operations map onto GET/PUT/PATCH/DELETE of `<base>/<path>.json`.
//! Subscriptions consume the server-sent event stream and rebuild the room
//! value locally. The REST surface has no server-side disconnect hook, so
//! cleanup registrations are executed by [`MatchDocument::disconnect`].

use std::sync::Arc;

use bytes::BytesMut;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{tree, MatchDocument, StoreError, Subscription};

/// REST client for one database
#[derive(Clone)]
pub struct RtdbDocument {
    client: Client,
    base_url: String,
    auth: Option<String>,
    cleanup: Arc<Mutex<Vec<String>>>,
}

impl RtdbDocument {
    pub fn new(base_url: &str, auth: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            cleanup: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// REST URL of a document path
    fn url(&self, path: &str) -> String {
        let path = tree::segments(path).join("/");
        match &self.auth {
            Some(token) => format!("{}/{}.json?auth={}", self.base_url, path, token),
            None => format!("{}/{}.json", self.base_url, path),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let response = self.client.delete(self.url(path)).send().await?;
        check(response).await.map(|_| ())
    }
}

/// Map non-success statuses to [`StoreError::Api`]
async fn check(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Api {
        status: status.as_u16(),
        body,
    })
}

impl MatchDocument for RtdbDocument {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let response = self.client.get(self.url(path)).send().await?;
        let value: Value = check(response).await?.json().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn subscribe(&self, room: &str) -> Result<Subscription, StoreError> {
        let response = self
            .client
            .get(self.url(room))
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let response = check(response).await?;

        let state = EventStream {
            bytes: response.bytes_stream().boxed(),
            buffer: BytesMut::new(),
            tree: Value::Null,
            room: room.to_string(),
        };
        Ok(futures::stream::unfold(state, EventStream::next_value).boxed())
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        if value.is_null() {
            return self.delete(path).await;
        }
        let response = self.client.put(self.url(path)).json(&value).send().await?;
        check(response).await.map(|_| ())
    }

    async fn merge(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let response = self.client.patch(self.url(path)).json(&fields).send().await?;
        check(response).await.map(|_| ())
    }

    async fn register_cleanup_on_disconnect(&self, path: &str) -> Result<(), StoreError> {
        let mut cleanup = self.cleanup.lock();
        if !cleanup.iter().any(|p| p == path) {
            cleanup.push(path.to_string());
        }
        Ok(())
    }

    async fn guarded_write_if_absent(&self, path: &str, value: Value) -> Result<bool, StoreError> {
        let url = self.url(path);

        let response = self
            .client
            .get(&url)
            .header("X-Firebase-ETag", "true")
            .send()
            .await?;
        let response = check(response).await?;
        let etag = response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Stream("missing ETag header".to_string()))?;
        let current: Value = response.json().await?;
        if !current.is_null() {
            return Ok(false);
        }

        let response = self
            .client
            .put(&url)
            .header("if-match", etag)
            .json(&value)
            .send()
            .await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            debug!(path = %path, "Conditional write lost to a concurrent writer");
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        let paths: Vec<String> = std::mem::take(&mut *self.cleanup.lock());
        for path in paths {
            if let Err(e) = self.delete(&path).await {
                warn!(path = %path, error = %e, "Disconnect cleanup failed");
            }
        }
        Ok(())
    }
}

/// One parsed server-sent event
#[derive(Debug, Clone, PartialEq)]
struct ServerEvent {
    name: String,
    data: String,
}

/// What an event did to the local tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventEffect {
    Changed,
    Ignored,
    Closed,
}

#[derive(Deserialize)]
struct EventPayload {
    path: String,
    data: Value,
}

/// Cut the next complete event block (terminated by a blank line) from `buffer`
fn take_block(buffer: &mut BytesMut) -> Option<String> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let block = buffer.split_to(end + 2);
    Some(String::from_utf8_lossy(&block).into_owned())
}

fn parse_event(block: &str) -> Option<ServerEvent> {
    let mut name = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("event:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.trim_start());
        }
    }
    Some(ServerEvent {
        name: name?,
        data: data.join("\n"),
    })
}

fn apply_event(room: &mut Value, event: &ServerEvent) -> Result<EventEffect, StoreError> {
    match event.name.as_str() {
        "put" => {
            let payload: EventPayload = serde_json::from_str(&event.data)?;
            tree::set(room, &payload.path, payload.data);
            Ok(EventEffect::Changed)
        }
        "patch" => {
            let payload: EventPayload = serde_json::from_str(&event.data)?;
            match payload.data {
                Value::Object(fields) => {
                    tree::merge(room, &payload.path, fields);
                    Ok(EventEffect::Changed)
                }
                _ => Err(StoreError::Stream("patch payload is not an object".to_string())),
            }
        }
        "cancel" | "auth_revoked" => Ok(EventEffect::Closed),
        _ => Ok(EventEffect::Ignored),
    }
}

/// Unfold state turning the raw byte stream into room values
struct EventStream {
    bytes: BoxStream<'static, Result<bytes::Bytes, reqwest::Error>>,
    buffer: BytesMut,
    tree: Value,
    room: String,
}

impl EventStream {
    async fn next_value(mut self) -> Option<(Option<Value>, Self)> {
        loop {
            while let Some(block) = take_block(&mut self.buffer) {
                let Some(event) = parse_event(&block) else {
                    continue;
                };
                match apply_event(&mut self.tree, &event) {
                    Ok(EventEffect::Changed) => {
                        let value = tree::get(&self.tree, "").cloned();
                        return Some((value, self));
                    }
                    Ok(EventEffect::Ignored) => {}
                    Ok(EventEffect::Closed) => {
                        warn!(room = %self.room, event = %event.name, "Subscription closed by server");
                        return None;
                    }
                    Err(e) => {
                        warn!(room = %self.room, error = %e, "Malformed subscription event");
                    }
                }
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!(room = %self.room, error = %e, "Subscription stream failed");
                    return None;
                }
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, data: Value) -> ServerEvent {
        ServerEvent {
            name: name.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_url_with_auth() {
        let doc = RtdbDocument::new("https://db.example.com/", Some("tok".into()));
        assert_eq!(
            doc.url("room/player1"),
            "https://db.example.com/room/player1.json?auth=tok"
        );
        let doc = RtdbDocument::new("https://db.example.com", None);
        assert_eq!(doc.url("/room/"), "https://db.example.com/room.json");
    }

    #[test]
    fn test_take_block_across_chunks() {
        let mut buffer = BytesMut::from(&b"event: put\ndata: {\"path\":\"/\","[..]);
        assert_eq!(take_block(&mut buffer), None);
        buffer.extend_from_slice(b"\"data\":null}\n\nevent: keep-alive\n");
        let block = take_block(&mut buffer).unwrap();
        assert_eq!(
            parse_event(&block),
            Some(ServerEvent {
                name: "put".into(),
                data: "{\"path\":\"/\",\"data\":null}".into()
            })
        );
        assert_eq!(&buffer[..], b"event: keep-alive\n");
    }

    #[test]
    fn test_put_and_patch_rebuild_room() {
        let mut room = Value::Null;
        let effect = apply_event(
            &mut room,
            &event("put", json!({ "path": "/", "data": { "player1": { "name": "a", "x": 1 } } })),
        )
        .unwrap();
        assert_eq!(effect, EventEffect::Changed);

        apply_event(
            &mut room,
            &event("patch", json!({ "path": "/player1", "data": { "x": 9, "y": 380 } })),
        )
        .unwrap();
        apply_event(
            &mut room,
            &event("put", json!({ "path": "/player2/health", "data": 1776 })),
        )
        .unwrap();

        assert_eq!(
            room,
            json!({ "player1": { "name": "a", "x": 9, "y": 380 }, "player2": { "health": 1776 } })
        );

        apply_event(&mut room, &event("put", json!({ "path": "/", "data": null }))).unwrap();
        assert_eq!(tree::get(&room, ""), None);
    }

    #[test]
    fn test_control_events() {
        let mut room = Value::Null;
        let keep_alive = ServerEvent {
            name: "keep-alive".into(),
            data: "null".into(),
        };
        assert_eq!(apply_event(&mut room, &keep_alive).unwrap(), EventEffect::Ignored);
        let revoked = ServerEvent {
            name: "auth_revoked".into(),
            data: "\"expired\"".into(),
        };
        assert_eq!(apply_event(&mut room, &revoked).unwrap(), EventEffect::Closed);
        assert!(apply_event(&mut room, &event("patch", json!({ "path": "/", "data": 3 }))).is_err());
    }
}
