#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use huddle_api::bus::{EventBus, LocalEventBus};
use huddle_api::config::Config;
use huddle_api::db::store::{MemoryStore, RecordStore};
use huddle_api::error::ApiError;
use huddle_api::models::attachment::{Attachment, AttachmentStatusUpdate, NewAttachment};
use huddle_api::models::message::{Message, NewMessage};
use huddle_api::models::user::User;
use huddle_api::AppState;

/// Build a test AppState around the given record store.
pub fn state_with_store(store: Arc<dyn RecordStore>) -> AppState {
    state_with(Config::default(), store)
}

pub fn state_with(config: Config, store: Arc<dyn RecordStore>) -> AppState {
    let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::spawn(
        store.clone(),
        config.bus_capacity,
        config.persist_retries,
    ));
    AppState::new(config, store, bus)
}

/// Build a test AppState backed by a fresh in-memory store.
pub fn test_state() -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (state_with_store(store.clone()), store)
}

/// Build the full router plus the state behind it.
pub fn test_app() -> (Router, AppState, Arc<MemoryStore>) {
    let (state, store) = test_state();
    let app = huddle_api::routes::router().with_state(state.clone());
    (app, state, store)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server(state: AppState) -> SocketAddr {
    let app = huddle_api::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

pub async fn seed_user(store: &dyn RecordStore, id: &str, username: &str) -> User {
    store
        .save_user(User {
            id: id.to_string(),
            username: username.to_string(),
            display_name: username.to_string(),
            avatar_url: None,
        })
        .await
        .expect("seed user")
}

pub async fn seed_message(
    state: &AppState,
    channel_id: &str,
    sender_id: &str,
    content: &str,
    attachment_id: Option<&str>,
) -> Message {
    state
        .store
        .insert_message(NewMessage {
            id: state.snowflake.generate(),
            channel_id: channel_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            attachment_id: attachment_id.map(str::to_string),
            pinned: false,
            created_at: Utc::now(),
        })
        .await
        .expect("seed message")
}

pub async fn seed_meeting_attachment(state: &AppState, id: &str, meeting_id: &str) -> Attachment {
    state
        .store
        .insert_attachment(NewAttachment {
            id: id.to_string(),
            kind: "meeting".to_string(),
            meeting_id: Some(meeting_id.to_string()),
            title: Some("Standup".to_string()),
            url: None,
            status: "scheduled".to_string(),
            start_time: None,
            created_at: Utc::now(),
        })
        .await
        .expect("seed attachment")
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(time::Instant::now() < deadline, "condition not met in time");
        time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Gateway client
// ---------------------------------------------------------------------------

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A gateway client over a real WebSocket.
///
/// Frames skipped while waiting for something else are kept, so replies and
/// broadcasts can be awaited in any order.
pub struct TestClient {
    pub connection_id: String,
    pub heartbeat_interval: u64,
    ws: WsStream,
    pending: Vec<Value>,
}

impl TestClient {
    /// Connect to the channel-scoped endpoint and consume HELLO.
    pub async fn channel(addr: SocketAddr, channel_id: &str, user_id: &str) -> Self {
        Self::connect(&format!(
            "ws://{addr}/gateway/channel?channelId={channel_id}&userId={user_id}"
        ))
        .await
    }

    /// Connect to the unscoped endpoint and consume HELLO.
    pub async fn unscoped(addr: SocketAddr) -> Self {
        Self::connect(&format!("ws://{addr}/gateway")).await
    }

    async fn connect(url: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("ws connect");
        let mut client = Self {
            connection_id: String::new(),
            heartbeat_interval: 0,
            ws,
            pending: Vec::new(),
        };

        let hello = client.recv_matching(|m| m["t"] == "HELLO").await;
        assert_eq!(hello["op"], 0, "HELLO should be op=0 (DISPATCH)");
        assert_eq!(hello["t"], "HELLO");
        client.connection_id = hello["d"]["connectionId"]
            .as_str()
            .expect("connectionId present")
            .to_string();
        client.heartbeat_interval = hello["d"]["heartbeatInterval"]
            .as_u64()
            .expect("heartbeatInterval present");
        client
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(tungstenite::Message::Text(text.to_string().into()))
            .await
            .expect("ws send");
    }

    pub async fn send_event(&mut self, event: &str, data: Value) {
        let msg = serde_json::json!({ "op": 2, "t": event, "d": data });
        self.send_raw(&msg.to_string()).await;
    }

    pub async fn send_event_with_ack(&mut self, event: &str, data: Value, ack: u64) {
        let msg = serde_json::json!({ "op": 2, "t": event, "d": data, "ack": ack });
        self.send_raw(&msg.to_string()).await;
    }

    /// Next text frame as JSON, straight from the socket.
    async fn recv_frame(&mut self) -> Value {
        loop {
            let msg = time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timeout waiting for message")
                .expect("stream ended")
                .expect("ws read error");
            match msg {
                tungstenite::Message::Text(text) => {
                    return serde_json::from_str(&text).expect("parse message")
                }
                tungstenite::Message::Close(frame) => panic!("socket closed: {frame:?}"),
                _ => continue,
            }
        }
    }

    /// First frame (buffered or new) satisfying `pred`.
    pub async fn recv_matching(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        if let Some(pos) = self.pending.iter().position(&pred) {
            return self.pending.remove(pos);
        }
        loop {
            let msg = self.recv_frame().await;
            if pred(&msg) {
                return msg;
            }
            self.pending.push(msg);
        }
    }

    /// Next dispatch named `event`; returns its data.
    pub async fn recv_event(&mut self, event: &str) -> Value {
        self.recv_matching(|m| m["op"] == 0 && m["t"] == event)
            .await["d"]
            .clone()
    }

    /// The callback reply carrying `ack`; returns its data.
    pub async fn recv_ack(&mut self, ack: u64) -> Value {
        self.recv_matching(|m| m["op"] == 5 && m["ack"] == ack)
            .await["d"]
            .clone()
    }

    /// Assert no dispatch named `event` arrives within `wait`.
    pub async fn expect_no_event(&mut self, event: &str, wait: Duration) {
        let is_event = |m: &Value| m["op"] == 0 && m["t"] == event;
        if let Some(msg) = self.pending.iter().find(|m| is_event(m)) {
            panic!("unexpected {event}: {msg}");
        }
        let deadline = time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match time::timeout(remaining, self.ws.next()).await {
                Err(_) => return,
                Ok(Some(Ok(tungstenite::Message::Text(text)))) => {
                    let msg: Value = serde_json::from_str(&text).expect("parse message");
                    assert!(!is_event(&msg), "unexpected {event}: {msg}");
                    self.pending.push(msg);
                }
                Ok(Some(Ok(_))) => continue,
                Ok(_) => return,
            }
        }
    }

    /// Wait for the server to close the socket and return the close code.
    pub async fn recv_close_code(&mut self) -> Option<u16> {
        loop {
            let msg = time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timeout waiting for close");
            match msg {
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    return frame.map(|f| u16::from(f.code))
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ---------------------------------------------------------------------------
// A record store whose every call fails
// ---------------------------------------------------------------------------

pub struct FailingStore;

fn down() -> ApiError {
    ApiError::unavailable("Database unavailable")
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn find_user(&self, _user_id: &str) -> Result<Option<User>, ApiError> {
        Err(down())
    }

    async fn save_user(&self, _user: User) -> Result<User, ApiError> {
        Err(down())
    }

    async fn find_message(&self, _message_id: i64) -> Result<Option<Message>, ApiError> {
        Err(down())
    }

    async fn insert_message(&self, _message: NewMessage) -> Result<Message, ApiError> {
        Err(down())
    }

    async fn update_message_content(
        &self,
        _message_id: i64,
        _content: &str,
        _edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>, ApiError> {
        Err(down())
    }

    async fn delete_message(&self, _message_id: i64) -> Result<bool, ApiError> {
        Err(down())
    }

    async fn set_pinned(&self, _message_id: i64, _pinned: bool) -> Result<Option<Message>, ApiError> {
        Err(down())
    }

    async fn find_message_by_attachment(
        &self,
        _attachment_id: &str,
    ) -> Result<Option<Message>, ApiError> {
        Err(down())
    }

    async fn find_attachment(&self, _attachment_id: &str) -> Result<Option<Attachment>, ApiError> {
        Err(down())
    }

    async fn insert_attachment(&self, _attachment: NewAttachment) -> Result<Attachment, ApiError> {
        Err(down())
    }

    async fn attachments_for_meeting(&self, _meeting_id: &str) -> Result<Vec<Attachment>, ApiError> {
        Err(down())
    }

    async fn update_attachment_status(
        &self,
        _attachment_id: &str,
        _update: &AttachmentStatusUpdate,
    ) -> Result<Option<Attachment>, ApiError> {
        Err(down())
    }
}

// ---------------------------------------------------------------------------
// A memory store with injected faults
// ---------------------------------------------------------------------------

/// Delegates to a [`MemoryStore`], failing attachment updates on demand and
/// optionally stalling message inserts.
pub struct FaultyStore {
    pub inner: MemoryStore,
    /// attachment id -> failures left; `u32::MAX` never recovers
    attachment_faults: Mutex<HashMap<String, u32>>,
    insert_delay: Duration,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            attachment_faults: Mutex::new(HashMap::new()),
            insert_delay: Duration::ZERO,
        }
    }

    /// Every status update of `attachment_id` fails.
    pub fn break_attachment(self, attachment_id: &str) -> Self {
        self.attachment_faults
            .lock()
            .insert(attachment_id.to_string(), u32::MAX);
        self
    }

    /// The next `times` status updates of `attachment_id` fail.
    pub fn fail_attachment(self, attachment_id: &str, times: u32) -> Self {
        self.attachment_faults
            .lock()
            .insert(attachment_id.to_string(), times);
        self
    }

    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = delay;
        self
    }

    fn take_fault(&self, attachment_id: &str) -> bool {
        let mut faults = self.attachment_faults.lock();
        match faults.get_mut(attachment_id) {
            Some(left) if *left == u32::MAX => true,
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, ApiError> {
        self.inner.find_user(user_id).await
    }

    async fn save_user(&self, user: User) -> Result<User, ApiError> {
        self.inner.save_user(user).await
    }

    async fn find_message(&self, message_id: i64) -> Result<Option<Message>, ApiError> {
        self.inner.find_message(message_id).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, ApiError> {
        if !self.insert_delay.is_zero() {
            time::sleep(self.insert_delay).await;
        }
        self.inner.insert_message(message).await
    }

    async fn update_message_content(
        &self,
        message_id: i64,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>, ApiError> {
        self.inner
            .update_message_content(message_id, content, edited_at)
            .await
    }

    async fn delete_message(&self, message_id: i64) -> Result<bool, ApiError> {
        self.inner.delete_message(message_id).await
    }

    async fn set_pinned(&self, message_id: i64, pinned: bool) -> Result<Option<Message>, ApiError> {
        self.inner.set_pinned(message_id, pinned).await
    }

    async fn find_message_by_attachment(
        &self,
        attachment_id: &str,
    ) -> Result<Option<Message>, ApiError> {
        self.inner.find_message_by_attachment(attachment_id).await
    }

    async fn find_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>, ApiError> {
        self.inner.find_attachment(attachment_id).await
    }

    async fn insert_attachment(&self, attachment: NewAttachment) -> Result<Attachment, ApiError> {
        self.inner.insert_attachment(attachment).await
    }

    async fn attachments_for_meeting(&self, meeting_id: &str) -> Result<Vec<Attachment>, ApiError> {
        self.inner.attachments_for_meeting(meeting_id).await
    }

    async fn update_attachment_status(
        &self,
        attachment_id: &str,
        update: &AttachmentStatusUpdate,
    ) -> Result<Option<Attachment>, ApiError> {
        if self.take_fault(attachment_id) {
            return Err(down());
        }
        self.inner.update_attachment_status(attachment_id, update).await
    }
}
