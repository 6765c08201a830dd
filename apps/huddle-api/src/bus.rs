//! Asynchronous event bus used by the optimistic `new_message` path.
//!
//! The gateway broadcasts the message first and then publishes it here; a
//! background worker persists it to the record store. Delivery is best effort:
//! a record that still fails after the configured retries is logged and
//! dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::db::store::RecordStore;
use crate::error::ApiError;
use crate::models::message::NewMessage;

/// Events accepted by the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A message that was already broadcast and still needs persisting.
    MessageCreated(NewMessage),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Hand an event to the bus. Returns once the bus has accepted it, not
    /// once it has been processed.
    async fn publish(&self, event: BusEvent) -> Result<(), ApiError>;
}

/// In-process bus: a bounded queue drained by one persistence worker task.
pub struct LocalEventBus {
    sender: mpsc::Sender<BusEvent>,
}

impl LocalEventBus {
    /// Create the bus and spawn its worker on the current runtime.
    pub fn spawn(store: Arc<dyn RecordStore>, capacity: usize, retries: u32) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(store, receiver, retries));
        Self { sender }
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, event: BusEvent) -> Result<(), ApiError> {
        self.sender.send(event).await.map_err(|_| {
            tracing::error!("event bus worker is gone");
            ApiError::unavailable("Event bus unavailable")
        })
    }
}

async fn run_worker(
    store: Arc<dyn RecordStore>,
    mut receiver: mpsc::Receiver<BusEvent>,
    retries: u32,
) {
    while let Some(event) = receiver.recv().await {
        match event {
            BusEvent::MessageCreated(message) => {
                let message_id = message.id;
                let channel_id = message.channel_id.clone();
                let result = with_retries(retries, || store.insert_message(message.clone())).await;
                match result {
                    Ok(_) => {
                        tracing::debug!(message_id, %channel_id, "bus message persisted");
                    }
                    Err(err) => {
                        tracing::error!(message_id, %channel_id, %err, "dropping bus message after retries");
                    }
                }
            }
        }
    }
    tracing::debug!("event bus worker stopped");
}

/// Run `op` up to `attempts` times with a short linear backoff.
///
/// Not-found errors are returned immediately; retrying cannot fix them.
pub async fn with_retries<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if err.is_not_found() || attempt >= attempts => return Err(err),
            Err(err) => {
                tracing::warn!(attempt, %err, "store call failed, retrying");
                tokio::time::sleep(Duration::from_millis(25 * u64::from(attempt))).await;
                attempt += 1;
            }
        }
    }
}
