//! Event-keyed bidirectional channel.
//!
//! Messages are `{event, data}` JSON objects. Dispatch is event-name keyed
//! with at most one handler per event; registering a second handler for the
//! same event replaces the first and warns. Handlers run in fresh tasks so a
//! slow handler never stalls the read loop. Outbound messages go through a
//! bounded queue drained by the connection's writer task; `emit` never
//! blocks and reports saturation instead.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Capacity of the per-connection outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// The wire shape of every message in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("outbound queue is full")]
    QueueFull,

    #[error("connection closed")]
    Closed,

    #[error("failed to serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

type EventHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// One channel per WebSocket connection.
pub struct EventChannel {
    handlers: RwLock<HashMap<String, EventHandler>>,
    outbound: mpsc::Sender<WireMessage>,
}

impl EventChannel {
    /// Wrap the sending half of a connection's outbound queue.
    pub fn new(outbound: mpsc::Sender<WireMessage>) -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            outbound,
        })
    }

    /// Register the handler for `event`.
    pub fn on<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |value| Box::pin(handler(value)));
        let previous = self
            .handlers
            .write()
            .unwrap()
            .insert(event.to_string(), handler);
        if previous.is_some() {
            warn!(event, "replaced existing handler for event");
        }
    }

    /// Register a handler that deserializes the payload into `T` first.
    /// Payloads that fail to deserialize are logged and dropped.
    pub fn on_typed<T, F, Fut>(&self, event: &str, handler: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let event_name = event.to_string();
        self.on(event, move |value| {
            let parsed = serde_json::from_value::<T>(value);
            let event_name = event_name.clone();
            let fut = match parsed {
                Ok(typed) => Some(handler(typed)),
                Err(err) => {
                    warn!(event = %event_name, %err, "dropping malformed event payload");
                    None
                }
            };
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
        });
    }

    /// Queue an outbound `{event, data}` message without blocking.
    pub fn emit(&self, event: &str, data: impl Serialize) -> Result<(), ChannelError> {
        let value = serde_json::to_value(data)?;
        let data = match value {
            Value::Null => None,
            other => Some(other),
        };
        let message = WireMessage {
            event: event.to_string(),
            data,
        };
        match self.outbound.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ChannelError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }

    /// Run the handler registered for `event` in a fresh task.
    /// Unknown events are logged and dropped.
    pub fn dispatch(&self, event: &str, data: Value) {
        let handler = self.handlers.read().unwrap().get(event).cloned();
        match handler {
            Some(handler) => {
                tokio::spawn(handler(data));
            }
            None => {
                debug!(event, "no handler registered for event");
            }
        }
    }
}
