//! Request/response correlation over one named bus channel.
//!
//! The bus only multicasts. This layer adds:
//! - Unique message ids per request
//! - Correlating responses with pending requests
//! - Timeouts, after which late responses are dropped
//! - Rebuilding remote errors on the caller side
//!
//! # Message Flow
//!
//! 1. Caller registers a waiter keyed by the outgoing `messageId`
//! 2. The request is posted on the bus
//! 3. The listener task receives a response and removes the waiter
//! 4. The waiter resolves, or the timeout fires and the waiter is dropped

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, future, stream::BoxStream};
use parking_lot::Mutex;
use player_handoff_core::{Bus, BusChannel, BusReceiver};
use serde_json::Value;
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    error::TransportError,
    protocol::{RequestMessage, ResponseMessage, WireMessage},
};

/// Default per-call response timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Buffer for incoming requests awaiting local handlers.
const REQUEST_CAPACITY: usize = 256;

/// Pending request waiters keyed by message id.
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseMessage>>>>;

/// Removes the waiter when a call finishes on any path.
struct PendingGuard {
    id: String,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.lock().remove(&self.id).is_some() {
            tracing::trace!(message_id = %self.id, "Dropped unresolved waiter");
        }
    }
}

struct Inner {
    name: String,
    bus: Arc<dyn BusChannel>,
    pending: PendingMap,
    requests: broadcast::Sender<RequestMessage>,
    listener: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl Inner {
    fn shutdown(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        // Dropping the senders fails every waiter with `Destroyed`.
        self.pending.lock().clear();
        self.bus.close();
        tracing::debug!(channel = %self.name, "Channel destroyed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Typed send / request-response primitive on one named channel.
///
/// Cheap to clone; all clones share one bus handle and one listener.
/// The bus handle is closed by [`MessageChannel::destroy`] or when the
/// last clone is dropped.
#[derive(Clone)]
pub struct MessageChannel {
    inner: Arc<Inner>,
}

impl MessageChannel {
    /// Open `name` on `bus` and start listening.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn open(bus: &dyn Bus, name: &str) -> Self {
        let handle = bus.open(name);
        let receiver = handle.subscribe();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (requests, _) = broadcast::channel(REQUEST_CAPACITY);

        let listener = tokio::spawn(listen(
            name.to_string(),
            receiver,
            Arc::clone(&pending),
            requests.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                bus: handle,
                pending,
                requests,
                listener: Mutex::new(Some(listener)),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Post a message. No response is expected.
    ///
    /// # Errors
    /// Returns error if the message cannot be encoded or posted.
    pub fn send(&self, message: &WireMessage) -> Result<(), TransportError> {
        if self.is_destroyed() {
            return Err(TransportError::Destroyed(self.inner.name.clone()));
        }
        let payload = message.encode().map_err(|e| TransportError::Post {
            channel: self.inner.name.clone(),
            reason: e.to_string(),
        })?;
        self.inner.bus.post(payload).map_err(|e| TransportError::Post {
            channel: self.inner.name.clone(),
            reason: e.to_string(),
        })
    }

    /// Post a request and wait for its correlated response.
    ///
    /// The waiter is registered before the request is posted, so an
    /// immediate response cannot be missed. After `timeout` the waiter is
    /// removed and a late response is ignored.
    ///
    /// # Errors
    /// Returns error on post failure, timeout, destroy, or a remote failure.
    pub async fn send_and_await_response(
        &self,
        request: RequestMessage,
        timeout: Duration,
    ) -> Result<Option<Value>, TransportError> {
        let action = request.action_name.clone();
        let id = request.message_id.clone();
        let (tx, rx) = oneshot::channel();

        self.inner.pending.lock().insert(id.clone(), tx);
        let _guard = PendingGuard {
            id: id.clone(),
            pending: Arc::clone(&self.inner.pending),
        };

        tracing::trace!(channel = %self.inner.name, %action, message_id = %id, "Sending request");
        self.send(&WireMessage::Request(request))?;

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(TransportError::Destroyed(self.inner.name.clone())),
            Err(_) => {
                tracing::debug!(channel = %self.inner.name, %action, message_id = %id, "Request timed out");
                return Err(TransportError::Timeout {
                    action,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        match response.error {
            Some(error) => Err(error.into()),
            None => Ok(response.data),
        }
    }

    /// Answer a request received on this channel.
    ///
    /// # Errors
    /// Returns error if the response cannot be posted.
    pub fn respond(&self, response: ResponseMessage) -> Result<(), TransportError> {
        self.send(&WireMessage::Response(response))
    }

    /// Requests posted by other contexts from now on.
    #[must_use]
    pub fn requests(&self) -> BoxStream<'static, RequestMessage> {
        BroadcastStream::new(self.inner.requests.subscribe())
            .filter_map(|res| future::ready(res.ok()))
            .boxed()
    }

    /// Deregister every listener and close the bus handle.
    ///
    /// Pending calls fail with [`TransportError::Destroyed`]. Idempotent.
    pub fn destroy(&self) {
        self.inner.shutdown();
    }
}

async fn listen(
    name: String,
    mut receiver: BusReceiver,
    pending: PendingMap,
    requests: broadcast::Sender<RequestMessage>,
) {
    while let Some(payload) = receiver.recv().await {
        match WireMessage::decode(&payload) {
            Ok(WireMessage::Request(request)) => {
                let _ = requests.send(request);
            }
            Ok(WireMessage::Response(response)) => {
                let waiter = pending.lock().remove(&response.request_message_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(
                        channel = %name,
                        request_message_id = %response.request_message_id,
                        "Ignoring uncorrelated response"
                    ),
                }
            }
            Err(e) => tracing::warn!(channel = %name, "Dropping malformed message: {e}"),
        }
    }
}
