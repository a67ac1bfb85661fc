//! Named multicast bus shared between execution contexts.
//!
//! A bus channel delivers every posted payload to all *other* open handles
//! of the same name. There is no delivery guarantee and no ordering across
//! names; anything stronger is built on top by the transport layer.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Per-name buffer size. Slow listeners past this lag and lose messages.
const CHANNEL_CAPACITY: usize = 256;

/// A payload tagged with the handle that posted it.
#[derive(Debug, Clone)]
pub struct BusEnvelope {
    /// Handle that posted the payload.
    pub origin: Uuid,
    /// Serialized message.
    pub payload: Bytes,
}

/// Bus error.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel '{0}' is closed")]
    Closed(String),
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// One open handle on a named channel.
pub trait BusChannel: Send + Sync {
    /// Channel name.
    fn name(&self) -> &str;

    /// Post a payload to every other handle with the same name.
    ///
    /// # Errors
    /// Returns error if this handle was closed or the platform rejects the post.
    fn post(&self, payload: Bytes) -> BusResult<()>;

    /// Receive payloads posted by other handles from now on.
    fn subscribe(&self) -> BusReceiver;

    /// Close this handle. Later posts fail and receivers end.
    fn close(&self);
}

/// Factory for named channels.
pub trait Bus: Send + Sync {
    /// Open a new handle on the channel called `name`.
    fn open(&self, name: &str) -> Arc<dyn BusChannel>;
}

/// Receiving side of a bus handle. Skips the handle's own posts.
pub struct BusReceiver {
    name: String,
    origin: Uuid,
    closed: Arc<AtomicBool>,
    rx: broadcast::Receiver<BusEnvelope>,
}

impl BusReceiver {
    /// Wait for the next payload from another handle.
    ///
    /// Returns `None` once the handle is closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            match self.rx.recv().await {
                Ok(envelope) if envelope.origin == self.origin => {}
                Ok(envelope) => {
                    if self.closed.load(Ordering::Acquire) {
                        return None;
                    }
                    return Some(envelope.payload);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.name, skipped, "Bus receiver lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// One named channel and how many handles still have it open.
struct Topic {
    sender: broadcast::Sender<BusEnvelope>,
    handles: usize,
}

type Topics = Arc<RwLock<HashMap<String, Topic>>>;

/// Simple in-memory bus connecting contexts within one process.
///
/// A name is forgotten once its last handle closes.
#[derive(Default)]
pub struct LocalBus {
    topics: Topics,
}

impl LocalBus {
    /// Create a new in-memory bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}

impl Bus for LocalBus {
    fn open(&self, name: &str) -> Arc<dyn BusChannel> {
        let sender = {
            let mut topics = self.topics.write();
            let topic = topics.entry(name.to_string()).or_insert_with(|| Topic {
                sender: broadcast::channel(CHANNEL_CAPACITY).0,
                handles: 0,
            });
            topic.handles += 1;
            topic.sender.clone()
        };
        Arc::new(LocalChannel {
            name: name.to_string(),
            origin: Uuid::new_v4(),
            sender,
            closed: Arc::new(AtomicBool::new(false)),
            topics: Arc::clone(&self.topics),
        })
    }
}

struct LocalChannel {
    name: String,
    origin: Uuid,
    sender: broadcast::Sender<BusEnvelope>,
    closed: Arc<AtomicBool>,
    topics: Topics,
}

impl LocalChannel {
    fn release(&self) {
        let mut topics = self.topics.write();
        if let Some(topic) = topics.get_mut(&self.name) {
            topic.handles = topic.handles.saturating_sub(1);
            if topic.handles == 0 {
                topics.remove(&self.name);
            }
        }
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl BusChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self, payload: Bytes) -> BusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed(self.name.clone()));
        }
        // No listeners is not an error on a multicast bus.
        let _ = self.sender.send(BusEnvelope {
            origin: self.origin,
            payload,
        });
        Ok(())
    }

    fn subscribe(&self) -> BusReceiver {
        BusReceiver {
            name: self.name.clone(),
            origin: self.origin,
            closed: Arc::clone(&self.closed),
            rx: self.sender.subscribe(),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.release();
        }
    }
}
