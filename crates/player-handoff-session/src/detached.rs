//! Detached-window side of a session.
//!
//! The popup answers the handshake for the proxy id it was opened with,
//! serves its local engine on the private channel and relays its events
//! back to the main page.

use std::sync::{Arc, Weak};

use futures::{StreamExt, stream::BoxStream};
use parking_lot::Mutex;
use player_handoff_core::{Bus, HandoffConfig, LatestStream, MediaController};
use player_handoff_remote::{
    ControllerService,
    actions::{
        AttachRequested, Connect, ConnectResponse, Connected, Heartbeat, HeartbeatResponse,
        SessionClose,
    },
    relay_events, serve_controller,
};
use player_handoff_transport::{
    ActionChannel, ActionRequest, ErrorPayload, MessageChannel, TransportError,
};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Lifecycle of the popup's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachedState {
    /// Waiting for `connect`.
    Waiting,
    /// Private channel open, waiting for `connected`.
    Connecting,
    /// Serving the main page.
    Live,
    /// Torn down, by request or locally.
    Closed,
}

struct PrivateSession {
    channel: ActionChannel,
    _service: ControllerService,
    relay: Option<JoinHandle<()>>,
    watcher: JoinHandle<()>,
}

impl Drop for PrivateSession {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        self.watcher.abort();
        self.channel.destroy();
    }
}

struct Inner {
    proxy_id: String,
    bus: Arc<dyn Bus>,
    controller: Arc<dyn MediaController>,
    config: HandoffConfig,
    handshake: ActionChannel,
    state: LatestStream<DetachedState>,
    session: Mutex<Option<PrivateSession>>,
}

impl Inner {
    fn handle_connect(self: &Arc<Self>, request: ActionRequest<Connect>) {
        if request.data.proxy_id != self.proxy_id {
            request.decline();
            return;
        }

        // A repeated connect replaces the previous attempt.
        let previous = self.session.lock().take();
        drop(previous);

        let private_channel_id = format!("player-handoff.session.{}", Uuid::new_v4());
        let channel = ActionChannel::new(
            MessageChannel::open(self.bus.as_ref(), &private_channel_id),
            self.config.response_timeout(),
        );
        let service = serve_controller(&channel, &self.controller);
        let watcher = spawn_close_watcher(Arc::downgrade(self), channel.data_stream::<SessionClose>());
        *self.session.lock() = Some(PrivateSession {
            channel,
            _service: service,
            relay: None,
            watcher,
        });

        self.state.emit(DetachedState::Connecting);
        tracing::debug!(proxy_id = %self.proxy_id, %private_channel_id, "Private channel opened");
        if let Err(e) = request.respond(Ok(ConnectResponse {
            proxy_id: self.proxy_id.clone(),
            private_channel_id,
        })) {
            tracing::warn!(proxy_id = %self.proxy_id, "Failed to answer connect: {e}");
        }
    }

    fn handle_connected(&self, request: ActionRequest<Connected>) {
        if request.data.proxy_id != self.proxy_id {
            request.decline();
            return;
        }

        let accepted = {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(s) if s.channel.name() == request.data.private_channel_id => {
                    if s.relay.is_none() {
                        s.relay = Some(relay_events(s.channel.clone(), &self.controller));
                    }
                    true
                }
                _ => false,
            }
        };

        let result = if accepted {
            self.state.emit(DetachedState::Live);
            tracing::info!(proxy_id = %self.proxy_id, "Detached session live");
            Ok(())
        } else {
            Err(ErrorPayload::new(
                "ProtocolError",
                format!("unknown private channel '{}'", request.data.private_channel_id),
            ))
        };
        if let Err(e) = request.respond(result) {
            tracing::warn!(proxy_id = %self.proxy_id, "Failed to answer connected: {e}");
        }
    }

    fn handle_heartbeat(&self, request: ActionRequest<Heartbeat>) {
        if request.data.proxy_id != self.proxy_id {
            request.decline();
            return;
        }

        let live = self.state.latest() == Some(DetachedState::Live)
            && self
                .session
                .lock()
                .as_ref()
                .is_some_and(|s| s.channel.name() == request.data.private_channel_id);
        let result = if live {
            Ok(HeartbeatResponse {
                proxy_id: self.proxy_id.clone(),
            })
        } else {
            Err(ErrorPayload::new("ProtocolError", "session is not live"))
        };
        if let Err(e) = request.respond(result) {
            tracing::debug!(proxy_id = %self.proxy_id, "Failed to answer heartbeat: {e}");
        }
    }

    fn close_session(&self) {
        let session = self.session.lock().take();
        if session.is_some() {
            tracing::info!(proxy_id = %self.proxy_id, "Detached session closed");
        }
        drop(session);
        self.state.emit(DetachedState::Closed);
    }
}

fn spawn_close_watcher(inner: Weak<Inner>, mut closes: BoxStream<'static, ()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if closes.next().await.is_some() {
            if let Some(inner) = inner.upgrade() {
                inner.close_session();
            }
        }
    })
}

/// Session hosted by the detached window.
pub struct DetachedSession {
    inner: Arc<Inner>,
    task: JoinHandle<()>,
}

impl DetachedSession {
    /// Start answering the handshake for `proxy_id`.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn start(
        bus: Arc<dyn Bus>,
        controller: Arc<dyn MediaController>,
        config: &HandoffConfig,
        proxy_id: impl Into<String>,
    ) -> Self {
        let handshake = ActionChannel::new(
            MessageChannel::open(bus.as_ref(), &config.handshake_channel_id),
            config.response_timeout(),
        );
        let inner = Arc::new(Inner {
            proxy_id: proxy_id.into(),
            bus,
            controller,
            config: config.clone(),
            handshake,
            state: LatestStream::with_value(DetachedState::Waiting),
            session: Mutex::new(None),
        });

        let mut connects = inner.handshake.request_stream::<Connect>();
        let mut connecteds = inner.handshake.request_stream::<Connected>();
        let mut heartbeats = inner.handshake.request_stream::<Heartbeat>();
        let handler = Arc::clone(&inner);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(request) = connects.next() => handler.handle_connect(request),
                    Some(request) = connecteds.next() => handler.handle_connected(request),
                    Some(request) = heartbeats.next() => handler.handle_heartbeat(request),
                    else => break,
                }
            }
        });

        Self { inner, task }
    }

    #[must_use]
    pub fn proxy_id(&self) -> &str {
        &self.inner.proxy_id
    }

    #[must_use]
    pub fn state(&self) -> DetachedState {
        self.inner.state.latest().unwrap_or(DetachedState::Waiting)
    }

    /// State changes, starting with the current one.
    #[must_use]
    pub fn states(&self) -> BoxStream<'static, DetachedState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn private_channel_id(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.channel.name().to_string())
    }

    #[must_use]
    pub fn controller(&self) -> Arc<dyn MediaController> {
        Arc::clone(&self.inner.controller)
    }

    /// Ask the main page to take playback back.
    ///
    /// # Errors
    /// Returns error if no session is live or the notice cannot be posted.
    pub fn request_attach(&self) -> Result<(), TransportError> {
        let channel = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.channel.clone())
            .ok_or_else(|| TransportError::Protocol("no live session".to_string()))?;
        channel.send::<AttachRequested>(&())
    }

    /// Tear everything down without notifying the main page.
    pub fn shutdown(&self) {
        self.task.abort();
        self.inner.close_session();
        self.inner.handshake.destroy();
    }
}

impl Drop for DetachedSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use player_handoff_core::{LoadedVideo, LocalBus, MemoryPlayer};
    use player_handoff_remote::{
        RemoteController,
        actions::{ConnectRequest, HeartbeatRequest},
    };
    use tokio_test::assert_ok;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::handshake::{HandshakeRecord, initiate};

    struct Connection {
        popup: DetachedSession,
        player: Arc<MemoryPlayer>,
        main: ActionChannel,
        record: HandshakeRecord,
    }

    async fn connect(bus: &Arc<dyn Bus>) -> Connection {
        let config = HandoffConfig::with_detach_url("https://player.example/detached");
        let player = Arc::new(MemoryPlayer::new());
        let popup = DetachedSession::start(Arc::clone(bus), player.clone(), &config, "proxy-1");

        let handshake = ActionChannel::new(
            MessageChannel::open(bus.as_ref(), &config.handshake_channel_id),
            config.response_timeout(),
        );
        let record = assert_ok!(initiate(&handshake, "proxy-1", &config, &CancellationToken::new()).await);
        let main = ActionChannel::new(
            MessageChannel::open(bus.as_ref(), &record.private_channel_id),
            config.response_timeout(),
        );
        Connection {
            popup,
            player,
            main,
            record,
        }
    }

    #[tokio::test]
    async fn serves_the_popup_engine_once_live() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let conn = connect(&bus).await;
        let remote = RemoteController::new(conn.main.clone());

        assert_ok!(remote.load_video(LoadedVideo::new("https://cdn.example/a.mp4", 30.0)).await);
        assert_eq!(conn.player.load_count(), 1);
        assert_eq!(conn.popup.state(), DetachedState::Live);
    }

    #[tokio::test]
    async fn close_notice_tears_the_session_down() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let conn = connect(&bus).await;
        let mut states = conn.popup.states();
        assert_eq!(states.next().await, Some(DetachedState::Live));

        assert_ok!(conn.main.send::<SessionClose>(&()));

        let closed = tokio::time::timeout(Duration::from_secs(1), states.next()).await;
        assert_eq!(closed.ok().flatten(), Some(DetachedState::Closed));
        assert!(conn.popup.private_channel_id().is_none());
    }

    #[tokio::test]
    async fn attach_requests_reach_the_main_page() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let conn = connect(&bus).await;
        let mut requests = conn.main.data_stream::<AttachRequested>();

        assert_ok!(conn.popup.request_attach());
        let seen = tokio::time::timeout(Duration::from_secs(1), requests.next()).await;
        assert_eq!(seen.ok().flatten(), Some(()));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_are_answered_only_for_the_live_channel() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let conn = connect(&bus).await;
        let config = HandoffConfig::default();
        let handshake = ActionChannel::new(
            MessageChannel::open(bus.as_ref(), &config.handshake_channel_id),
            Duration::from_secs(1),
        );

        let reply = handshake
            .send_and_await::<Heartbeat>(&HeartbeatRequest {
                proxy_id: conn.record.proxy_id.clone(),
                private_channel_id: conn.record.private_channel_id.clone(),
            })
            .await;
        assert_eq!(assert_ok!(reply).proxy_id, "proxy-1");

        let stale = handshake
            .send_and_await::<Heartbeat>(&HeartbeatRequest {
                proxy_id: conn.record.proxy_id.clone(),
                private_channel_id: "player-handoff.session.stale".to_string(),
            })
            .await;
        assert_eq!(stale.unwrap_err().name(), "ProtocolError");
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_replaces_the_private_channel() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let conn = connect(&bus).await;
        let config = HandoffConfig::default();
        let handshake = ActionChannel::new(
            MessageChannel::open(bus.as_ref(), &config.handshake_channel_id),
            Duration::from_secs(1),
        );

        let reply = assert_ok!(
            handshake
                .send_and_await::<Connect>(&ConnectRequest {
                    proxy_id: "proxy-1".to_string(),
                })
                .await
        );
        assert_ne!(reply.private_channel_id, conn.record.private_channel_id);
        assert_eq!(conn.popup.private_channel_id(), Some(reply.private_channel_id));
        assert_eq!(conn.popup.state(), DetachedState::Connecting);

        let stale = RemoteController::new(conn.main.clone());
        let err = stale.pause().await.unwrap_err();
        assert_eq!(err.name(), "TimeoutError");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_answering() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let conn = connect(&bus).await;
        conn.popup.shutdown();

        let remote = RemoteController::new(conn.main.clone());
        let err = remote.pause().await.unwrap_err();
        assert_eq!(err.name(), "TimeoutError");
        assert_eq!(conn.popup.state(), DetachedState::Closed);
    }
}
