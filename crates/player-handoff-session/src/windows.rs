//! In-process window manager: the "popup" is a [`DetachedSession`] on the
//! same bus.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use player_handoff_core::{
    Bus, HandoffConfig, MediaController, MemoryPlayer, WindowError, WindowManager, WindowRequest,
};

use crate::detached::{DetachedSession, DetachedState};

type PlayerFactory = Box<dyn Fn() -> Arc<dyn MediaController> + Send + Sync>;

pub struct InProcessWindows {
    bus: Arc<dyn Bus>,
    config: HandoffConfig,
    factory: PlayerFactory,
    blocked: AtomicBool,
    opened: AtomicUsize,
    last_request: Mutex<Option<WindowRequest>>,
    session: Mutex<Option<DetachedSession>>,
}

impl InProcessWindows {
    /// Popups get a fresh [`MemoryPlayer`] each.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, config: HandoffConfig) -> Self {
        Self {
            bus,
            config,
            factory: Box::new(|| Arc::new(MemoryPlayer::new())),
            blocked: AtomicBool::new(false),
            opened: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_player_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn MediaController> + Send + Sync + 'static,
    {
        self.factory = Box::new(factory);
        self
    }

    /// Simulate a popup blocker.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    /// Kill the popup without any goodbye.
    pub fn crash(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            tracing::info!(proxy_id = %session.proxy_id(), "Simulating detached window crash");
            session.shutdown();
        }
    }

    /// How many windows were opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_request(&self) -> Option<WindowRequest> {
        self.last_request.lock().clone()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.lock().is_some()
    }

    /// State of the open popup's session.
    #[must_use]
    pub fn session_state(&self) -> Option<DetachedState> {
        self.session.lock().as_ref().map(DetachedSession::state)
    }

    /// Engine of the open popup.
    #[must_use]
    pub fn popup_controller(&self) -> Option<Arc<dyn MediaController>> {
        self.session.lock().as_ref().map(DetachedSession::controller)
    }

    /// Have the open popup ask for an attach.
    ///
    /// # Errors
    /// Returns error if no popup is open or its session is not live.
    pub fn request_attach(&self) -> Result<(), WindowError> {
        self.session
            .lock()
            .as_ref()
            .ok_or_else(|| WindowError::Platform("no detached window".to_string()))?
            .request_attach()
            .map_err(|e| WindowError::Platform(e.to_string()))
    }
}

#[async_trait]
impl WindowManager for InProcessWindows {
    async fn open(&self, request: WindowRequest) -> Result<(), WindowError> {
        if self.blocked.load(Ordering::SeqCst) {
            return Err(WindowError::Blocked);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(url = %request.url, target = %request.target, "Opening detached window");

        let session = DetachedSession::start(
            Arc::clone(&self.bus),
            (self.factory)(),
            &self.config,
            request.proxy_id.clone(),
        );
        *self.last_request.lock() = Some(request);
        let previous = self.session.lock().replace(session);
        drop(previous);
        Ok(())
    }

    async fn close(&self) -> Result<(), WindowError> {
        let session = self.session.lock().take();
        if let Some(session) = session {
            tracing::debug!(proxy_id = %session.proxy_id(), "Closing detached window");
            session.shutdown();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use player_handoff_core::LocalBus;

    use super::*;

    fn windows() -> InProcessWindows {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        InProcessWindows::new(bus, HandoffConfig::with_detach_url("https://player.example/detached"))
    }

    fn request() -> WindowRequest {
        WindowRequest {
            url: "https://player.example/detached?proxyId=proxy-1".to_string(),
            target: "_blank".to_string(),
            features: "popup=yes".to_string(),
            proxy_id: "proxy-1".to_string(),
        }
    }

    #[tokio::test]
    async fn blocked_windows_never_open() {
        let windows = windows();
        windows.set_blocked(true);

        let err = windows.open(request()).await.unwrap_err();
        assert!(matches!(err, WindowError::Blocked));
        assert_eq!(windows.open_count(), 0);
        assert!(!windows.is_open());
    }

    #[tokio::test]
    async fn opened_window_waits_for_its_handshake() {
        let windows = windows();

        windows.open(request()).await.unwrap();
        assert_eq!(windows.open_count(), 1);
        assert_eq!(windows.session_state(), Some(DetachedState::Waiting));
        assert_eq!(windows.last_request().map(|r| r.proxy_id), Some("proxy-1".to_string()));
        // Nothing is live yet.
        assert!(windows.request_attach().is_err());

        windows.close().await.unwrap();
        assert!(!windows.is_open());
        assert!(windows.popup_controller().is_none());
    }
}
