//! Playback-location state machine.
//!
//! `attached -> detaching -> detached -> attaching -> attached`. The manager
//! owns the controller switch, at most one live session, and the breaker
//! that abandons superseded attempts.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use futures::{StreamExt, stream::BoxStream};
use parking_lot::Mutex;
use player_handoff_core::{
    Bus, ConfigError, HandoffConfig, LatestStream, MediaController, PlaybackLocation, WindowManager,
    WindowRequest,
};
use player_handoff_remote::{
    RemoteController,
    actions::{AttachRequested, SessionClose},
};
use player_handoff_transport::{ActionChannel, MessageChannel};
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    capture::{CapturedState, capture, restore},
    error::{HandoffError, Precondition},
    handshake::{self, HandshakeRecord},
    heartbeat::{HeartbeatFailure, HeartbeatMonitor, HeartbeatPolicy},
    switch::ControllerSwitch,
};

/// Clears an in-progress flag on every exit path.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The live detached session.
struct ActiveSession {
    record: HandshakeRecord,
    handshake: ActionChannel,
    remote: Arc<RemoteController>,
    _monitor: HeartbeatMonitor,
    watcher: JoinHandle<()>,
    /// Snapshot taken when the detach began.
    fallback: CapturedState,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.watcher.abort();
        self.remote.channel().destroy();
        self.handshake.destroy();
    }
}

/// What a detach attempt got to before failing.
#[derive(Default)]
struct DetachProgress {
    handshake: Option<ActionChannel>,
    window_opened: bool,
    snapshot: Option<CapturedState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachReason {
    Explicit,
    Forced,
}

/// Moves playback between the local engine and a detached window.
pub struct HandoffManager {
    config: HandoffConfig,
    bus: Arc<dyn Bus>,
    windows: Arc<dyn WindowManager>,
    local: Arc<dyn MediaController>,
    switch: Arc<ControllerSwitch>,
    location: LatestStream<PlaybackLocation>,
    detach_in_progress: AtomicBool,
    attach_in_progress: AtomicBool,
    breaker: Mutex<CancellationToken>,
    session: Mutex<Option<ActiveSession>>,
    this: Weak<Self>,
}

impl HandoffManager {
    /// Create a manager driving `local` while attached.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// Returns error if `config` fails validation.
    pub fn new(
        config: HandoffConfig,
        bus: Arc<dyn Bus>,
        windows: Arc<dyn WindowManager>,
        local: Arc<dyn MediaController>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new_cyclic(|this| Self {
            config,
            bus,
            windows,
            switch: Arc::new(ControllerSwitch::new(Arc::clone(&local))),
            local,
            location: LatestStream::with_value(PlaybackLocation::Attached),
            detach_in_progress: AtomicBool::new(false),
            attach_in_progress: AtomicBool::new(false),
            breaker: Mutex::new(CancellationToken::new()),
            session: Mutex::new(None),
            this: this.clone(),
        }))
    }

    /// The stable controller callers should hold.
    #[must_use]
    pub fn controller(&self) -> Arc<ControllerSwitch> {
        Arc::clone(&self.switch)
    }

    #[must_use]
    pub const fn config(&self) -> &HandoffConfig {
        &self.config
    }

    #[must_use]
    pub fn location(&self) -> PlaybackLocation {
        self.location.latest().unwrap_or_default()
    }

    /// Location changes, starting with the current one.
    #[must_use]
    pub fn locations(&self) -> BoxStream<'static, PlaybackLocation> {
        self.location.subscribe()
    }

    #[must_use]
    pub fn is_detach_in_progress(&self) -> bool {
        self.detach_in_progress.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_attach_in_progress(&self) -> bool {
        self.attach_in_progress.load(Ordering::Acquire)
    }

    /// Proxy id of the live session.
    #[must_use]
    pub fn session_proxy_id(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.record.proxy_id.clone())
    }

    /// Move playback into a detached window.
    ///
    /// Waits out seeking/buffering first. Any failure after the checks rolls
    /// back to `attached` on the local engine. The transition runs on its own
    /// task: dropping the returned future stops waiting for it, not the
    /// transition or its rollback.
    ///
    /// # Errors
    /// Returns `Precondition` listing every unmet precondition, or the failure
    /// that caused the rollback.
    pub async fn detach(&self) -> Result<(), HandoffError> {
        let manager = self.handle()?;
        join_transition(tokio::spawn(async move { manager.run_detach_transition().await })).await
    }

    /// Bring playback back from the detached window.
    ///
    /// Always converges to `attached`; a misbehaving window only degrades
    /// what gets restored. Like [`detach`](Self::detach), the transition
    /// finishes even if the caller stops waiting.
    ///
    /// # Errors
    /// Returns `Precondition` if playback is not detached or a transition is
    /// already running.
    pub async fn attach(&self) -> Result<(), HandoffError> {
        let manager = self.handle()?;
        join_transition(tokio::spawn(async move { manager.run_attach_transition().await })).await
    }

    async fn run_detach_transition(&self) -> Result<(), HandoffError> {
        let mut unmet = self.detach_preconditions();
        match self.local.video().await {
            Ok(Some(_)) => {}
            Ok(None) => unmet.push(Precondition::NoVideoLoaded),
            Err(e) => {
                tracing::warn!("Failed to read loaded video: {e}");
                unmet.push(Precondition::NoVideoLoaded);
            }
        }
        if !unmet.is_empty() {
            return Err(HandoffError::Precondition(unmet));
        }

        let Some(_detaching) = FlagGuard::claim(&self.detach_in_progress) else {
            return Err(HandoffError::Precondition(vec![Precondition::DetachInProgress]));
        };
        // Re-check what may have changed while the video was read.
        let unmet = self.detach_preconditions_claimed();
        if !unmet.is_empty() {
            return Err(HandoffError::Precondition(unmet));
        }

        self.wait_for_stable_playback().await?;

        let breaker = self.renew_breaker();
        self.set_location(PlaybackLocation::Detaching);
        let proxy_id = Uuid::new_v4().to_string();
        let mut progress = DetachProgress::default();

        let result = tokio::select! {
            biased;
            () = breaker.cancelled() => Err(HandoffError::Cancelled),
            result = self.run_detach(&proxy_id, &breaker, &mut progress) => result,
        };

        match result {
            Ok(()) => {
                tracing::info!(%proxy_id, "Playback detached");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%proxy_id, "Detach failed, rolling back: {e}");
                self.roll_back_detach(progress).await;
                Err(e)
            }
        }
    }

    async fn run_attach_transition(&self) -> Result<(), HandoffError> {
        let mut unmet = Vec::new();
        let location = self.location();
        if location != PlaybackLocation::Detached {
            unmet.push(Precondition::NotDetached(location));
        }
        if self.is_detach_in_progress() {
            unmet.push(Precondition::DetachInProgress);
        }
        if self.is_attach_in_progress() {
            unmet.push(Precondition::AttachInProgress);
        }
        if !unmet.is_empty() {
            return Err(HandoffError::Precondition(unmet));
        }

        let Some(_attaching) = FlagGuard::claim(&self.attach_in_progress) else {
            return Err(HandoffError::Precondition(vec![Precondition::AttachInProgress]));
        };
        self.run_attach(AttachReason::Explicit).await;
        Ok(())
    }

    /// Tear down any session and return to the local engine.
    pub async fn shutdown(&self) {
        self.breaker.lock().cancel();
        let session = self.session.lock().take();
        if let Some(session) = session {
            if let Err(e) = session.remote.channel().send::<SessionClose>(&()) {
                tracing::debug!("Failed to notify detached window: {e}");
            }
            drop(session);
            if let Err(e) = self.windows.close().await {
                tracing::debug!("Failed to close detached window: {e}");
            }
            self.switch.set_delegate(Arc::clone(&self.local));
        }
        self.set_location(PlaybackLocation::Attached);
    }

    fn detach_preconditions(&self) -> Vec<Precondition> {
        let mut unmet = Vec::new();
        let location = self.location();
        if location != PlaybackLocation::Attached {
            unmet.push(Precondition::NotAttached(location));
        }
        if self.is_detach_in_progress() {
            unmet.push(Precondition::DetachInProgress);
        }
        if self.is_attach_in_progress() {
            unmet.push(Precondition::AttachInProgress);
        }
        if !self.config.detach_enabled() {
            unmet.push(Precondition::DetachNotConfigured);
        }
        unmet
    }

    fn detach_preconditions_claimed(&self) -> Vec<Precondition> {
        let mut unmet = Vec::new();
        let location = self.location();
        if location != PlaybackLocation::Attached {
            unmet.push(Precondition::NotAttached(location));
        }
        if self.is_attach_in_progress() {
            unmet.push(Precondition::AttachInProgress);
        }
        unmet
    }

    async fn wait_for_stable_playback(&self) -> Result<(), HandoffError> {
        let poll = self.config.precondition_poll_interval();
        let wait = async {
            loop {
                match self.local.playback_state().await {
                    Ok(state) if !state.is_transient() => return Ok(()),
                    Ok(_) => tokio::time::sleep(poll).await,
                    Err(e) => return Err(HandoffError::Capture(e)),
                }
            }
        };

        match self.config.precondition_wait_timeout() {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                HandoffError::Precondition(vec![Precondition::TransientStateTimeout])
            })?,
            None => wait.await,
        }
    }

    async fn run_detach(
        &self,
        proxy_id: &str,
        breaker: &CancellationToken,
        progress: &mut DetachProgress,
    ) -> Result<(), HandoffError> {
        let url = self
            .config
            .detached_window_url(proxy_id)
            .ok_or_else(|| HandoffError::Precondition(vec![Precondition::DetachNotConfigured]))?;

        let channel = ActionChannel::new(
            MessageChannel::open(self.bus.as_ref(), &self.config.handshake_channel_id),
            self.config.response_timeout(),
        );
        progress.handshake = Some(channel.clone());

        self.windows
            .open(WindowRequest {
                url,
                target: self.config.window_target.clone(),
                features: self.config.window_features.clone(),
                proxy_id: proxy_id.to_string(),
            })
            .await?;
        progress.window_opened = true;

        let record = handshake::initiate(&channel, proxy_id, &self.config, breaker).await?;
        let snapshot = capture(self.local.as_ref())
            .await
            .map_err(HandoffError::Capture)?;
        progress.snapshot = Some(snapshot.clone());

        let private = ActionChannel::new(
            MessageChannel::open(self.bus.as_ref(), &record.private_channel_id),
            self.config.response_timeout(),
        );
        let attach_requests = private.data_stream::<AttachRequested>();
        let remote = Arc::new(RemoteController::new(private));
        let (monitor, failure) = HeartbeatMonitor::spawn(
            channel.clone(),
            &record,
            HeartbeatPolicy::from_config(&self.config),
        );
        let watcher = self.spawn_session_watcher(failure, attach_requests);

        let previous = self.session.lock().replace(ActiveSession {
            record,
            handshake: channel,
            remote: Arc::clone(&remote),
            _monitor: monitor,
            watcher,
            fallback: snapshot.clone(),
        });
        drop(previous);

        self.set_location(PlaybackLocation::Detached);
        self.switch.set_delegate(Arc::clone(&remote) as Arc<dyn MediaController>);
        if let Err(e) = self.local.pause().await {
            tracing::debug!("Failed to pause local engine: {e}");
        }

        let report = restore(remote.as_ref(), &snapshot).await?;
        if !report.is_complete() {
            tracing::warn!(failed = ?report.failed, "Detached window restored partially");
        }
        Ok(())
    }

    async fn roll_back_detach(&self, progress: DetachProgress) {
        let session = self.session.lock().take();
        drop(session);
        if let Some(channel) = progress.handshake {
            channel.destroy();
        }
        self.switch.set_delegate(Arc::clone(&self.local));

        if progress.window_opened {
            if let Err(e) = self.windows.close().await {
                tracing::debug!("Failed to close detached window: {e}");
            }
        }
        if let Some(snapshot) = progress.snapshot {
            match restore(self.local.as_ref(), &snapshot).await {
                Ok(report) if !report.is_complete() => {
                    tracing::warn!(failed = ?report.failed, "Local state restored partially");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to restore local state: {e}"),
            }
        }
        self.set_location(PlaybackLocation::Attached);
    }

    /// Recovery after the detached window went silent.
    async fn force_attach(&self) {
        if self.is_detach_in_progress() {
            tracing::warn!("Detached window lost during detach, cancelling it");
            self.breaker.lock().cancel();
            return;
        }
        let Some(_attaching) = FlagGuard::claim(&self.attach_in_progress) else {
            tracing::debug!("Attach already running");
            return;
        };
        if self.session.lock().is_none() {
            return;
        }
        self.run_attach(AttachReason::Forced).await;
    }

    async fn run_attach(&self, reason: AttachReason) {
        self.renew_breaker();
        self.set_location(PlaybackLocation::Attaching);

        let session = self.session.lock().take();
        if let Some(session) = session {
            // A dead window gets one short chance before the detach-time
            // snapshot is used instead.
            let limit = match reason {
                AttachReason::Explicit => self.config.response_timeout(),
                AttachReason::Forced => self.config.heartbeat_interval(),
            };
            let snapshot =
                match tokio::time::timeout(limit, capture(session.remote.as_ref())).await {
                    Ok(Ok(snapshot)) => snapshot,
                    Ok(Err(e)) => {
                        tracing::warn!("Failed to capture detached state, using fallback: {e}");
                        session.fallback.clone()
                    }
                    Err(_) => {
                        tracing::warn!("Detached state capture timed out, using fallback");
                        session.fallback.clone()
                    }
                };

            if reason == AttachReason::Explicit {
                if let Err(e) = session.remote.channel().send::<SessionClose>(&()) {
                    tracing::debug!("Failed to notify detached window: {e}");
                }
            }
            drop(session);
            if let Err(e) = self.windows.close().await {
                tracing::debug!("Failed to close detached window: {e}");
            }

            self.switch.set_delegate(Arc::clone(&self.local));
            match restore(self.local.as_ref(), &snapshot).await {
                Ok(report) if !report.is_complete() => {
                    tracing::warn!(failed = ?report.failed, "Local state restored partially");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to restore local state: {e}"),
            }
        } else {
            self.switch.set_delegate(Arc::clone(&self.local));
        }

        self.set_location(PlaybackLocation::Attached);
        tracing::info!(?reason, "Playback attached");
    }

    fn spawn_session_watcher(
        &self,
        failure: oneshot::Receiver<HeartbeatFailure>,
        mut attach_requests: BoxStream<'static, ()>,
    ) -> JoinHandle<()> {
        let this = self.this.clone();
        tokio::spawn(async move {
            let forced = tokio::select! {
                Ok(failure) = failure => {
                    tracing::warn!("{failure}");
                    true
                }
                Some(()) = attach_requests.next() => {
                    tracing::info!("Detached window requested attach");
                    false
                }
                else => return,
            };
            let Some(manager) = this.upgrade() else {
                return;
            };
            // The attach tears this watcher down, so it runs on its own task.
            tokio::spawn(async move {
                if forced {
                    manager.force_attach().await;
                } else if let Err(e) = manager.attach().await {
                    tracing::debug!("Requested attach rejected: {e}");
                }
            });
        })
    }

    fn handle(&self) -> Result<Arc<Self>, HandoffError> {
        self.this.upgrade().ok_or(HandoffError::Cancelled)
    }

    fn renew_breaker(&self) -> CancellationToken {
        let mut breaker = self.breaker.lock();
        breaker.cancel();
        *breaker = CancellationToken::new();
        breaker.clone()
    }

    fn set_location(&self, location: PlaybackLocation) {
        let previous = self.location();
        if previous != location {
            tracing::info!(from = %previous, to = %location, "Playback location changed");
        }
        self.location.emit(location);
    }
}

async fn join_transition(
    task: JoinHandle<Result<(), HandoffError>>,
) -> Result<(), HandoffError> {
    task.await.unwrap_or_else(|e| {
        tracing::error!("Handoff transition aborted: {e}");
        Err(HandoffError::Cancelled)
    })
}

impl Drop for HandoffManager {
    fn drop(&mut self) {
        self.breaker.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use player_handoff_core::{
        LoadedVideo, LocalBus, MemoryPlayer, PlayerEvent, WindowError,
        state::{SafeZone, SubtitleTrack},
    };
    use tokio_test::assert_ok;

    use super::*;
    use crate::{detached::DetachedState, windows::InProcessWindows};

    const VTT: &str = "WEBVTT\n\n00:01.000 --> 00:03.000\nBonjour";

    struct Fixture {
        manager: Arc<HandoffManager>,
        local: Arc<MemoryPlayer>,
        windows: Arc<InProcessWindows>,
    }

    fn player() -> MemoryPlayer {
        MemoryPlayer::new().with_embedded_subtitle("Français", "fr", VTT)
    }

    fn fixture_with(config: HandoffConfig) -> Fixture {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let local = Arc::new(player());
        let windows = Arc::new(
            InProcessWindows::new(Arc::clone(&bus), config.clone())
                .with_player_factory(|| Arc::new(player())),
        );
        let manager = HandoffManager::new(config, bus, windows.clone(), local.clone()).unwrap();
        Fixture {
            manager,
            local,
            windows,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(HandoffConfig::with_detach_url("https://player.example/detached"))
    }

    fn video() -> LoadedVideo {
        LoadedVideo::new("https://cdn.example/feature.mp4", 24.0).with_duration(600.0)
    }

    async fn load_scenario(controller: &dyn MediaController) {
        assert_ok!(controller.load_video(video()).await);
        assert_ok!(controller.seek_to_time(42.5).await);
        assert_ok!(controller.set_volume(0.7).await);
        assert_ok!(controller.set_muted(false).await);
        assert_ok!(controller.set_playback_rate(1.0).await);
        assert_ok!(controller.add_safe_zone(SafeZone::aspect("16/9", 30.0)).await);
    }

    async fn assert_scenario(controller: &dyn MediaController) {
        let state = assert_ok!(controller.playback_state().await);
        assert_eq!(state.current_time, 42.5);
        assert_eq!(state.volume, 0.7);
        assert!(!state.muted);
        assert_eq!(state.playback_rate, 1.0);
        let zones = assert_ok!(controller.safe_zones().await);
        assert_eq!(zones.len(), 1);
        assert!(zones[0].same_geometry(&SafeZone::aspect("16/9", 30.0)));
    }

    #[tokio::test]
    async fn detach_without_video_is_rejected_untouched() {
        let fx = fixture();

        let err = fx.manager.detach().await.unwrap_err();
        assert_eq!(err.preconditions(), &[Precondition::NoVideoLoaded]);
        assert_eq!(fx.windows.open_count(), 0);
        assert_eq!(fx.manager.location(), PlaybackLocation::Attached);
    }

    #[tokio::test]
    async fn detach_unconfigured_lists_every_failure() {
        let fx = fixture_with(HandoffConfig::default());

        let err = fx.manager.detach().await.unwrap_err();
        assert_eq!(
            err.preconditions(),
            &[Precondition::DetachNotConfigured, Precondition::NoVideoLoaded]
        );
        assert_eq!(fx.windows.open_count(), 0);
        assert_eq!(fx.manager.location(), PlaybackLocation::Attached);
    }

    #[tokio::test]
    async fn attach_requires_a_detached_session() {
        let fx = fixture();

        let err = fx.manager.attach().await.unwrap_err();
        assert_eq!(
            err.preconditions(),
            &[Precondition::NotDetached(PlaybackLocation::Attached)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_detach_is_rejected() {
        let fx = fixture();
        load_scenario(fx.manager.controller().as_ref()).await;
        fx.local.set_transient(true, false);

        let first = tokio::spawn({
            let manager = Arc::clone(&fx.manager);
            async move { manager.detach().await }
        });
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(fx.manager.is_detach_in_progress());

        let err = fx.manager.detach().await.unwrap_err();
        assert!(err.preconditions().contains(&Precondition::DetachInProgress));
        assert_eq!(fx.windows.open_count(), 0);

        fx.local.set_transient(false, false);
        assert_ok!(assert_ok!(first.await));
        assert_eq!(fx.manager.location(), PlaybackLocation::Detached);
        assert!(!fx.manager.is_detach_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn detach_is_rejected_while_an_attach_runs() {
        let fx = fixture();
        load_scenario(fx.manager.controller().as_ref()).await;
        assert_ok!(fx.manager.detach().await);
        assert_eq!(fx.windows.open_count(), 1);
        // A dead window keeps the attach waiting on its capture.
        fx.windows.crash();

        let attach = tokio::spawn({
            let manager = Arc::clone(&fx.manager);
            async move { manager.attach().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fx.manager.is_attach_in_progress());

        let err = fx.manager.detach().await.unwrap_err();
        assert_eq!(
            err.preconditions(),
            &[
                Precondition::NotAttached(PlaybackLocation::Attaching),
                Precondition::AttachInProgress,
            ]
        );
        assert_eq!(fx.windows.open_count(), 1);

        assert_ok!(assert_ok!(attach.await));
        assert_eq!(fx.manager.location(), PlaybackLocation::Attached);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_detach_still_rolls_back() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let config = HandoffConfig::with_detach_url("https://player.example/detached");
        let local = Arc::new(player());
        let manager =
            HandoffManager::new(config, bus, Arc::new(NeverOpens), local.clone()).unwrap();
        load_scenario(manager.controller().as_ref()).await;

        let waited = tokio::time::timeout(Duration::from_millis(100), manager.detach()).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.location(), PlaybackLocation::Attached);
        assert!(!manager.is_detach_in_progress());
        let err = manager.attach().await.unwrap_err();
        assert_eq!(
            err.preconditions(),
            &[Precondition::NotDetached(PlaybackLocation::Attached)]
        );
        assert_scenario(local.as_ref()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_attach_still_converges() {
        let fx = fixture();
        load_scenario(fx.manager.controller().as_ref()).await;
        assert_ok!(fx.manager.detach().await);
        fx.windows.crash();

        let waited = tokio::time::timeout(Duration::from_millis(100), fx.manager.attach()).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fx.manager.location(), PlaybackLocation::Attached);
        assert!(!fx.manager.is_attach_in_progress());
        assert!(fx.manager.session_proxy_id().is_none());
        assert_scenario(fx.local.as_ref()).await;
    }

    #[tokio::test]
    async fn zero_heartbeat_interval_is_rejected() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let config = HandoffConfig {
            heartbeat_interval_ms: 0,
            ..HandoffConfig::with_detach_url("https://player.example/detached")
        };
        let local: Arc<dyn MediaController> = Arc::new(player());

        let err = HandoffManager::new(config, bus, Arc::new(NeverOpens), local).err();
        assert!(matches!(err, Some(ConfigError::Zero("heartbeatIntervalMs"))));
    }

    #[tokio::test(start_paused = true)]
    async fn endless_buffering_times_out() {
        let fx = fixture();
        load_scenario(fx.manager.controller().as_ref()).await;
        fx.local.set_transient(false, true);

        let err = fx.manager.detach().await.unwrap_err();
        assert_eq!(err.preconditions(), &[Precondition::TransientStateTimeout]);
        assert!(!fx.manager.is_detach_in_progress());
        assert_eq!(fx.manager.location(), PlaybackLocation::Attached);
    }

    #[tokio::test]
    async fn detach_then_attach_preserves_the_session() {
        let fx = fixture();
        let controller = fx.manager.controller();
        load_scenario(controller.as_ref()).await;

        assert_ok!(fx.manager.detach().await);
        assert_eq!(fx.manager.location(), PlaybackLocation::Detached);
        assert_eq!(fx.windows.session_state(), Some(DetachedState::Live));
        assert!(!assert_ok!(fx.local.playback_state().await).playing);

        let popup = fx.windows.popup_controller();
        assert!(popup.is_some());
        if let Some(popup) = popup {
            assert_scenario(popup.as_ref()).await;
        }
        assert_scenario(controller.as_ref()).await;

        assert_ok!(fx.manager.attach().await);
        assert_eq!(fx.manager.location(), PlaybackLocation::Attached);
        assert!(!fx.windows.is_open());
        assert_scenario(controller.as_ref()).await;
        assert_scenario(fx.local.as_ref()).await;
        // The local engine kept the same source, so nothing was refetched.
        assert_eq!(fx.local.load_count(), 1);
    }

    #[tokio::test]
    async fn changes_made_while_detached_come_back() {
        let fx = fixture();
        let controller = fx.manager.controller();
        load_scenario(controller.as_ref()).await;
        assert_ok!(fx.manager.detach().await);

        assert_ok!(controller.seek_to_time(120.0).await);
        assert_ok!(controller.set_volume(0.25).await);

        assert_ok!(fx.manager.attach().await);
        let state = assert_ok!(fx.local.playback_state().await);
        assert_eq!(state.current_time, 120.0);
        assert_eq!(state.volume, 0.25);
    }

    #[tokio::test]
    async fn embedded_subtitles_survive_the_round_trip() {
        let fx = fixture();
        let controller = fx.manager.controller();
        assert_ok!(controller.load_video(video()).await);
        let local_track = assert_ok!(controller.subtitles().await).tracks[0].clone();
        assert_ok!(controller.show_subtitle_track(local_track.id.clone()).await);

        assert_ok!(fx.manager.detach().await);
        let detached = assert_ok!(controller.subtitles().await);
        let active: Option<SubtitleTrack> = detached.active_track().cloned();
        assert!(active.is_some_and(|t| t.id != local_track.id && t.matches(&local_track)));
        assert!(!detached.hidden);

        let popup_track_id = detached.active_track_id.clone().unwrap_or_default();
        assert_ok!(controller.hide_subtitle_track(popup_track_id).await);

        assert_ok!(fx.manager.attach().await);
        let attached = assert_ok!(fx.local.subtitles().await);
        assert_eq!(attached.active_track_id.as_deref(), Some(local_track.id.as_str()));
        assert!(attached.hidden);
    }

    #[tokio::test]
    async fn blocked_window_rolls_back() {
        let fx = fixture();
        load_scenario(fx.manager.controller().as_ref()).await;
        fx.windows.set_blocked(true);

        let err = fx.manager.detach().await.unwrap_err();
        assert_eq!(err.name(), "WindowError");
        assert_eq!(fx.manager.location(), PlaybackLocation::Attached);
        assert!(!fx.manager.is_detach_in_progress());

        fx.windows.set_blocked(false);
        assert_ok!(fx.manager.detach().await);
        assert_eq!(fx.manager.location(), PlaybackLocation::Detached);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_handshake_rolls_back() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let config = HandoffConfig::with_detach_url("https://player.example/detached");
        // A window for some other handshake: it declines our proxy id.
        let _stranger = crate::detached::DetachedSession::start(
            Arc::clone(&bus),
            Arc::new(MemoryPlayer::new()),
            &config,
            "someone-else",
        );
        let local = Arc::new(player());
        let manager =
            HandoffManager::new(config, bus, Arc::new(NeverOpens), local.clone()).unwrap();
        load_scenario(manager.controller().as_ref()).await;

        let err = manager.detach().await.unwrap_err();
        assert_eq!(err.name(), "HandshakeError");
        assert_eq!(manager.location(), PlaybackLocation::Attached);
        assert!(!manager.is_detach_in_progress());
        assert_scenario(local.as_ref()).await;
    }

    /// Opens nothing; the popup never loads.
    struct NeverOpens;

    #[async_trait::async_trait]
    impl WindowManager for NeverOpens {
        async fn open(&self, _request: WindowRequest) -> Result<(), WindowError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), WindowError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_failure_forces_an_attach() {
        let fx = fixture();
        let controller = fx.manager.controller();
        load_scenario(controller.as_ref()).await;
        assert_ok!(fx.manager.detach().await);
        let mut locations = fx.manager.locations();
        assert_eq!(locations.next().await, Some(PlaybackLocation::Detached));

        fx.windows.crash();

        let attaching = tokio::time::timeout(Duration::from_secs(30), locations.next()).await;
        assert_eq!(attaching.ok().flatten(), Some(PlaybackLocation::Attaching));
        let attached = tokio::time::timeout(Duration::from_secs(30), locations.next()).await;
        assert_eq!(attached.ok().flatten(), Some(PlaybackLocation::Attached));

        assert!(fx.manager.session_proxy_id().is_none());
        assert!(!fx.manager.is_attach_in_progress());
        // The window is gone, so the detach-time snapshot is restored.
        assert_scenario(fx.local.as_ref()).await;
        assert_scenario(controller.as_ref()).await;
    }

    #[tokio::test]
    async fn window_can_ask_for_an_attach() {
        let fx = fixture();
        load_scenario(fx.manager.controller().as_ref()).await;
        assert_ok!(fx.manager.detach().await);
        let mut locations = fx.manager.locations();
        assert_eq!(locations.next().await, Some(PlaybackLocation::Detached));

        assert_ok!(fx.windows.request_attach());

        let mut seen = Vec::new();
        while let Ok(Some(location)) =
            tokio::time::timeout(Duration::from_secs(1), locations.next()).await
        {
            seen.push(location);
            if location == PlaybackLocation::Attached {
                break;
            }
        }
        assert_eq!(seen, vec![PlaybackLocation::Attaching, PlaybackLocation::Attached]);
        assert!(!fx.windows.is_open());
    }

    #[tokio::test]
    async fn events_keep_flowing_across_the_switch() {
        let fx = fixture();
        let controller = fx.manager.controller();
        load_scenario(controller.as_ref()).await;
        let mut events = controller.events();

        assert_ok!(fx.manager.detach().await);
        assert_ok!(controller.pause().await);

        let mut saw_pause = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), events.next()).await
        {
            if event == PlayerEvent::Pause {
                saw_pause = true;
                break;
            }
        }
        assert!(saw_pause);
    }
}
