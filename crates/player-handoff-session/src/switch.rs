//! Stable controller facade over a replaceable delegate.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use parking_lot::{Mutex, RwLock};
use player_handoff_core::{
    ControllerResult, EventStream, LatestStream, LoadedVideo, MediaController, PlayerEvent,
    state::{
        AudioChannelState, AudioOutputState, AudioRoutingConnection, AudioSoloMuteState,
        AudioTarget, AudioTracksState, EffectsGraph, HelpMenuGroup, PeakProcessorConfig,
        PlaybackState, SafeZone, SidecarAudioState, SidecarAudioTrack, SubtitleTrack,
        SubtitlesState,
    },
};
use tokio::task::JoinHandle;

/// Delegates every call to whichever controller is authoritative.
///
/// Subscribers of [`MediaController::events`] and [`ControllerSwitch::videos`]
/// keep receiving after [`ControllerSwitch::set_delegate`] without
/// re-subscribing.
pub struct ControllerSwitch {
    delegate: RwLock<Arc<dyn MediaController>>,
    events: Arc<EventStream<PlayerEvent>>,
    video: Arc<LatestStream<LoadedVideo>>,
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl ControllerSwitch {
    /// Start with `delegate` as the active controller.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(delegate: Arc<dyn MediaController>) -> Self {
        let switch = Self {
            delegate: RwLock::new(Arc::clone(&delegate)),
            events: Arc::new(EventStream::new()),
            video: Arc::new(LatestStream::new()),
            relay: Mutex::new(None),
        };
        switch.relay_from(delegate.as_ref());
        switch
    }

    /// The active delegate.
    #[must_use]
    pub fn delegate(&self) -> Arc<dyn MediaController> {
        Arc::clone(&self.delegate.read())
    }

    /// Rebind to `delegate`. Calls already in flight finish on the old one.
    pub fn set_delegate(&self, delegate: Arc<dyn MediaController>) {
        self.relay_from(delegate.as_ref());
        *self.delegate.write() = delegate;
    }

    /// Loaded video, replayed to new subscribers.
    #[must_use]
    pub fn videos(&self) -> BoxStream<'static, LoadedVideo> {
        self.video.subscribe()
    }

    /// Last loaded video seen through this switch.
    #[must_use]
    pub fn latest_video(&self) -> Option<LoadedVideo> {
        self.video.latest()
    }

    fn relay_from(&self, delegate: &dyn MediaController) {
        let mut source = delegate.events();
        let events = Arc::clone(&self.events);
        let video = Arc::clone(&self.video);
        let task = tokio::spawn(async move {
            while let Some(event) = source.next().await {
                if let PlayerEvent::VideoLoaded { video: loaded } = &event {
                    video.emit(loaded.clone());
                }
                events.emit(event);
            }
        });
        if let Some(previous) = self.relay.lock().replace(task) {
            previous.abort();
        }
    }
}

impl Drop for ControllerSwitch {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.lock().take() {
            relay.abort();
        }
    }
}

#[async_trait]
impl MediaController for ControllerSwitch {
    async fn video(&self) -> ControllerResult<Option<LoadedVideo>> {
        self.delegate().video().await
    }

    async fn load_video(&self, video: LoadedVideo) -> ControllerResult<()> {
        self.delegate().load_video(video).await
    }

    async fn playback_state(&self) -> ControllerResult<PlaybackState> {
        self.delegate().playback_state().await
    }

    async fn play(&self) -> ControllerResult<()> {
        self.delegate().play().await
    }

    async fn pause(&self) -> ControllerResult<()> {
        self.delegate().pause().await
    }

    async fn seek_to_time(&self, time: f64) -> ControllerResult<()> {
        self.delegate().seek_to_time(time).await
    }

    async fn set_playback_rate(&self, rate: f64) -> ControllerResult<()> {
        self.delegate().set_playback_rate(rate).await
    }

    async fn set_volume(&self, volume: f64) -> ControllerResult<()> {
        self.delegate().set_volume(volume).await
    }

    async fn set_muted(&self, muted: bool) -> ControllerResult<()> {
        self.delegate().set_muted(muted).await
    }

    async fn subtitles(&self) -> ControllerResult<SubtitlesState> {
        self.delegate().subtitles().await
    }

    async fn create_subtitle_track(&self, track: SubtitleTrack) -> ControllerResult<SubtitleTrack> {
        self.delegate().create_subtitle_track(track).await
    }

    async fn remove_subtitle_track(&self, id: String) -> ControllerResult<()> {
        self.delegate().remove_subtitle_track(id).await
    }

    async fn show_subtitle_track(&self, id: String) -> ControllerResult<()> {
        self.delegate().show_subtitle_track(id).await
    }

    async fn hide_subtitle_track(&self, id: String) -> ControllerResult<()> {
        self.delegate().hide_subtitle_track(id).await
    }

    async fn audio_tracks(&self) -> ControllerResult<AudioTracksState> {
        self.delegate().audio_tracks().await
    }

    async fn set_active_audio_track(&self, id: String) -> ControllerResult<()> {
        self.delegate().set_active_audio_track(id).await
    }

    async fn safe_zones(&self) -> ControllerResult<Vec<SafeZone>> {
        self.delegate().safe_zones().await
    }

    async fn clear_safe_zones(&self) -> ControllerResult<()> {
        self.delegate().clear_safe_zones().await
    }

    async fn add_safe_zone(&self, zone: SafeZone) -> ControllerResult<SafeZone> {
        self.delegate().add_safe_zone(zone).await
    }

    async fn help_menu_groups(&self) -> ControllerResult<Vec<HelpMenuGroup>> {
        self.delegate().help_menu_groups().await
    }

    async fn clear_help_menu_groups(&self) -> ControllerResult<()> {
        self.delegate().clear_help_menu_groups().await
    }

    async fn append_help_menu_group(&self, group: HelpMenuGroup) -> ControllerResult<()> {
        self.delegate().append_help_menu_group(group).await
    }

    async fn thumbnail_vtt_url(&self) -> ControllerResult<Option<String>> {
        self.delegate().thumbnail_vtt_url().await
    }

    async fn load_thumbnail_vtt_url(&self, url: String) -> ControllerResult<()> {
        self.delegate().load_thumbnail_vtt_url(url).await
    }

    async fn active_named_events(&self) -> ControllerResult<Vec<String>> {
        self.delegate().active_named_events().await
    }

    async fn update_active_named_events(&self, names: Vec<String>) -> ControllerResult<()> {
        self.delegate().update_active_named_events(names).await
    }

    async fn main_audio_state(&self) -> ControllerResult<Option<AudioChannelState>> {
        self.delegate().main_audio_state().await
    }

    async fn sidecar_audio_states(&self) -> ControllerResult<Vec<SidecarAudioState>> {
        self.delegate().sidecar_audio_states().await
    }

    async fn create_sidecar_audio_track(
        &self,
        track: SidecarAudioTrack,
    ) -> ControllerResult<SidecarAudioTrack> {
        self.delegate().create_sidecar_audio_track(track).await
    }

    async fn remove_all_sidecar_audio_tracks(&self) -> ControllerResult<()> {
        self.delegate().remove_all_sidecar_audio_tracks().await
    }

    async fn set_sidecar_audio_volume(&self, id: String, volume: f64) -> ControllerResult<()> {
        self.delegate().set_sidecar_audio_volume(id, volume).await
    }

    async fn set_sidecar_audio_muted(&self, id: String, muted: bool) -> ControllerResult<()> {
        self.delegate().set_sidecar_audio_muted(id, muted).await
    }

    async fn create_audio_router(
        &self,
        target: AudioTarget,
        inputs: u32,
        outputs: u32,
    ) -> ControllerResult<()> {
        self.delegate()
            .create_audio_router(target, inputs, outputs)
            .await
    }

    async fn update_audio_routing(
        &self,
        target: AudioTarget,
        connections: Vec<AudioRoutingConnection>,
    ) -> ControllerResult<()> {
        self.delegate()
            .update_audio_routing(target, connections)
            .await
    }

    async fn create_audio_peak_processor(
        &self,
        target: AudioTarget,
        config: PeakProcessorConfig,
    ) -> ControllerResult<()> {
        self.delegate()
            .create_audio_peak_processor(target, config)
            .await
    }

    async fn set_audio_effects_graphs(
        &self,
        target: AudioTarget,
        graphs: Vec<EffectsGraph>,
    ) -> ControllerResult<()> {
        self.delegate()
            .set_audio_effects_graphs(target, graphs)
            .await
    }

    async fn audio_solo_mute_state(&self) -> ControllerResult<AudioSoloMuteState> {
        self.delegate().audio_solo_mute_state().await
    }

    async fn set_audio_solo_mute_state(&self, state: AudioSoloMuteState) -> ControllerResult<()> {
        self.delegate().set_audio_solo_mute_state(state).await
    }

    async fn audio_output_state(&self) -> ControllerResult<AudioOutputState> {
        self.delegate().audio_output_state().await
    }

    async fn set_audio_output_volume(&self, volume: f64) -> ControllerResult<()> {
        self.delegate().set_audio_output_volume(volume).await
    }

    async fn set_audio_output_muted(&self, muted: bool) -> ControllerResult<()> {
        self.delegate().set_audio_output_muted(muted).await
    }

    fn events(&self) -> BoxStream<'static, PlayerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use player_handoff_core::MemoryPlayer;
    use tokio_test::assert_ok;

    use super::*;

    async fn next(events: &mut BoxStream<'static, PlayerEvent>) -> Option<PlayerEvent> {
        tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn calls_follow_the_active_delegate() {
        let first = Arc::new(MemoryPlayer::new());
        let second = Arc::new(MemoryPlayer::new());
        let switch = ControllerSwitch::new(first.clone());

        assert_ok!(switch.load_video(LoadedVideo::new("https://cdn.example/a.mp4", 25.0)).await);
        switch.set_delegate(second.clone());
        assert_ok!(switch.load_video(LoadedVideo::new("https://cdn.example/b.mp4", 25.0)).await);

        assert_eq!(first.load_count(), 1);
        assert_eq!(second.load_count(), 1);
    }

    #[tokio::test]
    async fn subscribers_survive_a_switch() {
        let first = Arc::new(MemoryPlayer::new());
        let second = Arc::new(MemoryPlayer::new());
        let switch = ControllerSwitch::new(first.clone());
        let mut events = switch.events();

        assert_ok!(first.set_muted(true).await);
        assert!(matches!(next(&mut events).await, Some(PlayerEvent::VolumeChange { muted: true, .. })));

        switch.set_delegate(second.clone());
        assert_ok!(first.set_muted(false).await);
        assert_ok!(second.set_playback_rate(2.0).await);

        // Only the active delegate is heard.
        assert!(matches!(
            next(&mut events).await,
            Some(PlayerEvent::RateChange { playback_rate }) if playback_rate == 2.0
        ));
    }

    #[tokio::test]
    async fn loaded_video_is_replayed() {
        let player = Arc::new(MemoryPlayer::new());
        let switch = ControllerSwitch::new(player.clone());
        let video = LoadedVideo::new("https://cdn.example/a.mp4", 25.0);

        assert_ok!(switch.load_video(video.clone()).await);
        tokio::task::yield_now().await;

        let mut videos = switch.videos();
        let replayed = tokio::time::timeout(Duration::from_secs(1), videos.next()).await;
        assert_eq!(replayed.ok().flatten(), Some(video.clone()));
        assert_eq!(switch.latest_video(), Some(video));
    }
}
