//! In-memory media engine.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    state::{
        AudioChannelState, AudioOutputState, AudioRouting, AudioRoutingConnection,
        AudioSoloMuteState, AudioTarget, AudioTrack, AudioTracksState, EffectsGraph,
        HelpMenuGroup, LoadedVideo, PeakProcessorConfig, PlaybackState, PlayerEvent, SafeZone,
        SidecarAudioState, SidecarAudioTrack, SubtitleTrack, SubtitlesState,
    },
    stream::EventStream,
    traits::{ControllerError, ControllerResult, MediaController},
};

#[derive(Debug, Clone)]
struct EmbeddedSubtitle {
    label: String,
    language: String,
    content: String,
}

#[derive(Default)]
struct PlayerState {
    video: Option<LoadedVideo>,
    playback: PlaybackState,
    subtitles: SubtitlesState,
    audio_tracks: AudioTracksState,
    safe_zones: Vec<SafeZone>,
    help_menu: Vec<HelpMenuGroup>,
    thumbnail_vtt_url: Option<String>,
    named_events: Vec<String>,
    main_audio: Option<AudioChannelState>,
    sidecars: Vec<SidecarAudioState>,
    solo_mute: AudioSoloMuteState,
    audio_output: AudioOutputState,
    embedded_subtitles: Vec<EmbeddedSubtitle>,
    embedded_audio: Vec<AudioTrack>,
    autoplay_blocked: bool,
}

impl PlayerState {
    fn require_video(&self) -> ControllerResult<()> {
        if self.video.is_some() {
            Ok(())
        } else {
            Err(ControllerError::NoVideoLoaded)
        }
    }

    fn audio_channel_mut(&mut self, target: &AudioTarget) -> ControllerResult<&mut AudioChannelState> {
        match target {
            AudioTarget::Main => Ok(self.main_audio.get_or_insert_with(AudioChannelState::default)),
            AudioTarget::Sidecar(id) => self
                .sidecars
                .iter_mut()
                .find(|s| s.track.id == *id)
                .map(|s| &mut s.audio)
                .ok_or_else(|| ControllerError::NotFound(format!("sidecar audio track {id}"))),
        }
    }

    fn sidecar_mut(&mut self, id: &str) -> ControllerResult<&mut SidecarAudioState> {
        self.sidecars
            .iter_mut()
            .find(|s| s.track.id == id)
            .ok_or_else(|| ControllerError::NotFound(format!("sidecar audio track {id}")))
    }

    fn subtitle_exists(&self, id: &str) -> ControllerResult<()> {
        if self.subtitles.tracks.iter().any(|t| t.id == id) {
            Ok(())
        } else {
            Err(ControllerError::NotFound(format!("subtitle track {id}")))
        }
    }
}

/// In-memory player engine.
///
/// Useful for development, tests and single-process demos. It keeps every
/// session-visible attribute in memory and emits the matching events.
/// Embedded subtitle tracks get fresh ids on every load, like a real
/// demuxer would hand out.
pub struct MemoryPlayer {
    state: Mutex<PlayerState>,
    events: EventStream<PlayerEvent>,
    loads: AtomicUsize,
}

impl Default for MemoryPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlayer {
    /// Create an empty player.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlayerState::default()),
            events: EventStream::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Add a subtitle track that ships inside the media.
    #[must_use]
    pub fn with_embedded_subtitle(
        self,
        label: impl Into<String>,
        language: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.state.lock().embedded_subtitles.push(EmbeddedSubtitle {
            label: label.into(),
            language: language.into(),
            content: content.into(),
        });
        self
    }

    /// Audio tracks the media exposes once loaded.
    #[must_use]
    pub fn with_audio_tracks(self, tracks: Vec<AudioTrack>) -> Self {
        self.state.lock().embedded_audio = tracks;
        self
    }

    /// How many times a video was loaded.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Simulate a browser refusing `play()` without a user gesture.
    pub fn set_autoplay_blocked(&self, blocked: bool) {
        self.state.lock().autoplay_blocked = blocked;
    }

    /// Flag the player as seeking and/or buffering.
    pub fn set_transient(&self, seeking: bool, buffering: bool) {
        let mut state = self.state.lock();
        state.playback.seeking = seeking;
        state.playback.buffering = buffering;
    }

    /// Emit a named event if it is currently active.
    pub fn emit_named_event(&self, name: &str, data: serde_json::Value) {
        let active = self.state.lock().named_events.iter().any(|n| n == name);
        if active {
            self.events.emit(PlayerEvent::NamedEvent {
                name: name.to_string(),
                data,
            });
        }
    }
}

#[async_trait]
impl MediaController for MemoryPlayer {
    async fn video(&self) -> ControllerResult<Option<LoadedVideo>> {
        Ok(self.state.lock().video.clone())
    }

    async fn load_video(&self, video: LoadedVideo) -> ControllerResult<()> {
        if video.descriptor.source_url.trim().is_empty() {
            return Err(ControllerError::InvalidArgument("empty source url".to_string()));
        }
        {
            let mut state = self.state.lock();
            let tracks = state
                .embedded_subtitles
                .iter()
                .map(|sub| SubtitleTrack {
                    id: Uuid::new_v4().to_string(),
                    src: String::new(),
                    label: sub.label.clone(),
                    language: sub.language.clone(),
                    embedded: true,
                    content_digest: Some(SubtitleTrack::digest_content(sub.content.as_bytes())),
                })
                .collect();
            state.subtitles = SubtitlesState {
                tracks,
                active_track_id: None,
                hidden: false,
            };
            state.audio_tracks = AudioTracksState {
                active_track_id: state.embedded_audio.first().map(|t| t.id.clone()),
                tracks: state.embedded_audio.clone(),
            };
            state.playback = PlaybackState {
                volume: state.playback.volume,
                muted: state.playback.muted,
                ..PlaybackState::default()
            };
            state.thumbnail_vtt_url = None;
            state.video = Some(video.clone());
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(source = %video.descriptor.source_url, "Video loaded");
        self.events.emit(PlayerEvent::VideoLoaded { video });
        Ok(())
    }

    async fn playback_state(&self) -> ControllerResult<PlaybackState> {
        Ok(self.state.lock().playback.clone())
    }

    async fn play(&self) -> ControllerResult<()> {
        {
            let mut state = self.state.lock();
            state.require_video()?;
            if state.autoplay_blocked {
                return Err(ControllerError::PlaybackRejected(
                    "play() requires a user gesture".to_string(),
                ));
            }
            state.playback.playing = true;
        }
        self.events.emit(PlayerEvent::Play);
        Ok(())
    }

    async fn pause(&self) -> ControllerResult<()> {
        {
            let mut state = self.state.lock();
            state.require_video()?;
            state.playback.playing = false;
        }
        self.events.emit(PlayerEvent::Pause);
        Ok(())
    }

    async fn seek_to_time(&self, time: f64) -> ControllerResult<()> {
        {
            let mut state = self.state.lock();
            state.require_video()?;
            let duration = state.video.as_ref().and_then(|v| v.descriptor.duration);
            if !time.is_finite() || time < 0.0 || duration.is_some_and(|d| time > d) {
                return Err(ControllerError::InvalidArgument(format!("seek time {time}")));
            }
            state.playback.current_time = time;
        }
        self.events.emit(PlayerEvent::Seeked { current_time: time });
        Ok(())
    }

    async fn set_playback_rate(&self, rate: f64) -> ControllerResult<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ControllerError::InvalidArgument(format!("playback rate {rate}")));
        }
        self.state.lock().playback.playback_rate = rate;
        self.events.emit(PlayerEvent::RateChange { playback_rate: rate });
        Ok(())
    }

    async fn set_volume(&self, volume: f64) -> ControllerResult<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(ControllerError::InvalidArgument(format!("volume {volume}")));
        }
        let muted = {
            let mut state = self.state.lock();
            state.playback.volume = volume;
            state.playback.muted
        };
        self.events.emit(PlayerEvent::VolumeChange { volume, muted });
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> ControllerResult<()> {
        let volume = {
            let mut state = self.state.lock();
            state.playback.muted = muted;
            state.playback.volume
        };
        self.events.emit(PlayerEvent::VolumeChange { volume, muted });
        Ok(())
    }

    async fn subtitles(&self) -> ControllerResult<SubtitlesState> {
        Ok(self.state.lock().subtitles.clone())
    }

    async fn create_subtitle_track(&self, mut track: SubtitleTrack) -> ControllerResult<SubtitleTrack> {
        {
            let mut state = self.state.lock();
            state.require_video()?;
            if track.id.is_empty() {
                track.id = Uuid::new_v4().to_string();
            }
            if state.subtitles.tracks.iter().any(|t| t.id == track.id) {
                return Err(ControllerError::InvalidArgument(format!(
                    "subtitle track {} already exists",
                    track.id
                )));
            }
            state.subtitles.tracks.push(track.clone());
        }
        self.events.emit(PlayerEvent::SubtitlesChanged);
        Ok(track)
    }

    async fn remove_subtitle_track(&self, id: String) -> ControllerResult<()> {
        {
            let mut state = self.state.lock();
            state.subtitle_exists(&id)?;
            state.subtitles.tracks.retain(|t| t.id != id);
            if state.subtitles.active_track_id.as_deref() == Some(id.as_str()) {
                state.subtitles.active_track_id = None;
                state.subtitles.hidden = false;
            }
        }
        self.events.emit(PlayerEvent::SubtitlesChanged);
        Ok(())
    }

    async fn show_subtitle_track(&self, id: String) -> ControllerResult<()> {
        {
            let mut state = self.state.lock();
            state.subtitle_exists(&id)?;
            state.subtitles.active_track_id = Some(id);
            state.subtitles.hidden = false;
        }
        self.events.emit(PlayerEvent::SubtitlesChanged);
        Ok(())
    }

    async fn hide_subtitle_track(&self, id: String) -> ControllerResult<()> {
        {
            let mut state = self.state.lock();
            state.subtitle_exists(&id)?;
            state.subtitles.active_track_id = Some(id);
            state.subtitles.hidden = true;
        }
        self.events.emit(PlayerEvent::SubtitlesChanged);
        Ok(())
    }

    async fn audio_tracks(&self) -> ControllerResult<AudioTracksState> {
        Ok(self.state.lock().audio_tracks.clone())
    }

    async fn set_active_audio_track(&self, id: String) -> ControllerResult<()> {
        {
            let mut state = self.state.lock();
            if !state.audio_tracks.tracks.iter().any(|t| t.id == id) {
                return Err(ControllerError::NotFound(format!("audio track {id}")));
            }
            state.audio_tracks.active_track_id = Some(id.clone());
        }
        self.events.emit(PlayerEvent::AudioTrackChanged { track_id: id });
        Ok(())
    }

    async fn safe_zones(&self) -> ControllerResult<Vec<SafeZone>> {
        Ok(self.state.lock().safe_zones.clone())
    }

    async fn clear_safe_zones(&self) -> ControllerResult<()> {
        self.state.lock().safe_zones.clear();
        Ok(())
    }

    async fn add_safe_zone(&self, mut zone: SafeZone) -> ControllerResult<SafeZone> {
        if zone.aspect_ratio.is_none() && zone.top_right_bottom_left_percent.is_none() {
            return Err(ControllerError::InvalidArgument(
                "safe zone needs an aspect ratio or explicit edges".to_string(),
            ));
        }
        zone.id.get_or_insert_with(|| Uuid::new_v4().to_string());
        self.state.lock().safe_zones.push(zone.clone());
        Ok(zone)
    }

    async fn help_menu_groups(&self) -> ControllerResult<Vec<HelpMenuGroup>> {
        Ok(self.state.lock().help_menu.clone())
    }

    async fn clear_help_menu_groups(&self) -> ControllerResult<()> {
        self.state.lock().help_menu.clear();
        Ok(())
    }

    async fn append_help_menu_group(&self, group: HelpMenuGroup) -> ControllerResult<()> {
        self.state.lock().help_menu.push(group);
        Ok(())
    }

    async fn thumbnail_vtt_url(&self) -> ControllerResult<Option<String>> {
        Ok(self.state.lock().thumbnail_vtt_url.clone())
    }

    async fn load_thumbnail_vtt_url(&self, url: String) -> ControllerResult<()> {
        let mut state = self.state.lock();
        state.require_video()?;
        state.thumbnail_vtt_url = Some(url);
        Ok(())
    }

    async fn active_named_events(&self) -> ControllerResult<Vec<String>> {
        Ok(self.state.lock().named_events.clone())
    }

    async fn update_active_named_events(&self, mut names: Vec<String>) -> ControllerResult<()> {
        names.sort();
        names.dedup();
        self.state.lock().named_events = names;
        Ok(())
    }

    async fn main_audio_state(&self) -> ControllerResult<Option<AudioChannelState>> {
        Ok(self.state.lock().main_audio.clone())
    }

    async fn sidecar_audio_states(&self) -> ControllerResult<Vec<SidecarAudioState>> {
        Ok(self.state.lock().sidecars.clone())
    }

    async fn create_sidecar_audio_track(
        &self,
        mut track: SidecarAudioTrack,
    ) -> ControllerResult<SidecarAudioTrack> {
        let mut state = self.state.lock();
        state.require_video()?;
        if track.id.is_empty() {
            track.id = Uuid::new_v4().to_string();
        }
        if state.sidecars.iter().any(|s| s.track.id == track.id) {
            return Err(ControllerError::InvalidArgument(format!(
                "sidecar audio track {} already exists",
                track.id
            )));
        }
        state.sidecars.push(SidecarAudioState {
            track: track.clone(),
            volume: 1.0,
            muted: false,
            audio: AudioChannelState::default(),
        });
        Ok(track)
    }

    async fn remove_all_sidecar_audio_tracks(&self) -> ControllerResult<()> {
        self.state.lock().sidecars.clear();
        Ok(())
    }

    async fn set_sidecar_audio_volume(&self, id: String, volume: f64) -> ControllerResult<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(ControllerError::InvalidArgument(format!("volume {volume}")));
        }
        self.state.lock().sidecar_mut(&id)?.volume = volume;
        Ok(())
    }

    async fn set_sidecar_audio_muted(&self, id: String, muted: bool) -> ControllerResult<()> {
        self.state.lock().sidecar_mut(&id)?.muted = muted;
        Ok(())
    }

    async fn create_audio_router(
        &self,
        target: AudioTarget,
        inputs: u32,
        outputs: u32,
    ) -> ControllerResult<()> {
        if inputs == 0 || outputs == 0 {
            return Err(ControllerError::InvalidArgument(format!(
                "router {inputs}x{outputs} for {target}"
            )));
        }
        self.state.lock().audio_channel_mut(&target)?.routing = Some(AudioRouting {
            inputs,
            outputs,
            connections: Vec::new(),
        });
        Ok(())
    }

    async fn update_audio_routing(
        &self,
        target: AudioTarget,
        connections: Vec<AudioRoutingConnection>,
    ) -> ControllerResult<()> {
        let mut state = self.state.lock();
        let routing = state
            .audio_channel_mut(&target)?
            .routing
            .as_mut()
            .ok_or_else(|| ControllerError::InvalidArgument(format!("no router for {target}")))?;
        for connection in connections {
            if connection.input >= routing.inputs || connection.output >= routing.outputs {
                return Err(ControllerError::InvalidArgument(format!(
                    "connection {}->{} outside router for {target}",
                    connection.input, connection.output
                )));
            }
            match routing
                .connections
                .iter_mut()
                .find(|c| c.input == connection.input && c.output == connection.output)
            {
                Some(existing) => existing.connected = connection.connected,
                None => routing.connections.push(connection),
            }
        }
        Ok(())
    }

    async fn create_audio_peak_processor(
        &self,
        target: AudioTarget,
        config: PeakProcessorConfig,
    ) -> ControllerResult<()> {
        self.state.lock().audio_channel_mut(&target)?.peak_processor = Some(config);
        Ok(())
    }

    async fn set_audio_effects_graphs(
        &self,
        target: AudioTarget,
        graphs: Vec<EffectsGraph>,
    ) -> ControllerResult<()> {
        self.state.lock().audio_channel_mut(&target)?.effects_graphs = graphs;
        Ok(())
    }

    async fn audio_solo_mute_state(&self) -> ControllerResult<AudioSoloMuteState> {
        Ok(self.state.lock().solo_mute.clone())
    }

    async fn set_audio_solo_mute_state(&self, solo_mute: AudioSoloMuteState) -> ControllerResult<()> {
        self.state.lock().solo_mute = solo_mute;
        Ok(())
    }

    async fn audio_output_state(&self) -> ControllerResult<AudioOutputState> {
        Ok(self.state.lock().audio_output.clone())
    }

    async fn set_audio_output_volume(&self, volume: f64) -> ControllerResult<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(ControllerError::InvalidArgument(format!("output volume {volume}")));
        }
        let muted = {
            let mut state = self.state.lock();
            state.audio_output.volume = volume;
            state.audio_output.muted
        };
        self.events.emit(PlayerEvent::AudioOutputChange { volume, muted });
        Ok(())
    }

    async fn set_audio_output_muted(&self, muted: bool) -> ControllerResult<()> {
        let volume = {
            let mut state = self.state.lock();
            state.audio_output.muted = muted;
            state.audio_output.volume
        };
        self.events.emit(PlayerEvent::AudioOutputChange { volume, muted });
        Ok(())
    }

    fn events(&self) -> BoxStream<'static, PlayerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn reload_regenerates_embedded_subtitle_ids() {
        let player = MemoryPlayer::new().with_embedded_subtitle("English", "en", "WEBVTT\n\nhello");
        let video = LoadedVideo::new("https://cdn.example/a.m3u8", 25.0);

        player.load_video(video.clone()).await.unwrap();
        let first = player.subtitles().await.unwrap().tracks;
        player.load_video(video).await.unwrap();
        let second = player.subtitles().await.unwrap().tracks;

        assert_eq!(player.load_count(), 2);
        assert_ne!(first[0].id, second[0].id);
        assert!(first[0].matches(&second[0]));
    }

    #[tokio::test]
    async fn playback_requires_video() {
        let player = MemoryPlayer::new();
        let err = player.play().await.unwrap_err();
        assert!(matches!(err, ControllerError::NoVideoLoaded));
    }

    #[tokio::test]
    async fn blocked_autoplay_rejects_play() {
        let player = MemoryPlayer::new();
        player
            .load_video(LoadedVideo::new("https://cdn.example/a.mp4", 30.0))
            .await
            .unwrap();
        player.set_autoplay_blocked(true);

        let err = player.play().await.unwrap_err();
        assert_eq!(err.name(), "PlaybackRejected");
        assert!(!player.playback_state().await.unwrap().playing);
    }

    #[tokio::test]
    async fn routing_updates_merge_connections() {
        let player = MemoryPlayer::new();
        player.create_audio_router(AudioTarget::Main, 2, 2).await.unwrap();
        let connect = |input, output, connected| AudioRoutingConnection {
            input,
            output,
            connected,
        };
        player
            .update_audio_routing(AudioTarget::Main, vec![connect(0, 0, true), connect(1, 1, true)])
            .await
            .unwrap();
        player
            .update_audio_routing(AudioTarget::Main, vec![connect(1, 1, false)])
            .await
            .unwrap();

        let routing = player.main_audio_state().await.unwrap().unwrap().routing.unwrap();
        assert_eq!(routing.connections, vec![connect(0, 0, true), connect(1, 1, false)]);

        let err = player
            .update_audio_routing(AudioTarget::Main, vec![connect(2, 0, true)])
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn named_events_only_emit_when_active() {
        let player = MemoryPlayer::new();
        let mut events = player.events();

        player.emit_named_event("marker", serde_json::json!(1));
        player
            .update_active_named_events(vec!["marker".to_string()])
            .await
            .unwrap();
        player.emit_named_event("marker", serde_json::json!(2));

        assert_eq!(
            events.next().await,
            Some(PlayerEvent::NamedEvent {
                name: "marker".to_string(),
                data: serde_json::json!(2),
            })
        );
    }
}
