//! Controller and window management traits.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::state::{
    AudioChannelState, AudioOutputState, AudioRoutingConnection, AudioSoloMuteState, AudioTarget,
    AudioTracksState, EffectsGraph, HelpMenuGroup, LoadedVideo, PeakProcessorConfig,
    PlaybackState, PlayerEvent, SafeZone, SidecarAudioState, SidecarAudioTrack, SubtitleTrack,
    SubtitlesState,
};

/// Controller error.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("No video loaded")]
    NoVideoLoaded,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Playback rejected: {0}")]
    PlaybackRejected(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("{name}: {message}")]
    Remote { name: String, message: String },
}

impl ControllerError {
    /// Stable error name, carried on the wire.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::NoVideoLoaded => "NoVideoLoaded",
            Self::NotFound(_) => "NotFound",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::PlaybackRejected(_) => "PlaybackRejected",
            Self::Timeout(_) => "TimeoutError",
            Self::Transport(_) => "TransportError",
            Self::Protocol(_) => "ProtocolError",
            Self::Remote { name, .. } => name,
        }
    }

    /// Human readable message without the name prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;

/// The public player surface.
///
/// Implemented by the local media engine, by the proxy that forwards every
/// call to a detached window, and by the switch that delegates to whichever
/// of the two is authoritative.
#[async_trait]
pub trait MediaController: Send + Sync {
    /// Currently loaded video, if any.
    async fn video(&self) -> ControllerResult<Option<LoadedVideo>>;

    /// Load a video, replacing the current one.
    async fn load_video(&self, video: LoadedVideo) -> ControllerResult<()>;

    async fn playback_state(&self) -> ControllerResult<PlaybackState>;

    async fn play(&self) -> ControllerResult<()>;

    async fn pause(&self) -> ControllerResult<()>;

    async fn seek_to_time(&self, time: f64) -> ControllerResult<()>;

    async fn set_playback_rate(&self, rate: f64) -> ControllerResult<()>;

    async fn set_volume(&self, volume: f64) -> ControllerResult<()>;

    async fn set_muted(&self, muted: bool) -> ControllerResult<()>;

    async fn subtitles(&self) -> ControllerResult<SubtitlesState>;

    /// Add a side-loaded subtitle track. Returns the track as registered.
    async fn create_subtitle_track(&self, track: SubtitleTrack) -> ControllerResult<SubtitleTrack>;

    async fn remove_subtitle_track(&self, id: String) -> ControllerResult<()>;

    async fn show_subtitle_track(&self, id: String) -> ControllerResult<()>;

    async fn hide_subtitle_track(&self, id: String) -> ControllerResult<()>;

    async fn audio_tracks(&self) -> ControllerResult<AudioTracksState>;

    async fn set_active_audio_track(&self, id: String) -> ControllerResult<()>;

    async fn safe_zones(&self) -> ControllerResult<Vec<SafeZone>>;

    async fn clear_safe_zones(&self) -> ControllerResult<()>;

    /// Add a safe zone. Returns it with its assigned id.
    async fn add_safe_zone(&self, zone: SafeZone) -> ControllerResult<SafeZone>;

    async fn help_menu_groups(&self) -> ControllerResult<Vec<HelpMenuGroup>>;

    async fn clear_help_menu_groups(&self) -> ControllerResult<()>;

    async fn append_help_menu_group(&self, group: HelpMenuGroup) -> ControllerResult<()>;

    async fn thumbnail_vtt_url(&self) -> ControllerResult<Option<String>>;

    async fn load_thumbnail_vtt_url(&self, url: String) -> ControllerResult<()>;

    /// Named events the controller currently forwards to subscribers.
    async fn active_named_events(&self) -> ControllerResult<Vec<String>>;

    async fn update_active_named_events(&self, names: Vec<String>) -> ControllerResult<()>;

    async fn main_audio_state(&self) -> ControllerResult<Option<AudioChannelState>>;

    async fn sidecar_audio_states(&self) -> ControllerResult<Vec<SidecarAudioState>>;

    async fn create_sidecar_audio_track(
        &self,
        track: SidecarAudioTrack,
    ) -> ControllerResult<SidecarAudioTrack>;

    async fn remove_all_sidecar_audio_tracks(&self) -> ControllerResult<()>;

    async fn set_sidecar_audio_volume(&self, id: String, volume: f64) -> ControllerResult<()>;

    async fn set_sidecar_audio_muted(&self, id: String, muted: bool) -> ControllerResult<()>;

    async fn create_audio_router(
        &self,
        target: AudioTarget,
        inputs: u32,
        outputs: u32,
    ) -> ControllerResult<()>;

    async fn update_audio_routing(
        &self,
        target: AudioTarget,
        connections: Vec<AudioRoutingConnection>,
    ) -> ControllerResult<()>;

    async fn create_audio_peak_processor(
        &self,
        target: AudioTarget,
        config: PeakProcessorConfig,
    ) -> ControllerResult<()>;

    async fn set_audio_effects_graphs(
        &self,
        target: AudioTarget,
        graphs: Vec<EffectsGraph>,
    ) -> ControllerResult<()>;

    async fn audio_solo_mute_state(&self) -> ControllerResult<AudioSoloMuteState>;

    async fn set_audio_solo_mute_state(&self, state: AudioSoloMuteState) -> ControllerResult<()>;

    async fn audio_output_state(&self) -> ControllerResult<AudioOutputState>;

    async fn set_audio_output_volume(&self, volume: f64) -> ControllerResult<()>;

    async fn set_audio_output_muted(&self, muted: bool) -> ControllerResult<()>;

    /// Events emitted from now on. Nothing is replayed.
    fn events(&self) -> BoxStream<'static, PlayerEvent>;
}

/// Request to open the detached window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub url: String,
    pub target: String,
    pub features: String,
    /// Handshake this window belongs to.
    pub proxy_id: String,
}

/// Window error.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("Detached window was blocked")]
    Blocked,
    #[error("Window error: {0}")]
    Platform(String),
}

/// Thin platform hook for the detached popup.
#[async_trait]
pub trait WindowManager: Send + Sync {
    /// Open the detached window.
    async fn open(&self, request: WindowRequest) -> Result<(), WindowError>;

    /// Close the detached window if open.
    async fn close(&self) -> Result<(), WindowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_keep_their_name() {
        let err = ControllerError::Remote {
            name: "NotAllowedError".to_string(),
            message: "play() needs a user gesture".to_string(),
        };
        assert_eq!(err.name(), "NotAllowedError");
        assert_eq!(err.message(), "play() needs a user gesture");
        assert_eq!(err.to_string(), "NotAllowedError: play() needs a user gesture");
    }

    #[test]
    fn local_errors_have_stable_names() {
        assert_eq!(ControllerError::NoVideoLoaded.name(), "NoVideoLoaded");
        assert_eq!(ControllerError::Timeout("x".into()).name(), "TimeoutError");
    }
}
