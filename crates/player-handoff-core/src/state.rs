//! Session-visible player state shared by every controller.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Opaque audio effects chain description. Passed through untouched.
pub type EffectsGraph = Value;

/// Opaque peak meter configuration. Passed through untouched.
pub type PeakProcessorConfig = Value;

/// What is being played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDescriptor {
    pub source_url: String,
    pub frame_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// How it was loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoLoadOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_frame: Option<bool>,
    /// Engine-specific options, compared but never interpreted.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A loaded video: descriptor plus the options it was loaded with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedVideo {
    pub descriptor: VideoDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<VideoLoadOptions>,
}

impl LoadedVideo {
    #[must_use]
    pub fn new(source_url: impl Into<String>, frame_rate: f64) -> Self {
        Self {
            descriptor: VideoDescriptor {
                source_url: source_url.into(),
                frame_rate,
                duration: None,
            },
            options: None,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.descriptor.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: VideoLoadOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Playback position and transport flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub playing: bool,
    pub current_time: f64,
    pub playback_rate: f64,
    pub volume: f64,
    pub muted: bool,
    pub seeking: bool,
    pub buffering: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            playing: false,
            current_time: 0.0,
            playback_rate: 1.0,
            volume: 1.0,
            muted: false,
            seeking: false,
            buffering: false,
        }
    }
}

impl PlaybackState {
    /// Seeking or buffering, the states a detach waits out.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.seeking || self.buffering
    }
}

/// A subtitle track.
///
/// Embedded tracks come from the media itself and get a new `id` on every
/// load; they are identified across loads by `content_digest` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    pub id: String,
    pub src: String,
    pub label: String,
    pub language: String,
    #[serde(default)]
    pub embedded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
}

impl SubtitleTrack {
    /// SHA-256 hex digest of track content.
    #[must_use]
    pub fn digest_content(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    /// Whether `other` is the same track, possibly reloaded.
    ///
    /// Embedded tracks match on content digest, everything else on id.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        if self.embedded || other.embedded {
            self.embedded
                && other.embedded
                && self.content_digest.is_some()
                && self.content_digest == other.content_digest
        } else {
            self.id == other.id
        }
    }
}

/// Subtitle tracks plus which one is active and whether it is hidden.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitlesState {
    pub tracks: Vec<SubtitleTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_track_id: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl SubtitlesState {
    #[must_use]
    pub fn active_track(&self) -> Option<&SubtitleTrack> {
        let id = self.active_track_id.as_deref()?;
        self.tracks.iter().find(|track| track.id == id)
    }
}

/// An audio track of the media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTracksState {
    pub tracks: Vec<AudioTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_track_id: Option<String>,
}

/// Overlay marking the safe area of the frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeZone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_right_bottom_left_percent: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_class: Option<String>,
}

impl SafeZone {
    /// Zone sized by aspect ratio and scale.
    #[must_use]
    pub fn aspect(aspect_ratio: impl Into<String>, scale_percent: f64) -> Self {
        Self {
            aspect_ratio: Some(aspect_ratio.into()),
            scale_percent: Some(scale_percent),
            ..Self::default()
        }
    }

    /// Equal ignoring the engine-assigned id.
    #[must_use]
    pub fn same_geometry(&self, other: &Self) -> bool {
        self.aspect_ratio == other.aspect_ratio
            && self.scale_percent == other.scale_percent
            && self.top_right_bottom_left_percent == other.top_right_bottom_left_percent
            && self.html_class == other.html_class
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpMenuItem {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpMenuGroup {
    pub name: String,
    pub items: Vec<HelpMenuItem>,
}

/// Which audio graph an audio operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum AudioTarget {
    Main,
    Sidecar(String),
}

impl fmt::Display for AudioTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Sidecar(id) => write!(f, "sidecar:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRoutingConnection {
    pub input: u32,
    pub output: u32,
    pub connected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRouting {
    pub inputs: u32,
    pub outputs: u32,
    pub connections: Vec<AudioRoutingConnection>,
}

/// Router, peak meter and effects of one audio graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChannelState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<AudioRouting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_processor: Option<PeakProcessorConfig>,
    #[serde(default)]
    pub effects_graphs: Vec<EffectsGraph>,
}

/// An extra audio file played in sync with the video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarAudioTrack {
    pub id: String,
    pub src: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarAudioState {
    pub track: SidecarAudioTrack,
    pub volume: f64,
    pub muted: bool,
    #[serde(default)]
    pub audio: AudioChannelState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSoloMuteState {
    #[serde(default)]
    pub soloed: Vec<AudioTarget>,
    #[serde(default)]
    pub muted: Vec<AudioTarget>,
}

/// Final output stage volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputState {
    pub volume: f64,
    pub muted: bool,
}

impl Default for AudioOutputState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
        }
    }
}

/// Which execution context currently drives playback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackLocation {
    #[default]
    Attached,
    Detaching,
    Detached,
    Attaching,
}

impl PlaybackLocation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attached => "attached",
            Self::Detaching => "detaching",
            Self::Detached => "detached",
            Self::Attaching => "attaching",
        }
    }
}

impl fmt::Display for PlaybackLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events a controller emits to its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    VideoLoaded { video: LoadedVideo },
    Play,
    Pause,
    Seeked { current_time: f64 },
    RateChange { playback_rate: f64 },
    VolumeChange { volume: f64, muted: bool },
    SubtitlesChanged,
    AudioTrackChanged { track_id: String },
    AudioOutputChange { volume: f64, muted: bool },
    NamedEvent { name: String, data: Value },
}
