//! Action map shared by the main page and the detached window.
//!
//! Handshake actions travel on the well-known channel; everything else on
//! the private session channel.

use player_handoff_core::{
    LoadedVideo, PlayerEvent,
    state::{
        AudioChannelState, AudioOutputState, AudioRoutingConnection, AudioSoloMuteState,
        AudioTarget, AudioTracksState, EffectsGraph, HelpMenuGroup, PeakProcessorConfig,
        PlaybackState, SafeZone, SidecarAudioState, SidecarAudioTrack, SubtitleTrack,
        SubtitlesState,
    },
};
use player_handoff_transport::actions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub proxy_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub proxy_id: String,
    pub private_channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedNotice {
    pub proxy_id: String,
    pub private_channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub proxy_id: String,
    pub private_channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub proxy_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRouterRequest {
    pub target: AudioTarget,
    pub inputs: u32,
    pub outputs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRoutingUpdate {
    pub target: AudioTarget,
    pub connections: Vec<AudioRoutingConnection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakProcessorRequest {
    pub target: AudioTarget,
    pub config: PeakProcessorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectsGraphsRequest {
    pub target: AudioTarget,
    pub graphs: Vec<EffectsGraph>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarVolumeRequest {
    pub id: String,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarMutedRequest {
    pub id: String,
    pub muted: bool,
}

actions! {
    /// Initiator asks the popup for a private channel.
    Connect = "handshake.connect": ConnectRequest => ConnectResponse;
    /// Initiator acknowledges the private channel.
    Connected = "handshake.connected": ConnectedNotice => ();
    /// Liveness check, answered by the popup.
    Heartbeat = "handshake.heartbeat": HeartbeatRequest => HeartbeatResponse;

    /// Main page is tearing the session down.
    SessionClose = "session.close": () => ();
    /// Popup asks the main page to take playback back.
    AttachRequested = "session.attachRequested": () => ();
    /// Engine event forwarded from the popup.
    PlayerEventNotice = "session.playerEvent": PlayerEvent => ();

    GetVideo = "player.video": () => Option<LoadedVideo>;
    LoadVideo = "player.loadVideo": LoadedVideo => ();
    GetPlaybackState = "player.playbackState": () => PlaybackState;
    Play = "player.play": () => ();
    Pause = "player.pause": () => ();
    SeekToTime = "player.seekToTime": f64 => ();
    SetPlaybackRate = "player.setPlaybackRate": f64 => ();
    SetVolume = "player.setVolume": f64 => ();
    SetMuted = "player.setMuted": bool => ();

    GetSubtitles = "player.subtitles": () => SubtitlesState;
    CreateSubtitleTrack = "player.createSubtitleTrack": SubtitleTrack => SubtitleTrack;
    RemoveSubtitleTrack = "player.removeSubtitleTrack": String => ();
    ShowSubtitleTrack = "player.showSubtitleTrack": String => ();
    HideSubtitleTrack = "player.hideSubtitleTrack": String => ();

    GetAudioTracks = "player.audioTracks": () => AudioTracksState;
    SetActiveAudioTrack = "player.setActiveAudioTrack": String => ();

    GetSafeZones = "player.safeZones": () => Vec<SafeZone>;
    ClearSafeZones = "player.clearSafeZones": () => ();
    AddSafeZone = "player.addSafeZone": SafeZone => SafeZone;

    GetHelpMenuGroups = "player.helpMenuGroups": () => Vec<HelpMenuGroup>;
    ClearHelpMenuGroups = "player.clearHelpMenuGroups": () => ();
    AppendHelpMenuGroup = "player.appendHelpMenuGroup": HelpMenuGroup => ();

    GetThumbnailVttUrl = "player.thumbnailVttUrl": () => Option<String>;
    LoadThumbnailVttUrl = "player.loadThumbnailVttUrl": String => ();

    GetActiveNamedEvents = "player.activeNamedEvents": () => Vec<String>;
    UpdateActiveNamedEvents = "player.updateActiveNamedEvents": Vec<String> => ();

    GetMainAudioState = "player.mainAudioState": () => Option<AudioChannelState>;
    GetSidecarAudioStates = "player.sidecarAudioStates": () => Vec<SidecarAudioState>;
    CreateSidecarAudioTrack = "player.createSidecarAudioTrack": SidecarAudioTrack => SidecarAudioTrack;
    RemoveAllSidecarAudioTracks = "player.removeAllSidecarAudioTracks": () => ();
    SetSidecarAudioVolume = "player.setSidecarAudioVolume": SidecarVolumeRequest => ();
    SetSidecarAudioMuted = "player.setSidecarAudioMuted": SidecarMutedRequest => ();

    CreateAudioRouter = "player.createAudioRouter": AudioRouterRequest => ();
    UpdateAudioRouting = "player.updateAudioRouting": AudioRoutingUpdate => ();
    CreateAudioPeakProcessor = "player.createAudioPeakProcessor": PeakProcessorRequest => ();
    SetAudioEffectsGraphs = "player.setAudioEffectsGraphs": EffectsGraphsRequest => ();

    GetAudioSoloMuteState = "player.audioSoloMuteState": () => AudioSoloMuteState;
    SetAudioSoloMuteState = "player.setAudioSoloMuteState": AudioSoloMuteState => ();

    GetAudioOutputState = "player.audioOutputState": () => AudioOutputState;
    SetAudioOutputVolume = "player.setAudioOutputVolume": f64 => ();
    SetAudioOutputMuted = "player.setAudioOutputMuted": bool => ();
}

#[cfg(test)]
mod tests {
    use player_handoff_transport::Action;
    use serde_json::json;

    use super::*;

    #[test]
    fn handshake_payloads_use_camel_case() {
        let value = serde_json::to_value(ConnectResponse {
            proxy_id: "p-1".to_string(),
            private_channel_id: "c-1".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"proxyId": "p-1", "privateChannelId": "c-1"}));
    }

    #[test]
    fn action_names_are_namespaced() {
        assert_eq!(Connect::NAME, "handshake.connect");
        assert_eq!(SessionClose::NAME, "session.close");
        assert_eq!(SeekToTime::NAME, "player.seekToTime");
    }
}
