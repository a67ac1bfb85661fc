//! Controller proxy that forwards every call to the detached window.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use player_handoff_core::{
    ControllerResult, EventStream, LoadedVideo, MediaController, PlayerEvent,
    state::{
        AudioChannelState, AudioOutputState, AudioRoutingConnection, AudioSoloMuteState,
        AudioTarget, AudioTracksState, EffectsGraph, HelpMenuGroup, PeakProcessorConfig,
        PlaybackState, SafeZone, SidecarAudioState, SidecarAudioTrack, SubtitleTrack,
        SubtitlesState,
    },
};
use player_handoff_transport::{Action, ActionChannel};
use tokio::task::JoinHandle;

use crate::actions::{
    AddSafeZone, AppendHelpMenuGroup, AudioRouterRequest, AudioRoutingUpdate, ClearHelpMenuGroups,
    ClearSafeZones, CreateAudioPeakProcessor, CreateAudioRouter, CreateSidecarAudioTrack,
    CreateSubtitleTrack, EffectsGraphsRequest, GetActiveNamedEvents, GetAudioOutputState,
    GetAudioSoloMuteState, GetAudioTracks, GetHelpMenuGroups, GetMainAudioState,
    GetPlaybackState, GetSafeZones, GetSidecarAudioStates, GetSubtitles, GetThumbnailVttUrl,
    GetVideo, HideSubtitleTrack, LoadThumbnailVttUrl, LoadVideo, Pause, PeakProcessorRequest,
    Play, PlayerEventNotice, RemoveAllSidecarAudioTracks, RemoveSubtitleTrack, SeekToTime,
    SetActiveAudioTrack, SetAudioEffectsGraphs, SetAudioOutputMuted, SetAudioOutputVolume,
    SetAudioSoloMuteState, SetMuted, SetPlaybackRate, SetSidecarAudioMuted,
    SetSidecarAudioVolume, SetVolume, ShowSubtitleTrack, SidecarMutedRequest,
    SidecarVolumeRequest, UpdateActiveNamedEvents, UpdateAudioRouting,
};

/// [`MediaController`] backed by a private session channel.
///
/// Events relayed by the detached window are re-emitted locally for as long
/// as the proxy lives.
pub struct RemoteController {
    channel: ActionChannel,
    events: Arc<EventStream<PlayerEvent>>,
    relay: JoinHandle<()>,
}

impl RemoteController {
    #[must_use]
    pub fn new(channel: ActionChannel) -> Self {
        let events = Arc::new(EventStream::new());
        let relay = Arc::clone(&events).spawn_forwarder(channel.data_stream::<PlayerEventNotice>());
        Self {
            channel,
            events,
            relay,
        }
    }

    #[must_use]
    pub const fn channel(&self) -> &ActionChannel {
        &self.channel
    }

    async fn call<A: Action>(&self, data: A::Request) -> ControllerResult<A::Response> {
        Ok(self.channel.send_and_await::<A>(&data).await?)
    }
}

impl Drop for RemoteController {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

#[async_trait]
impl MediaController for RemoteController {
    async fn video(&self) -> ControllerResult<Option<LoadedVideo>> {
        self.call::<GetVideo>(()).await
    }

    async fn load_video(&self, video: LoadedVideo) -> ControllerResult<()> {
        self.call::<LoadVideo>(video).await
    }

    async fn playback_state(&self) -> ControllerResult<PlaybackState> {
        self.call::<GetPlaybackState>(()).await
    }

    async fn play(&self) -> ControllerResult<()> {
        self.call::<Play>(()).await
    }

    async fn pause(&self) -> ControllerResult<()> {
        self.call::<Pause>(()).await
    }

    async fn seek_to_time(&self, time: f64) -> ControllerResult<()> {
        self.call::<SeekToTime>(time).await
    }

    async fn set_playback_rate(&self, rate: f64) -> ControllerResult<()> {
        self.call::<SetPlaybackRate>(rate).await
    }

    async fn set_volume(&self, volume: f64) -> ControllerResult<()> {
        self.call::<SetVolume>(volume).await
    }

    async fn set_muted(&self, muted: bool) -> ControllerResult<()> {
        self.call::<SetMuted>(muted).await
    }

    async fn subtitles(&self) -> ControllerResult<SubtitlesState> {
        self.call::<GetSubtitles>(()).await
    }

    async fn create_subtitle_track(&self, track: SubtitleTrack) -> ControllerResult<SubtitleTrack> {
        self.call::<CreateSubtitleTrack>(track).await
    }

    async fn remove_subtitle_track(&self, id: String) -> ControllerResult<()> {
        self.call::<RemoveSubtitleTrack>(id).await
    }

    async fn show_subtitle_track(&self, id: String) -> ControllerResult<()> {
        self.call::<ShowSubtitleTrack>(id).await
    }

    async fn hide_subtitle_track(&self, id: String) -> ControllerResult<()> {
        self.call::<HideSubtitleTrack>(id).await
    }

    async fn audio_tracks(&self) -> ControllerResult<AudioTracksState> {
        self.call::<GetAudioTracks>(()).await
    }

    async fn set_active_audio_track(&self, id: String) -> ControllerResult<()> {
        self.call::<SetActiveAudioTrack>(id).await
    }

    async fn safe_zones(&self) -> ControllerResult<Vec<SafeZone>> {
        self.call::<GetSafeZones>(()).await
    }

    async fn clear_safe_zones(&self) -> ControllerResult<()> {
        self.call::<ClearSafeZones>(()).await
    }

    async fn add_safe_zone(&self, zone: SafeZone) -> ControllerResult<SafeZone> {
        self.call::<AddSafeZone>(zone).await
    }

    async fn help_menu_groups(&self) -> ControllerResult<Vec<HelpMenuGroup>> {
        self.call::<GetHelpMenuGroups>(()).await
    }

    async fn clear_help_menu_groups(&self) -> ControllerResult<()> {
        self.call::<ClearHelpMenuGroups>(()).await
    }

    async fn append_help_menu_group(&self, group: HelpMenuGroup) -> ControllerResult<()> {
        self.call::<AppendHelpMenuGroup>(group).await
    }

    async fn thumbnail_vtt_url(&self) -> ControllerResult<Option<String>> {
        self.call::<GetThumbnailVttUrl>(()).await
    }

    async fn load_thumbnail_vtt_url(&self, url: String) -> ControllerResult<()> {
        self.call::<LoadThumbnailVttUrl>(url).await
    }

    async fn active_named_events(&self) -> ControllerResult<Vec<String>> {
        self.call::<GetActiveNamedEvents>(()).await
    }

    async fn update_active_named_events(&self, names: Vec<String>) -> ControllerResult<()> {
        self.call::<UpdateActiveNamedEvents>(names).await
    }

    async fn main_audio_state(&self) -> ControllerResult<Option<AudioChannelState>> {
        self.call::<GetMainAudioState>(()).await
    }

    async fn sidecar_audio_states(&self) -> ControllerResult<Vec<SidecarAudioState>> {
        self.call::<GetSidecarAudioStates>(()).await
    }

    async fn create_sidecar_audio_track(
        &self,
        track: SidecarAudioTrack,
    ) -> ControllerResult<SidecarAudioTrack> {
        self.call::<CreateSidecarAudioTrack>(track).await
    }

    async fn remove_all_sidecar_audio_tracks(&self) -> ControllerResult<()> {
        self.call::<RemoveAllSidecarAudioTracks>(()).await
    }

    async fn set_sidecar_audio_volume(&self, id: String, volume: f64) -> ControllerResult<()> {
        self.call::<SetSidecarAudioVolume>(SidecarVolumeRequest { id, volume })
            .await
    }

    async fn set_sidecar_audio_muted(&self, id: String, muted: bool) -> ControllerResult<()> {
        self.call::<SetSidecarAudioMuted>(SidecarMutedRequest { id, muted })
            .await
    }

    async fn create_audio_router(
        &self,
        target: AudioTarget,
        inputs: u32,
        outputs: u32,
    ) -> ControllerResult<()> {
        self.call::<CreateAudioRouter>(AudioRouterRequest {
            target,
            inputs,
            outputs,
        })
        .await
    }

    async fn update_audio_routing(
        &self,
        target: AudioTarget,
        connections: Vec<AudioRoutingConnection>,
    ) -> ControllerResult<()> {
        self.call::<UpdateAudioRouting>(AudioRoutingUpdate {
            target,
            connections,
        })
        .await
    }

    async fn create_audio_peak_processor(
        &self,
        target: AudioTarget,
        config: PeakProcessorConfig,
    ) -> ControllerResult<()> {
        self.call::<CreateAudioPeakProcessor>(PeakProcessorRequest { target, config })
            .await
    }

    async fn set_audio_effects_graphs(
        &self,
        target: AudioTarget,
        graphs: Vec<EffectsGraph>,
    ) -> ControllerResult<()> {
        self.call::<SetAudioEffectsGraphs>(EffectsGraphsRequest { target, graphs })
            .await
    }

    async fn audio_solo_mute_state(&self) -> ControllerResult<AudioSoloMuteState> {
        self.call::<GetAudioSoloMuteState>(()).await
    }

    async fn set_audio_solo_mute_state(&self, state: AudioSoloMuteState) -> ControllerResult<()> {
        self.call::<SetAudioSoloMuteState>(state).await
    }

    async fn audio_output_state(&self) -> ControllerResult<AudioOutputState> {
        self.call::<GetAudioOutputState>(()).await
    }

    async fn set_audio_output_volume(&self, volume: f64) -> ControllerResult<()> {
        self.call::<SetAudioOutputVolume>(volume).await
    }

    async fn set_audio_output_muted(&self, muted: bool) -> ControllerResult<()> {
        self.call::<SetAudioOutputMuted>(muted).await
    }

    fn events(&self) -> BoxStream<'static, PlayerEvent> {
        self.events.subscribe()
    }
}
