//! Serves a local controller to a remote proxy.

use std::sync::Arc;

use futures::StreamExt;
use player_handoff_core::MediaController;
use player_handoff_transport::{ActionChannel, ErrorPayload};
use tokio::task::JoinHandle;

use crate::actions::{
    AddSafeZone, AppendHelpMenuGroup, ClearHelpMenuGroups, ClearSafeZones,
    CreateAudioPeakProcessor, CreateAudioRouter, CreateSidecarAudioTrack, CreateSubtitleTrack,
    GetActiveNamedEvents, GetAudioOutputState, GetAudioSoloMuteState, GetAudioTracks,
    GetHelpMenuGroups, GetMainAudioState, GetPlaybackState, GetSafeZones, GetSidecarAudioStates,
    GetSubtitles, GetThumbnailVttUrl, GetVideo, HideSubtitleTrack, LoadThumbnailVttUrl, LoadVideo,
    Pause, Play, PlayerEventNotice, RemoveAllSidecarAudioTracks, RemoveSubtitleTrack, SeekToTime,
    SetActiveAudioTrack, SetAudioEffectsGraphs, SetAudioOutputMuted, SetAudioOutputVolume,
    SetAudioSoloMuteState, SetMuted, SetPlaybackRate, SetSidecarAudioMuted,
    SetSidecarAudioVolume, SetVolume, ShowSubtitleTrack, UpdateActiveNamedEvents,
    UpdateAudioRouting,
};

/// Running controller action handlers. Dropping it stops them.
pub struct ControllerService {
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerService {
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ControllerService {
    fn drop(&mut self) {
        self.stop();
    }
}

macro_rules! serve {
    ($channel:expr, $controller:expr, $action:ty, |$c:ident, $arg:pat_param| $call:expr) => {{
        let $c = Arc::clone($controller);
        $channel.serve::<$action, _, _>(move |$arg| {
            let $c = Arc::clone(&$c);
            async move { $call.await.map_err(|e| ErrorPayload::from(&e)) }
        })
    }};
}

/// Answer every `player.*` action on `channel` with `controller`.
#[must_use]
pub fn serve_controller(
    channel: &ActionChannel,
    controller: &Arc<dyn MediaController>,
) -> ControllerService {
    let ch = channel;
    let ctl = controller;
    let tasks = vec![
        serve!(ch, ctl, GetVideo, |c, ()| c.video()),
        serve!(ch, ctl, LoadVideo, |c, video| c.load_video(video)),
        serve!(ch, ctl, GetPlaybackState, |c, ()| c.playback_state()),
        serve!(ch, ctl, Play, |c, ()| c.play()),
        serve!(ch, ctl, Pause, |c, ()| c.pause()),
        serve!(ch, ctl, SeekToTime, |c, time| c.seek_to_time(time)),
        serve!(ch, ctl, SetPlaybackRate, |c, rate| c.set_playback_rate(rate)),
        serve!(ch, ctl, SetVolume, |c, volume| c.set_volume(volume)),
        serve!(ch, ctl, SetMuted, |c, muted| c.set_muted(muted)),
        serve!(ch, ctl, GetSubtitles, |c, ()| c.subtitles()),
        serve!(ch, ctl, CreateSubtitleTrack, |c, track| c.create_subtitle_track(track)),
        serve!(ch, ctl, RemoveSubtitleTrack, |c, id| c.remove_subtitle_track(id)),
        serve!(ch, ctl, ShowSubtitleTrack, |c, id| c.show_subtitle_track(id)),
        serve!(ch, ctl, HideSubtitleTrack, |c, id| c.hide_subtitle_track(id)),
        serve!(ch, ctl, GetAudioTracks, |c, ()| c.audio_tracks()),
        serve!(ch, ctl, SetActiveAudioTrack, |c, id| c.set_active_audio_track(id)),
        serve!(ch, ctl, GetSafeZones, |c, ()| c.safe_zones()),
        serve!(ch, ctl, ClearSafeZones, |c, ()| c.clear_safe_zones()),
        serve!(ch, ctl, AddSafeZone, |c, zone| c.add_safe_zone(zone)),
        serve!(ch, ctl, GetHelpMenuGroups, |c, ()| c.help_menu_groups()),
        serve!(ch, ctl, ClearHelpMenuGroups, |c, ()| c.clear_help_menu_groups()),
        serve!(ch, ctl, AppendHelpMenuGroup, |c, group| c.append_help_menu_group(group)),
        serve!(ch, ctl, GetThumbnailVttUrl, |c, ()| c.thumbnail_vtt_url()),
        serve!(ch, ctl, LoadThumbnailVttUrl, |c, url| c.load_thumbnail_vtt_url(url)),
        serve!(ch, ctl, GetActiveNamedEvents, |c, ()| c.active_named_events()),
        serve!(ch, ctl, UpdateActiveNamedEvents, |c, names| c.update_active_named_events(names)),
        serve!(ch, ctl, GetMainAudioState, |c, ()| c.main_audio_state()),
        serve!(ch, ctl, GetSidecarAudioStates, |c, ()| c.sidecar_audio_states()),
        serve!(ch, ctl, CreateSidecarAudioTrack, |c, track| c.create_sidecar_audio_track(track)),
        serve!(ch, ctl, RemoveAllSidecarAudioTracks, |c, ()| c.remove_all_sidecar_audio_tracks()),
        serve!(ch, ctl, SetSidecarAudioVolume, |c, req| c.set_sidecar_audio_volume(req.id, req.volume)),
        serve!(ch, ctl, SetSidecarAudioMuted, |c, req| c.set_sidecar_audio_muted(req.id, req.muted)),
        serve!(ch, ctl, CreateAudioRouter, |c, req| c.create_audio_router(req.target, req.inputs, req.outputs)),
        serve!(ch, ctl, UpdateAudioRouting, |c, req| c.update_audio_routing(req.target, req.connections)),
        serve!(ch, ctl, CreateAudioPeakProcessor, |c, req| c.create_audio_peak_processor(req.target, req.config)),
        serve!(ch, ctl, SetAudioEffectsGraphs, |c, req| c.set_audio_effects_graphs(req.target, req.graphs)),
        serve!(ch, ctl, GetAudioSoloMuteState, |c, ()| c.audio_solo_mute_state()),
        serve!(ch, ctl, SetAudioSoloMuteState, |c, state| c.set_audio_solo_mute_state(state)),
        serve!(ch, ctl, GetAudioOutputState, |c, ()| c.audio_output_state()),
        serve!(ch, ctl, SetAudioOutputVolume, |c, volume| c.set_audio_output_volume(volume)),
        serve!(ch, ctl, SetAudioOutputMuted, |c, muted| c.set_audio_output_muted(muted)),
    ];
    tracing::debug!(channel = %channel.name(), handlers = tasks.len(), "Controller service started");
    ControllerService { tasks }
}

/// Forward every event of `controller` over `channel` until it is destroyed.
pub fn relay_events(
    channel: ActionChannel,
    controller: &Arc<dyn MediaController>,
) -> JoinHandle<()> {
    let mut events = controller.events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if channel.channel().is_destroyed() {
                break;
            }
            if let Err(e) = channel.send::<PlayerEventNotice>(&event) {
                tracing::debug!(channel = %channel.name(), "Failed to relay player event: {e}");
            }
        }
    })
}
