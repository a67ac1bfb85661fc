//! Snapshot and replay of everything a viewer would notice across a handoff.

use futures::{FutureExt, future::BoxFuture, future::join_all};
use player_handoff_core::{
    ControllerError, ControllerResult, LoadedVideo, MediaController,
    state::{
        AudioChannelState, AudioOutputState, AudioSoloMuteState, AudioTarget, HelpMenuGroup,
        SafeZone, SidecarAudioState, SubtitlesState,
    },
};
use serde::{Deserialize, Serialize};

use crate::error::RestoreError;

/// Immutable snapshot of a player session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedState {
    pub video: Option<LoadedVideo>,
    pub playing: bool,
    pub current_time: f64,
    pub playback_rate: f64,
    pub volume: f64,
    pub muted: bool,
    pub subtitles: SubtitlesState,
    pub active_audio_track_id: Option<String>,
    pub safe_zones: Vec<SafeZone>,
    pub help_menu_groups: Vec<HelpMenuGroup>,
    pub thumbnail_vtt_url: Option<String>,
    pub active_named_events: Vec<String>,
    pub main_audio: Option<AudioChannelState>,
    pub sidecar_audio: Vec<SidecarAudioState>,
    pub solo_mute: AudioSoloMuteState,
    pub audio_output: AudioOutputState,
}

/// Take a snapshot of `controller`. Reads run concurrently.
///
/// # Errors
/// Returns the first failing read.
pub async fn capture(controller: &dyn MediaController) -> ControllerResult<CapturedState> {
    let (
        video,
        playback,
        subtitles,
        audio_tracks,
        safe_zones,
        help_menu_groups,
        thumbnail_vtt_url,
        active_named_events,
        main_audio,
        sidecar_audio,
        solo_mute,
        audio_output,
    ) = tokio::try_join!(
        controller.video(),
        controller.playback_state(),
        controller.subtitles(),
        controller.audio_tracks(),
        controller.safe_zones(),
        controller.help_menu_groups(),
        controller.thumbnail_vtt_url(),
        controller.active_named_events(),
        controller.main_audio_state(),
        controller.sidecar_audio_states(),
        controller.audio_solo_mute_state(),
        controller.audio_output_state(),
    )?;

    Ok(CapturedState {
        video,
        playing: playback.playing,
        current_time: playback.current_time,
        playback_rate: playback.playback_rate,
        volume: playback.volume,
        muted: playback.muted,
        subtitles,
        active_audio_track_id: audio_tracks.active_track_id,
        safe_zones,
        help_menu_groups,
        thumbnail_vtt_url,
        active_named_events,
        main_audio,
        sidecar_audio,
        solo_mute,
        audio_output,
    })
}

/// Outcome of a completed restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Whether the video had to be loaded again.
    pub reloaded: bool,
    /// Post-load operations that failed. The rest were still applied.
    pub failed: Vec<&'static str>,
}

impl RestoreReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Replay `state` onto `controller`.
///
/// Named events are re-registered first, then the video is reloaded if it
/// differs, then every other attribute is applied concurrently. Post-load
/// failures are logged and reported, never returned.
///
/// # Errors
/// Returns error if a pre-load step or the reload fails.
pub async fn restore(
    controller: &dyn MediaController,
    state: &CapturedState,
) -> Result<RestoreReport, RestoreError> {
    controller
        .update_active_named_events(state.active_named_events.clone())
        .await
        .map_err(|source| RestoreError::PreLoad {
            operation: "named events",
            source,
        })?;

    let current = controller.video().await.map_err(RestoreError::Load)?;
    let reloaded = match &state.video {
        Some(video) if current.as_ref() != Some(video) => {
            controller
                .load_video(video.clone())
                .await
                .map_err(RestoreError::Load)?;
            true
        }
        _ => false,
    };

    let steps: Vec<BoxFuture<'_, Vec<Failure>>> = vec![
        restore_playback(controller, state).boxed(),
        restore_subtitles(controller, &state.subtitles).boxed(),
        restore_audio_track(controller, state).boxed(),
        restore_safe_zones(controller, &state.safe_zones).boxed(),
        restore_help_menu(controller, &state.help_menu_groups).boxed(),
        restore_volume(controller, state).boxed(),
        restore_audio_output(controller, &state.audio_output).boxed(),
        restore_main_audio(controller, state.main_audio.as_ref()).boxed(),
        restore_sidecars(controller, state).boxed(),
        restore_thumbnails(controller, state.thumbnail_vtt_url.as_deref()).boxed(),
    ];

    let mut failed = Vec::new();
    for (operation, e) in join_all(steps).await.into_iter().flatten() {
        tracing::warn!(operation, "Restore step failed: {e}");
        if !failed.contains(&operation) {
            failed.push(operation);
        }
    }

    Ok(RestoreReport { reloaded, failed })
}

/// A post-load operation that failed, by name.
type Failure = (&'static str, ControllerError);

/// Collects failures so one refused call never skips its siblings.
#[derive(Default)]
struct Failures(Vec<Failure>);

impl Failures {
    fn check<T>(&mut self, operation: &'static str, result: ControllerResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.0.push((operation, e));
                None
            }
        }
    }

    fn into_vec(self) -> Vec<Failure> {
        self.0
    }
}

async fn restore_playback(controller: &dyn MediaController, state: &CapturedState) -> Vec<Failure> {
    let mut failures = Failures::default();
    failures.check("seek", controller.seek_to_time(state.current_time).await);
    failures.check("playback rate", controller.set_playback_rate(state.playback_rate).await);
    if state.playing {
        // Autoplay may need a user gesture in the new context.
        if let Err(e) = controller.play().await {
            tracing::debug!("Resume after restore rejected: {e}");
        }
    } else {
        failures.check("pause", controller.pause().await);
    }
    failures.into_vec()
}

async fn restore_subtitles(
    controller: &dyn MediaController,
    wanted: &SubtitlesState,
) -> Vec<Failure> {
    let mut failures = Failures::default();
    let Some(current) = failures.check("subtitles", controller.subtitles().await) else {
        return failures.into_vec();
    };

    for track in current.tracks.iter().filter(|t| !t.embedded) {
        if !wanted.tracks.iter().any(|w| w.matches(track)) {
            failures.check("subtitles", controller.remove_subtitle_track(track.id.clone()).await);
        }
    }
    for track in wanted.tracks.iter().filter(|t| !t.embedded) {
        if !current.tracks.iter().any(|c| c.matches(track)) {
            failures.check("subtitles", controller.create_subtitle_track(track.clone()).await);
        }
    }

    let Some(active) = wanted.active_track() else {
        return failures.into_vec();
    };
    let id = if active.embedded {
        current
            .tracks
            .iter()
            .find(|c| c.matches(active))
            .map(|c| c.id.clone())
            .ok_or_else(|| {
                ControllerError::NotFound(format!("embedded subtitle track '{}'", active.label))
            })
    } else {
        Ok(active.id.clone())
    };

    if let Some(id) = failures.check("active subtitle", id) {
        let result = if wanted.hidden {
            controller.hide_subtitle_track(id).await
        } else {
            controller.show_subtitle_track(id).await
        };
        failures.check("active subtitle", result);
    }
    failures.into_vec()
}

async fn restore_audio_track(
    controller: &dyn MediaController,
    state: &CapturedState,
) -> Vec<Failure> {
    let mut failures = Failures::default();
    if let Some(id) = &state.active_audio_track_id {
        failures.check("audio track", controller.set_active_audio_track(id.clone()).await);
    }
    failures.into_vec()
}

async fn restore_safe_zones(controller: &dyn MediaController, zones: &[SafeZone]) -> Vec<Failure> {
    let mut failures = Failures::default();
    failures.check("safe zones", controller.clear_safe_zones().await);
    for zone in zones {
        failures.check("safe zones", controller.add_safe_zone(zone.clone()).await);
    }
    failures.into_vec()
}

async fn restore_help_menu(
    controller: &dyn MediaController,
    groups: &[HelpMenuGroup],
) -> Vec<Failure> {
    let mut failures = Failures::default();
    failures.check("help menu", controller.clear_help_menu_groups().await);
    for group in groups {
        failures.check("help menu", controller.append_help_menu_group(group.clone()).await);
    }
    failures.into_vec()
}

async fn restore_volume(controller: &dyn MediaController, state: &CapturedState) -> Vec<Failure> {
    let mut failures = Failures::default();
    failures.check("volume", controller.set_volume(state.volume).await);
    failures.check("muted", controller.set_muted(state.muted).await);
    failures.into_vec()
}

async fn restore_audio_output(
    controller: &dyn MediaController,
    output: &AudioOutputState,
) -> Vec<Failure> {
    let mut failures = Failures::default();
    failures.check("audio output volume", controller.set_audio_output_volume(output.volume).await);
    failures.check("audio output muted", controller.set_audio_output_muted(output.muted).await);
    failures.into_vec()
}

async fn restore_audio_channel(
    controller: &dyn MediaController,
    operation: &'static str,
    target: &AudioTarget,
    channel: &AudioChannelState,
    failures: &mut Failures,
) {
    if let Some(routing) = &channel.routing {
        let created = failures.check(
            operation,
            controller
                .create_audio_router(target.clone(), routing.inputs, routing.outputs)
                .await,
        );
        // Connections need the router.
        if created.is_some() && !routing.connections.is_empty() {
            failures.check(
                operation,
                controller
                    .update_audio_routing(target.clone(), routing.connections.clone())
                    .await,
            );
        }
    }
    if let Some(config) = &channel.peak_processor {
        failures.check(
            operation,
            controller
                .create_audio_peak_processor(target.clone(), config.clone())
                .await,
        );
    }
    failures.check(
        operation,
        controller
            .set_audio_effects_graphs(target.clone(), channel.effects_graphs.clone())
            .await,
    );
}

async fn restore_main_audio(
    controller: &dyn MediaController,
    main: Option<&AudioChannelState>,
) -> Vec<Failure> {
    let mut failures = Failures::default();
    if let Some(channel) = main {
        restore_audio_channel(controller, "main audio", &AudioTarget::Main, channel, &mut failures).await;
    }
    failures.into_vec()
}

// Solo/mute refers to sidecar ids, so it goes last.
async fn restore_sidecars(controller: &dyn MediaController, state: &CapturedState) -> Vec<Failure> {
    let mut failures = Failures::default();
    failures.check("sidecar audio", controller.remove_all_sidecar_audio_tracks().await);
    for sidecar in &state.sidecar_audio {
        let Some(track) = failures.check(
            "sidecar audio",
            controller.create_sidecar_audio_track(sidecar.track.clone()).await,
        ) else {
            continue;
        };
        failures.check(
            "sidecar audio",
            controller.set_sidecar_audio_volume(track.id.clone(), sidecar.volume).await,
        );
        failures.check(
            "sidecar audio",
            controller.set_sidecar_audio_muted(track.id.clone(), sidecar.muted).await,
        );
        restore_audio_channel(
            controller,
            "sidecar audio",
            &AudioTarget::Sidecar(track.id),
            &sidecar.audio,
            &mut failures,
        )
        .await;
    }
    failures.check("solo/mute", controller.set_audio_solo_mute_state(state.solo_mute.clone()).await);
    failures.into_vec()
}

async fn restore_thumbnails(controller: &dyn MediaController, url: Option<&str>) -> Vec<Failure> {
    let mut failures = Failures::default();
    if let Some(url) = url {
        failures.check("thumbnails", controller.load_thumbnail_vtt_url(url.to_string()).await);
    }
    failures.into_vec()
}
