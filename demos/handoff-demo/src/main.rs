//! Detach a playing video into an in-process "window" and bring it back.
//!
//! Run with: cargo run -p handoff-demo [config.json]
//!
//! Set `RUST_LOG=debug` to follow the handshake and heartbeat traffic.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use futures::StreamExt;
use player_handoff_core::{
    Bus, HandoffConfig, LoadedVideo, LocalBus, MediaController, MemoryPlayer, state::SafeZone,
};
use player_handoff_session::{HandoffManager, InProcessWindows};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DETACHED_URL: &str = "https://player.example/detached";
const SUBTITLES: &str = "WEBVTT\n\n00:01.000 --> 00:04.000\nHello from the detached window";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config()?;
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let windows = Arc::new(
        InProcessWindows::new(Arc::clone(&bus), config.clone()).with_player_factory(|| {
            Arc::new(MemoryPlayer::new().with_embedded_subtitle("English", "en", SUBTITLES))
        }),
    );
    let local = Arc::new(MemoryPlayer::new().with_embedded_subtitle("English", "en", SUBTITLES));
    let manager = HandoffManager::new(config, bus, windows.clone(), local)?;

    let mut locations = manager.locations();
    tokio::spawn(async move {
        while let Some(location) = locations.next().await {
            tracing::info!(%location, "Location");
        }
    });

    let player = manager.controller();
    player
        .load_video(
            LoadedVideo::new("https://cdn.example/big-buck-bunny.mp4", 24.0)
                .with_duration(596.0),
        )
        .await?;
    player.seek_to_time(42.5).await?;
    player.set_volume(0.7).await?;
    player.add_safe_zone(SafeZone::aspect("16/9", 30.0)).await?;
    let track = player.subtitles().await?.tracks.into_iter().next();
    if let Some(track) = track {
        player.show_subtitle_track(track.id).await?;
    }
    player.play().await?;
    report("Before detach", player.as_ref()).await?;

    manager.detach().await.context("detach failed")?;
    if let Some(request) = windows.last_request() {
        tracing::info!(url = %request.url, "Detached window opened");
    }
    report("Detached", player.as_ref()).await?;

    player.seek_to_time(120.0).await?;
    player.set_volume(0.4).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    manager.attach().await.context("attach failed")?;
    report("Attached again", player.as_ref()).await?;

    manager.shutdown().await;
    Ok(())
}

fn load_config() -> anyhow::Result<HandoffConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {path}"))?;
            HandoffConfig::from_json(&json).with_context(|| format!("invalid config {path}"))
        }
        None => Ok(HandoffConfig::with_detach_url(DETACHED_URL)),
    }
}

async fn report(stage: &str, player: &dyn MediaController) -> anyhow::Result<()> {
    let state = player.playback_state().await?;
    let subtitles = player.subtitles().await?;
    tracing::info!(
        stage,
        time = state.current_time,
        volume = state.volume,
        playing = state.playing,
        subtitle = subtitles.active_track().map(|t| t.label.as_str()),
        "Player state"
    );
    Ok(())
}
