//! Core abstractions for cross-window playback handoff.
//!
//! This crate provides the fundamental building blocks:
//! - `Bus` / `LocalBus` - Named multicast channels between contexts
//! - `EventStream` / `LatestStream` - Plain and replaying event streams
//! - `MediaController` - The player surface every delegate implements
//! - `HandoffConfig` - Explicit configuration, no globals
//! - `MemoryPlayer` - In-memory engine for tests and demos

pub mod bus;
pub mod config;
pub mod memory;
pub mod state;
pub mod stream;
pub mod traits;

pub use bus::{Bus, BusChannel, BusError, BusReceiver, LocalBus};
pub use config::{ConfigError, HANDSHAKE_CHANNEL_ID, HandoffConfig};
pub use memory::MemoryPlayer;
pub use state::{LoadedVideo, PlaybackLocation, PlayerEvent};
pub use stream::{EventStream, LatestStream};
pub use traits::{
    ControllerError, ControllerResult, MediaController, WindowError, WindowManager, WindowRequest,
};
