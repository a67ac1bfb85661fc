//! Detach/attach orchestration for the media player.
//!
//! Provides:
//! - `HandoffManager` - The playback-location state machine
//! - `ControllerSwitch` - Stable controller forwarding to the current engine
//! - `capture` / `restore` - Player state snapshot and replay
//! - `handshake` / `heartbeat` - Session establishment and liveness
//! - `DetachedSession` - The detached window's side of the protocol
//! - `InProcessWindows` - Window manager that runs the popup in-process

pub mod capture;
pub mod detached;
pub mod error;
pub mod handshake;
pub mod heartbeat;
pub mod manager;
pub mod switch;
pub mod windows;

pub use capture::{CapturedState, RestoreReport, capture, restore};
pub use detached::{DetachedSession, DetachedState};
pub use error::{HandoffError, HandshakeError, Precondition, RestoreError};
pub use handshake::HandshakeRecord;
pub use heartbeat::{HeartbeatFailure, HeartbeatMonitor, HeartbeatPolicy};
pub use manager::HandoffManager;
pub use switch::ControllerSwitch;
pub use windows::InProcessWindows;
