//! Player control over a private session channel.
//!
//! - `actions` - the action map shared by both windows
//! - `RemoteController` - proxy implementing `MediaController` via actions
//! - `serve_controller` - host side answering those actions

pub mod actions;
pub mod host;
pub mod proxy;

pub use host::{ControllerService, relay_events, serve_controller};
pub use proxy::RemoteController;
