//! Request/response messaging between browsing contexts.
//!
//! Provides:
//! - Wire protocol (JSON envelopes with correlated responses)
//! - Message channels over any [`player_handoff_core::Bus`]
//! - Typed actions with declared request and response shapes

pub mod action;
pub mod channel;
pub mod error;
pub mod protocol;

pub use action::{Action, ActionChannel, ActionRequest, Responder};
pub use channel::{DEFAULT_RESPONSE_TIMEOUT, MessageChannel};
pub use error::TransportError;
pub use protocol::{ErrorPayload, RequestMessage, ResponseMessage, WireMessage};
