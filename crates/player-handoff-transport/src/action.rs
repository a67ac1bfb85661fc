//! Typed actions on top of a [`MessageChannel`].
//!
//! An [`Action`] names a request and declares its request and response
//! shapes. Call sites get four access patterns per action:
//! - [`ActionChannel::send`] - fire-and-forget
//! - [`ActionChannel::data_stream`] - passive listeners, data only
//! - [`ActionChannel::request_stream`] - requests with a one-shot response hook
//! - [`ActionChannel::send_and_await`] - call and wait for the typed response
//!
//! Payloads are checked against the declared shapes at the boundary; a
//! mismatch is a protocol error, never a panic.

use std::{future::Future, marker::PhantomData, sync::Arc, time::Duration};

use futures::{StreamExt, future, stream::BoxStream};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{
    channel::MessageChannel,
    error::TransportError,
    protocol::{ErrorPayload, RequestMessage, ResponseMessage, WireMessage},
};

/// A named action with declared request and response shapes.
pub trait Action: Send + Sync + 'static {
    /// Wire name, unique per channel.
    const NAME: &'static str;
    type Request: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Response: Serialize + DeserializeOwned + Send + Sync + 'static;
}

/// Declare marker types implementing [`Action`].
///
/// ```ignore
/// actions! {
///     /// Start playback.
///     Play = "player.play": () => ();
/// }
/// ```
#[macro_export]
macro_rules! actions {
    ($( $(#[$meta:meta])* $name:ident = $wire:literal : $req:ty => $resp:ty; )*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy)]
            pub enum $name {}

            impl $crate::action::Action for $name {
                const NAME: &'static str = $wire;
                type Request = $req;
                type Response = $resp;
            }
        )*
    };
}

fn encode<T: Serialize>(action: &str, value: &T) -> Result<Value, TransportError> {
    serde_json::to_value(value)
        .map_err(|e| TransportError::Protocol(format!("cannot encode '{action}' payload: {e}")))
}

fn decode<T: DeserializeOwned>(action: &str, data: Option<Value>) -> Result<T, TransportError> {
    serde_json::from_value(data.unwrap_or(Value::Null))
        .map_err(|e| TransportError::Protocol(format!("unexpected '{action}' payload: {e}")))
}

/// Action layer over one channel. Cheap to clone.
#[derive(Clone)]
pub struct ActionChannel {
    channel: MessageChannel,
    timeout: Duration,
}

impl ActionChannel {
    /// Wrap `channel`, using `timeout` for calls that do not pass their own.
    #[must_use]
    pub const fn new(channel: MessageChannel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    #[must_use]
    pub const fn channel(&self) -> &MessageChannel {
        &self.channel
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// Fire-and-forget.
    ///
    /// # Errors
    /// Returns error if the payload cannot be encoded or posted.
    pub fn send<A: Action>(&self, data: &A::Request) -> Result<(), TransportError> {
        let data = encode(A::NAME, data)?;
        self.channel
            .send(&WireMessage::Request(RequestMessage::new(A::NAME, Some(data))))
    }

    /// Call and wait for the typed response, using the default timeout.
    ///
    /// # Errors
    /// Returns error on post failure, timeout, remote failure, or a response
    /// that does not match `A::Response`.
    pub async fn send_and_await<A: Action>(
        &self,
        data: &A::Request,
    ) -> Result<A::Response, TransportError> {
        self.send_and_await_within::<A>(data, self.timeout).await
    }

    /// Call and wait for the typed response within `timeout`.
    ///
    /// # Errors
    /// Same as [`ActionChannel::send_and_await`].
    pub async fn send_and_await_within<A: Action>(
        &self,
        data: &A::Request,
        timeout: Duration,
    ) -> Result<A::Response, TransportError> {
        let data = encode(A::NAME, data)?;
        let response = self
            .channel
            .send_and_await_response(RequestMessage::new(A::NAME, Some(data)), timeout)
            .await?;
        decode(A::NAME, response)
    }

    /// Payloads of `A` posted from now on. Malformed payloads are skipped.
    #[must_use]
    pub fn data_stream<A: Action>(&self) -> BoxStream<'static, A::Request> {
        self.channel
            .requests()
            .filter(|request| future::ready(request.action_name == A::NAME))
            .filter_map(|request| {
                future::ready(match decode::<A::Request>(A::NAME, request.data) {
                    Ok(data) => Some(data),
                    Err(e) => {
                        tracing::warn!(action = A::NAME, "Skipping notice: {e}");
                        None
                    }
                })
            })
            .boxed()
    }

    /// Requests for `A` posted from now on, each with its response hook.
    ///
    /// Malformed requests are answered with a `ProtocolError` and skipped.
    #[must_use]
    pub fn request_stream<A: Action>(&self) -> BoxStream<'static, ActionRequest<A>> {
        let channel = self.channel.clone();
        self.channel
            .requests()
            .filter(|request| future::ready(request.action_name == A::NAME))
            .filter_map(move |request| {
                let responder = Responder::<A>::new(channel.clone(), request.message_id);
                future::ready(match decode::<A::Request>(A::NAME, request.data) {
                    Ok(data) => Some(ActionRequest { data, responder }),
                    Err(e) => {
                        tracing::warn!(action = A::NAME, "Rejecting request: {e}");
                        let _ = responder.respond(Err(ErrorPayload::new("ProtocolError", e.to_string())));
                        None
                    }
                })
            })
            .boxed()
    }

    /// Answer every request for `A` with `handler`.
    ///
    /// Each request runs on its own task; the handler's future collapses to
    /// the single response sent back to the caller.
    pub fn serve<A, F, Fut>(&self, handler: F) -> JoinHandle<()>
    where
        A: Action,
        F: Fn(A::Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<A::Response, ErrorPayload>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut requests = self.request_stream::<A>();
        tokio::spawn(async move {
            while let Some(request) = requests.next().await {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let (data, responder) = request.into_parts();
                    let result = handler(data).await;
                    if let Err(e) = responder.respond(result) {
                        tracing::debug!(action = A::NAME, "Failed to send response: {e}");
                    }
                });
            }
        })
    }

    /// Destroy the underlying channel.
    pub fn destroy(&self) {
        self.channel.destroy();
    }
}

/// An incoming request of `A` with its response hook.
pub struct ActionRequest<A: Action> {
    pub data: A::Request,
    responder: Responder<A>,
}

impl<A: Action> ActionRequest<A> {
    /// Answer this request.
    ///
    /// # Errors
    /// Returns error if the response cannot be posted.
    pub fn respond(self, result: Result<A::Response, ErrorPayload>) -> Result<(), TransportError> {
        self.responder.respond(result)
    }

    /// Leave the request for another context to answer.
    pub fn decline(self) {
        self.responder.decline();
    }

    #[must_use]
    pub fn into_parts(self) -> (A::Request, Responder<A>) {
        (self.data, self.responder)
    }
}

/// Response hook for one request. Consumed by the single answer.
///
/// Dropping it unanswered sends a `ProtocolError` so the caller does not
/// wait out its timeout.
pub struct Responder<A: Action> {
    channel: MessageChannel,
    request_message_id: Option<String>,
    _action: PhantomData<fn() -> A>,
}

impl<A: Action> Responder<A> {
    const fn new(channel: MessageChannel, request_message_id: String) -> Self {
        Self {
            channel,
            request_message_id: Some(request_message_id),
            _action: PhantomData,
        }
    }

    /// Send the response.
    ///
    /// # Errors
    /// Returns error if the response cannot be encoded or posted.
    pub fn respond(mut self, result: Result<A::Response, ErrorPayload>) -> Result<(), TransportError> {
        let Some(id) = self.request_message_id.take() else {
            return Ok(());
        };
        let response = match result {
            Ok(value) => match encode(A::NAME, &value) {
                Ok(data) => ResponseMessage::success(id, Some(data)),
                Err(e) => ResponseMessage::failure(id, ErrorPayload::new(e.name(), e.to_string())),
            },
            Err(error) => ResponseMessage::failure(id, error),
        };
        self.channel.respond(response)
    }

    /// Consume without answering.
    pub fn decline(mut self) {
        self.request_message_id = None;
    }
}

impl<A: Action> Drop for Responder<A> {
    fn drop(&mut self) {
        if let Some(id) = self.request_message_id.take() {
            tracing::warn!(action = A::NAME, message_id = %id, "Request dropped without a response");
            let _ = self.channel.respond(ResponseMessage::failure(
                id,
                ErrorPayload::new("ProtocolError", format!("'{}' was dropped without a response", A::NAME)),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use player_handoff_core::LocalBus;
    use serde::Deserialize;
    use tokio_test::assert_ok;

    use super::*;
    use crate::channel::DEFAULT_RESPONSE_TIMEOUT;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Seek {
        pub time: f64,
    }

    crate::actions! {
        SeekTo = "test.seekTo": Seek => f64;
        Notice = "test.notice": String => ();
        Ignored = "test.ignored": () => ();
    }

    fn pair() -> (ActionChannel, ActionChannel) {
        let bus = LocalBus::new();
        let a = MessageChannel::open(&bus, "actions");
        let b = MessageChannel::open(&bus, "actions");
        (
            ActionChannel::new(a, DEFAULT_RESPONSE_TIMEOUT),
            ActionChannel::new(b, DEFAULT_RESPONSE_TIMEOUT),
        )
    }

    #[tokio::test]
    async fn typed_call_round_trips() {
        let (caller, responder) = pair();
        let _server = responder.serve::<SeekTo, _, _>(|seek| async move { Ok(seek.time * 2.0) });

        let doubled = caller.send_and_await::<SeekTo>(&Seek { time: 21.25 }).await;
        assert_eq!(assert_ok!(doubled), 42.5);
    }

    #[tokio::test]
    async fn handler_errors_reach_the_caller() {
        let (caller, responder) = pair();
        let _server = responder.serve::<SeekTo, _, _>(|_| async move {
            Err(ErrorPayload::new("InvalidArgument", "seek past end"))
        });

        let err = caller.send_and_await::<SeekTo>(&Seek { time: 1e9 }).await.unwrap_err();
        assert_eq!(err.name(), "InvalidArgument");
        assert_eq!(err.to_string(), "InvalidArgument: seek past end");
    }

    #[tokio::test]
    async fn notices_reach_data_streams() {
        let (sender, listener) = pair();
        let mut notices = listener.data_stream::<Notice>();

        assert_ok!(sender.send::<Notice>(&"video ready".to_string()));
        assert_eq!(notices.next().await.as_deref(), Some("video ready"));
    }

    #[tokio::test]
    async fn dropped_responder_fails_fast() {
        let (caller, responder) = pair();
        let mut requests = responder.request_stream::<Ignored>();
        let _task = tokio::spawn(async move {
            while let Some(request) = requests.next().await {
                drop(request);
            }
        });

        let err = caller.send_and_await::<Ignored>(&()).await.unwrap_err();
        assert_eq!(err.name(), "ProtocolError");
    }

    #[tokio::test(start_paused = true)]
    async fn declined_request_times_out() {
        let (caller, responder) = pair();
        let mut requests = responder.request_stream::<Ignored>();
        let _task = tokio::spawn(async move {
            while let Some(request) = requests.next().await {
                request.decline();
            }
        });

        let err = caller
            .send_and_await_within::<Ignored>(&(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn malformed_request_is_rejected_at_the_boundary() {
        let (caller, responder) = pair();
        let _server = responder.serve::<SeekTo, _, _>(|seek| async move { Ok(seek.time) });

        let err = caller
            .channel()
            .send_and_await_response(
                RequestMessage::new(SeekTo::NAME, Some(serde_json::json!("not a seek"))),
                DEFAULT_RESPONSE_TIMEOUT,
            )
            .await
            .unwrap_err();
        assert_eq!(err.name(), "ProtocolError");
    }
}
