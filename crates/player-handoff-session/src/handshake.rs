//! Initiator side of the connect/connected exchange.

use player_handoff_core::HandoffConfig;
use player_handoff_remote::actions::{Connect, ConnectRequest, Connected, ConnectedNotice};
use player_handoff_transport::ActionChannel;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::HandshakeError;

/// Identifies one established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRecord {
    pub proxy_id: String,
    pub private_channel_id: String,
}

/// Connect to the detached window answering for `proxy_id`.
///
/// `connect` is re-sent every retry interval until a reply arrives or the
/// response timeout elapses; `connected` is then sent and must be
/// acknowledged. Firing `breaker` abandons the attempt.
///
/// # Errors
/// Returns error if nobody answers in time, the reply is for another proxy,
/// the acknowledgment fails, or the attempt is cancelled.
pub async fn initiate(
    channel: &ActionChannel,
    proxy_id: &str,
    config: &HandoffConfig,
    breaker: &CancellationToken,
) -> Result<HandshakeRecord, HandshakeError> {
    tokio::select! {
        biased;
        () = breaker.cancelled() => Err(HandshakeError::Cancelled),
        result = run(channel, proxy_id, config) => result,
    }
}

async fn run(
    channel: &ActionChannel,
    proxy_id: &str,
    config: &HandoffConfig,
) -> Result<HandshakeRecord, HandshakeError> {
    let request = ConnectRequest {
        proxy_id: proxy_id.to_string(),
    };
    let deadline = Instant::now() + config.response_timeout();

    let reply = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(HandshakeError::NoCounterpart {
                proxy_id: proxy_id.to_string(),
                timeout_ms: config.response_timeout_ms,
            });
        }
        let attempt = remaining.min(config.connect_retry_interval());
        match channel.send_and_await_within::<Connect>(&request, attempt).await {
            Ok(reply) => break reply,
            Err(e) if e.is_timeout() => {
                tracing::trace!(proxy_id, "Connect unanswered, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    };

    if reply.proxy_id != proxy_id {
        return Err(HandshakeError::ProxyMismatch {
            expected: proxy_id.to_string(),
            actual: reply.proxy_id,
        });
    }

    channel
        .send_and_await::<Connected>(&ConnectedNotice {
            proxy_id: proxy_id.to_string(),
            private_channel_id: reply.private_channel_id.clone(),
        })
        .await?;

    tracing::debug!(proxy_id, private_channel_id = %reply.private_channel_id, "Handshake complete");
    Ok(HandshakeRecord {
        proxy_id: proxy_id.to_string(),
        private_channel_id: reply.private_channel_id,
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use player_handoff_core::{Bus, LocalBus, MediaController, MemoryPlayer};
    use player_handoff_remote::actions::ConnectResponse;
    use player_handoff_transport::{ErrorPayload, MessageChannel};

    use super::*;
    use crate::detached::{DetachedSession, DetachedState};

    fn config() -> HandoffConfig {
        HandoffConfig::with_detach_url("https://player.example/detached")
    }

    fn handshake_channel(bus: &dyn Bus, config: &HandoffConfig) -> ActionChannel {
        ActionChannel::new(
            MessageChannel::open(bus, &config.handshake_channel_id),
            config.response_timeout(),
        )
    }

    #[tokio::test]
    async fn establishes_a_private_channel() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let config = config();
        let player: Arc<dyn MediaController> = Arc::new(MemoryPlayer::new());
        let popup = DetachedSession::start(Arc::clone(&bus), player, &config, "proxy-1");

        let channel = handshake_channel(bus.as_ref(), &config);
        let record = initiate(&channel, "proxy-1", &config, &CancellationToken::new()).await;
        let record = record.unwrap();

        assert_eq!(record.proxy_id, "proxy-1");
        assert!(!record.private_channel_id.is_empty());
        assert_eq!(popup.state(), DetachedState::Live);
        assert_eq!(popup.private_channel_id().as_deref(), Some(record.private_channel_id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_retried_until_the_window_listens() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let config = config();
        let channel = handshake_channel(bus.as_ref(), &config);

        let late_bus = Arc::clone(&bus);
        let late_config = config.clone();
        let popup = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_200)).await;
            let player: Arc<dyn MediaController> = Arc::new(MemoryPlayer::new());
            DetachedSession::start(late_bus, player, &late_config, "proxy-1")
        });

        let record = initiate(&channel, "proxy-1", &config, &CancellationToken::new()).await;
        assert!(record.is_ok());
        drop(popup.await);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_without_a_counterpart() {
        let bus = LocalBus::new();
        let config = config();
        let channel = handshake_channel(&bus, &config);

        let err = initiate(&channel, "proxy-1", &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::NoCounterpart { timeout_ms: 20_000, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn other_proxies_do_not_answer() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let config = config();
        let player: Arc<dyn MediaController> = Arc::new(MemoryPlayer::new());
        let stale = DetachedSession::start(Arc::clone(&bus), player, &config, "proxy-old");

        let channel = handshake_channel(bus.as_ref(), &config);
        let err = initiate(&channel, "proxy-new", &config, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HandshakeError::NoCounterpart { .. }));
        assert_eq!(stale.state(), DetachedState::Waiting);
    }

    #[tokio::test]
    async fn mismatched_reply_is_rejected() {
        let bus = LocalBus::new();
        let config = config();
        let responder = handshake_channel(&bus, &config);
        let _server = responder.serve::<Connect, _, _>(|_| async move {
            Ok::<_, ErrorPayload>(ConnectResponse {
                proxy_id: "someone-else".to_string(),
                private_channel_id: "private".to_string(),
            })
        });

        let channel = handshake_channel(&bus, &config);
        let err = initiate(&channel, "proxy-1", &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::ProxyMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_abandons_the_attempt() {
        let bus = LocalBus::new();
        let config = config();
        let channel = handshake_channel(&bus, &config);
        let breaker = CancellationToken::new();

        let cancel = breaker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            cancel.cancel();
        });

        let err = initiate(&channel, "proxy-1", &config, &breaker).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Cancelled));
    }
}
