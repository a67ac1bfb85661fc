//! Liveness checks for an established session.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use player_handoff_core::HandoffConfig;
use player_handoff_remote::actions::{Heartbeat, HeartbeatRequest};
use player_handoff_transport::ActionChannel;
use thiserror::Error;
use tokio::{
    sync::oneshot,
    task::{JoinHandle, JoinSet},
    time::{Instant, MissedTickBehavior},
};

use crate::handshake::HandshakeRecord;

/// Thresholds for declaring the counterpart gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub interval: Duration,
    pub failure_time_diff: Duration,
    pub failure_threshold: u32,
}

impl HeartbeatPolicy {
    #[must_use]
    pub const fn from_config(config: &HandoffConfig) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            failure_time_diff: config.heartbeat_failure_time_diff(),
            failure_threshold: config.heartbeat_failure_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Healthy,
    Missed(u32),
    Failed(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub last_received: Instant,
    pub consecutive_failures: u32,
}

impl HeartbeatRecord {
    #[must_use]
    pub const fn new(now: Instant) -> Self {
        Self {
            last_received: now,
            consecutive_failures: 0,
        }
    }

    pub const fn record_heartbeat(&mut self, now: Instant) {
        self.last_received = now;
        self.consecutive_failures = 0;
    }

    /// Count a miss if the last heartbeat is older than the allowed gap.
    pub fn check(&mut self, now: Instant, policy: &HeartbeatPolicy) -> HeartbeatStatus {
        if now.saturating_duration_since(self.last_received) <= policy.failure_time_diff {
            return HeartbeatStatus::Healthy;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= policy.failure_threshold {
            HeartbeatStatus::Failed(self.consecutive_failures)
        } else {
            HeartbeatStatus::Missed(self.consecutive_failures)
        }
    }
}

/// The counterpart stopped answering heartbeats.
#[derive(Debug, Clone, Error)]
#[error("No heartbeat from proxy '{proxy_id}' for {missed} consecutive checks")]
pub struct HeartbeatFailure {
    pub proxy_id: String,
    pub missed: u32,
}

/// Periodic heartbeat over the handshake channel. Dropping it stops it.
pub struct HeartbeatMonitor {
    record: Arc<Mutex<HeartbeatRecord>>,
    task: JoinHandle<()>,
}

impl HeartbeatMonitor {
    /// Start probing `session` on `channel`.
    ///
    /// The receiver resolves once, when the failure threshold is reached.
    #[must_use]
    pub fn spawn(
        channel: ActionChannel,
        session: &HandshakeRecord,
        policy: HeartbeatPolicy,
    ) -> (Self, oneshot::Receiver<HeartbeatFailure>) {
        let record = Arc::new(Mutex::new(HeartbeatRecord::new(Instant::now())));
        let (failure_tx, failure_rx) = oneshot::channel();
        let request = HeartbeatRequest {
            proxy_id: session.proxy_id.clone(),
            private_channel_id: session.private_channel_id.clone(),
        };
        let task = tokio::spawn(run(
            channel,
            request,
            policy,
            Arc::clone(&record),
            failure_tx,
        ));
        (Self { record, task }, failure_rx)
    }

    #[must_use]
    pub fn record(&self) -> HeartbeatRecord {
        *self.record.lock()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    channel: ActionChannel,
    request: HeartbeatRequest,
    policy: HeartbeatPolicy,
    record: Arc<Mutex<HeartbeatRecord>>,
    failure: oneshot::Sender<HeartbeatFailure>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pings = JoinSet::new();

    loop {
        ticker.tick().await;
        while pings.try_join_next().is_some() {}

        let channel = channel.clone();
        let ping = request.clone();
        let shared = Arc::clone(&record);
        pings.spawn(async move {
            match channel
                .send_and_await_within::<Heartbeat>(&ping, policy.failure_time_diff)
                .await
            {
                Ok(reply) if reply.proxy_id == ping.proxy_id => {
                    shared.lock().record_heartbeat(Instant::now());
                }
                Ok(reply) => {
                    tracing::debug!(proxy_id = %reply.proxy_id, "Heartbeat answered by another proxy");
                }
                Err(e) => tracing::trace!(proxy_id = %ping.proxy_id, "Heartbeat unanswered: {e}"),
            }
        });

        let status = record.lock().check(Instant::now(), &policy);
        match status {
            HeartbeatStatus::Healthy => {}
            HeartbeatStatus::Missed(missed) => {
                tracing::debug!(proxy_id = %request.proxy_id, missed, "Heartbeat missed");
            }
            HeartbeatStatus::Failed(missed) => {
                tracing::warn!(proxy_id = %request.proxy_id, missed, "Detached window stopped responding");
                let _ = failure.send(HeartbeatFailure {
                    proxy_id: request.proxy_id.clone(),
                    missed,
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use player_handoff_core::LocalBus;
    use player_handoff_remote::actions::HeartbeatResponse;
    use player_handoff_transport::{ErrorPayload, MessageChannel};

    use super::*;

    fn policy() -> HeartbeatPolicy {
        HeartbeatPolicy::from_config(&HandoffConfig::default())
    }

    fn session() -> HandshakeRecord {
        HandshakeRecord {
            proxy_id: "proxy-1".to_string(),
            private_channel_id: "private-1".to_string(),
        }
    }

    #[test]
    fn defaults_match_the_documented_thresholds() {
        let policy = policy();
        assert_eq!(policy.interval, Duration::from_millis(1_000));
        assert_eq!(policy.failure_time_diff, Duration::from_millis(2_001));
        assert_eq!(policy.failure_threshold, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn any_heartbeat_resets_the_failure_count() {
        let policy = policy();
        let start = Instant::now();
        let mut record = HeartbeatRecord::new(start);

        assert_eq!(record.check(start + Duration::from_secs(1), &policy), HeartbeatStatus::Healthy);
        assert_eq!(record.check(start + Duration::from_secs(3), &policy), HeartbeatStatus::Missed(1));
        assert_eq!(record.check(start + Duration::from_secs(4), &policy), HeartbeatStatus::Missed(2));

        record.record_heartbeat(start + Duration::from_secs(4));
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.check(start + Duration::from_secs(5), &policy), HeartbeatStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn tenth_consecutive_miss_fails() {
        let policy = policy();
        let start = Instant::now();
        let mut record = HeartbeatRecord::new(start);

        let mut last = HeartbeatStatus::Healthy;
        for second in 3..=12 {
            last = record.check(start + Duration::from_secs(second), &policy);
        }
        assert_eq!(last, HeartbeatStatus::Failed(10));
    }

    #[tokio::test(start_paused = true)]
    async fn answered_heartbeats_keep_the_session_alive() {
        let bus = LocalBus::new();
        let responder = ActionChannel::new(MessageChannel::open(&bus, "handshake"), Duration::from_secs(20));
        let _server = responder.serve::<Heartbeat, _, _>(|request| async move {
            Ok::<_, ErrorPayload>(HeartbeatResponse {
                proxy_id: request.proxy_id,
            })
        });

        let channel = ActionChannel::new(MessageChannel::open(&bus, "handshake"), Duration::from_secs(20));
        let (monitor, mut failure) = HeartbeatMonitor::spawn(channel, &session(), policy());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(failure.try_recv().is_err());
        assert_eq!(monitor.record().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_counterpart_fails_after_ten_misses() {
        let bus = LocalBus::new();
        let channel = ActionChannel::new(MessageChannel::open(&bus, "handshake"), Duration::from_secs(20));
        let started = Instant::now();
        let (_monitor, failure) = HeartbeatMonitor::spawn(channel, &session(), policy());

        let failure = failure.await;
        let failure = failure.unwrap();
        assert_eq!(failure.missed, 10);
        assert_eq!(failure.proxy_id, "proxy-1");
        // First miss at 3s, then one per second.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(12) && elapsed < Duration::from_secs(13));
    }
}
