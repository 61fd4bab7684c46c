//! Standing periodic publisher created by `CFG_PUB_EACH`.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::mqtt::session::SessionControl;

/// What to publish and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicSpec {
    pub interval: Duration,
    pub qos: u8,
    pub topic: String,
    pub payload: String,
}

/// Publishes on a fixed cadence until cancelled.
///
/// The first tick fires one interval after the session came up. Ticks are
/// anchored to nominal multiples of the interval and missed ticks are
/// skipped rather than burst, so drift stays bounded over long runs.
/// Publish failures are soft: logged, cadence continues.
pub async fn run_periodic<S: SessionControl>(
    spec: PeriodicSpec,
    session: S,
    token: CancellationToken,
) {
    let mut ticker = time::interval_at(time::Instant::now() + spec.interval, spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                debug!(topic = %spec.topic, qos = spec.qos, "periodic publish");
                if let Err(e) = session.publish(spec.qos, &spec.topic, &spec.payload).await {
                    warn!("periodic publish to {} failed: {e}", spec.topic);
                }
            }
        }
    }
    debug!(topic = %spec.topic, "periodic publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::session::SessionError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CountingSession {
        published: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl SessionControl for CountingSession {
        async fn publish(&self, _qos: u8, topic: &str, payload: &str) -> Result<(), SessionError> {
            self.published
                .lock()
                .unwrap()
                .push(format!("{topic}={payload}"));
            if self.fail {
                Err(SessionError::Publish("down".into()))
            } else {
                Ok(())
            }
        }

        async fn subscribe(&self, _qos: u8, _topic: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn unsubscribe(&self, _topic: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn spec(interval: Duration) -> PeriodicSpec {
        PeriodicSpec {
            interval,
            qos: 0,
            topic: "metrics/heartbeat".into(),
            payload: "alive".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_once_per_interval_until_cancelled() {
        let session = CountingSession::default();
        let published = session.published.clone();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_periodic(
            spec(Duration::from_secs(10)),
            session,
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(35)).await;
        token.cancel();
        handle.await.unwrap();

        // Ticks at t = 10, 20, 30.
        assert_eq!(published.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_full_interval() {
        let session = CountingSession::default();
        let published = session.published.clone();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_periodic(
            spec(Duration::from_secs(10)),
            session,
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(published.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(published.lock().unwrap().len(), 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failures_do_not_stop_the_cadence() {
        let session = CountingSession {
            fail: true,
            ..CountingSession::default()
        };
        let published = session.published.clone();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_periodic(
            spec(Duration::from_secs(5)),
            session,
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(16)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(published.lock().unwrap().len(), 3);
    }
}
