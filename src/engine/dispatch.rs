//! Dispatch task: fans session events into the log sink.
//!
//! Decouples the scheduler's blocking command waits from asynchronous
//! message arrival: the session pump pushes [`SessionEvent`]s into a
//! channel, this task drains it for the lifetime of the session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::logsink::LogSink;
use crate::mqtt::session::{SessionControl, SessionEvent};

pub const MARKER_LOST: &str = "-- MQTT Communication Lost --";
pub const MARKER_RESTORED: &str = "-- MQTT Connected (Communication Restored) --";

/// Consumes a session's event stream until the session closes or the
/// engine shuts down.
///
/// Inbound messages append to their subscriptions' log files. A lost
/// connection writes one marker line per log file (deduplicated across
/// repeated loss events); a restored connection writes the restore marker
/// and re-issues every registered subscription, since clean sessions drop
/// them broker-side.
pub async fn run_dispatch<S: SessionControl>(
    session: S,
    mut events: mpsc::Receiver<SessionEvent>,
    sink: Arc<LogSink>,
    token: CancellationToken,
) {
    let mut lost = false;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                None => break,
                Some(SessionEvent::Message(message)) => {
                    debug!(topic = %message.topic, "message received");
                    sink.route(&message).await;
                }
                Some(SessionEvent::ConnectionLost { reason }) => {
                    if !lost {
                        lost = true;
                        warn!("connection lost: {reason}");
                        sink.write_marker_all(MARKER_LOST).await;
                    }
                }
                Some(SessionEvent::Connected) => {
                    if lost {
                        lost = false;
                        info!("connection restored");
                        sink.write_marker_all(MARKER_RESTORED).await;
                        resubscribe(&session, &sink).await;
                    }
                }
            }
        }
    }
    debug!("dispatch task stopped");
}

async fn resubscribe<S: SessionControl>(session: &S, sink: &LogSink) {
    for sub in sink.subscriptions().await {
        if let Err(e) = session.subscribe(sub.qos, &sub.topic).await {
            warn!("re-subscribe to {} failed: {e}", sub.topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logsink::Subscription;
    use crate::mqtt::message::InboundMessage;
    use crate::mqtt::session::SessionError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SubRecorder {
        subscribed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SessionControl for SubRecorder {
        async fn publish(&self, _qos: u8, _topic: &str, _payload: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn subscribe(&self, _qos: u8, topic: &str) -> Result<(), SessionError> {
            self.subscribed.lock().unwrap().push(topic.to_owned());
            Ok(())
        }

        async fn unsubscribe(&self, _topic: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    async fn sink_with_sub(logfile: std::path::PathBuf) -> Arc<LogSink> {
        let sink = Arc::new(LogSink::new());
        sink.register(Subscription {
            qos: 0,
            topic: "devices/lamp".into(),
            logfile,
        })
        .await;
        sink
    }

    #[tokio::test]
    async fn messages_are_appended_to_the_subscription_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("lamp.log");
        let sink = sink_with_sub(log.clone()).await;
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_dispatch(SubRecorder::default(), rx, sink, token));

        tx.send(SessionEvent::Message(InboundMessage::now(
            "devices/lamp".into(),
            "on".into(),
        )))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.trim_end().ends_with("[devices/lamp] on"));
    }

    #[tokio::test]
    async fn repeated_loss_events_write_one_marker() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("lamp.log");
        let sink = sink_with_sub(log.clone()).await;
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_dispatch(SubRecorder::default(), rx, sink, token));

        for _ in 0..3 {
            tx.send(SessionEvent::ConnectionLost {
                reason: "reset by peer".into(),
            })
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents.matches(MARKER_LOST).count(), 1);
    }

    #[tokio::test]
    async fn restore_writes_marker_and_resubscribes() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("lamp.log");
        let sink = sink_with_sub(log.clone()).await;
        let session = SubRecorder::default();
        let subscribed = session.subscribed.clone();
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_dispatch(session, rx, sink, token));

        tx.send(SessionEvent::ConnectionLost {
            reason: "reset".into(),
        })
        .await
        .unwrap();
        tx.send(SessionEvent::Connected).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents.matches(MARKER_LOST).count(), 1);
        assert_eq!(contents.matches(MARKER_RESTORED).count(), 1);
        assert_eq!(*subscribed.lock().unwrap(), vec!["devices/lamp"]);
    }

    #[tokio::test]
    async fn connected_without_prior_loss_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("lamp.log");
        let sink = sink_with_sub(log.clone()).await;
        let session = SubRecorder::default();
        let subscribed = session.subscribed.clone();
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_dispatch(session, rx, sink, token));

        tx.send(SessionEvent::Connected).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(!log.exists());
        assert!(subscribed.lock().unwrap().is_empty());
    }
}
