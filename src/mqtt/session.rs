//! Session adapter over the external MQTT client.
//!
//! The engine talks to the broker exclusively through the [`Broker`] and
//! [`SessionControl`] traits; [`RumqttBroker`] is the production
//! implementation on top of `rumqttc`. Inbound traffic and connection
//! state changes are pushed through an mpsc channel as [`SessionEvent`]s
//! so the scheduler's blocking waits stay decoupled from message fan-in.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::message::InboundMessage;
use crate::script::config::ConnectionConfig;

/// Asynchronous notifications from a live session.
///
/// `Connected` is only emitted for re-connections after a loss; the
/// initial handshake is consumed by [`Broker::connect`] itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    ConnectionLost { reason: String },
    Message(InboundMessage),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("QoS level {0} is out of range")]
    Qos(u8),
}

/// Factory for live sessions; the seam the engine is generic over.
#[async_trait]
pub trait Broker: Send + Sync {
    type Session: SessionControl + Clone + Send + Sync + 'static;

    /// Opens a connection and blocks until the broker acknowledges it or
    /// the handshake fails. Session events are delivered on `events` for
    /// the lifetime of the session.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        config: &ConnectionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self::Session, SessionError>;
}

/// Operations on an established session.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Blocks until the client accepts the send (not broker delivery).
    async fn publish(&self, qos: u8, topic: &str, payload: &str) -> Result<(), SessionError>;

    async fn subscribe(&self, qos: u8, topic: &str) -> Result<(), SessionError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError>;

    /// Idempotent; succeeds on an already-closed session.
    async fn disconnect(&self) -> Result<(), SessionError>;
}

pub fn to_qos(qos: u8) -> Result<QoS, SessionError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(SessionError::Qos(other)),
    }
}

/// Production broker backed by `rumqttc`'s [`AsyncClient`].
pub struct RumqttBroker;

#[derive(Clone)]
pub struct RumqttSession {
    client: AsyncClient,
    pump_token: CancellationToken,
}

#[async_trait]
impl Broker for RumqttBroker {
    type Session = RumqttSession;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        config: &ConnectionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<RumqttSession, SessionError> {
        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_clean_session(config.clean_session);
        // rumqttc rejects keep-alives below 5 seconds.
        options.set_keep_alive(config.keepalive.max(Duration::from_secs(5)));
        if let Some(credentials) = &config.credentials {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }
        if config.use_tls {
            options.set_transport(Transport::Tls(tls_configuration(config)?));
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        // Drive the event loop until the broker acknowledges the
        // connection; any error before that is a fatal connect failure.
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => continue,
                Err(e) => return Err(SessionError::Connect(e.to_string())),
            }
        }
        debug!("broker acknowledged connection to {host}:{port}");

        let pump_token = CancellationToken::new();
        tokio::spawn(pump(eventloop, events, pump_token.clone()));

        Ok(RumqttSession { client, pump_token })
    }
}

#[async_trait]
impl SessionControl for RumqttSession {
    async fn publish(&self, qos: u8, topic: &str, payload: &str) -> Result<(), SessionError> {
        let qos = to_qos(qos)?;
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| SessionError::Publish(e.to_string()))
    }

    async fn subscribe(&self, qos: u8, topic: &str) -> Result<(), SessionError> {
        let qos = to_qos(qos)?;
        self.client
            .subscribe(topic, qos)
            .await
            .map_err(|e| SessionError::Subscribe(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| SessionError::Subscribe(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.pump_token.cancel();
        if let Err(e) = self.client.disconnect().await {
            // The request channel is gone once the event loop stopped;
            // treat that as already disconnected.
            debug!("disconnect on closed session: {e}");
        }
        Ok(())
    }
}

/// Forwards event-loop traffic into the session event channel until the
/// session is torn down or the receiver goes away.
///
/// After the initial handshake, poll errors are surfaced as
/// `ConnectionLost` and polling continues (rumqttc re-connects on the next
/// poll); a later CONNACK surfaces as `Connected` so the dispatcher can
/// re-subscribe and mark the restore.
async fn pump(
    mut eventloop: EventLoop,
    events: mpsc::Sender<SessionEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            polled = eventloop.poll() => {
                let event = match polled {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                        SessionEvent::Message(InboundMessage::now(publish.topic.clone(), payload))
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => SessionEvent::Connected,
                    Ok(_) => continue,
                    Err(e) => {
                        let lost = SessionEvent::ConnectionLost { reason: e.to_string() };
                        if events.send(lost).await.is_err() {
                            break;
                        }
                        // Throttle re-connect attempts.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("session event pump stopped");
}

fn tls_configuration(config: &ConnectionConfig) -> Result<TlsConfiguration, SessionError> {
    let Some(files) = &config.tls_files else {
        return Err(SessionError::Tls(
            "CFG_USE_TLS is YES but no CFG_TLS_CERT was configured".into(),
        ));
    };
    let cert = std::fs::read(&files.cert)
        .map_err(|e| SessionError::Tls(format!("{}: {e}", files.cert.display())))?;
    let key = std::fs::read(&files.key)
        .map_err(|e| SessionError::Tls(format!("{}: {e}", files.key.display())))?;
    // The certificate doubles as the trust anchor, which matches the
    // self-signed broker setups this tool gets pointed at.
    Ok(TlsConfiguration::Simple {
        ca: cert.clone(),
        alpn: None,
        client_auth: Some((cert, key)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_levels_map_to_rumqttc() {
        assert_eq!(to_qos(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(to_qos(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(to_qos(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(to_qos(3), Err(SessionError::Qos(3))));
    }

    #[test]
    fn tls_without_cert_files_is_rejected() {
        let config = ConnectionConfig {
            use_tls: true,
            ..ConnectionConfig::default()
        };
        assert!(matches!(
            tls_configuration(&config),
            Err(SessionError::Tls(_))
        ));
    }

    #[test]
    fn tls_with_unreadable_files_is_rejected() {
        let config = ConnectionConfig {
            use_tls: true,
            tls_files: Some(crate::script::config::TlsFiles {
                cert: "/nonexistent/client.crt".into(),
                key: "/nonexistent/client.key".into(),
            }),
            ..ConnectionConfig::default()
        };
        assert!(matches!(
            tls_configuration(&config),
            Err(SessionError::Tls(_))
        ));
    }
}
