//! The execution scheduler: one sequential walk over the command
//! sequence, with standing tasks running alongside.
//!
//! Blocking commands (`CONNECT`, `PUB`, `DISCONNECT`, `DELAY*`) suspend
//! only this walk; periodic publishers and the dispatch task keep running
//! on their own tokio tasks. When the walk finishes, the engine drains:
//! it stays alive as long as standing work exists (subscriptions on a
//! live session, periodic publishers) and leaves only on the external
//! shutdown signal. The teardown path — cancel periodic tasks,
//! unsubscribe, disconnect, flush logs — runs on every exit: clean,
//! interrupted, or fatal.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::logsink::{LogSink, Subscription};
use crate::mqtt::session::{Broker, SessionControl};
use crate::script::command::Command;
use crate::script::config::ConnectionConfig;

use super::dispatch::run_dispatch;
use super::error::EngineError;
use super::periodic::{run_periodic, PeriodicSpec};
use super::registry::TaskRegistry;

/// Scheduler lifecycle. `Draining` covers the stay-alive phase after the
/// last command; `Terminated` means teardown has completed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Draining,
    Terminated,
}

pub struct Engine<B: Broker> {
    broker: B,
    sink: Arc<LogSink>,
    shutdown: CancellationToken,
    registry: TaskRegistry,
    dispatch_token: CancellationToken,
    dispatchers: Vec<JoinHandle<()>>,
    session: Option<B::Session>,
    state: EngineState,
}

impl<B: Broker> Engine<B> {
    /// `shutdown` is the external interrupt: cancelling it stops delays,
    /// the drain phase and all standing tasks.
    pub fn new(broker: B, sink: Arc<LogSink>, shutdown: CancellationToken) -> Self {
        let registry = TaskRegistry::new(&shutdown);
        let dispatch_token = shutdown.child_token();
        Engine {
            broker,
            sink,
            shutdown,
            registry,
            dispatch_token,
            dispatchers: Vec::new(),
            session: None,
            state: EngineState::Idle,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Runs the whole script: command walk, drain phase, teardown.
    pub async fn run(&mut self, commands: &[Command]) -> Result<(), EngineError> {
        self.set_state(EngineState::Running);
        let result = self.execute(commands).await;
        if result.is_ok() {
            self.set_state(EngineState::Draining);
            if self.has_standing_work().await && !self.shutdown.is_cancelled() {
                info!(
                    "script finished; {} periodic task(s) and any subscriptions keep \
                     running until interrupted",
                    self.registry.len()
                );
                self.shutdown.cancelled().await;
            }
        }
        self.teardown().await;
        self.set_state(EngineState::Terminated);
        result
    }

    async fn execute(&mut self, commands: &[Command]) -> Result<(), EngineError> {
        let config = ConnectionConfig::accumulate(commands);
        let mut pending_periodic: Vec<PeriodicSpec> = Vec::new();
        let mut connected_once = false;

        for command in commands {
            if self.shutdown.is_cancelled() {
                info!("interrupted; abandoning remaining commands");
                break;
            }
            match command {
                Command::CfgPubEach {
                    interval,
                    qos,
                    topic,
                    payload,
                } => {
                    guard_cfg(connected_once, command.keyword())?;
                    pending_periodic.push(PeriodicSpec {
                        interval: *interval,
                        qos: *qos,
                        topic: topic.clone(),
                        payload: payload.clone(),
                    });
                }
                Command::CfgClientId { .. }
                | Command::CfgCleanSession { .. }
                | Command::CfgKeepalive { .. }
                | Command::CfgUser { .. }
                | Command::CfgUseTls { .. }
                | Command::CfgTlsCert { .. } => {
                    // Already folded into the connect-time snapshot.
                    guard_cfg(connected_once, command.keyword())?;
                }
                Command::Connect { host, port } => {
                    if self.session.is_some() {
                        return Err(EngineError::AlreadyConnected);
                    }
                    info!("connecting to {host}:{port} as {}", config.client_id);
                    let (events_tx, events_rx) = mpsc::channel(256);
                    let session = self
                        .broker
                        .connect(host, *port, &config, events_tx)
                        .await
                        .map_err(EngineError::Connect)?;
                    connected_once = true;
                    info!("connected");

                    self.dispatchers.push(tokio::spawn(run_dispatch(
                        session.clone(),
                        events_rx,
                        self.sink.clone(),
                        self.dispatch_token.child_token(),
                    )));
                    for spec in pending_periodic.drain(..) {
                        let name = format!("pub-each:{}", spec.topic);
                        let session = session.clone();
                        self.registry
                            .spawn(name, move |token| run_periodic(spec, session, token));
                    }
                    self.session = Some(session);
                }
                Command::Disconnect => {
                    let session = self
                        .session
                        .take()
                        .ok_or(EngineError::NotConnected("DISCONNECT"))?;
                    info!("disconnecting");
                    if let Err(e) = session.disconnect().await {
                        warn!("disconnect reported: {e}");
                    }
                }
                Command::Pub {
                    qos,
                    topic,
                    payload,
                } => {
                    let session = self
                        .session
                        .as_ref()
                        .ok_or(EngineError::NotConnected("PUB"))?;
                    info!(topic = %topic, qos, "publishing");
                    if let Err(e) = session.publish(*qos, topic, payload).await {
                        warn!("publish to {topic} failed: {e}");
                    }
                }
                Command::Sub {
                    qos,
                    topic,
                    logfile,
                } => {
                    let session = self
                        .session
                        .as_ref()
                        .ok_or(EngineError::NotConnected("SUB"))?;
                    self.sink
                        .register(Subscription {
                            qos: *qos,
                            topic: topic.clone(),
                            logfile: logfile.clone(),
                        })
                        .await;
                    if let Err(e) = session.subscribe(*qos, topic).await {
                        warn!("subscribe to {topic} failed: {e}");
                    }
                }
                Command::Delay { duration } => {
                    debug!("delaying for {duration:?}");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(*duration) => {}
                    }
                }
            }
        }
        Ok(())
    }

    async fn has_standing_work(&self) -> bool {
        !self.registry.is_empty()
            || (self.session.is_some() && self.sink.has_subscriptions().await)
    }

    /// Orderly shutdown: cancel periodic publishers, unsubscribe, close
    /// the session, stop dispatchers, flush and close all log files.
    async fn teardown(&mut self) {
        self.registry.shutdown().await;
        if let Some(session) = self.session.take() {
            for sub in self.sink.subscriptions().await {
                if let Err(e) = session.unsubscribe(&sub.topic).await {
                    warn!("unsubscribe from {} failed: {e}", sub.topic);
                }
            }
            if let Err(e) = session.disconnect().await {
                warn!("disconnect failed: {e}");
            }
        }
        self.dispatch_token.cancel();
        for dispatcher in self.dispatchers.drain(..) {
            if let Err(e) = dispatcher.await {
                warn!("dispatch task did not stop cleanly: {e}");
            }
        }
        self.sink.shutdown().await;
    }

    fn set_state(&mut self, next: EngineState) {
        debug!(from = ?self.state, to = ?next, "engine state transition");
        self.state = next;
    }
}

fn guard_cfg(connected_once: bool, keyword: &'static str) -> Result<(), EngineError> {
    if connected_once {
        Err(EngineError::ConfigAfterConnect(keyword))
    } else {
        Ok(())
    }
}
