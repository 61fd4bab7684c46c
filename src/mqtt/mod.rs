//! MQTT collaborator adapter: message type, session traits and the
//! `rumqttc`-backed implementation. The wire protocol itself is entirely
//! the client library's concern.

pub mod message;
pub mod session;
