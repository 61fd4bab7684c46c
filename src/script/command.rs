//! Typed representation of a single script line.

use std::path::PathBuf;
use std::time::Duration;

/// One parsed, validated script instruction.
///
/// Every variant carries only the fields its keyword requires; numeric
/// fields are already range-checked and quoted payloads unescaped, so the
/// engine never re-validates.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CfgClientId {
        client_id: String,
    },
    CfgCleanSession {
        clean: bool,
    },
    CfgKeepalive {
        seconds: u64,
    },
    CfgUser {
        username: String,
        password: String,
    },
    CfgUseTls {
        enabled: bool,
    },
    CfgTlsCert {
        cert: PathBuf,
        key: PathBuf,
    },
    CfgPubEach {
        interval: Duration,
        qos: u8,
        topic: String,
        payload: String,
    },
    Connect {
        host: String,
        port: u16,
    },
    Disconnect,
    /// `DELAY`, `DELAY_MS` and `DELAY_H` all normalize to this variant.
    Delay {
        duration: Duration,
    },
    Pub {
        qos: u8,
        topic: String,
        payload: String,
    },
    Sub {
        qos: u8,
        topic: String,
        logfile: PathBuf,
    },
}

impl Command {
    /// The script keyword this command was parsed from. `Delay` reports
    /// `DELAY` regardless of the unit keyword used in the source.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::CfgClientId { .. } => "CFG_CLIENT_ID",
            Command::CfgCleanSession { .. } => "CFG_CLEAN_SESSION",
            Command::CfgKeepalive { .. } => "CFG_KEEPALIVE",
            Command::CfgUser { .. } => "CFG_USER",
            Command::CfgUseTls { .. } => "CFG_USE_TLS",
            Command::CfgTlsCert { .. } => "CFG_TLS_CERT",
            Command::CfgPubEach { .. } => "CFG_PUB_EACH",
            Command::Connect { .. } => "CONNECT",
            Command::Disconnect => "DISCONNECT",
            Command::Delay { .. } => "DELAY",
            Command::Pub { .. } => "PUB",
            Command::Sub { .. } => "SUB",
        }
    }
}
