//! Connection settings folded from the `CFG_*` command prefix.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use super::command::Command;

/// Username/password pair for broker authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Client certificate and key presented when TLS is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Immutable snapshot of everything `CONNECT` needs from the `CFG_*`
/// commands. Built once per run, before the first `CONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub client_id: String,
    pub clean_session: bool,
    pub keepalive: Duration,
    pub credentials: Option<Credentials>,
    pub use_tls: bool,
    pub tls_files: Option<TlsFiles>,
}

impl ConnectionConfig {
    /// Folds the `CFG_*` commands preceding the first `CONNECT` into a
    /// config snapshot. Repeated keys are last-write-wins; unset keys take
    /// their documented defaults (generated client id, clean session,
    /// 60 s keep-alive, no credentials, TLS off).
    ///
    /// `CFG_*` commands after the first `CONNECT` are not folded here; the
    /// engine rejects them at execution time.
    pub fn accumulate(commands: &[Command]) -> Self {
        let mut config = ConnectionConfig::default();
        for command in commands {
            match command {
                Command::Connect { .. } => break,
                Command::CfgClientId { client_id } => {
                    config.client_id = client_id.clone();
                }
                Command::CfgCleanSession { clean } => {
                    config.clean_session = *clean;
                }
                Command::CfgKeepalive { seconds } => {
                    config.keepalive = Duration::from_secs(*seconds);
                }
                Command::CfgUser { username, password } => {
                    config.credentials = Some(Credentials {
                        username: username.clone(),
                        password: password.clone(),
                    });
                }
                Command::CfgUseTls { enabled } => {
                    config.use_tls = *enabled;
                }
                Command::CfgTlsCert { cert, key } => {
                    config.tls_files = Some(TlsFiles {
                        cert: cert.clone(),
                        key: key.clone(),
                    });
                }
                _ => {}
            }
        }
        config
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            client_id: format!("mqttscript-{}", Uuid::new_v4()),
            clean_session: true,
            keepalive: Duration::from_secs(60),
            credentials: None,
            use_tls: false,
            tls_files: None,
        }
    }
}
