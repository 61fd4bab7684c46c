//! Line parser turning raw script text into an ordered [`Command`] sequence.
//!
//! Parsing is all-or-nothing: the first malformed line aborts with a
//! [`ParseError`] carrying its 1-based line number, so execution (and any
//! broker traffic) never starts for an invalid script. Blank lines and
//! full-line `#` comments are skipped; inline trailing comments are not
//! supported. Keywords are case-sensitive.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::command::Command;

/// Why a script failed to parse, tied to the offending line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: unknown keyword `{keyword}`")]
    UnknownKeyword { line: usize, keyword: String },

    #[error("line {line}: {keyword} is missing its {what} argument")]
    MissingArgument {
        line: usize,
        keyword: &'static str,
        what: &'static str,
    },

    #[error("line {line}: {keyword} takes no further arguments (found `{found}`)")]
    TrailingArguments {
        line: usize,
        keyword: &'static str,
        found: String,
    },

    #[error("line {line}: invalid {what} for {keyword}: `{value}`")]
    InvalidArgument {
        line: usize,
        keyword: &'static str,
        what: &'static str,
        value: String,
    },

    #[error("line {line}: unterminated quoted payload for {keyword}")]
    UnterminatedPayload { line: usize, keyword: &'static str },

    #[error("line {line}: payload containing whitespace must be double-quoted for {keyword}")]
    UnquotedPayload { line: usize, keyword: &'static str },
}

/// Parses a whole script into its command sequence, preserving source order.
pub fn parse(text: &str) -> Result<Vec<Command>, ParseError> {
    let mut commands = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        commands.push(parse_line(line, idx + 1)?);
    }
    Ok(commands)
}

fn parse_line(line: &str, line_no: usize) -> Result<Command, ParseError> {
    let mut fields = Fields::new(line, line_no);
    // A non-blank line always yields at least the keyword token.
    let keyword = fields.token().unwrap_or_default().to_owned();

    match keyword.as_str() {
        "CFG_CLIENT_ID" => {
            let kw = "CFG_CLIENT_ID";
            let client_id = fields.require(kw, "client id")?.to_owned();
            fields.finish(kw)?;
            Ok(Command::CfgClientId { client_id })
        }
        "CFG_CLEAN_SESSION" => {
            let kw = "CFG_CLEAN_SESSION";
            let arg = fields.require(kw, "YES/NO")?;
            let clean = parse_yes_no(arg, line_no, kw)?;
            fields.finish(kw)?;
            Ok(Command::CfgCleanSession { clean })
        }
        "CFG_KEEPALIVE" => {
            let kw = "CFG_KEEPALIVE";
            let arg = fields.require(kw, "seconds")?;
            let seconds = parse_positive(arg, line_no, kw, "keep-alive seconds")?;
            fields.finish(kw)?;
            Ok(Command::CfgKeepalive { seconds })
        }
        "CFG_USER" => {
            let kw = "CFG_USER";
            let username = fields.require(kw, "username")?.to_owned();
            let password = fields.require(kw, "password")?.to_owned();
            fields.finish(kw)?;
            Ok(Command::CfgUser { username, password })
        }
        "CFG_USE_TLS" => {
            let kw = "CFG_USE_TLS";
            let arg = fields.require(kw, "YES/NO")?;
            let enabled = parse_yes_no(arg, line_no, kw)?;
            fields.finish(kw)?;
            Ok(Command::CfgUseTls { enabled })
        }
        "CFG_TLS_CERT" => {
            let kw = "CFG_TLS_CERT";
            let cert = PathBuf::from(fields.require(kw, "certificate file")?);
            let key = PathBuf::from(fields.require(kw, "key file")?);
            fields.finish(kw)?;
            Ok(Command::CfgTlsCert { cert, key })
        }
        "CFG_PUB_EACH" => {
            let kw = "CFG_PUB_EACH";
            let interval = fields.require(kw, "interval seconds")?;
            let interval = parse_positive(interval, line_no, kw, "interval seconds")?;
            let qos = parse_qos(fields.require(kw, "QoS")?, line_no, kw)?;
            let topic = fields.require(kw, "topic")?.to_owned();
            let payload = fields.payload(kw)?;
            Ok(Command::CfgPubEach {
                interval: Duration::from_secs(interval),
                qos,
                topic,
                payload,
            })
        }
        "CONNECT" => {
            let kw = "CONNECT";
            let host = fields.require(kw, "host")?.to_owned();
            let port = fields.require(kw, "port")?;
            let port = port
                .parse::<u16>()
                .map_err(|_| ParseError::InvalidArgument {
                    line: line_no,
                    keyword: kw,
                    what: "port",
                    value: port.to_owned(),
                })?;
            fields.finish(kw)?;
            Ok(Command::Connect { host, port })
        }
        "DISCONNECT" => {
            fields.finish("DISCONNECT")?;
            Ok(Command::Disconnect)
        }
        "DELAY" | "DELAY_MS" | "DELAY_H" => {
            let kw: &'static str = match keyword.as_str() {
                "DELAY" => "DELAY",
                "DELAY_MS" => "DELAY_MS",
                _ => "DELAY_H",
            };
            let arg = fields.require(kw, "duration")?;
            let value = parse_delay_value(arg, line_no, kw)?;
            fields.finish(kw)?;
            let seconds = match kw {
                "DELAY_MS" => value / 1000.0,
                "DELAY_H" => value * 3600.0,
                _ => value,
            };
            Ok(Command::Delay {
                duration: Duration::from_secs_f64(seconds),
            })
        }
        "PUB" => {
            let kw = "PUB";
            let qos = parse_qos(fields.require(kw, "QoS")?, line_no, kw)?;
            let topic = fields.require(kw, "topic")?.to_owned();
            let payload = fields.payload(kw)?;
            Ok(Command::Pub {
                qos,
                topic,
                payload,
            })
        }
        "SUB" => {
            let kw = "SUB";
            let qos = parse_qos(fields.require(kw, "QoS")?, line_no, kw)?;
            let topic = fields.require(kw, "topic")?.to_owned();
            let logfile = PathBuf::from(fields.require(kw, "log file")?);
            fields.finish(kw)?;
            Ok(Command::Sub {
                qos,
                topic,
                logfile,
            })
        }
        _ => Err(ParseError::UnknownKeyword {
            line: line_no,
            keyword,
        }),
    }
}

fn parse_yes_no(arg: &str, line: usize, keyword: &'static str) -> Result<bool, ParseError> {
    match arg {
        "YES" => Ok(true),
        "NO" => Ok(false),
        other => Err(ParseError::InvalidArgument {
            line,
            keyword,
            what: "YES/NO flag",
            value: other.to_owned(),
        }),
    }
}

fn parse_qos(arg: &str, line: usize, keyword: &'static str) -> Result<u8, ParseError> {
    match arg.parse::<u8>() {
        Ok(qos) if qos <= 2 => Ok(qos),
        _ => Err(ParseError::InvalidArgument {
            line,
            keyword,
            what: "QoS",
            value: arg.to_owned(),
        }),
    }
}

fn parse_positive(
    arg: &str,
    line: usize,
    keyword: &'static str,
    what: &'static str,
) -> Result<u64, ParseError> {
    match arg.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ParseError::InvalidArgument {
            line,
            keyword,
            what,
            value: arg.to_owned(),
        }),
    }
}

/// Delay values accept fractional amounts so every unit keyword can express
/// every duration (`DELAY_H 0.5` is half an hour).
fn parse_delay_value(arg: &str, line: usize, keyword: &'static str) -> Result<f64, ParseError> {
    match arg.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(ParseError::InvalidArgument {
            line,
            keyword,
            what: "duration",
            value: arg.to_owned(),
        }),
    }
}

/// Whitespace-delimited field scanner over one line.
///
/// Regular fields never contain whitespace; the payload field is special
/// (double-quoted, may span spaces, must be last) and is consumed through
/// [`Fields::payload`].
struct Fields<'a> {
    line: &'a str,
    pos: usize,
    line_no: usize,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str, line_no: usize) -> Self {
        Fields { line, pos: 0, line_no }
    }

    fn skip_ws(&mut self) {
        let rest = &self.line[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn token(&mut self) -> Option<&'a str> {
        self.skip_ws();
        if self.pos >= self.line.len() {
            return None;
        }
        let rest = &self.line[self.pos..];
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        self.pos += end;
        Some(&rest[..end])
    }

    fn require(
        &mut self,
        keyword: &'static str,
        what: &'static str,
    ) -> Result<&'a str, ParseError> {
        self.token().ok_or(ParseError::MissingArgument {
            line: self.line_no,
            keyword,
            what,
        })
    }

    /// Consumes the remainder of the line as the payload field.
    ///
    /// A payload starting with `"` runs to the matching close quote, with
    /// `\"` and `\\` escapes; anything after the close quote is an error.
    /// A bare payload must be a single whitespace-free token.
    fn payload(&mut self, keyword: &'static str) -> Result<String, ParseError> {
        self.skip_ws();
        let rest = &self.line[self.pos..];
        if rest.is_empty() {
            return Err(ParseError::MissingArgument {
                line: self.line_no,
                keyword,
                what: "payload",
            });
        }

        if let Some(quoted) = rest.strip_prefix('"') {
            let mut payload = String::new();
            let mut chars = quoted.char_indices();
            while let Some((i, c)) = chars.next() {
                match c {
                    '"' => {
                        let after = quoted[i + 1..].trim();
                        if !after.is_empty() {
                            return Err(ParseError::TrailingArguments {
                                line: self.line_no,
                                keyword,
                                found: after.to_owned(),
                            });
                        }
                        self.pos = self.line.len();
                        return Ok(payload);
                    }
                    '\\' => match chars.next() {
                        Some((_, '"')) => payload.push('"'),
                        Some((_, '\\')) => payload.push('\\'),
                        Some((_, other)) => {
                            payload.push('\\');
                            payload.push(other);
                        }
                        None => {
                            return Err(ParseError::UnterminatedPayload {
                                line: self.line_no,
                                keyword,
                            })
                        }
                    },
                    other => payload.push(other),
                }
            }
            Err(ParseError::UnterminatedPayload {
                line: self.line_no,
                keyword,
            })
        } else if rest.contains(char::is_whitespace) {
            Err(ParseError::UnquotedPayload {
                line: self.line_no,
                keyword,
            })
        } else {
            self.pos = self.line.len();
            Ok(rest.to_owned())
        }
    }

    fn finish(&mut self, keyword: &'static str) -> Result<(), ParseError> {
        match self.token() {
            None => Ok(()),
            Some(extra) => Err(ParseError::TrailingArguments {
                line: self.line_no,
                keyword,
                found: extra.to_owned(),
            }),
        }
    }
}
