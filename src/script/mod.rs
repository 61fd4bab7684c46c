//! # Script Front End
//!
//! Everything between raw script text and a validated, typed command
//! sequence lives here. The rest of the program never sees script text:
//! the engine consumes [`command::Command`] values and a folded
//! [`config::ConnectionConfig`] snapshot.
//!
//! ```text
//! script/
//! ├── command.rs - typed Command variants, one per script keyword
//! ├── parser.rs  - line parser with fail-fast, line-numbered errors
//! └── config.rs  - CFG_* accumulator producing the connect-time snapshot
//! ```
//!
//! The split keeps validation strictly ahead of execution: a script that
//! parses has every numeric field range-checked and every payload
//! unescaped, so a malformed script can never produce a partial run.

pub mod command;
pub mod config;
pub mod parser;
