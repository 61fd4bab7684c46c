//! # Execution Engine
//!
//! The runtime half of the interpreter: takes the parsed command sequence
//! and drives it against a live MQTT session.
//!
//! ## Why This Module Exists
//!
//! The script language mixes two execution styles that must coexist:
//! strictly sequential steps (`CONNECT`, `PUB`, `DELAY`, `DISCONNECT`)
//! and standing work that outlives the step list (subscription logging,
//! periodic publishing). The engine keeps the sequential walk on one task
//! and everything standing on supervised background tasks, so a `DELAY`
//! never pauses message delivery and a subscription-only script keeps
//! running after its last line.
//!
//! ## Module Architecture
//!
//! ```text
//! engine/
//! ├── scheduler.rs - Engine state machine and the sequential command walk
//! ├── registry.rs  - supervised standing tasks (cancel + join on shutdown)
//! ├── periodic.rs  - CFG_PUB_EACH publisher task, drift-bounded cadence
//! ├── dispatch.rs  - session events → log sink, loss/restore handling
//! └── error.rs     - fatal execution errors
//! ```
//!
//! ## Concurrency Model
//!
//! One scheduler task walks commands in source order. Each `CONNECT`
//! spawns a dispatch task for inbound traffic and one task per
//! accumulated `CFG_PUB_EACH`. All standing tasks hang off child
//! `CancellationToken`s of the external shutdown token, so an operator
//! interrupt cancels everything and the teardown path (unsubscribe,
//! disconnect, flush logs) runs exactly once, on every exit path.

pub mod dispatch;
pub mod error;
pub mod periodic;
pub mod registry;
pub mod scheduler;
