//! Sibyl: local inference sidecar.
//!
//! A long-lived child process that reads newline-delimited JSON commands on
//! stdin, drives a locally loaded language (or language+audio) model, and
//! writes newline-delimited JSON replies on stdout. It is spawned and
//! supervised by a host application and owns no UI, no persistence, and no
//! network listener beyond HuggingFace download calls.
//!
//! # Architecture
//!
//! One session, one resident model, one strictly sequential command loop:
//! - **Bridge**: NDJSON framing over stdin/stdout ([`bridge`])
//! - **Dispatcher**: capability-gated command routing ([`session`])
//! - **Backend**: narrow inference seam, implemented with `mistralrs`
//!   ([`backend`])
//! - **Extraction**: resilient structured-output recovery from free-form
//!   model text ([`extract`], [`analysis`])
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostics go
//! to stderr via `tracing`.

pub mod analysis;
pub mod audio;
pub mod backend;
pub mod bridge;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod protocol;
pub mod session;

pub use config::SidecarConfig;
pub use error::{Result, SidecarError};
pub use protocol::{Command, Reply};
pub use session::{Dispatcher, Flow};
