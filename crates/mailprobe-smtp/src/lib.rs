//! # mailprobe-smtp
//!
//! An SMTP client for probing mail servers, with the ability to stop a
//! session at any protocol stage.
//!
//! ## Features
//!
//! - **Staged interruption**: QUIT after a reply, drop the connection after
//!   a reply, or drop it right after a command is written
//! - **Protocol support**: EHLO with HELO fallback, STARTTLS, MAIL FROM with
//!   8BITMIME/SIZE/SMTPUTF8, RCPT TO, DATA with dot-stuffing, RSET, NOOP
//! - **Transcript**: every line sent and received is reported to an
//!   [`Observer`](transcript::Observer), including lines received while a
//!   multi-line reply is still arriving
//! - **Delivery**: MX resolution with preference ordering and fallback to
//!   the domain itself
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailprobe_smtp::{Client, Flow, Policy, SessionOptions, Stage};
//! use mailprobe_smtp::transcript::Discard;
//!
//! #[tokio::main]
//! async fn main() -> mailprobe_smtp::Result<()> {
//!     let (stream, _) = mailprobe_smtp::connection::dial(
//!         "mx.example.com", 25, Default::default(), std::time::Duration::from_secs(30),
//!     ).await?;
//!
//!     let mut options = SessionOptions::new("client.example.com");
//!     options.policy = Policy { quit_after: Stage::Rcpt, ..Policy::default() };
//!
//!     let Flow::Continue(mut client) =
//!         Client::connect(stream, "mx.example.com", options, Arc::new(Discard)).await?
//!     else {
//!         return Ok(());
//!     };
//!
//!     client.mail(&"sender@example.com".into()).await?;
//!     if let Flow::Terminated(t) = client.rcpt(&"user@example.com".into()).await? {
//!         println!("stopped: {t}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Stages
//!
//! ```text
//! connect ─→ first-hello ─→ starttls ─→ hello ─→ mail ─→ rcpt ─→ data ─→ dot
//! ```
//!
//! `first-hello` and `starttls` only occur when STARTTLS is requested;
//! otherwise the greeting is the `hello` stage.
//!
//! ## Modules
//!
//! - [`command`]: SMTP command lines
//! - [`config`]: Run configuration and validation
//! - [`connection`]: Streams, transport and the checkpointed client
//! - [`delivery`]: MX resolution and the per-destination driver
//! - [`parser`]: Reply parser
//! - [`stage`]: Stages and interruption policy
//! - [`transcript`]: Session transcript events
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod config;
pub mod connection;
pub mod delivery;
mod error;
mod flow;
pub mod parser;
pub mod stage;
pub mod transcript;
pub mod types;

pub use config::{Config, ConfigBuilder, IpFamily, MessageSize, Server, TlsOptions};
pub use connection::{Client, DataWriter, Session, SessionOptions};
pub use delivery::{Delivery, Outcome, Report};
pub use error::{Error, ErrorKind, Result};
pub use flow::{Flow, Termination};
pub use stage::{Checkpoint, Policy, Stage};
pub use types::{Address, Extensions, Reply, ReplyCode};
