//! Protocol engine for thermit, a chunked file-transfer protocol over
//! byte-oriented serial links.
//!
//! Two endpoints — a [`Role::Master`] and a [`Role::Slave`] — negotiate a
//! common parameter set in a three-step sync exchange, then move files as
//! numbered chunks. Each frame piggybacks acknowledgement feedback for the
//! reverse direction, and a per-chunk dirty bitmap drives retransmission
//! until the receiver reports the file complete.
//!
//! # Architecture
//!
//! The engine is sans-io and single-threaded cooperative: a [`Session`] owns
//! an [`Environment`] (the link/file/clock capability bundle) and is driven
//! by exactly one caller invoking [`Session::step`]. One step is one RX poll
//! followed by at most one TX emission; nothing inside the core blocks or
//! suspends.
//!
//! # Components
//!
//! - [`Environment`]: the adaptation interface implementers provide
//! - [`Progress`]: per-direction chunk bitmap and transfer bookkeeping
//! - [`Session`]: negotiation state machine, transfer engine and step driver
//! - [`Diagnostics`]: lifetime counters for observability

#![forbid(unsafe_code)]

mod diagnostics;
mod env;
mod error;
mod progress;
mod session;

pub use diagnostics::Diagnostics;
pub use env::{EnvError, Environment, FileHandle, OutgoingFile};
pub use error::SessionError;
pub use progress::{Progress, chunk_len, chunk_offset};
pub use session::{Role, Session, State};
