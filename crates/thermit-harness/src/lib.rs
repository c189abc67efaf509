//! Deterministic in-memory world for thermit protocol testing.
//!
//! Everything a session touches through its environment is replaced with
//! plain data structures: the link becomes a pair of byte queues
//! ([`Wire`]), the file system a name→bytes map, the clock a
//! [`VirtualClock`] the test advances by hand. Line noise is seeded
//! ([`MemEnv::set_noise`]) so failing runs replay exactly.
//!
//! [`Pair`] wires a master and a slave back to back and steps them in
//! lockstep; the wire handles stay accessible for fault injection between
//! steps (bit flips, dropped frames).

#![forbid(unsafe_code)]

mod env;
mod link;
mod runner;

pub use env::MemEnv;
pub use link::Wire;
pub use runner::{Pair, VirtualClock};
