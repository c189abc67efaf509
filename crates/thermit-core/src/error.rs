//! Error types for the thermit session layer.
//!
//! Only session construction and transfer admission return errors to the
//! caller; everything inside [`crate::Session::step`] is handled in place so
//! the step driver stays total.

use thiserror::Error;

use crate::env::EnvError;

/// Errors surfaced by the session layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The link could not be opened at construction.
    #[error("failed to open link {name:?}: {source}")]
    LinkOpen {
        /// Link name passed to the constructor.
        name: String,
        /// Environment error that caused the failure.
        #[source]
        source: EnvError,
    },

    /// The local capability set cannot drive a transfer.
    #[error("invalid local parameters: {reason}")]
    InvalidParameters {
        /// What is wrong with the parameter set.
        reason: &'static str,
    },

    /// A transfer cannot be represented with the effective parameters.
    #[error("transfer not representable: {reason}")]
    InvalidTransfer {
        /// Why the transfer was refused.
        reason: &'static str,
    },
}
