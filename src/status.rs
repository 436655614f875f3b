//! Status codes returned by the host surface
//!
//! Every host operation resolves to one of four statuses. Failures are carried
//! as a `BridgeError`, and the environment keeps the most recent outcome so
//! callers can query it after the fact (see `Env::last_error_info`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::{errno_message, Errno};

/// Closed set of statuses reported across the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    InvalidArg,
    GenericFailure,
    PendingException,
}

/// Error side of a host operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A required callback or argument was missing; nothing was mutated
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    /// The worker pool rejected the request; the message is the platform error string
    #[error("{0}")]
    GenericFailure(String),

    /// An interpreter exception is pending in the environment
    #[error("an exception is pending")]
    PendingException,
}

impl BridgeError {
    /// Map a worker pool error number to a generic failure
    pub fn from_errno(errno: Errno) -> Self {
        BridgeError::GenericFailure(errno_message(errno))
    }

    pub fn status(&self) -> Status {
        match self {
            BridgeError::InvalidArg(_) => Status::InvalidArg,
            BridgeError::GenericFailure(_) => Status::GenericFailure,
            BridgeError::PendingException => Status::PendingException,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Outcome of the most recent host operation on an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub status: Status,
    pub message: Option<String>,
}

impl LastError {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            message: None,
        }
    }

    pub fn from_error(err: &BridgeError) -> Self {
        Self {
            status: err.status(),
            message: Some(err.to_string()),
        }
    }

    pub fn record<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(err) => Self::from_error(err),
        }
    }
}

impl Default for LastError {
    fn default() -> Self {
        Self::ok()
    }
}
