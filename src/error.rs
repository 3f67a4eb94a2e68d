//! Typed failures that callers branch on.
//!
//! Storage and startup paths use `anyhow`; these enums cover the cases where
//! the kind of failure changes what the caller does or what the operator
//! sees.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

use crate::model::{IncidentId, IncidentSignature};

/// Failure talking to the alert API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Transport failure, already logged by the session.
    #[error("alert API unreachable")]
    Unreachable,

    #[error("alert API answered {0}")]
    Status(StatusCode),

    #[error("alert API returned an unreadable body: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Failure obtaining a fresh bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("auth endpoint rejected credentials with {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("auth response carried no access token")]
    MissingToken,
}

/// Failure sending one template message through the vendor.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("vendor unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("vendor rejected message with {0}")]
    Rejected(StatusCode),
}

/// Failure listing the open-incident feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Failure recording an operator decision.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("incident {0} already has a decision")]
    AlreadyDecided(IncidentId),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Failure acting on an operator decision.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("incident {0} could not be resolved")]
    Unresolvable(IncidentId),

    #[error("incident {0} already has a decision")]
    AlreadyDecided(IncidentId),

    #[error("an action for incident {0} is already in progress")]
    InFlight(IncidentId),

    #[error("fault {signature} was notified recently, cooling until {until}")]
    Cooling {
        signature: IncidentSignature,
        until: DateTime<Utc>,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<RecordError> for ActionError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::AlreadyDecided(id) => ActionError::AlreadyDecided(id),
            RecordError::Storage(e) => ActionError::Storage(e),
        }
    }
}
