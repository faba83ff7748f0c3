//! Error types for record orchestration.

use crate::models::AssemblyStep;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The remote endpoint could not be reached, timed out, or sent an unreadable body.
    #[error("transport error during {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The remote endpoint answered with a non-success status.
    #[error("{operation} {resource_type} rejected with HTTP {status}: {body}")]
    RemoteRejected {
        operation: &'static str,
        resource_type: String,
        status: u16,
        body: String,
    },

    #[error("{resource_type}/{id} not found")]
    NotFound { resource_type: String, id: String },

    /// A search had more result pages than the configured page limit.
    #[error("{resource_type} search exceeded the limit of {pages} result pages")]
    SearchLimitExceeded { resource_type: String, pages: usize },

    /// The Patient exists remotely but a dependent step failed.
    #[error("assembly of Patient/{patient_id} failed at {step} ({compensation}): {source}")]
    PartialAssembly {
        patient_id: String,
        step: AssemblyStep,
        compensation: Compensation,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid payload field '{field}': {reason}")]
    InvalidPayload { field: &'static str, reason: String },

    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Transport {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn invalid_payload(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidPayload {
            field,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// The failing step, when this is a partial assembly failure.
    pub fn failed_step(&self) -> Option<&AssemblyStep> {
        match self {
            Error::PartialAssembly { step, .. } => Some(step),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// What happened to a half-built record graph after a dependent step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// The Patient and every dependent created so far were purged.
    RolledBack,
    /// The partial graph was left in place with the Patient tagged incomplete.
    Retained,
    /// The partial graph was left in place but tagging the Patient failed.
    RetainedUntagged(String),
    /// Rollback was attempted and failed; the partial graph may still exist.
    RollbackFailed(String),
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::RolledBack => write!(f, "rolled back"),
            Compensation::Retained => write!(f, "retained as incomplete"),
            Compensation::RetainedUntagged(reason) => {
                write!(f, "retained but not tagged incomplete: {reason}")
            }
            Compensation::RollbackFailed(reason) => write!(f, "rollback failed: {reason}"),
        }
    }
}
