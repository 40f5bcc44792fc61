//! Error types for deployment operations

use crate::script::ScriptPhase;
use crate::status::StackStatus;
use stackdeploy_config::ManifestError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

/// Failure reported by a [`CloudFormation`](crate::CloudFormation) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The request never got an answer (DNS, connect, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with an error.
    #[error("{message}")]
    Service {
        code: Option<String>,
        message: String,
    },
}

impl ProviderError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// CloudFormation rejects an update that changes nothing with a
    /// ValidationError; callers treat it as success.
    pub fn is_no_updates(&self) -> bool {
        matches!(self, Self::Service { message, .. } if message.contains(NO_UPDATES_MESSAGE))
    }
}

/// Errors that end a deployment command.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Unable to validate template {template}: {message}")]
    Validation { template: String, message: String },

    #[error("Can't resolve sourced parameter {reference}: {reason}")]
    MissingSourcedParameter { reference: String, reason: String },

    #[error("Found {count} stacks named {stack_name}; refusing to guess which one to touch")]
    AmbiguousStack { stack_name: String, count: usize },

    #[error("Stack {stack_name} does not exist")]
    StackNotFound { stack_name: String },

    #[error(
        "Stack {stack_name} is {status}, not in a healthy state for an update \
         (use --force to update anyway)"
    )]
    StackNotUpdatable {
        stack_name: String,
        status: StackStatus,
    },

    #[error("{operation} failed: {source}")]
    Provider {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("Invalid stack policy: {0}")]
    InvalidPolicy(String),

    #[error(
        "Change set {change_set} violates the stack policy \
         ({violations} protected resource(s) affected); not executing"
    )]
    PolicyViolation {
        change_set: String,
        violations: usize,
    },

    #[error("Change set {change_set} did not become ready: {status} {reason}")]
    ChangeSetFailed {
        change_set: String,
        status: String,
        reason: String,
    },

    #[error("{phase} script failed ({status}); the rendered script was kept at {path}")]
    ScriptFailure {
        phase: ScriptPhase,
        path: PathBuf,
        status: String,
    },

    #[error(
        "Lost contact with CloudFormation while waiting for {stack_name}: {message}\n\
         Check the stack status in the console and run the post-install step manually \
         once it finishes"
    )]
    Networking { stack_name: String, message: String },

    #[error("Stack {stack_name} disappeared while waiting for it to finish")]
    StackVanished { stack_name: String },

    #[error("Gave up waiting for {stack_name} after {waited_secs}s; last status was {status}")]
    PollTimeout {
        stack_name: String,
        waited_secs: u64,
        status: StackStatus,
    },

    #[error("Stack {stack_name} finished in {status}")]
    StackFailed {
        stack_name: String,
        status: StackStatus,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    pub fn provider(operation: &'static str, source: ProviderError) -> Self {
        Self::Provider { operation, source }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable name, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Manifest(_) => "manifest",
            Self::Validation { .. } => "validation",
            Self::MissingSourcedParameter { .. } => "missing_sourced_parameter",
            Self::AmbiguousStack { .. } => "ambiguous_stack",
            Self::StackNotFound { .. } => "stack_not_found",
            Self::StackNotUpdatable { .. } => "stack_not_updatable",
            Self::Provider { .. } => "provider",
            Self::InvalidPolicy(_) => "invalid_policy",
            Self::PolicyViolation { .. } => "policy_violation",
            Self::ChangeSetFailed { .. } => "changeset_failed",
            Self::ScriptFailure { .. } => "script_failure",
            Self::Networking { .. } => "networking",
            Self::StackVanished { .. } => "stack_vanished",
            Self::PollTimeout { .. } => "poll_timeout",
            Self::StackFailed { .. } => "stack_failed",
            Self::Io { .. } => "io",
        }
    }
}
