//! Error taxonomy for cluster orchestration.
//!
//! Every variant is recoverable: the caller logs it and lets the next
//! reconcile re-inspect the cluster.

use thiserror::Error;

use crate::client::{ParseError, RedisError};

#[derive(Error, Debug)]
pub enum TopologyError {
    /// Unreachable address, refused connection, failed auth or TLS handshake.
    #[error("Connectivity error for {target}: {source}")]
    Connectivity {
        target: String,
        #[source]
        source: RedisError,
    },

    /// Unexpected reply shape. The raw payload is kept for diagnosis.
    #[error("Unparseable reply: {message}")]
    ProtocolParse { message: String, payload: String },

    /// Refused before touching the cluster.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// Remote exec failed or the command exited non-zero.
    #[error("Command `{command}` failed: {message}")]
    Executor {
        command: String,
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The executor cannot run this command.
    #[error("Unsupported command: {0}")]
    Unsupported(String),
}

impl TopologyError {
    pub fn connectivity(target: impl Into<String>, source: RedisError) -> Self {
        match source {
            RedisError::Parse(e) => TopologyError::from(e),
            source => TopologyError::Connectivity {
                target: target.into(),
                source,
            },
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        TopologyError::PreconditionViolation(message.into())
    }

    /// Short label for metrics and status reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            TopologyError::Connectivity { .. } => "connectivity",
            TopologyError::ProtocolParse { .. } => "protocol_parse",
            TopologyError::PreconditionViolation(_) => "precondition",
            TopologyError::Executor { .. } => "executor",
            TopologyError::Kube(_) => "kube",
            TopologyError::Unsupported(_) => "unsupported",
        }
    }
}

impl From<ParseError> for TopologyError {
    fn from(e: ParseError) -> Self {
        TopologyError::ProtocolParse {
            message: e.to_string(),
            payload: String::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TopologyError>;
