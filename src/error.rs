//! Error type shared by every part of the recreate core.

use std::fmt;
use std::time::Duration;

/// A daemon call, used to tag errors with the step that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Ping,
    List,
    Inspect,
    Stop,
    Remove,
    Create,
    Start,
    Kill,
    Pull,
    InspectImage,
    ConnectNetwork,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Ping => "ping",
            Operation::List => "list",
            Operation::Inspect => "inspect",
            Operation::Stop => "stop",
            Operation::Remove => "remove",
            Operation::Create => "create",
            Operation::Start => "start",
            Operation::Kill => "kill",
            Operation::Pull => "pull",
            Operation::InspectImage => "inspect image",
            Operation::ConnectNetwork => "connect network",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The daemon could not be reached. Re-checked on the next entry.
    #[error("daemon connection failed: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A remote call failed; `op` names the step.
    #[error("{op} failed for {target}: {message}")]
    Daemon {
        op: Operation,
        target: String,
        message: String,
    },

    #[error("image pull failed for {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("timed out after {waited:?} waiting for {id} to be destroyed")]
    Timeout { id: String, waited: Duration },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// The edit failed but the previous instance was restored.
    #[error("edit failed, but restored to previous state ({restored_id}). Error was: {cause}")]
    RolledBack {
        restored_id: String,
        cause: Box<Error>,
    },

    /// The edit failed and so did the restore. Manual recovery is needed.
    #[error("edit failed: {cause}; revert also failed: {revert}")]
    Revert {
        cause: Box<Error>,
        revert: Box<Error>,
    },
}

impl Error {
    pub fn daemon(op: Operation, target: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Daemon {
            op,
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// The operation that failed, when the error came from a single daemon call.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Error::Daemon { op, .. } => Some(*op),
            Error::ImagePull { .. } => Some(Operation::Pull),
            Error::Connection(_) => Some(Operation::Ping),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
