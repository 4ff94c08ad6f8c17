//! Recreate Docker containers with new configuration, keeping their name and
//! networks, rolling back when the new container cannot be created or
//! started, and detecting image updates.

pub mod config;
pub mod error;
pub mod labels;
pub mod lock;
pub mod policy;
pub mod recreate;
pub mod runtime;
pub mod types;
pub mod updates;

pub use error::{Error, Operation, Result};
pub use lock::EditLock;
pub use recreate::{DestroyWait, Orchestrator, RecreateState};
pub use runtime::{DaemonGateway, DockerGateway};
pub use types::{EditOutcome, InstanceDescriptor, UpdateResult};
pub use updates::UpdateDetector;
