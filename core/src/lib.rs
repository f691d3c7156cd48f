//! Orchestration of the `restic` backup engine as a subprocess.
//!
//! [`RepositoryHandle`] serializes every operation on one repository,
//! initializes it lazily, streams backup progress to a callback while the
//! engine runs and decodes query output into typed records.

pub mod command;
pub mod config;
pub mod decode;
pub mod env;
pub mod error;
pub mod options;
pub mod progress;
pub mod repository;
pub mod runner;

pub use config::RepositoryConfig;
pub use decode::{DirectoryEntry, EntryType, SnapshotRecord};
pub use error::{AggregateError, CommandFailure, Error, FailureKind, Result};
pub use options::{BackupOptions, MalformedOutputPolicy, QueryOptions};
pub use progress::{BackupFileError, BackupStatus, BackupSummary, ProgressEvent};
pub use repository::{InitState, RepositoryHandle};
pub use tokio_util::sync::CancellationToken;
