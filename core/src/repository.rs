use crate::command::{CommandLine, Operation};
use crate::decode::{self, DirectoryEntry, SnapshotRecord};
use crate::env::{build_env, host_lookup};
use crate::error::{CommandFailure, FailureKind};
use crate::options::{BackupOptions, QueryOptions};
use crate::progress::{self, BackupSummary, ProgressEvent};
use crate::runner::{self, Invocation, RunningProcess};
use crate::{Error, RepositoryConfig, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Engine messages meaning `init` found an existing repository.
const ALREADY_INITIALIZED: &[&str] = &["config file already exists", "already initialized"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Ready,
}

/// Serialized access to one engine-managed repository.
///
/// Every operation holds the handle's lock for its whole duration, including
/// the one-time `init` the first operation performs. Concurrent callers wait
/// their turn; operations on different handles never wait for each other.
///
/// # Examples
///
/// ```no_run
/// use resticctl_core::{BackupOptions, RepositoryConfig, RepositoryHandle};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> resticctl_core::Result<()> {
///     let repo = RepositoryHandle::new(RepositoryConfig::new("/srv/restic", "secret"));
///     let cancel = CancellationToken::new();
///
///     let summary = repo
///         .backup(BackupOptions::new(["/etc"]), &cancel, |event| println!("{:?}", event))
///         .await?;
///     println!("snapshot {:?}", summary.snapshot_id);
///
///     for snapshot in repo.snapshots(Default::default(), &cancel).await? {
///         println!("{} {}", snapshot.short_id(), snapshot.time);
///     }
///     Ok(())
/// }
/// ```
pub struct RepositoryHandle {
    config: RepositoryConfig,
    state: Mutex<InitState>,
}

impl RepositoryHandle {
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(InitState::Uninitialized),
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub async fn state(&self) -> InitState {
        *self.state.lock().await
    }

    /// Forces the next operation to run `init` again.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = InitState::Uninitialized;
        debug!(repository = %self.config.uri, "Repository state reset");
    }

    /// Initializes the repository unless this handle already did.
    pub async fn init(&self, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state, cancel).await
    }

    /// Backs up `options.paths`, reporting progress to `callback` while the
    /// engine runs, and returns the final summary.
    pub async fn backup<F>(
        &self,
        options: BackupOptions,
        cancel: &CancellationToken,
        callback: F,
    ) -> Result<BackupSummary>
    where
        F: FnMut(&ProgressEvent) + Send,
    {
        for path in &options.paths {
            if let Err(e) = tokio::fs::metadata(path).await {
                return Err(Error::Precondition(format!("path {} does not exist: {}", path, e)));
            }
        }

        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state, cancel)
            .await
            .map_err(|e| Error::Init(Box::new(e)))?;

        let args = CommandLine::new(Operation::Backup)
            .args(self.config.extra_args.iter().cloned())
            .args(options.paths.iter().cloned())
            .repeated("--exclude", options.excludes.iter().cloned())
            .repeated("--tag", options.tags.iter().cloned())
            .args(options.flags.iter().cloned())
            .into_vec();
        let invocation = self.invocation(args, &options.env);

        info!(repository = %self.config.uri, paths = options.paths.len(), "Starting backup");
        let RunningProcess { command, output, exit } = runner::spawn_streamed(&invocation, cancel)?;
        let (outcome, exit) = tokio::join!(progress::read_progress(output, callback), exit.wait());
        let summary = progress::resolve_stream(&command, exit, outcome, options.malformed_output)?;

        info!(
            repository = %self.config.uri,
            snapshot = summary.snapshot_id.as_deref().unwrap_or("-"),
            files = summary.total_files_processed,
            bytes = summary.total_bytes_processed,
            "Backup completed"
        );
        Ok(summary)
    }

    pub async fn snapshots(
        &self,
        options: QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<SnapshotRecord>> {
        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state, cancel)
            .await
            .map_err(|e| Error::Init(Box::new(e)))?;

        let args = CommandLine::new(Operation::Snapshots)
            .args(self.config.extra_args.iter().cloned())
            .repeated("--tag", options.tags.iter().cloned())
            .args(options.flags.iter().cloned())
            .into_vec();
        let invocation = self.invocation(args, &options.env);

        let output = runner::run_buffered(&invocation, cancel).await?;
        match decode::decode_snapshots(&output) {
            Ok(snapshots) => Ok(snapshots),
            Err(e) => Err(malformed(&invocation, output, e)),
        }
    }

    /// Lists `path` inside `snapshot`. An empty path would walk the whole
    /// snapshot and is refused.
    pub async fn list_directory(
        &self,
        snapshot: &str,
        path: &str,
        options: QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<(SnapshotRecord, Vec<DirectoryEntry>)> {
        if path.is_empty() {
            return Err(Error::Precondition("path must not be empty".to_string()));
        }

        let mut state = self.state.lock().await;
        self.ensure_initialized(&mut state, cancel)
            .await
            .map_err(|e| Error::Init(Box::new(e)))?;

        let args = CommandLine::new(Operation::Ls)
            .args(self.config.extra_args.iter().cloned())
            .arg(snapshot)
            .arg(path)
            .repeated("--tag", options.tags.iter().cloned())
            .args(options.flags.iter().cloned())
            .into_vec();
        let invocation = self.invocation(args, &options.env);

        let output = runner::run_buffered(&invocation, cancel).await?;
        match decode::decode_listing(&output) {
            Ok(listing) => Ok(listing),
            Err(e) => Err(malformed(&invocation, output, e)),
        }
    }

    /// Runs `init` if `state` says it has not run yet. Callers hold the lock.
    async fn ensure_initialized(
        &self,
        state: &mut InitState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if *state == InitState::Ready {
            return Ok(());
        }

        let args = CommandLine::new(Operation::Init)
            .args(self.config.extra_args.iter().cloned())
            .into_vec();
        let invocation = self.invocation(args, &[]);

        match runner::run_buffered(&invocation, cancel).await {
            Ok(_) => {
                info!(repository = %self.config.uri, "Initialized repository");
            }
            Err(Error::Command(failure)) if already_initialized(&failure) => {
                info!(repository = %self.config.uri, "Repository already initialized");
            }
            Err(e) => return Err(e),
        }

        *state = InitState::Ready;
        Ok(())
    }

    fn invocation(&self, args: Vec<String>, call_env: &[String]) -> Invocation {
        let env = build_env(&self.config, &self.config.propagate_env, call_env, host_lookup);
        Invocation::new(self.config.binary.clone(), args, env)
    }
}

fn already_initialized(failure: &CommandFailure) -> bool {
    if !matches!(failure.kind, FailureKind::Exit(_)) {
        return false;
    }
    let output = failure.output_str();
    ALREADY_INITIALIZED.iter().any(|marker| output.contains(marker))
}

fn malformed(invocation: &Invocation, output: Vec<u8>, error: decode::DecodeError) -> Error {
    let kind = FailureKind::MalformedOutput(error.to_string());
    CommandFailure::new(invocation.display(), output, kind).into()
}
