use crate::progress::BackupSummary;
use std::fmt;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Command(#[from] CommandFailure),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("failed to initialize repository: {0}")]
    Init(Box<Error>),

    /// The engine reported a summary but the run still failed, e.g. restic
    /// exit code 3 when some source files could not be read.
    #[error("{source}")]
    Incomplete {
        summary: Box<BackupSummary>,
        source: Box<Error>,
    },
}

impl Error {
    /// True when this error, or any error aggregated into it, comes from
    /// a cancelled invocation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Command(failure) => failure.is_cancelled(),
            Error::Aggregate(aggregate) => aggregate.errors().iter().any(Error::is_cancelled),
            Error::Init(inner) => inner.is_cancelled(),
            Error::Incomplete { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    pub fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            Error::Command(failure) => Some(failure),
            Error::Init(inner) => inner.command_failure(),
            Error::Incomplete { source, .. } => source.command_failure(),
            _ => None,
        }
    }

    /// The backup summary a failed run still produced, if any.
    pub fn summary(&self) -> Option<&BackupSummary> {
        match self {
            Error::Incomplete { summary, .. } => Some(summary.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong while running one engine invocation.
#[derive(Error, Debug)]
pub enum FailureKind {
    #[error("failed to start: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("exited with {0}")]
    Exit(ExitStatus),

    #[error("failed waiting for exit: {0}")]
    Wait(#[source] std::io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("output could not be decoded: {0}")]
    MalformedOutput(String),

    #[error("failed reading output: {0}")]
    ReadOutput(#[source] std::io::Error),
}

/// One failed engine invocation: the command line, everything it printed
/// before failing, and the cause.
#[derive(Debug)]
pub struct CommandFailure {
    pub command: String,
    pub output: Vec<u8>,
    pub kind: FailureKind,
}

impl CommandFailure {
    pub fn new(command: impl Into<String>, output: Vec<u8>, kind: FailureKind) -> Self {
        Self {
            command: command.into(),
            output,
            kind,
        }
    }

    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, FailureKind::Cancelled)
    }

    pub fn is_malformed_output(&self) -> bool {
        matches!(self.kind, FailureKind::MalformedOutput(_))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match &self.kind {
            FailureKind::Exit(status) => status.code(),
            _ => None,
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command \"{}\" {}", self.command, self.kind)?;
        let output = self.output_str();
        let output = output.trim_end();
        if !output.is_empty() {
            write!(f, "\noutput:\n{}", output)?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Ordered collection of errors from concurrent sources; none is dropped.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    pub fn new(errors: Vec<Error>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapses the collected errors: none yields `Ok`, a single error is
    /// returned as-is, several become an `Error::Aggregate`.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Aggregate(self)),
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n\t* {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled(command: &str) -> Error {
        CommandFailure::new(command, b"partial".to_vec(), FailureKind::Cancelled).into()
    }

    #[test]
    fn test_aggregate_keeps_every_error_in_order() {
        let aggregate = AggregateError::new(vec![
            cancelled("restic backup"),
            Error::Precondition("bad".to_string()),
        ]);
        let rendered = aggregate.to_string();

        assert!(rendered.starts_with("2 errors occurred:"));
        let first = rendered.find("restic backup").unwrap();
        let second = rendered.find("Precondition failed: bad").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_into_result_collapses_single_error() {
        assert!(AggregateError::new(vec![]).into_result().is_ok());

        let single = AggregateError::new(vec![cancelled("restic init")]).into_result();
        assert!(matches!(single, Err(Error::Command(_))));

        let double = AggregateError::new(vec![
            cancelled("restic init"),
            Error::Config("x".to_string()),
        ])
        .into_result();
        assert!(matches!(double, Err(Error::Aggregate(ref a)) if a.len() == 2));
    }

    #[test]
    fn test_cancellation_is_found_through_wrappers() {
        let nested = Error::Init(Box::new(cancelled("restic init")));
        assert!(nested.is_cancelled());

        let aggregate = Error::Aggregate(AggregateError::new(vec![
            Error::Config("x".to_string()),
            cancelled("restic backup"),
        ]));
        assert!(aggregate.is_cancelled());
        assert!(!Error::Config("x".to_string()).is_cancelled());
    }

    #[test]
    fn test_incomplete_keeps_summary_and_cause() {
        let summary = BackupSummary {
            snapshot_id: Some("4f1e0a2b".to_string()),
            ..Default::default()
        };
        let err = Error::Incomplete {
            summary: Box::new(summary),
            source: Box::new(cancelled("restic backup")),
        };

        assert_eq!(err.summary().unwrap().snapshot_id.as_deref(), Some("4f1e0a2b"));
        assert!(err.is_cancelled());
        assert_eq!(err.command_failure().unwrap().command, "restic backup");
        assert!(err.to_string().starts_with("command \"restic backup\" cancelled"));
        assert!(Error::Config("x".to_string()).summary().is_none());
    }

    #[test]
    fn test_display_includes_captured_output() {
        let failure = CommandFailure::new(
            "restic snapshots --json",
            b"Fatal: wrong password\n".to_vec(),
            FailureKind::MalformedOutput("expected value".to_string()),
        );
        let rendered = failure.to_string();

        assert!(failure.is_malformed_output());
        assert!(rendered.contains("restic snapshots --json"));
        assert!(rendered.ends_with("Fatal: wrong password"));
    }
}
