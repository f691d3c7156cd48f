//! Backup progress records and the reader that turns the engine's live
//! `--json` stream into callback events.

use crate::error::{AggregateError, CommandFailure, FailureKind};
use crate::options::MalformedOutputPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupStatus {
    pub percent_done: f64,
    pub total_files: u64,
    pub files_done: u64,
    pub total_bytes: u64,
    pub bytes_done: u64,
    pub error_count: u64,
    pub seconds_elapsed: u64,
    pub seconds_remaining: u64,
    pub current_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSummary {
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unmodified: u64,
    pub dirs_new: u64,
    pub dirs_changed: u64,
    pub dirs_unmodified: u64,
    pub data_blobs: i64,
    pub tree_blobs: i64,
    pub data_added: u64,
    pub total_files_processed: u64,
    pub total_bytes_processed: u64,
    /// Seconds.
    pub total_duration: f64,
    /// Absent for dry runs.
    pub snapshot_id: Option<String>,
}

/// An item the engine could not back up. The backup itself continues.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupFileError {
    pub error: serde_json::Value,
    pub during: String,
    pub item: String,
}

impl BackupFileError {
    pub fn message(&self) -> String {
        match self.error.get("message").and_then(|m| m.as_str()) {
            Some(message) => message.to_string(),
            None => self.error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProgressEvent {
    Status(BackupStatus),
    FileError(BackupFileError),
    Summary(BackupSummary),
}

#[derive(Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum BackupRecord {
    Status(BackupStatus),
    Summary(BackupSummary),
    Error(BackupFileError),
    VerboseStatus {},
}

/// What the reader saw by the time the stream ended.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    pub summary: Option<BackupSummary>,
    /// Lines that were neither blank nor a known record, in order.
    pub malformed: Vec<String>,
    /// Every byte read from the stream.
    pub output: Vec<u8>,
    /// Failure of the reader itself, independent of malformed lines.
    pub read_error: Option<FailureKind>,
}

/// Reads newline-delimited progress records until end-of-stream.
///
/// Status records go to `callback` in non-decreasing `bytes_done` order;
/// the summary is delivered after end-of-stream so it is always the last
/// event. The stream is drained completely even after a bad line.
pub async fn read_progress<R, F>(mut reader: R, mut callback: F) -> StreamOutcome
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&ProgressEvent),
{
    let mut outcome = StreamOutcome::default();
    let mut last_bytes_done = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                outcome.read_error = Some(FailureKind::ReadOutput(e));
                break;
            }
        }
        outcome.output.extend_from_slice(&line);

        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_slice::<BackupRecord>(trimmed) {
            Ok(BackupRecord::Status(status)) => {
                if status.bytes_done < last_bytes_done {
                    debug!(
                        bytes_done = status.bytes_done,
                        last_bytes_done, "Dropping out-of-order status record"
                    );
                    continue;
                }
                last_bytes_done = status.bytes_done;
                callback(&ProgressEvent::Status(status));
            }
            Ok(BackupRecord::Error(error)) => {
                warn!(
                    item = %error.item,
                    during = %error.during,
                    error = %error.message(),
                    "Engine reported an item error"
                );
                callback(&ProgressEvent::FileError(error));
            }
            Ok(BackupRecord::Summary(summary)) => {
                if outcome.summary.is_some() {
                    if outcome.read_error.is_none() {
                        outcome.read_error = Some(FailureKind::MalformedOutput(
                            "stream contained more than one summary record".to_string(),
                        ));
                    }
                } else {
                    outcome.summary = Some(summary);
                }
            }
            Ok(BackupRecord::VerboseStatus {}) => {}
            Err(_) => {
                outcome.malformed.push(String::from_utf8_lossy(trimmed).into_owned());
            }
        }
    }

    if let Some(summary) = &outcome.summary {
        callback(&ProgressEvent::Summary(summary.clone()));
    }
    outcome
}

/// Combines the waiter's and the reader's results for one backup stream.
///
/// Both failures are kept when both sides fail, waiter first. A summary seen
/// before a failure travels with the error as `Error::Incomplete`.
pub fn resolve_stream(
    command: &str,
    exit: std::result::Result<(), FailureKind>,
    outcome: StreamOutcome,
    policy: MalformedOutputPolicy,
) -> Result<BackupSummary> {
    let StreamOutcome {
        summary,
        malformed,
        output,
        read_error,
    } = outcome;
    let exited_ok = exit.is_ok();
    let mut errors = Vec::new();

    if let Err(kind) = exit {
        errors.push(Error::from(CommandFailure::new(command, output.clone(), kind)));
    }

    let mut reader_failure = read_error;
    if reader_failure.is_none() && !malformed.is_empty() {
        let fatal = match policy {
            MalformedOutputPolicy::Strict => true,
            MalformedOutputPolicy::TolerateOnFailure => exited_ok,
            MalformedOutputPolicy::Ignore => false,
        };
        if fatal {
            reader_failure = Some(FailureKind::MalformedOutput(format!(
                "unrecognized output line {:?}",
                malformed[0]
            )));
        } else {
            warn!(
                command,
                lines = malformed.len(),
                first = %malformed[0],
                "Ignoring unrecognized engine output"
            );
        }
    }
    if reader_failure.is_none() && exited_ok && summary.is_none() {
        reader_failure = Some(FailureKind::MalformedOutput(
            "output ended without a summary record".to_string(),
        ));
    }
    if let Some(kind) = reader_failure {
        errors.push(Error::from(CommandFailure::new(command, output, kind)));
    }

    if let Err(error) = AggregateError::new(errors).into_result() {
        return Err(match summary {
            Some(summary) => Error::Incomplete {
                summary: Box::new(summary),
                source: Box::new(error),
            },
            None => error,
        });
    }
    summary.ok_or_else(|| {
        Error::from(CommandFailure::new(
            command,
            Vec::new(),
            FailureKind::MalformedOutput("output ended without a summary record".to_string()),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::ExitStatus;

    const STATUS_1: &str = r#"{"message_type":"status","percent_done":0.25,"total_files":4,"files_done":1,"total_bytes":400,"bytes_done":100,"current_files":["/data/a"]}"#;
    const STATUS_2: &str = r#"{"message_type":"status","percent_done":0.5,"total_files":4,"files_done":2,"total_bytes":400,"bytes_done":200}"#;
    const STATUS_OLD: &str = r#"{"message_type":"status","bytes_done":150}"#;
    const SUMMARY: &str = r#"{"message_type":"summary","files_new":4,"files_changed":0,"files_unmodified":0,"dirs_new":1,"dirs_changed":0,"dirs_unmodified":0,"data_blobs":4,"tree_blobs":1,"data_added":400,"total_files_processed":4,"total_bytes_processed":400,"total_duration":1.5,"snapshot_id":"4f1e0a2b"}"#;
    const FILE_ERROR: &str = r#"{"message_type":"error","error":{"message":"permission denied"},"during":"archival","item":"/data/secret"}"#;

    fn stream(lines: &[&str]) -> Vec<u8> {
        let mut data = lines.join("\n");
        data.push('\n');
        data.into_bytes()
    }

    #[cfg(unix)]
    fn exit_code(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    async fn collect(data: &[u8]) -> (StreamOutcome, Vec<ProgressEvent>) {
        let mut events = Vec::new();
        let outcome = read_progress(data, |event| events.push(event.clone())).await;
        (outcome, events)
    }

    #[tokio::test]
    async fn test_status_then_summary_last() {
        let data = stream(&[STATUS_1, SUMMARY, STATUS_2]);
        let (outcome, events) = collect(&data).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ProgressEvent::Status(s) if s.bytes_done == 100));
        assert!(matches!(&events[1], ProgressEvent::Status(s) if s.bytes_done == 200));
        assert!(matches!(
            &events[2],
            ProgressEvent::Summary(s) if s.snapshot_id.as_deref() == Some("4f1e0a2b")
        ));
        assert_eq!(outcome.summary.unwrap().files_new, 4);
        assert_eq!(outcome.output, data);
        assert!(outcome.malformed.is_empty());
    }

    #[tokio::test]
    async fn test_status_bytes_never_decrease() {
        let data = stream(&[STATUS_1, STATUS_2, STATUS_OLD, SUMMARY]);
        let (_, events) = collect(&data).await;

        let bytes: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Status(s) => Some(s.bytes_done),
                _ => None,
            })
            .collect();
        assert_eq!(bytes, vec![100, 200]);
    }

    #[tokio::test]
    async fn test_file_errors_are_events() {
        let data = stream(&[STATUS_1, FILE_ERROR, SUMMARY]);
        let (_, events) = collect(&data).await;

        match &events[1] {
            ProgressEvent::FileError(error) => {
                assert_eq!(error.item, "/data/secret");
                assert_eq!(error.message(), "permission denied");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_lines_are_recorded_and_stream_drained() {
        let data = stream(&[
            STATUS_1,
            "Fatal: unable to open repository",
            r#"{"message_type":"teapot"}"#,
            "",
            r#"{"message_type":"verbose_status","action":"new","item":"/data/a"}"#,
            STATUS_2,
        ]);
        let (outcome, events) = collect(&data).await;

        assert_eq!(
            outcome.malformed,
            vec![
                "Fatal: unable to open repository".to_string(),
                r#"{"message_type":"teapot"}"#.to_string(),
            ]
        );
        assert_eq!(events.len(), 2);
        assert!(outcome.summary.is_none());
    }

    #[tokio::test]
    async fn test_second_summary_is_a_read_error() {
        let data = stream(&[SUMMARY, SUMMARY]);
        let (outcome, events) = collect(&data).await;

        assert!(matches!(outcome.read_error, Some(FailureKind::MalformedOutput(_))));
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let (outcome, _) = collect(&stream(&[STATUS_1, SUMMARY])).await;
        let summary = resolve_stream(
            "restic backup",
            Ok(()),
            outcome,
            MalformedOutputPolicy::default(),
        )
        .unwrap();
        assert_eq!(summary.total_bytes_processed, 400);
    }

    #[tokio::test]
    async fn test_resolve_missing_summary_after_success() {
        let (outcome, _) = collect(&stream(&[STATUS_1])).await;
        let err = resolve_stream(
            "restic backup",
            Ok(()),
            outcome,
            MalformedOutputPolicy::default(),
        )
        .unwrap_err();
        assert!(err.command_failure().unwrap().is_malformed_output());
    }

    #[tokio::test]
    async fn test_resolve_malformed_after_success_fails_by_default() {
        let (outcome, _) = collect(&stream(&["garbage", SUMMARY])).await;
        let err = resolve_stream(
            "restic backup",
            Ok(()),
            outcome,
            MalformedOutputPolicy::TolerateOnFailure,
        )
        .unwrap_err();
        assert!(err.command_failure().unwrap().is_malformed_output());
    }

    #[tokio::test]
    async fn test_resolve_ignore_policy() {
        let (outcome, _) = collect(&stream(&["garbage", SUMMARY])).await;
        let policy = MalformedOutputPolicy::Ignore;
        assert!(resolve_stream("restic backup", Ok(()), outcome, policy).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_failed_exit_tolerates_diagnostics() {
        let data = stream(&[STATUS_1, "Fatal: unable to save snapshot"]);
        let (outcome, _) = collect(&data).await;

        let err = resolve_stream(
            "restic backup",
            Err(FailureKind::Exit(exit_code(1))),
            outcome,
            MalformedOutputPolicy::TolerateOnFailure,
        )
        .unwrap_err();
        let failure = err.command_failure().expect("a single command failure");
        assert_eq!(failure.exit_code(), Some(1));
        assert_eq!(failure.output, data);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_strict_aggregates_both_failures() {
        let (outcome, _) = collect(&stream(&["not json"])).await;

        let err = resolve_stream(
            "restic backup",
            Err(FailureKind::Exit(exit_code(1))),
            outcome,
            MalformedOutputPolicy::Strict,
        )
        .unwrap_err();
        match err {
            Error::Aggregate(aggregate) => {
                let errors = aggregate.errors();
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].command_failure().unwrap().exit_code(), Some(1));
                assert!(errors[1].command_failure().unwrap().is_malformed_output());
            }
            other => panic!("expected aggregate, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_failed_exit_after_summary_keeps_summary() {
        let data = stream(&[STATUS_1, FILE_ERROR, SUMMARY]);
        let (outcome, _) = collect(&data).await;

        let err = resolve_stream(
            "restic backup",
            Err(FailureKind::Exit(exit_code(3))),
            outcome,
            MalformedOutputPolicy::default(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Incomplete { .. }));
        assert_eq!(err.summary().unwrap().snapshot_id.as_deref(), Some("4f1e0a2b"));
        assert_eq!(err.command_failure().unwrap().exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_resolve_cancelled_without_summary() {
        let (outcome, _) = collect(&stream(&[STATUS_1])).await;
        let err = resolve_stream(
            "restic backup",
            Err(FailureKind::Cancelled),
            outcome,
            MalformedOutputPolicy::default(),
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
