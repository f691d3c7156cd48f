//! Launches the engine binary and collects its combined output.
//!
//! Standard output and standard error are copied line by line into one
//! in-memory pipe. A waiter task owns the child: it waits for exit (or kills
//! the child once the cancellation token fires), lets both copy tasks drain,
//! and only then shuts the pipe's write end, so a reader always sees
//! end-of-stream after the process is gone.

use crate::env::split_entry;
use crate::error::{AggregateError, CommandFailure, FailureKind};
use crate::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Everything needed to start one engine process.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<String>,
}

impl Invocation {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>, env: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
            env,
        }
    }

    /// Command line as shown in logs and errors. Secrets travel through the
    /// environment, which is never rendered.
    pub fn display(&self) -> String {
        let mut line = self.binary.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn command(&self) -> Result<Command> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args).env_clear();
        for entry in &self.env {
            let (key, value) = split_entry(entry).ok_or_else(|| {
                Error::Precondition(format!(
                    "environment entry {:?} is not of the form KEY=VALUE",
                    entry
                ))
            })?;
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

/// A started engine process: its merged output and the handle to its exit.
pub struct RunningProcess {
    pub command: String,
    pub output: BufReader<DuplexStream>,
    pub exit: ExitWaiter,
}

/// Resolves once the child has exited and its output pipe is closed.
///
/// Dropping it before completion kills the child.
pub struct ExitWaiter {
    handle: JoinHandle<std::result::Result<(), FailureKind>>,
    guard: DropGuard,
}

impl ExitWaiter {
    pub async fn wait(self) -> std::result::Result<(), FailureKind> {
        let ExitWaiter { handle, guard } = self;
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(FailureKind::Wait(std::io::Error::other(e))),
        };
        guard.disarm();
        result
    }
}

/// Starts the process in streamed mode. The caller must drain `output`
/// concurrently with awaiting `exit`.
pub fn spawn_streamed(
    invocation: &Invocation,
    cancel: &CancellationToken,
) -> Result<RunningProcess> {
    let command = invocation.display();
    let mut cmd = invocation.command()?;

    debug!(command = %command, "Spawning engine process");
    let mut child = cmd
        .spawn()
        .map_err(|e| CommandFailure::new(command.clone(), Vec::new(), FailureKind::Spawn(e)))?;

    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let writer = Arc::new(Mutex::new(writer));

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, writer.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, writer.clone())));
    }

    let token = cancel.child_token();
    let guard = token.clone().drop_guard();
    let handle = tokio::spawn(wait_for_exit(child, pumps, writer, token, command.clone()));

    Ok(RunningProcess {
        command,
        output: BufReader::new(reader),
        exit: ExitWaiter { handle, guard },
    })
}

/// Runs the process in buffered mode and returns its combined output.
pub async fn run_buffered(invocation: &Invocation, cancel: &CancellationToken) -> Result<Vec<u8>> {
    let RunningProcess { command, mut output, exit } = spawn_streamed(invocation, cancel)?;

    let mut captured = Vec::new();
    let (read, exit) = tokio::join!(output.read_to_end(&mut captured), exit.wait());

    let mut errors = Vec::new();
    if let Err(kind) = exit {
        errors.push(Error::from(CommandFailure::new(command.clone(), captured.clone(), kind)));
    }
    if let Err(e) = read {
        let kind = FailureKind::ReadOutput(e);
        errors.push(Error::from(CommandFailure::new(command, captured.clone(), kind)));
    }
    AggregateError::new(errors).into_result()?;

    Ok(captured)
}

/// Copies whole lines from one child stream into the shared pipe. Once the
/// pipe is gone the rest of the stream is discarded so the child never
/// blocks on a full buffer. A failed read of the child stream is returned.
async fn pump<R>(source: R, sink: Arc<Mutex<DuplexStream>>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut source = BufReader::new(source);
    let mut line = Vec::new();
    let mut sink_open = true;

    loop {
        line.clear();
        if source.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }

        if sink_open {
            let mut sink = sink.lock().await;
            if let Err(e) = sink.write_all(&line).await {
                debug!(error = %e, "Output reader went away, discarding remaining output");
                sink_open = false;
            }
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    pumps: Vec<JoinHandle<std::io::Result<()>>>,
    pipe: Arc<Mutex<DuplexStream>>,
    cancel: CancellationToken,
    command: String,
) -> std::result::Result<(), FailureKind> {
    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(FailureKind::Exit(status)),
            Err(e) => Err(FailureKind::Wait(e)),
        },
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(command = %command, error = %e, "Failed to kill cancelled engine process");
            }
            Err(FailureKind::Cancelled)
        }
    };

    let mut copy_error = None;
    for pump in pumps {
        match pump.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(command = %command, error = %e, "Reading engine output failed");
                if copy_error.is_none() {
                    copy_error = Some(e);
                }
            }
            Err(e) => warn!(command = %command, error = %e, "Output copy task failed"),
        }
    }
    let outcome = match (outcome, copy_error) {
        (Ok(()), Some(e)) => Err(FailureKind::ReadOutput(e)),
        (outcome, _) => outcome,
    };

    if let Err(e) = pipe.lock().await.shutdown().await {
        debug!(error = %e, "Closing output pipe failed");
    }

    match &outcome {
        Ok(()) => debug!(command = %command, "Engine process exited successfully"),
        Err(kind) => debug!(command = %command, outcome = %kind, "Engine process failed"),
    }
    outcome
}
