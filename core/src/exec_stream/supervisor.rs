use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use tern_protocol::OutputStream;
use tern_protocol::SessionStatus;

use crate::exec_stream::DEFAULT_TAIL_CHARS;
use crate::exec_stream::errors::ExecError;
use crate::exec_stream::events::EventSink;
use crate::exec_stream::params::StdinMode;
use crate::exec_stream::registry::ProcessRegistry;
use crate::exec_stream::session::Session;
use crate::exec_stream::session_id::SessionId;
use crate::shell;
use crate::shell::ShellConfig;

/// Bytes per OS read; chunks handed to the ring and the event sink never
/// exceed this.
const READ_CHUNK_SIZE: usize = 8192;

/// How long the waiter lets the pipe readers flush after the child exits. A
/// descendant that inherited the pipes must not wedge finalization.
const STREAM_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// One start invocation: the command, its limits, and the per-call
/// cancellation and event plumbing.
#[derive(Debug)]
pub struct ExecRequest {
    pub command: String,
    pub workdir: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    pub yield_ms: Option<u64>,
    pub stdin_mode: StdinMode,
    /// Firing this kills the process tree and fails the call.
    pub abort: CancellationToken,
    /// Firing this returns a running outcome immediately; the child survives.
    pub soft_yield: CancellationToken,
    pub events: EventSink,
}

#[derive(Debug)]
pub enum ExecOutcome {
    Completed {
        exit_code: i32,
        duration_ms: u64,
        aggregated: String,
    },
    Running {
        session_id: SessionId,
        pid: u32,
        started_at: DateTime<Utc>,
        tail: String,
    },
}

/// Launches children under the shell adapter, streams their output, and
/// decides each call's single settlement: completion, failure, or yield.
#[derive(Debug, Clone)]
pub struct ExecSupervisor {
    registry: Arc<ProcessRegistry>,
}

enum Settled {
    Exited,
    Yielded,
    Aborted,
}

impl ExecSupervisor {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }

    pub async fn start(&self, request: ExecRequest) -> Result<ExecOutcome, ExecError> {
        if request.command.trim().is_empty() {
            return Err(ExecError::MissingCommand);
        }
        if request.stdin_mode != StdinMode::Pipe {
            return Err(ExecError::UnsupportedStdinMode {
                mode: request.stdin_mode.as_str().to_string(),
            });
        }

        let config = self.registry.config();
        let yield_window = Duration::from_millis(config.clamp_yield_ms(request.yield_ms));
        let max_output_chars = config.max_output_chars;

        let shell = shell::shell_config()?;
        let mut child = spawn_child(&shell, &request)?;
        let pid = child.id().ok_or_else(|| ExecError::Spawn {
            source: std::io::Error::other("child pid was unexpectedly not available"),
        })?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| ExecError::Stdio {
            source: std::io::Error::other("stdout pipe was unexpectedly not available"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ExecError::Stdio {
            source: std::io::Error::other("stderr pipe was unexpectedly not available"),
        })?;

        let session = Arc::new(Session::new(
            self.registry.next_session_id(),
            request.command.clone(),
            request.workdir.clone(),
            pid,
            max_output_chars,
            stdin,
            request.events.clone(),
        ));
        self.registry.add(Arc::clone(&session)).await;

        let stdout_task = tokio::spawn(pump_stream(
            stdout,
            OutputStream::Stdout,
            Arc::clone(&session),
        ));
        let stderr_task = tokio::spawn(pump_stream(
            stderr,
            OutputStream::Stderr,
            Arc::clone(&session),
        ));

        let (exit_tx, mut exit_rx) = oneshot::channel::<()>();
        {
            let registry = Arc::clone(&self.registry);
            let session = Arc::clone(&session);
            let abort = request.abort.clone();
            tokio::spawn(async move {
                supervise_exit(child, stdout_task, stderr_task, registry, session, abort).await;
                let _ = exit_tx.send(());
            });
        }

        let settled = tokio::select! {
            _ = &mut exit_rx => Settled::Exited,
            _ = tokio::time::sleep(yield_window) => Settled::Yielded,
            _ = request.soft_yield.cancelled() => Settled::Yielded,
            _ = request.abort.cancelled() => Settled::Aborted,
        };

        match settled {
            Settled::Exited => self.settle_exit(&session, &request).await,
            Settled::Yielded => Ok(self.settle_yield(&session).await),
            Settled::Aborted => {
                // Stop streaming before the tree goes down, then let the real
                // exit settle the call.
                {
                    let mut st = session.state.lock().await;
                    st.events = None;
                }
                shell::kill_process_tree(session.pid);
                let _ = exit_rx.await;
                self.settle_exit(&session, &request).await
            }
        }
    }

    /// Marks the session backgrounded, emits its one progress event, and
    /// hands ownership of the rest of its life to the registry.
    async fn settle_yield(&self, session: &Arc<Session>) -> ExecOutcome {
        let (tail, sink) = {
            let mut st = session.state.lock().await;
            st.backgrounded = true;
            (st.ring.tail(DEFAULT_TAIL_CHARS), st.events.take())
        };
        if let Some(sink) = sink {
            sink.progress(
                session.id,
                Some(session.pid),
                session.started_at_ms(),
                Some(tail.clone()),
            );
        }
        ExecOutcome::Running {
            session_id: session.id,
            pid: session.pid,
            started_at: session.started_at,
            tail,
        }
    }

    async fn settle_exit(
        &self,
        session: &Arc<Session>,
        request: &ExecRequest,
    ) -> Result<ExecOutcome, ExecError> {
        let (aggregated, exit_code, exit_signal, status) = {
            let st = session.state.lock().await;
            (
                st.ring.aggregated(),
                st.exit_code,
                st.exit_signal.clone(),
                st.status,
            )
        };
        let duration_ms = session.runtime_ms();

        // The registry record is the source of truth: the waiter already
        // folded the abort token into the final status, so the call outcome
        // must agree with what poll/list/log will report later.
        match status {
            SessionStatus::Completed => Ok(ExecOutcome::Completed {
                exit_code: exit_code.unwrap_or(0),
                duration_ms,
                aggregated,
            }),
            _ if request.abort.is_cancelled() => {
                let reason = match exit_signal.as_deref() {
                    Some(name) => format!("Command aborted by signal {name}"),
                    None => "Command aborted".to_string(),
                };
                Err(ExecError::aborted(&aggregated, &reason))
            }
            _ => Err(ExecError::command_failed(
                &aggregated,
                &exit_reason(exit_code, exit_signal.as_deref()),
            )),
        }
    }
}

fn exit_reason(exit_code: Option<i32>, exit_signal: Option<&str>) -> String {
    match exit_signal {
        Some(name) => format!("Command aborted by signal {name}"),
        None => format!("Command exited with code {}", exit_code.unwrap_or(-1)),
    }
}

fn spawn_child(shell: &ShellConfig, request: &ExecRequest) -> Result<Child, ExecError> {
    let mut cmd = Command::new(&shell.interpreter);
    cmd.args(&shell.arg_prefix);
    cmd.arg(&request.command);
    if let Some(dir) = &request.workdir {
        cmd.current_dir(dir);
    }
    if let Some(env) = &request.env {
        cmd.envs(env);
    }
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // The session outlives the call that started it; the registry decides
    // when the tree dies.
    cmd.kill_on_drop(false);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.spawn().map_err(|source| ExecError::Spawn { source })
}

/// Reads one stream to EOF in 8 KiB chunks, carrying incomplete UTF-8
/// suffixes across reads so the ring only ever sees well-formed strings.
async fn pump_stream<R>(mut reader: R, stream: OutputStream, session: Arc<Session>)
where
    R: AsyncRead + Unpin,
{
    let mut carry: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = decode_chunk(&mut carry, &buf[..n]);
                if !chunk.is_empty() {
                    session.append_chunk(stream, chunk).await;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(error = ?err, session_id = session.id.0, "exec stream read failed");
                break;
            }
        }
    }
    if !carry.is_empty() {
        let chunk = String::from_utf8_lossy(&carry).into_owned();
        session.append_chunk(stream, chunk).await;
    }
}

/// Decodes `bytes` appended to any carried-over incomplete suffix. A
/// trailing partial sequence is held back for the next read; invalid bytes
/// in the middle degrade to the lossy rendering.
fn decode_chunk(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    match std::str::from_utf8(carry) {
        Ok(valid) => {
            let out = valid.to_string();
            carry.clear();
            out
        }
        Err(err) if err.error_len().is_none() => {
            let rest = carry.split_off(err.valid_up_to());
            let out = String::from_utf8_lossy(carry).into_owned();
            *carry = rest;
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            out
        }
    }
}

/// Waits for the child, lets the readers flush, and finalizes the session in
/// the registry. Runs detached so a backgrounded session still settles.
async fn supervise_exit(
    mut child: Child,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    registry: Arc<ProcessRegistry>,
    session: Arc<Session>,
    abort: CancellationToken,
) {
    let status = child.wait().await;

    let drain = async {
        let _ = stdout_task.await;
        let _ = stderr_task.await;
    };
    let _ = tokio::time::timeout(STREAM_DRAIN_GRACE, drain).await;

    let (exit_code, exit_signal) = match status {
        Ok(status) => (status.code(), exit_signal_name(&status)),
        Err(err) => {
            warn!(error = ?err, session_id = session.id.0, "failed to reap child");
            (None, None)
        }
    };
    // A clean exit only counts as completed if the call was never aborted; a
    // SIGKILL that lands on an already-exiting process must not let the
    // session finish as a success the caller was just told failed.
    let final_status = if exit_code == Some(0) && exit_signal.is_none() && !abort.is_cancelled() {
        SessionStatus::Completed
    } else {
        SessionStatus::Failed
    };
    registry
        .mark_exited(session.id, exit_code, exit_signal, final_status)
        .await;
    registry.sweep(Instant::now()).await;
}

#[cfg(unix)]
fn exit_signal_name(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(shell::signal_name)
}

#[cfg(not(unix))]
fn exit_signal_name(_status: &std::process::ExitStatus) -> Option<String> {
    None
}
