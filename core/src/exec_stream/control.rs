//! Management operations over the registry: poll, write-stdin, kill, list,
//! and log. Each is a pure function over registry state with a fixed
//! status-transition contract; none of them ever aborts the agent loop.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use tern_protocol::SessionOverview;
use tern_protocol::SessionStatus;

use crate::exec_stream::DEFAULT_TAIL_CHARS;
use crate::exec_stream::errors::ExecError;
use crate::exec_stream::registry::ProcessRegistry;
use crate::exec_stream::session::Session;
use crate::exec_stream::session_id::SessionId;
use crate::shell;
use crate::truncate::truncate_middle;

/// Character budget for command previews and tails in list entries.
const LIST_PREVIEW_CHARS: usize = 120;

#[derive(Debug)]
pub struct PollResponse {
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    /// Rendered text: new output (or a placeholder) followed by a liveness
    /// line, or the retained tail for sessions that already finished.
    pub content: String,
}

#[derive(Debug)]
pub struct WriteStdinResponse {
    pub bytes_written: u64,
}

#[derive(Debug)]
pub struct KillResponse {
    pub exit_signal: String,
}

#[derive(Debug)]
pub struct LogResponse {
    pub slice: String,
    pub total_chars: usize,
    pub truncated: bool,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
}

impl ProcessRegistry {
    pub async fn poll(&self, session_id: SessionId) -> Result<PollResponse, ExecError> {
        if let Some(session) = self.get_running(session_id).await {
            let (stdout, stderr, exited, exit_code, exit_signal) = {
                let mut st = session.state.lock().await;
                let (stdout, stderr) = st.drain();
                (stdout, stderr, st.exited, st.exit_code, st.exit_signal.clone())
            };

            let (status, exit_code, exit_signal) = if exited {
                // The exit notification may still be in flight; settle the
                // transition here. mark_exited is idempotent, so an earlier
                // kill's terminal state wins and we re-read what stuck.
                let derived = if exit_code == Some(0) && exit_signal.is_none() {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Failed
                };
                self.mark_exited(session_id, exit_code, exit_signal, derived)
                    .await;
                let st = session.state.lock().await;
                (st.status, st.exit_code, st.exit_signal.clone())
            } else {
                (SessionStatus::Running, None, None)
            };

            let mut body = join_streams(&stdout, &stderr);
            if body.is_empty() {
                body = "(no new output)".to_string();
            }
            let liveness = match status {
                SessionStatus::Running => "Process still running.".to_string(),
                _ => format!(
                    "Process exited with {}.",
                    exit_descriptor(exit_code, exit_signal.as_deref())
                ),
            };
            return Ok(PollResponse {
                status,
                exit_code,
                exit_signal,
                content: format!("{body}\n\n{liveness}"),
            });
        }

        if let Some(session) = self.get_finished(session_id).await {
            let st = session.state.lock().await;
            let tail = st.ring.tail(DEFAULT_TAIL_CHARS);
            let content = if tail.is_empty() {
                if st.ring.truncated() {
                    "[earlier output truncated]".to_string()
                } else {
                    "(no output)".to_string()
                }
            } else {
                tail
            };
            return Ok(PollResponse {
                status: st.status,
                exit_code: st.exit_code,
                exit_signal: st.exit_signal.clone(),
                content,
            });
        }

        Err(ExecError::SessionNotFound { session_id })
    }

    /// Writes `data` to the child's stdin, optionally closing it afterward.
    /// Only backgrounded, still-running sessions accept writes.
    pub async fn write_stdin(
        &self,
        session_id: SessionId,
        data: &str,
        eof: bool,
    ) -> Result<WriteStdinResponse, ExecError> {
        let session = self.require_backgrounded(session_id).await?;

        let mut stdin_guard = session.stdin.lock().await;
        let Some(stdin) = stdin_guard.as_mut() else {
            return Err(ExecError::StdinNotWritable { session_id });
        };

        let bytes = data.as_bytes();
        if stdin.write_all(bytes).await.is_err() || stdin.flush().await.is_err() {
            return Err(ExecError::StdinNotWritable { session_id });
        }
        if eof {
            let _ = stdin.shutdown().await;
            *stdin_guard = None;
        }

        Ok(WriteStdinResponse {
            bytes_written: bytes.len() as u64,
        })
    }

    /// Kills the whole process tree and records the synthetic terminal state
    /// immediately instead of waiting for the child's exit notification.
    pub async fn kill_session(&self, session_id: SessionId) -> Result<KillResponse, ExecError> {
        let session = self.require_backgrounded(session_id).await?;
        shell::kill_process_tree(session.pid);
        self.mark_exited(
            session_id,
            None,
            Some("SIGKILL".to_string()),
            SessionStatus::Killed,
        )
        .await;
        Ok(KillResponse {
            exit_signal: "SIGKILL".to_string(),
        })
    }

    /// Snapshot of every session, newest first. The entries are deep copies
    /// and stay valid after eviction.
    pub async fn list_sessions(&self, limit: Option<usize>) -> Vec<SessionOverview> {
        let (running, finished) = self.snapshot_partitions().await;
        let mut overviews = Vec::with_capacity(running.len() + finished.len());
        for session in running.iter().chain(finished.iter()) {
            overviews.push(overview(session).await);
        }
        overviews.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            overviews.truncate(limit);
        }
        overviews
    }

    /// A character-addressed slice of the aggregated output. Never moves the
    /// session between partitions; that is poll's job. The ring is already
    /// current — readers append chunks the moment they arrive — so no drain
    /// is needed before slicing.
    pub async fn read_log(
        &self,
        session_id: SessionId,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<LogResponse, ExecError> {
        let session = match self.get_running(session_id).await {
            Some(session) => session,
            None => self
                .get_finished(session_id)
                .await
                .ok_or(ExecError::SessionNotFound { session_id })?,
        };

        let st = session.state.lock().await;
        let aggregated = st.ring.aggregated();
        let offset = offset.unwrap_or(0);
        let slice: String = match limit {
            Some(limit) => aggregated.chars().skip(offset).take(limit).collect(),
            None => aggregated.chars().skip(offset).collect(),
        };
        Ok(LogResponse {
            slice,
            total_chars: st.ring.len(),
            truncated: st.ring.truncated(),
            status: st.status,
            exit_code: st.exit_code,
            exit_signal: st.exit_signal.clone(),
        })
    }

    /// Management actions require a session that is still running and has
    /// already yielded; anything else is a typed failure.
    async fn require_backgrounded(
        &self,
        session_id: SessionId,
    ) -> Result<Arc<Session>, ExecError> {
        let Some(session) = self.get_running(session_id).await else {
            if self.get_finished(session_id).await.is_some() {
                return Err(ExecError::SessionExited { session_id });
            }
            return Err(ExecError::SessionNotFound { session_id });
        };
        let st = session.state.lock().await;
        if st.exited {
            return Err(ExecError::SessionExited { session_id });
        }
        if !st.backgrounded {
            return Err(ExecError::SessionNotBackgrounded { session_id });
        }
        drop(st);
        Ok(session)
    }
}

async fn overview(session: &Arc<Session>) -> SessionOverview {
    let st = session.state.lock().await;
    SessionOverview {
        session_id: session.id.0,
        status: st.status,
        pid: (!st.exited).then_some(session.pid),
        started_at: session.started_at_ms(),
        ended_at: st.ended_at.map(|t| t.timestamp_millis().max(0) as u64),
        runtime_ms: session.runtime_ms(),
        cwd: session.cwd.as_ref().map(|p| p.display().to_string()),
        command: truncate_middle(&session.command, LIST_PREVIEW_CHARS),
        tail: st.ring.tail(LIST_PREVIEW_CHARS),
        truncated: st.ring.truncated(),
        exit_code: st.exit_code,
        exit_signal: st.exit_signal.clone(),
    }
}

fn join_streams(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim_end();
    let stderr = stderr.trim_end();
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => String::new(),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}

fn exit_descriptor(exit_code: Option<i32>, exit_signal: Option<&str>) -> String {
    match exit_signal {
        Some(name) => name.to_string(),
        None => format!("code {}", exit_code.unwrap_or(-1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn join_streams_trims_and_separates() {
        assert_eq!(join_streams("out\n", "err\n"), "out\nerr");
        assert_eq!(join_streams("out\n", ""), "out");
        assert_eq!(join_streams("", "err\n"), "err");
        assert_eq!(join_streams("", ""), "");
    }

    #[test]
    fn exit_descriptor_prefers_the_signal() {
        assert_eq!(exit_descriptor(Some(0), Some("SIGKILL")), "SIGKILL");
        assert_eq!(exit_descriptor(Some(3), None), "code 3");
        assert_eq!(exit_descriptor(None, None), "code -1");
    }
}
