use std::sync::Arc;

use async_channel::Sender;
use tokio_util::sync::CancellationToken;

use tern_protocol::AgentEvent;
use tern_protocol::ContentBlock;
use tern_protocol::SessionOverview;
use tern_protocol::SessionStatus;
use tern_protocol::ToolResult;
use tern_protocol::ToolResultDetails;
use tern_protocol::ToolStatus;

use crate::exec_stream::EventSink;
use crate::exec_stream::ExecCommandParams;
use crate::exec_stream::ExecError;
use crate::exec_stream::ExecOutcome;
use crate::exec_stream::ExecRequest;
use crate::exec_stream::ExecSupervisor;
use crate::exec_stream::ProcessAction;
use crate::exec_stream::ProcessRegistry;
use crate::exec_stream::ProcessToolParams;
use crate::exec_stream::SessionId;

fn require_session_id(params: &ProcessToolParams) -> Result<SessionId, ToolResult> {
    params.session_id.ok_or_else(|| {
        failure_result(format!(
            "session_id is required for the {} action",
            params.action.as_str()
        ))
    })
}

/// Starts a shell command and streams it until it completes or yields.
pub const EXEC_COMMAND_TOOL_NAME: &str = "exec_command";
/// Manages sessions the start tool left running: list, poll, log, write, kill.
pub const EXEC_PROCESS_TOOL_NAME: &str = "exec_process";

/// One tool call from the agent loop: a named tool, its raw JSON arguments,
/// and the per-call cancellation and event plumbing.
#[derive(Debug)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: String,
    pub tool_call_id: String,
    /// The host's hard cancel: kill the process and fail the call.
    pub cancel: CancellationToken,
    /// The host's UI-initiated soft yield. Hosts that only have one
    /// cancellation source leave this `None` and the session yields on the
    /// timer alone.
    pub soft_yield: Option<CancellationToken>,
    pub events: Sender<AgentEvent>,
}

/// Routes the two exec tools onto the supervisor and control operations.
#[derive(Debug, Clone)]
pub struct ExecStreamHandler {
    registry: Arc<ProcessRegistry>,
    supervisor: ExecSupervisor,
}

impl ExecStreamHandler {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self {
            supervisor: ExecSupervisor::new(Arc::clone(&registry)),
            registry,
        }
    }

    pub fn with_global_registry() -> Self {
        Self::new(ProcessRegistry::global())
    }

    /// Handles one invocation. Only start-call failures (bad request, spawn
    /// failure, command failure, abort) surface as errors; every management
    /// failure comes back as a `failed` tool result so the agent loop keeps
    /// going.
    pub async fn handle(&self, invocation: ToolInvocation) -> Result<ToolResult, ExecError> {
        match invocation.tool_name.as_str() {
            EXEC_COMMAND_TOOL_NAME => self.handle_exec_command(invocation).await,
            EXEC_PROCESS_TOOL_NAME => self.handle_exec_process(invocation).await,
            other => Ok(failure_result(format!("unsupported tool {other}"))),
        }
    }

    async fn handle_exec_command(
        &self,
        invocation: ToolInvocation,
    ) -> Result<ToolResult, ExecError> {
        let params: ExecCommandParams = match serde_json::from_str(&invocation.arguments) {
            Ok(params) => params,
            Err(err) => {
                return Ok(failure_result(format!(
                    "failed to parse {EXEC_COMMAND_TOOL_NAME} arguments: {err}"
                )));
            }
        };

        let request = ExecRequest {
            command: params.command,
            workdir: params.workdir,
            env: params.env,
            yield_ms: params.yield_ms,
            stdin_mode: params.stdin_mode,
            abort: invocation.cancel,
            soft_yield: invocation.soft_yield.unwrap_or_default(),
            events: EventSink::new(invocation.tool_call_id, invocation.events),
        };

        match self.supervisor.start(request).await? {
            ExecOutcome::Completed {
                exit_code,
                duration_ms,
                aggregated,
            } => {
                let trimmed = aggregated.trim();
                let text = if trimmed.is_empty() {
                    "(no output)".to_string()
                } else {
                    trimmed.to_string()
                };
                Ok(ToolResult {
                    content: vec![ContentBlock::text(text)],
                    details: ToolResultDetails::Completed {
                        exit_code,
                        duration_ms,
                    },
                    status: ToolStatus::Completed,
                })
            }
            ExecOutcome::Running {
                session_id,
                pid,
                started_at,
                tail,
            } => {
                let mut text = String::new();
                if !tail.trim().is_empty() {
                    text.push_str(tail.trim_end());
                    text.push_str("\n\n");
                }
                text.push_str(&format!(
                    "Command is still running in session {session_id}; use {EXEC_PROCESS_TOOL_NAME} to poll it."
                ));
                Ok(ToolResult {
                    content: vec![ContentBlock::text(text)],
                    details: ToolResultDetails::Started {
                        session_id: session_id.0,
                        pid: Some(pid),
                        started_at: started_at.timestamp_millis().max(0) as u64,
                        tail,
                    },
                    status: ToolStatus::Running,
                })
            }
        }
    }

    async fn handle_exec_process(
        &self,
        invocation: ToolInvocation,
    ) -> Result<ToolResult, ExecError> {
        let params: ProcessToolParams = match serde_json::from_str(&invocation.arguments) {
            Ok(params) => params,
            Err(err) => {
                return Ok(failure_result(format!(
                    "failed to parse {EXEC_PROCESS_TOOL_NAME} arguments: {err}"
                )));
            }
        };
        Ok(match self.dispatch_process(params).await {
            Ok(result) => result,
            Err(err) => failure_result(err.to_string()),
        })
    }

    async fn dispatch_process(&self, params: ProcessToolParams) -> Result<ToolResult, ExecError> {
        match params.action {
            ProcessAction::List => {
                let sessions = self.registry.list_sessions(params.limit).await;
                let text = render_session_list(&sessions);
                Ok(ToolResult {
                    content: vec![ContentBlock::text(text)],
                    details: ToolResultDetails::List { sessions },
                    status: ToolStatus::Completed,
                })
            }
            ProcessAction::Poll => {
                let session_id = match require_session_id(&params) {
                    Ok(id) => id,
                    Err(result) => return Ok(result),
                };
                let poll = self.registry.poll(session_id).await?;
                Ok(ToolResult {
                    content: vec![ContentBlock::text(poll.content)],
                    details: ToolResultDetails::Poll {
                        status: poll.status,
                        exit_code: poll.exit_code,
                        exit_signal: poll.exit_signal,
                    },
                    status: tool_status_for(poll.status),
                })
            }
            ProcessAction::Log => {
                let session_id = match require_session_id(&params) {
                    Ok(id) => id,
                    Err(result) => return Ok(result),
                };
                let log = self
                    .registry
                    .read_log(session_id, params.offset, params.limit)
                    .await?;
                let text = if log.slice.is_empty() {
                    "(no output)".to_string()
                } else {
                    log.slice.clone()
                };
                Ok(ToolResult {
                    content: vec![ContentBlock::text(text)],
                    details: ToolResultDetails::Log {
                        total_chars: log.total_chars as u64,
                        truncated: log.truncated,
                        status: log.status,
                        exit_code: log.exit_code,
                        exit_signal: log.exit_signal,
                    },
                    status: tool_status_for(log.status),
                })
            }
            ProcessAction::Write => {
                let session_id = match require_session_id(&params) {
                    Ok(id) => id,
                    Err(result) => return Ok(result),
                };
                let data = params.data.unwrap_or_default();
                let written = self
                    .registry
                    .write_stdin(session_id, &data, params.eof)
                    .await?;
                let text = if params.eof {
                    format!(
                        "Wrote {} bytes to session {session_id} stdin and closed it.",
                        written.bytes_written
                    )
                } else {
                    format!(
                        "Wrote {} bytes to session {session_id} stdin.",
                        written.bytes_written
                    )
                };
                Ok(ToolResult {
                    content: vec![ContentBlock::text(text)],
                    details: ToolResultDetails::Write {
                        bytes_written: written.bytes_written,
                    },
                    status: ToolStatus::Running,
                })
            }
            ProcessAction::Kill => {
                let session_id = match require_session_id(&params) {
                    Ok(id) => id,
                    Err(result) => return Ok(result),
                };
                let killed = self.registry.kill_session(session_id).await?;
                Ok(ToolResult {
                    content: vec![ContentBlock::text(format!(
                        "Killed session {session_id} ({}).",
                        killed.exit_signal
                    ))],
                    details: ToolResultDetails::Kill {
                        status: SessionStatus::Killed,
                        exit_signal: killed.exit_signal,
                    },
                    status: ToolStatus::Completed,
                })
            }
        }
    }
}

fn tool_status_for(status: SessionStatus) -> ToolStatus {
    match status {
        SessionStatus::Running => ToolStatus::Running,
        SessionStatus::Completed => ToolStatus::Completed,
        SessionStatus::Failed | SessionStatus::Killed => ToolStatus::Failed,
    }
}

fn failure_result(message: String) -> ToolResult {
    ToolResult {
        content: vec![ContentBlock::text(message.clone())],
        details: ToolResultDetails::Failure { message },
        status: ToolStatus::Failed,
    }
}

fn render_session_list(sessions: &[SessionOverview]) -> String {
    if sessions.is_empty() {
        return "No sessions.".to_string();
    }
    sessions
        .iter()
        .map(|entry| {
            let mut line = format!(
                "{} [{}] {}ms — {}",
                entry.session_id, entry.status, entry.runtime_ms, entry.command
            );
            if let Some(signal) = &entry.exit_signal {
                line.push_str(&format!(" (signal {signal})"));
            } else if let Some(code) = entry.exit_code {
                line.push_str(&format!(" (exit {code})"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
