//! End-to-end coverage driving real `sh` children through the supervisor,
//! the registry control operations, and the tool dispatcher.

#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use tern_core::config::ExecStreamConfig;
use tern_core::exec_stream::EventSink;
use tern_core::exec_stream::ExecError;
use tern_core::exec_stream::ExecOutcome;
use tern_core::exec_stream::ExecRequest;
use tern_core::exec_stream::ExecSupervisor;
use tern_core::exec_stream::ProcessRegistry;
use tern_core::exec_stream::SessionId;
use tern_core::exec_stream::StdinMode;
use tern_core::tools::EXEC_COMMAND_TOOL_NAME;
use tern_core::tools::EXEC_PROCESS_TOOL_NAME;
use tern_core::tools::ExecStreamHandler;
use tern_core::tools::ToolInvocation;
use tern_protocol::AgentEvent;
use tern_protocol::SessionStatus;
use tern_protocol::ToolResultDetails;
use tern_protocol::ToolStatus;

struct Harness {
    registry: Arc<ProcessRegistry>,
    supervisor: ExecSupervisor,
    events_tx: async_channel::Sender<AgentEvent>,
    events_rx: async_channel::Receiver<AgentEvent>,
}

impl Harness {
    fn new(config: ExecStreamConfig) -> Self {
        let registry = ProcessRegistry::new(config);
        let supervisor = ExecSupervisor::new(Arc::clone(&registry));
        let (events_tx, events_rx) = async_channel::unbounded();
        Self {
            registry,
            supervisor,
            events_tx,
            events_rx,
        }
    }

    fn request(&self, command: &str, yield_ms: u64) -> ExecRequest {
        self.request_with_tokens(command, yield_ms, CancellationToken::new(), CancellationToken::new())
    }

    fn request_with_tokens(
        &self,
        command: &str,
        yield_ms: u64,
        abort: CancellationToken,
        soft_yield: CancellationToken,
    ) -> ExecRequest {
        ExecRequest {
            command: command.to_string(),
            workdir: None,
            env: None,
            yield_ms: Some(yield_ms),
            stdin_mode: StdinMode::Pipe,
            abort,
            soft_yield,
            events: EventSink::new("call-test", self.events_tx.clone()),
        }
    }

    fn drained_events(&self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Polls until the session reaches a terminal status.
    async fn poll_until_done(&self, session_id: SessionId) -> SessionStatus {
        for _ in 0..40 {
            let poll = self.registry.poll(session_id).await.expect("poll");
            if poll.status.is_terminal() {
                return poll.status;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        panic!("session {session_id} never finished");
    }
}

fn running_session(outcome: ExecOutcome) -> (SessionId, u32) {
    match outcome {
        ExecOutcome::Running {
            session_id, pid, ..
        } => (session_id, pid),
        other => panic!("expected a running outcome, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streams_then_polls_to_completion() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let outcome = harness
        .supervisor
        .start(harness.request("printf hello && sleep 2 && printf world", 50))
        .await?;
    let (session_id, _pid) = running_session(outcome);

    let events = harness.drained_events();
    let streamed: String = events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::ToolExecutionOutput(out) => Some(out.chunk.as_str()),
            AgentEvent::ToolExecutionProgress(_) => None,
        })
        .collect();
    assert!(streamed.contains("hello"), "streamed: {streamed:?}");
    let progress_count = events
        .iter()
        .filter(|event| matches!(event, AgentEvent::ToolExecutionProgress(_)))
        .count();
    assert_eq!(progress_count, 1);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let poll = harness.registry.poll(session_id).await?;
    assert_eq!(poll.status, SessionStatus::Completed);
    assert!(
        poll.content.contains("helloworld"),
        "poll content: {:?}",
        poll.content
    );

    // No further events after the session went to background.
    assert!(harness.drained_events().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stdin_write_with_eof_completes_an_echoing_child() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let outcome = harness
        .supervisor
        .start(harness.request("cat", 30))
        .await?;
    let (session_id, _) = running_session(outcome);

    let written = harness
        .registry
        .write_stdin(session_id, "hi\n", true)
        .await?;
    assert_eq!(written.bytes_written, 3);

    let status = harness.poll_until_done(session_id).await;
    assert_eq!(status, SessionStatus::Completed);
    let log = harness.registry.read_log(session_id, None, None).await?;
    assert!(log.slice.contains("hi"), "log: {:?}", log.slice);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_surfaces_as_a_failure_never_a_completion() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let abort = CancellationToken::new();
    let request = harness.request_with_tokens(
        "sleep 5",
        1_000,
        abort.clone(),
        CancellationToken::new(),
    );

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        abort.cancel();
    });

    let err = harness
        .supervisor
        .start(request)
        .await
        .expect_err("aborted call must fail");
    canceller.await?;

    match err {
        ExecError::Aborted { message } => {
            assert!(
                message.contains("aborted") || message.contains("SIGKILL"),
                "message: {message:?}"
            );
        }
        other => panic!("expected an aborted error, got {other}"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_of_a_fast_command_never_persists_a_completion() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    // Abort before the child can exit on its own: the kill may well land on
    // an already-exiting process, so no signal ever shows up.
    let abort = CancellationToken::new();
    abort.cancel();
    let request =
        harness.request_with_tokens("printf done", 5_000, abort, CancellationToken::new());

    let err = harness
        .supervisor
        .start(request)
        .await
        .expect_err("aborted call must fail");
    assert!(matches!(&err, ExecError::Aborted { .. }), "got {err}");

    // The persisted record must agree with the error the caller saw.
    let sessions = harness.registry.list_sessions(None).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Failed);
    let log = harness
        .registry
        .read_log(SessionId(sessions[0].session_id), None, None)
        .await?;
    assert_eq!(log.status, SessionStatus::Failed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_kills_running_sessions_and_stops_the_sweeper() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let outcome = harness
        .supervisor
        .start(harness.request("sleep 30", 1_000))
        .await?;
    let (session_id, pid) = running_session(outcome);

    harness.registry.shutdown().await;

    let poll = harness.registry.poll(session_id).await?;
    assert_eq!(poll.status, SessionStatus::Killed);
    assert_eq!(poll.exit_signal.as_deref(), Some("SIGKILL"));

    // Give the waiter a moment to reap, then confirm the tree is gone.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let alive = std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {pid} 2>/dev/null"))
        .status()?
        .success();
    assert!(!alive, "pid {pid} still alive after shutdown");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_and_log_cover_finished_sessions() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let outcome = harness
        .supervisor
        .start(harness.request("printf running && sleep 2 && printf done", 20))
        .await?;
    let (session_id, _) = running_session(outcome);

    let status = harness.poll_until_done(session_id).await;
    assert!(matches!(
        status,
        SessionStatus::Completed | SessionStatus::Failed
    ));

    let sessions = harness.registry.list_sessions(Some(5)).await;
    let entry = sessions
        .iter()
        .find(|entry| entry.session_id == session_id.0)
        .expect("finished session listed");
    assert!(entry.status.is_terminal());
    assert!(entry.ended_at.is_some());
    assert!(entry.pid.is_none());

    let log = harness
        .registry
        .read_log(session_id, Some(0), Some(200))
        .await?;
    assert!(log.slice.contains("running"), "log: {:?}", log.slice);
    assert_eq!(log.status, SessionStatus::Completed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn output_cap_truncates_and_flags() -> Result<()> {
    let config = ExecStreamConfig {
        max_output_chars: 1_000,
        ..ExecStreamConfig::default()
    };
    let harness = Harness::new(config);

    let outcome = harness
        .supervisor
        .start(harness.request("head -c 3000 /dev/zero | tr '\\0' x", 5_000))
        .await?;
    let aggregated = match outcome {
        ExecOutcome::Completed { aggregated, .. } => aggregated,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(aggregated.chars().count(), 1_000);
    assert!(aggregated.chars().all(|c| c == 'x'));

    let sessions = harness.registry.list_sessions(None).await;
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].truncated);
    assert!(sessions[0].tail.chars().all(|c| c == 'x'));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ttl_sweep_evicts_finished_sessions() -> Result<()> {
    let config = ExecStreamConfig {
        job_ttl: Duration::from_secs(1),
        ..ExecStreamConfig::default()
    };
    let harness = Harness::new(config);

    let outcome = harness
        .supervisor
        .start(harness.request("printf done", 5_000))
        .await?;
    assert!(matches!(outcome, ExecOutcome::Completed { .. }));

    let sessions = harness.registry.list_sessions(None).await;
    assert_eq!(sessions.len(), 1);
    let session_id = SessionId(sessions[0].session_id);

    tokio::time::sleep(Duration::from_secs(2)).await;
    harness.registry.sweep(tokio::time::Instant::now()).await;

    assert!(harness.registry.list_sessions(None).await.is_empty());
    let err = harness
        .registry
        .poll(session_id)
        .await
        .expect_err("swept session must be unknown");
    assert!(matches!(err, ExecError::SessionNotFound { .. }));
    let err = harness
        .registry
        .read_log(session_id, None, None)
        .await
        .expect_err("swept session must be unknown");
    assert!(matches!(err, ExecError::SessionNotFound { .. }));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kill_records_the_signal_and_stays_killed() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let outcome = harness
        .supervisor
        .start(harness.request("sleep 5", 1_000))
        .await?;
    let (session_id, _) = running_session(outcome);

    let killed = harness.registry.kill_session(session_id).await?;
    assert_eq!(killed.exit_signal, "SIGKILL");

    // A second kill is harmless: the session already finished.
    let err = harness
        .registry
        .kill_session(session_id)
        .await
        .expect_err("second kill targets a finished session");
    assert!(matches!(err, ExecError::SessionExited { .. }));

    // The child's own exit notification must not overwrite the status.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let poll = harness.registry.poll(session_id).await?;
    assert_eq!(poll.status, SessionStatus::Killed);
    assert_eq!(poll.exit_signal.as_deref(), Some("SIGKILL"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn soft_yield_token_backgrounds_immediately() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let soft_yield = CancellationToken::new();
    let request = harness.request_with_tokens(
        "cat",
        120_000,
        CancellationToken::new(),
        soft_yield.clone(),
    );

    let supervisor = harness.supervisor.clone();
    let start = tokio::spawn(async move { supervisor.start(request).await });

    // Until the session yields, management actions are refused.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let sessions = harness.registry.list_sessions(None).await;
    assert_eq!(sessions.len(), 1);
    let session_id = SessionId(sessions[0].session_id);
    assert_eq!(sessions[0].status, SessionStatus::Running);
    let err = harness
        .registry
        .write_stdin(session_id, "hi\n", false)
        .await
        .expect_err("write before yield must fail");
    assert!(matches!(err, ExecError::SessionNotBackgrounded { .. }));

    soft_yield.cancel();
    let outcome = start.await??;
    let (yielded_id, _) = running_session(outcome);
    assert_eq!(yielded_id, session_id);

    // Now backgrounded: the same write goes through, and kill cleans up.
    harness.registry.write_stdin(session_id, "hi\n", false).await?;
    harness.registry.kill_session(session_id).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_after_eof_fails_with_stdin_not_writable() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let outcome = harness
        .supervisor
        .start(harness.request("cat && sleep 2", 30))
        .await?;
    let (session_id, _) = running_session(outcome);

    harness.registry.write_stdin(session_id, "hi\n", true).await?;
    let err = harness
        .registry
        .write_stdin(session_id, "again\n", false)
        .await
        .expect_err("stdin is closed");
    assert!(matches!(
        err,
        ExecError::StdinNotWritable { .. } | ExecError::SessionExited { .. }
    ));

    harness.registry.kill_session(session_id).await.ok();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_command_carries_output_and_reason() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let err = harness
        .supervisor
        .start(harness.request("printf oops >&2 && exit 3", 5_000))
        .await
        .expect_err("non-zero exit must fail the call");
    match err {
        ExecError::CommandFailed { message } => {
            assert!(message.contains("oops"), "message: {message:?}");
            assert!(
                message.ends_with("Command exited with code 3"),
                "message: {message:?}"
            );
        }
        other => panic!("expected a command failure, got {other}"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn log_offset_and_limit_slice_by_characters() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let outcome = harness
        .supervisor
        .start(harness.request("printf abcdefgh", 5_000))
        .await?;
    assert!(matches!(outcome, ExecOutcome::Completed { .. }));

    let sessions = harness.registry.list_sessions(None).await;
    let session_id = SessionId(sessions[0].session_id);

    let log = harness
        .registry
        .read_log(session_id, Some(2), Some(3))
        .await?;
    assert_eq!(log.slice, "cde");
    assert_eq!(log.total_chars, 8);
    assert!(!log.truncated);

    // Offset at the end returns an empty slice with the correct total.
    let log = harness
        .registry
        .read_log(session_id, Some(8), None)
        .await?;
    assert_eq!(log.slice, "");
    assert_eq!(log.total_chars, 8);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_limit_zero_returns_an_empty_snapshot() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let outcome = harness
        .supervisor
        .start(harness.request("printf done", 5_000))
        .await?;
    assert!(matches!(outcome, ExecOutcome::Completed { .. }));

    assert!(harness.registry.list_sessions(Some(0)).await.is_empty());
    assert_eq!(harness.registry.list_sessions(None).await.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatcher_round_trips_start_and_process_tools() -> Result<()> {
    let registry = ProcessRegistry::new(ExecStreamConfig::default());
    let handler = ExecStreamHandler::new(Arc::clone(&registry));
    let (events_tx, events_rx) = async_channel::unbounded::<AgentEvent>();

    let result = handler
        .handle(ToolInvocation {
            tool_name: EXEC_COMMAND_TOOL_NAME.to_string(),
            arguments: r#"{"command":"printf hi"}"#.to_string(),
            tool_call_id: "call-1".to_string(),
            cancel: CancellationToken::new(),
            soft_yield: None,
            events: events_tx.clone(),
        })
        .await?;
    assert_eq!(result.status, ToolStatus::Completed);
    match &result.details {
        ToolResultDetails::Completed { exit_code, .. } => assert_eq!(*exit_code, 0),
        other => panic!("expected completed details, got {other:?}"),
    }

    let mut chunks = String::new();
    while let Ok(event) = events_rx.try_recv() {
        if let AgentEvent::ToolExecutionOutput(out) = event {
            chunks.push_str(&out.chunk);
        }
    }
    assert!(chunks.contains("hi"), "streamed: {chunks:?}");

    let result = handler
        .handle(ToolInvocation {
            tool_name: EXEC_PROCESS_TOOL_NAME.to_string(),
            arguments: r#"{"action":"list"}"#.to_string(),
            tool_call_id: "call-2".to_string(),
            cancel: CancellationToken::new(),
            soft_yield: None,
            events: events_tx,
        })
        .await?;
    assert_eq!(result.status, ToolStatus::Completed);
    match &result.details {
        ToolResultDetails::List { sessions } => {
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].status, SessionStatus::Completed);
            assert_eq!(sessions[0].command, "printf hi");
        }
        other => panic!("expected list details, got {other:?}"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn env_overlay_and_workdir_reach_the_child() -> Result<()> {
    let harness = Harness::new(ExecStreamConfig::default());
    let dir = tempfile::tempdir()?;

    let mut env = std::collections::HashMap::new();
    env.insert("EXEC_STREAM_TEST_VAR".to_string(), "overlay".to_string());
    let request = ExecRequest {
        command: "printf '%s ' \"$EXEC_STREAM_TEST_VAR\" && pwd".to_string(),
        workdir: Some(dir.path().to_path_buf()),
        env: Some(env),
        yield_ms: Some(5_000),
        stdin_mode: StdinMode::Pipe,
        abort: CancellationToken::new(),
        soft_yield: CancellationToken::new(),
        events: EventSink::new("call-env", harness.events_tx.clone()),
    };

    let outcome = harness.supervisor.start(request).await?;
    let aggregated = match outcome {
        ExecOutcome::Completed { aggregated, .. } => aggregated,
        other => panic!("expected completion, got {other:?}"),
    };
    assert!(aggregated.contains("overlay"), "output: {aggregated:?}");
    assert!(
        aggregated.contains(dir.path().file_name().unwrap().to_str().unwrap()),
        "output: {aggregated:?}"
    );
    Ok(())
}
