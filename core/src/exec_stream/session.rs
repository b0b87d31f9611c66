use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::DateTime;
use chrono::Utc;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tokio::time::Instant;

use tern_protocol::OutputStream;
use tern_protocol::SessionStatus;

use crate::exec_stream::events::EventSink;
use crate::exec_stream::output_ring::OutputRing;
use crate::exec_stream::session_id::SessionId;

/// One supervised invocation. Identity and timing are immutable; everything
/// the readers, the waiter, and the control operations touch lives behind a
/// single coarse state lock.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) id: SessionId,
    pub(crate) command: String,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) pid: u32,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) started: Instant,
    pub(crate) stdin: Mutex<Option<ChildStdin>>,
    pub(crate) state: Mutex<SessionState>,
    /// Monotonic end instant, set exactly once on the first terminal
    /// transition. The sweeper reads it lock-free.
    pub(crate) ended: OnceLock<Instant>,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) ring: OutputRing,
    pub(crate) pending_stdout: Vec<String>,
    pub(crate) pending_stderr: Vec<String>,
    /// Present only while the originating call owns the stream. Taken on
    /// yield, abort, and exit, which is what bounds event ordering.
    pub(crate) events: Option<EventSink>,
    pub(crate) backgrounded: bool,
    pub(crate) exited: bool,
    pub(crate) exit_code: Option<i32>,
    pub(crate) exit_signal: Option<String>,
    pub(crate) status: SessionStatus,
    pub(crate) ended_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Concatenates and clears the pending queues. The ring is untouched.
    pub(crate) fn drain(&mut self) -> (String, String) {
        let stdout: String = self.pending_stdout.drain(..).collect();
        let stderr: String = self.pending_stderr.drain(..).collect();
        (stdout, stderr)
    }

    /// Records terminal state. Idempotent: the first transition wins, so a
    /// late exit notification can never overwrite a `Killed` status.
    pub(crate) fn mark_exited(
        &mut self,
        exit_code: Option<i32>,
        exit_signal: Option<String>,
        status: SessionStatus,
    ) -> bool {
        if self.exited {
            return false;
        }
        self.exited = true;
        self.exit_code = exit_code;
        self.exit_signal = exit_signal;
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.events = None;
        true
    }
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        command: String,
        cwd: Option<PathBuf>,
        pid: u32,
        max_output_chars: usize,
        stdin: Option<ChildStdin>,
        events: EventSink,
    ) -> Self {
        Self {
            id,
            command,
            cwd,
            pid,
            started_at: Utc::now(),
            started: Instant::now(),
            stdin: Mutex::new(stdin),
            state: Mutex::new(SessionState {
                ring: OutputRing::new(max_output_chars),
                pending_stdout: Vec::new(),
                pending_stderr: Vec::new(),
                events: Some(events),
                backgrounded: false,
                exited: false,
                exit_code: None,
                exit_signal: None,
                status: SessionStatus::Running,
                ended_at: None,
            }),
            ended: OnceLock::new(),
        }
    }

    /// Appends one chunk to the ring and pending queue, and forwards it to
    /// the event sink while the originating call still owns the stream.
    pub(crate) async fn append_chunk(&self, stream: OutputStream, chunk: String) {
        let mut st = self.state.lock().await;
        st.ring.append(&chunk);
        let sink = st.events.clone();
        match stream {
            OutputStream::Stdout => st.pending_stdout.push(chunk.clone()),
            OutputStream::Stderr => st.pending_stderr.push(chunk.clone()),
        }
        if let Some(sink) = sink {
            sink.output(stream, chunk);
        }
    }

    pub(crate) fn started_at_ms(&self) -> u64 {
        self.started_at.timestamp_millis().max(0) as u64
    }

    pub(crate) fn runtime_ms(&self) -> u64 {
        let end = self.ended.get().copied().unwrap_or_else(Instant::now);
        end.duration_since(self.started).as_millis() as u64
    }
}
