use async_channel::Sender;
use tracing::debug;

use tern_protocol::AgentEvent;
use tern_protocol::OutputStream;
use tern_protocol::ToolExecutionOutputEvent;
use tern_protocol::ToolExecutionProgressEvent;

use crate::exec_stream::session_id::SessionId;

/// Per-call sink for streaming events. Sends never block the supervisor; a
/// closed or saturated channel only costs a debug line.
#[derive(Debug, Clone)]
pub struct EventSink {
    tool_call_id: String,
    tx: Sender<AgentEvent>,
}

impl EventSink {
    pub fn new(tool_call_id: impl Into<String>, tx: Sender<AgentEvent>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tx,
        }
    }

    pub(crate) fn output(&self, stream: OutputStream, chunk: String) {
        self.emit(AgentEvent::ToolExecutionOutput(ToolExecutionOutputEvent {
            tool_call_id: self.tool_call_id.clone(),
            stream,
            chunk,
        }));
    }

    pub(crate) fn progress(
        &self,
        session_id: SessionId,
        pid: Option<u32>,
        started_at: u64,
        tail: Option<String>,
    ) {
        self.emit(AgentEvent::ToolExecutionProgress(
            ToolExecutionProgressEvent {
                tool_call_id: self.tool_call_id.clone(),
                session_id: session_id.0,
                pid,
                started_at,
                tail,
            },
        ));
    }

    fn emit(&self, event: AgentEvent) {
        if let Err(err) = self.tx.try_send(event) {
            debug!(error = %err, "dropping exec stream event");
        }
    }
}
