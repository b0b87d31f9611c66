//! Wire-level types shared between the execution core and its hosts: the
//! streaming events published while a command runs, and the tool-result
//! envelope handed back to the agent loop.
//!
//! Event payload fields serialize in camelCase because that is the shape
//! hosts consume off the wire.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Lifecycle of a supervised session.
///
/// `Running` is the only non-terminal state; the terminal states live in the
/// finished partition of the registry until the sweeper reaps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Killed => write!(f, "killed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One chunk of child output, forwarded live to the host's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionOutputEvent {
    pub tool_call_id: String,
    pub stream: OutputStream,
    pub chunk: String,
}

/// Emitted exactly once per session, at the moment the supervisor yields
/// control while leaving the child running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionProgressEvent {
    pub tool_call_id: String,
    pub session_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ToolExecutionOutput(ToolExecutionOutputEvent),
    ToolExecutionProgress(ToolExecutionProgressEvent),
}

/// Overall status of a tool call as reported in its result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Completed,
    Failed,
}

/// A block of tool-result content. The execution core only ever emits text;
/// the list shape leaves room for richer block kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// One entry of a `list` snapshot. Every field is a deep copy, so entries
/// stay valid after the underlying session has been swept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverview {
    pub session_id: u32,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    pub runtime_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Command preview, middle-ellipsized to at most 120 characters.
    pub command: String,
    /// Most recent output, clamped to 120 characters.
    pub tail: String,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
}

/// Machine-readable half of a tool result. One variant per action outcome so
/// every shape has fixed, testable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResultDetails {
    #[serde(rename_all = "camelCase")]
    Started {
        session_id: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        started_at: u64,
        tail: String,
    },
    #[serde(rename_all = "camelCase")]
    Completed { exit_code: i32, duration_ms: u64 },
    #[serde(rename_all = "camelCase")]
    Poll {
        status: SessionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_signal: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Write { bytes_written: u64 },
    #[serde(rename_all = "camelCase")]
    Kill {
        status: SessionStatus,
        exit_signal: String,
    },
    List {
        sessions: Vec<SessionOverview>,
    },
    #[serde(rename_all = "camelCase")]
    Log {
        total_chars: u64,
        truncated: bool,
        status: SessionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_signal: Option<String>,
    },
    Failure {
        message: String,
    },
}

/// The envelope returned to the caller for every tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
    pub details: ToolResultDetails,
    pub status: ToolStatus,
}
