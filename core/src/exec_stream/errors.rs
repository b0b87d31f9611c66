use std::path::PathBuf;

use thiserror::Error;

use crate::exec_stream::session_id::SessionId;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("missing command")]
    MissingCommand,

    #[error("unsupported stdin mode `{mode}`; only \"pipe\" is supported")]
    UnsupportedStdinMode { mode: String },

    #[error("no POSIX-compatible shell found; searched {searched:?}")]
    ShellNotFound { searched: Vec<PathBuf> },

    #[error("unknown session id {session_id}")]
    SessionNotFound { session_id: SessionId },

    #[error(
        "session {session_id} has not yielded yet; it is still owned by its originating call"
    )]
    SessionNotBackgrounded { session_id: SessionId },

    #[error("session {session_id} has already exited")]
    SessionExited { session_id: SessionId },

    #[error("stdin for session {session_id} is closed or was never opened")]
    StdinNotWritable { session_id: SessionId },

    #[error("{message}")]
    CommandFailed { message: String },

    #[error("{message}")]
    Aborted { message: String },

    #[error("failed to spawn shell command: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wire child stdio: {source}")]
    Stdio {
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    pub(crate) fn command_failed(aggregated: &str, reason: &str) -> Self {
        Self::CommandFailed {
            message: failure_message(aggregated, reason),
        }
    }

    pub(crate) fn aborted(aggregated: &str, reason: &str) -> Self {
        Self::Aborted {
            message: failure_message(aggregated, reason),
        }
    }
}

/// Failure messages carry the aggregated output first and the reason on the
/// final line; agents parsing the tail depend on that ordering.
fn failure_message(aggregated: &str, reason: &str) -> String {
    let output = aggregated.trim_end();
    if output.is_empty() {
        reason.to_string()
    } else {
        format!("{output}\n\n{reason}")
    }
}
