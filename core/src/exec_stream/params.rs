use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::exec_stream::session_id::SessionId;

/// Arguments for the start tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecCommandParams {
    /// Verbatim command string handed to the shell.
    pub command: String,

    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Name→value overlay merged onto the inherited environment.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    #[serde(default)]
    pub yield_ms: Option<u64>,

    #[serde(default)]
    pub stdin_mode: StdinMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdinMode {
    #[default]
    Pipe,
    /// Reserved. Requests for it are rejected.
    Pty,
}

impl StdinMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            StdinMode::Pipe => "pipe",
            StdinMode::Pty => "pty",
        }
    }
}

/// Arguments for the management tool. `session_id` is required for every
/// action except `list`; the dispatcher enforces that.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessToolParams {
    pub action: ProcessAction,

    #[serde(default)]
    pub session_id: Option<SessionId>,

    /// Bytes to write for the `write` action.
    #[serde(default)]
    pub data: Option<String>,

    /// Close stdin after a successful `write`.
    #[serde(default)]
    pub eof: bool,

    /// Character offset into the aggregated output for `log`.
    #[serde(default)]
    pub offset: Option<usize>,

    /// `log`: slice length in characters. `list`: maximum entries.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessAction {
    List,
    Poll,
    Log,
    Write,
    Kill,
}

impl ProcessAction {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ProcessAction::List => "list",
            ProcessAction::Poll => "poll",
            ProcessAction::Log => "log",
            ProcessAction::Write => "write",
            ProcessAction::Kill => "kill",
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn start_params_default_everything_but_command() {
        let params: ExecCommandParams =
            serde_json::from_value(json!({ "command": "make build" })).expect("deserialize");
        assert_eq!(params.command, "make build");
        assert_eq!(params.workdir, None);
        assert_eq!(params.env, None);
        assert_eq!(params.yield_ms, None);
        assert_eq!(params.stdin_mode, StdinMode::Pipe);
    }

    #[test]
    fn start_params_accept_pty_for_later_rejection() {
        let params: ExecCommandParams = serde_json::from_value(json!({
            "command": "top",
            "stdin_mode": "pty",
        }))
        .expect("deserialize");
        assert_eq!(params.stdin_mode, StdinMode::Pty);
    }

    #[test]
    fn process_params_parse_each_action() {
        for (raw, action) in [
            ("list", ProcessAction::List),
            ("poll", ProcessAction::Poll),
            ("log", ProcessAction::Log),
            ("write", ProcessAction::Write),
            ("kill", ProcessAction::Kill),
        ] {
            let params: ProcessToolParams =
                serde_json::from_value(json!({ "action": raw, "session_id": 3 }))
                    .expect("deserialize");
            assert_eq!(params.action, action);
            assert_eq!(params.session_id, Some(SessionId(3)));
        }
    }

    #[test]
    fn process_params_allow_list_without_session() {
        let params: ProcessToolParams =
            serde_json::from_value(json!({ "action": "list" })).expect("deserialize");
        assert_eq!(params.session_id, None);
        assert!(!params.eof);
        assert_eq!(params.offset, None);
        assert_eq!(params.limit, None);
    }
}
