//! The thin contract layer between the agent loop and the execution
//! subsystem: named tools with typed arguments in, result envelopes out.

mod exec_stream;

pub use exec_stream::EXEC_COMMAND_TOOL_NAME;
pub use exec_stream::EXEC_PROCESS_TOOL_NAME;
pub use exec_stream::ExecStreamHandler;
pub use exec_stream::ToolInvocation;
