//! In-process supervisor for streamable background shell commands.
//!
//! The agent loop hands a command to [`exec_stream::ExecSupervisor`]; the
//! supervisor streams output live, yields control after a bounded wait, and
//! leaves the session in the [`exec_stream::ProcessRegistry`] so later tool
//! calls can poll it, feed its stdin, kill it, list it, or read its log.
//! Nothing is persisted; finished sessions age out of memory on a TTL.

pub mod config;
pub mod exec_stream;
pub mod shell;
pub mod tools;

mod truncate;
