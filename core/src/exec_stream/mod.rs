//! The streamable background-process execution subsystem: sessions, the
//! process-wide registry, the supervisor that launches and streams children,
//! and the control operations later tool calls use to manage them.

mod control;
mod errors;
mod events;
mod output_ring;
mod params;
mod registry;
mod session;
mod session_id;
mod supervisor;

pub use control::KillResponse;
pub use control::LogResponse;
pub use control::PollResponse;
pub use control::WriteStdinResponse;
pub use errors::ExecError;
pub use events::EventSink;
pub use params::ExecCommandParams;
pub use params::ProcessAction;
pub use params::ProcessToolParams;
pub use params::StdinMode;
pub use registry::ProcessRegistry;
pub use session_id::SessionId;
pub use supervisor::ExecOutcome;
pub use supervisor::ExecRequest;
pub use supervisor::ExecSupervisor;

pub(crate) use output_ring::DEFAULT_TAIL_CHARS;
