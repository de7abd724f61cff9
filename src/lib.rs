//! Bridge between an IDE debug engine and gdb/MI.
//!
//! gdb output arrives through a [`Transport`] as positional records. The
//! [`events`] dispatcher classifies them and drives a [`SessionCoordinator`],
//! which reports back to the IDE through [`DebugHost`].

pub mod breakpoint;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod logger;
pub mod mi;
pub mod record;
pub mod session;
pub mod transport;
pub mod variable;

#[cfg(test)]
mod testing;

pub use breakpoint::{
    BoundBreakpoint, BreakCondition, BreakpointLocation, BreakpointSnapshot, GdbId, PassCount,
    PassCountStyle,
};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use events::EventDispatcher;
pub use host::{DebugHost, MessageLevel, OutputStream, ThreadId};
pub use mi::GdbTransport;
pub use session::{DebugState, SessionCoordinator, StepKind};
pub use transport::Transport;
pub use variable::{FrameVariables, VariableNode, VariableResolver};
