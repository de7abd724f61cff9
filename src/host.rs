//! Callbacks into the IDE side of the bridge.

use std::sync::Arc;

use crate::breakpoint::BoundBreakpoint;

pub type ThreadId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// gdb's own console (`~` records).
    Console,
    /// The debuggee's stdout as relayed by gdb (`@` records).
    Target,
}

/// Everything the core needs from the debug engine adapter. Calls are made
/// from the dispatcher thread and must not block on it.
pub trait DebugHost: Send + Sync {
    fn on_breakpoint_hit(&self, thread: ThreadId, bound: &[Arc<BoundBreakpoint>]);
    fn on_async_break_complete(&self, thread: ThreadId);
    fn on_step_completed(&self);
    fn on_module_load(&self) {}
    fn on_thread_created(&self, _thread: ThreadId) {}
    fn on_session_end(&self, exit_code: u32);

    fn select_thread(&self, thread: ThreadId);
    /// `line` is the 1-based line gdb reported.
    fn set_current_location(&self, thread: ThreadId, file: &str, line: u32);
    /// `line` is already corrected for display (gdb line - 1).
    fn set_document_context(&self, file: &str, line: u32);

    fn update_thread_list(&self) {}
    fn clean_evaluated_thread_caches(&self) {}
    fn reset_cached_stack_frames(&self) {}

    fn bound_breakpoint(&self, gdb_id: u32) -> Option<Arc<BoundBreakpoint>>;

    fn show_message(&self, level: MessageLevel, title: &str, text: &str);
    fn on_output(&self, _stream: OutputStream, _text: &str) {}
}
