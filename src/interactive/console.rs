use std::{
    io::Write,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{anyhow, Result};
use gdb_mi_bridge::{
    BoundBreakpoint, BreakpointLocation, DebugHost, MessageLevel, OutputStream, ThreadId,
};

/// Prints every engine callback and keeps the breakpoints the user bound.
#[derive(Default)]
pub struct ConsoleHost {
    bound: Mutex<Vec<Arc<BoundBreakpoint>>>,
    exit_code: Mutex<Option<u32>>,
}

impl ConsoleHost {
    pub fn bind(&self, gdb_id: u32, location: BreakpointLocation) {
        self.bound_list()
            .push(Arc::new(BoundBreakpoint::new(gdb_id, location)));
    }

    pub fn unbind(&self, gdb_id: u32) {
        self.bound_list().retain(|b| b.gdb_id() != gdb_id);
    }

    pub fn bound(&self, gdb_id: u32) -> Result<Arc<BoundBreakpoint>> {
        self.bound_breakpoint(gdb_id)
            .ok_or_else(|| anyhow!("no breakpoint {gdb_id}"))
    }

    pub fn exit_code(&self) -> Option<u32> {
        *self.exit_code.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bound_list(&self) -> std::sync::MutexGuard<'_, Vec<Arc<BoundBreakpoint>>> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DebugHost for ConsoleHost {
    fn on_breakpoint_hit(&self, thread: ThreadId, bound: &[Arc<BoundBreakpoint>]) {
        let ids: Vec<String> = bound.iter().map(|b| b.gdb_id().to_string()).collect();
        println!("\n[thread {thread}] hit breakpoint {}", ids.join(", "));
    }

    fn on_async_break_complete(&self, thread: ThreadId) {
        println!("\n[thread {thread}] interrupted");
    }

    fn on_step_completed(&self) {
        println!("\nstep completed");
    }

    fn on_module_load(&self) {
        println!("program loaded");
    }

    fn on_thread_created(&self, thread: ThreadId) {
        println!("[thread {thread}] created");
    }

    fn on_session_end(&self, exit_code: u32) {
        *self.exit_code.lock().unwrap_or_else(PoisonError::into_inner) = Some(exit_code);
        println!("\nprogram exited with code {exit_code}");
    }

    fn select_thread(&self, _thread: ThreadId) {}

    fn set_current_location(&self, thread: ThreadId, file: &str, line: u32) {
        if !file.is_empty() {
            println!("[thread {thread}] at {file}:{line}");
        }
    }

    fn set_document_context(&self, _file: &str, _line: u32) {}

    fn bound_breakpoint(&self, gdb_id: u32) -> Option<Arc<BoundBreakpoint>> {
        self.bound_list()
            .iter()
            .find(|b| b.gdb_id() == gdb_id)
            .cloned()
    }

    fn show_message(&self, level: MessageLevel, title: &str, text: &str) {
        let label = match level {
            MessageLevel::Info => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        };
        eprintln!("[{label}] {title}: {text}");
    }

    fn on_output(&self, stream: OutputStream, text: &str) {
        match stream {
            OutputStream::Target => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            OutputStream::Console => log::info!(target: "gdb", "{}", text.trim_end()),
        }
    }
}
