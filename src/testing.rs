//! Scripted transport and recording host shared by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::{
    breakpoint::{BoundBreakpoint, BreakpointLocation},
    config::SessionConfig,
    error::{Error, Result},
    host::{DebugHost, MessageLevel, OutputStream, ThreadId},
    session::SessionCoordinator,
    transport::Transport,
};

/// Answers `request` from a per-command script. Replies are consumed in
/// order and the last one repeats; unscripted commands get "".
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<String>>>,
    sent: Mutex<Vec<String>>,
    events_tx: Mutex<Option<Sender<String>>>,
    events_rx: Receiver<String>,
    closed: AtomicBool,
}

impl ScriptedTransport {
    pub fn new(script: &[(&str, &str)]) -> Self {
        let mut replies: HashMap<String, VecDeque<String>> = HashMap::new();
        for (command, reply) in script {
            replies
                .entry(command.to_string())
                .or_default()
                .push_back(reply.to_string());
        }
        let (tx, rx) = unbounded();
        Self {
            replies: Mutex::new(replies),
            sent: Mutex::new(Vec::new()),
            events_tx: Mutex::new(Some(tx)),
            events_rx: rx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn push_event(&self, delivery: &str) {
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            tx.send(delivery.to_string()).unwrap();
        }
    }

    /// Pulls fail with `TransportClosed` once the queue is drained.
    pub fn close_queue(&self) {
        self.events_tx.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn reply(&self, command: &str) -> String {
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => String::new(),
        }
    }
}

impl Transport for ScriptedTransport {
    fn pull_next_response(&self, timeout: Duration) -> Result<Option<String>> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::TransportClosed),
        }
    }

    fn submit_command(&self, command: &str) -> Result<()> {
        self.sent.lock().unwrap().push(command.to_string());
        Ok(())
    }

    fn request(&self, command: &str) -> Result<String> {
        self.sent.lock().unwrap().push(command.to_string());
        Ok(self.reply(command))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.close_queue();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    BreakpointHit { thread: ThreadId, ids: Vec<u32> },
    AsyncBreakComplete(ThreadId),
    StepCompleted,
    ModuleLoad,
    ThreadCreated(ThreadId),
    SessionEnd(u32),
    SelectThread(ThreadId),
    Location(ThreadId, String, u32),
    Document(String, u32),
    UpdateThreads,
    Message(MessageLevel, String, String),
    Output(OutputStream, String),
}

#[derive(Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
    bound: Mutex<Vec<Arc<BoundBreakpoint>>>,
}

impl RecordingHost {
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn bind(&self, gdb_id: u32, location: BreakpointLocation) -> Arc<BoundBreakpoint> {
        let bound = Arc::new(BoundBreakpoint::new(gdb_id, location));
        self.bound.lock().unwrap().push(bound.clone());
        bound
    }

    fn push(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DebugHost for RecordingHost {
    fn on_breakpoint_hit(&self, thread: ThreadId, bound: &[Arc<BoundBreakpoint>]) {
        let ids = bound.iter().map(|b| b.gdb_id()).collect();
        self.push(HostCall::BreakpointHit { thread, ids });
    }

    fn on_async_break_complete(&self, thread: ThreadId) {
        self.push(HostCall::AsyncBreakComplete(thread));
    }

    fn on_step_completed(&self) {
        self.push(HostCall::StepCompleted);
    }

    fn on_module_load(&self) {
        self.push(HostCall::ModuleLoad);
    }

    fn on_thread_created(&self, thread: ThreadId) {
        self.push(HostCall::ThreadCreated(thread));
    }

    fn on_session_end(&self, exit_code: u32) {
        self.push(HostCall::SessionEnd(exit_code));
    }

    fn select_thread(&self, thread: ThreadId) {
        self.push(HostCall::SelectThread(thread));
    }

    fn set_current_location(&self, thread: ThreadId, file: &str, line: u32) {
        self.push(HostCall::Location(thread, file.to_string(), line));
    }

    fn set_document_context(&self, file: &str, line: u32) {
        self.push(HostCall::Document(file.to_string(), line));
    }

    fn update_thread_list(&self) {
        self.push(HostCall::UpdateThreads);
    }

    fn bound_breakpoint(&self, gdb_id: u32) -> Option<Arc<BoundBreakpoint>> {
        self.bound
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.gdb_id() == gdb_id)
            .cloned()
    }

    fn show_message(&self, level: MessageLevel, title: &str, text: &str) {
        self.push(HostCall::Message(level, title.to_string(), text.to_string()));
    }

    fn on_output(&self, stream: OutputStream, text: &str) {
        self.push(HostCall::Output(stream, text.to_string()));
    }
}

pub fn session_with(
    script: &[(&str, &str)],
) -> (SessionCoordinator, Arc<ScriptedTransport>, Arc<RecordingHost>) {
    let transport = Arc::new(ScriptedTransport::new(script));
    let host = Arc::new(RecordingHost::default());
    let session = SessionCoordinator::new(
        transport.clone(),
        host.clone(),
        SessionConfig::default(),
    );
    (session, transport, host)
}
