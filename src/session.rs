//! Session-wide state shared by the event handlers and the IDE-facing API.
//!
//! Locking discipline:
//! - execution state, current thread and document location change inside
//!   the critical region (a try-lock entered with a yield spin);
//! - hit counts and conditions of a bound breakpoint change while its gates
//!   are held (see [`Gates`]);
//! - `run_mode` and `unknown_code` are plain flags written from the
//!   dispatcher thread.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread,
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::{
    breakpoint::{
        BoundBreakpoint, BreakCondition, BreakpointLocation, BreakpointSnapshot, ConditionStyle,
        Gates, GdbId, PassCount, PassCountStyle, ALL_BREAKPOINTS,
    },
    config::SessionConfig,
    error::{Error, Result},
    events::breakpoints::{self, BreakpointEvent},
    host::{DebugHost, ThreadId},
    record::PENDING_ADDRESS,
    transport::Transport,
    variable::evaluate_expression,
};

/// Ignore count that keeps a breakpoint enabled without ever stopping on it.
pub const IGNORE_FOREVER: i64 = i32::MAX as i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugState {
    #[default]
    Design,
    Run,
    Break,
    Step,
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DebugState::Design => "design",
            DebugState::Run => "run",
            DebugState::Break => "break",
            DebugState::Step => "step",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Into,
    Over,
    Out,
}

/// Where the debuggee is and what the engine thinks it is doing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub state: DebugState,
    pub current_thread: ThreadId,
    /// Last published document location, display corrected.
    pub document: Option<(String, u32)>,
}

/// Single-permit gate. Unlike a mutex the permit can be released from a
/// different call than the one that took it.
#[derive(Debug)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *open, false)
    }

    pub fn acquire(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self
                .cond
                .wait(open)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *open = false;
    }

    pub fn release(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_one();
    }

    pub fn is_available(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct CriticalRegion {
    busy: AtomicBool,
}

impl CriticalRegion {
    pub fn try_enter(&self) -> Option<RegionGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RegionGuard { region: self })
    }

    /// Spins with `yield_now`; never sleeps.
    pub fn enter(&self) -> RegionGuard<'_> {
        loop {
            if let Some(guard) = self.try_enter() {
                return guard;
            }
            thread::yield_now();
        }
    }

    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[must_use]
pub struct RegionGuard<'a> {
    region: &'a CriticalRegion,
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        self.region.busy.store(false, Ordering::Release);
    }
}

pub struct SessionCoordinator {
    transport: Arc<dyn Transport>,
    host: Arc<dyn DebugHost>,
    config: SessionConfig,

    alive: AtomicBool,
    run_mode: AtomicBool,
    unknown_code: AtomicBool,
    needs_resume_after_interrupt: AtomicBool,
    threads_dirty: AtomicBool,
    sigint_count: AtomicU32,

    context: Mutex<ExecutionContext>,
    breakpoints: Mutex<BTreeMap<GdbId, BreakpointSnapshot>>,

    /// Held while a break-all is in flight so a concurrent hit does not resume the target.
    break_all: Gate,
    /// Held while a condition edit is in flight; hit records arriving meanwhile are dropped.
    conditional_update: Gate,
    critical: CriticalRegion,
    interrupt_waiter: Mutex<Option<Sender<()>>>,
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("alive", &self.is_alive())
            .field("run_mode", &self.run_mode())
            .field("unknown_code", &self.unknown_code())
            .field("context", &self.context())
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        host: Arc<dyn DebugHost>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            host,
            config,
            alive: AtomicBool::new(true),
            run_mode: AtomicBool::new(true),
            unknown_code: AtomicBool::new(false),
            needs_resume_after_interrupt: AtomicBool::new(false),
            threads_dirty: AtomicBool::new(false),
            sigint_count: AtomicU32::new(0),
            context: Mutex::new(ExecutionContext::default()),
            breakpoints: Mutex::new(BTreeMap::new()),
            break_all: Gate::new(),
            conditional_update: Gate::new(),
            critical: CriticalRegion::default(),
            interrupt_waiter: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn host(&self) -> &dyn DebugHost {
        self.host.as_ref()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn critical_region(&self) -> &CriticalRegion {
        &self.critical
    }

    pub fn conditional_update(&self) -> &Gate {
        &self.conditional_update
    }

    pub fn break_all(&self) -> &Gate {
        &self.break_all
    }

    // ---- flags -------------------------------------------------------------

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn run_mode(&self) -> bool {
        self.run_mode.load(Ordering::Acquire)
    }

    pub fn set_run_mode(&self, running: bool) {
        self.run_mode.store(running, Ordering::Release);
    }

    pub fn unknown_code(&self) -> bool {
        self.unknown_code.load(Ordering::Acquire)
    }

    pub fn set_unknown_code(&self, unknown: bool) {
        self.unknown_code.store(unknown, Ordering::Release);
    }

    pub fn needs_resume_after_interrupt(&self) -> bool {
        self.needs_resume_after_interrupt.load(Ordering::Acquire)
    }

    pub fn mark_threads_dirty(&self) {
        self.threads_dirty.store(true, Ordering::Release);
    }

    /// Asks the host for a fresh thread list when one was created or exited.
    pub fn refresh_threads(&self) {
        if self.threads_dirty.swap(false, Ordering::AcqRel) {
            self.host.update_thread_list();
        }
    }

    pub fn sigint_count(&self) -> u32 {
        self.sigint_count.load(Ordering::Acquire)
    }

    pub fn bump_sigint(&self) -> u32 {
        self.sigint_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn reset_sigint(&self) {
        self.sigint_count.store(0, Ordering::Release);
    }

    // ---- execution context -------------------------------------------------

    fn ctx(&self) -> MutexGuard<'_, ExecutionContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn context(&self) -> ExecutionContext {
        self.ctx().clone()
    }

    pub fn state(&self) -> DebugState {
        self.ctx().state
    }

    pub fn set_state(&self, state: DebugState) {
        let mut ctx = self.ctx();
        if ctx.state != state {
            debug!("debug state {} -> {}", ctx.state, state);
        }
        ctx.state = state;
    }

    pub fn current_thread(&self) -> ThreadId {
        self.ctx().current_thread
    }

    pub fn set_current_thread(&self, thread: ThreadId) {
        self.ctx().current_thread = thread;
        self.host.select_thread(thread);
    }

    pub fn set_thread_location(&self, thread: ThreadId, file: &str, line: u32) {
        self.host.set_current_location(thread, file, line);
    }

    /// Publishes a gdb line to the IDE, which counts one line further than gdb.
    pub fn publish_location(&self, file: &str, line: u32) {
        let line = line.saturating_sub(1);
        self.ctx().document = Some((file.to_string(), line));
        self.host.set_document_context(file, line);
    }

    /// Step or stop notification arriving while the engine is stepping.
    pub fn on_step_completed(&self, file: &str, line: u32) {
        if self.state() != DebugState::Step {
            debug!("step completion outside of a step ignored");
            return;
        }
        self.set_state(DebugState::Break);
        self.publish_location(file, line);
        self.host.on_step_completed();
    }

    /// Target stopped on its own (signal, break-all).
    pub fn on_interrupt(&self, thread: ThreadId, file: &str, line: u32) {
        debug_assert_eq!(self.state(), DebugState::Run, "interrupt outside of run mode");
        self.set_state(DebugState::Break);
        if !file.is_empty() && line > 0 {
            self.publish_location(file, line);
        }
        if !self.needs_resume_after_interrupt() {
            self.host.on_async_break_complete(thread);
        }
    }

    /// Wakes a `cause_break` caller waiting for the interrupt to land.
    pub fn signal_interrupt_processed(&self) {
        let waiter = self
            .interrupt_waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = waiter {
            let _ = tx.try_send(());
        }
    }

    // ---- breakpoint table --------------------------------------------------

    fn table(&self) -> MutexGuard<'_, BTreeMap<GdbId, BreakpointSnapshot>> {
        self.breakpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn breakpoint(&self, id: GdbId) -> Option<BreakpointSnapshot> {
        self.table().get(&id).cloned()
    }

    pub fn breakpoints(&self) -> Vec<BreakpointSnapshot> {
        self.table().values().cloned().collect()
    }

    pub fn record_breakpoint(&self, snapshot: BreakpointSnapshot) {
        self.table().insert(snapshot.id, snapshot);
    }

    pub fn forget_breakpoint(&self, id: GdbId) {
        let mut table = self.table();
        if id == ALL_BREAKPOINTS {
            table.clear();
        } else {
            table.remove(&id);
        }
    }

    pub fn mark_breakpoint_enabled(&self, id: GdbId, enabled: bool) {
        let mut table = self.table();
        if id == ALL_BREAKPOINTS {
            table.values_mut().for_each(|bp| bp.enabled = enabled);
        } else if let Some(bp) = table.get_mut(&id) {
            bp.enabled = enabled;
        }
    }

    pub fn record_ignore_count(&self, id: GdbId, count: u32) {
        if let Some(bp) = self.table().get_mut(&id) {
            bp.ignore_count = count;
        }
    }

    pub fn record_condition(&self, id: GdbId, condition: &str) {
        if let Some(bp) = self.table().get_mut(&id) {
            bp.condition = condition.to_string();
        }
    }

    // ---- breakpoint hit ----------------------------------------------------

    /// Decides whether a stop at breakpoint `id` reaches the IDE or the
    /// target is resumed.
    pub fn breakpoint_hit(&self, id: GdbId, thread: ThreadId) -> Result<()> {
        let Some(bound) = self.host.bound_breakpoint(id) else {
            // Step, code or asm stop. The caller's stop handling covers it.
            debug!("stop at gdb breakpoint {id} has no bound breakpoint");
            return Ok(());
        };

        let Some(_gates) = bound.try_lock(Gates::BOTH) else {
            debug!("breakpoint {id} is being edited, resuming");
            let _region = self.critical.enter();
            return self.continue_execution();
        };
        let _region = self.critical.enter();

        let mut break_execution = true;
        if bound.is_when_changed() {
            let expression = bound.state().condition.expression.clone();
            let eval = evaluate_expression(self.transport(), &expression, None)?;
            let mut st = bound.state();
            if eval.valid && st.previous_value != eval.value {
                break_execution = st.pass_count.allows_break(st.hits);
                st.previous_value = eval.value;
            } else {
                break_execution = false;
            }
        }

        if !break_execution {
            return self.continue_execution();
        }

        let (equal, multiple, hits) = {
            let mut st = bound.state();
            if st.break_when_changed {
                st.hits += 1;
            }
            (st.is_hit_count_equal, st.hit_count_multiple, st.hits)
        };
        self.set_run_mode(false);
        self.set_state(DebugState::Break);
        self.host
            .on_breakpoint_hit(thread, std::slice::from_ref(&bound));

        if equal {
            self.ignore_hit_count(id, IGNORE_FOREVER)?;
        } else if multiple != 0 {
            self.ignore_hit_count(id, i64::from(multiple - hits % multiple))?;
        }
        Ok(())
    }

    // ---- execution control -------------------------------------------------

    pub fn launch(&self) -> Result<()> {
        self.set_state(DebugState::Run);
        self.set_run_mode(true);
        self.host.on_module_load();
        self.transport.submit_command("-exec-run")
    }

    /// Resumes every thread unless a break-all is in flight.
    pub fn continue_execution(&self) -> Result<()> {
        if !self.break_all.try_acquire() {
            debug!("break-all in flight, not resuming");
            return Ok(());
        }
        self.set_state(DebugState::Run);
        let sent = self
            .transport
            .submit_command(&self.config.continue_command());
        self.set_run_mode(true);
        self.break_all.release();
        sent
    }

    /// Interrupts the target and waits until the stop has been processed by
    /// the dispatcher. Must not be called from the dispatcher thread.
    pub fn cause_break(&self) -> Result<()> {
        let state = self.state();
        if matches!(
            state,
            DebugState::Design | DebugState::Break | DebugState::Step
        ) || !self.run_mode()
        {
            return Ok(());
        }

        let (tx, rx) = bounded(1);
        *self
            .interrupt_waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);

        self.break_all.acquire();
        let outcome = self
            .transport
            .submit_command("-exec-interrupt")
            .and_then(|()| match self.config.interrupt_timeout {
                None => rx.recv().map_err(|_| Error::SessionEnded),
                Some(timeout) => rx.recv_timeout(timeout).map_err(|e| match e {
                    RecvTimeoutError::Timeout => Error::InterruptTimeout,
                    RecvTimeoutError::Disconnected => Error::SessionEnded,
                }),
            });
        self.break_all.release();
        outcome
    }

    /// Breaks a running target before a breakpoint edit. The resulting stop
    /// is not reported to the IDE.
    pub fn prepare_to_modify_breakpoint(&self) -> Result<()> {
        if matches!(self.state(), DebugState::Design | DebugState::Break) {
            return Ok(());
        }
        self.needs_resume_after_interrupt
            .store(true, Ordering::Release);
        self.cause_break()
    }

    pub fn resume_from_interrupt(&self) -> Result<()> {
        if self
            .needs_resume_after_interrupt
            .swap(false, Ordering::AcqRel)
        {
            self.continue_execution()?;
        }
        Ok(())
    }

    pub fn step(&self, kind: StepKind) -> Result<()> {
        if self.unknown_code() {
            // No line info to step by; run until something with symbols stops us.
            self.set_state(DebugState::Step);
            return self.continue_execution();
        }
        let thread = self.current_thread();
        let command = match kind {
            StepKind::Into => format!("-exec-step --thread {thread}"),
            StepKind::Over => format!("-exec-next --thread {thread}"),
            StepKind::Out if self.stack_depth(thread)? > 1 => {
                format!("-exec-finish --thread {thread} --frame 0")
            }
            StepKind::Out => format!("-exec-next --thread {thread}"),
        };
        self.set_state(DebugState::Step);
        self.transport.submit_command(&command)
    }

    pub fn stack_depth(&self, thread: ThreadId) -> Result<u32> {
        let command = format!("-stack-info-depth --thread {thread} --frame 0");
        let response = self.transport.request(&command)?;
        response.trim().parse().map_err(|_| Error::Command {
            command,
            message: response,
        })
    }

    pub fn select_thread(&self, thread: ThreadId) -> Result<String> {
        self.transport.request(&format!("-thread-select {thread}"))
    }

    pub fn kill_process(&self) -> Result<String> {
        self.transport.request("kill")
    }

    /// Tears the session down once; later calls are ignored.
    pub fn end_debug_session(&self, exit_code: u32) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("debug session ended with exit code {exit_code}");
        // Dropping the sender unblocks a pending `cause_break`.
        self.interrupt_waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.set_state(DebugState::Design);
        self.host.on_session_end(exit_code);
        if let Err(e) = self.transport.close() {
            warn!("closing gdb: {e}");
        }
    }

    // ---- breakpoint management ---------------------------------------------

    /// Inserts a breakpoint at `full_path:line`, falling back to the bare
    /// file name when gdb leaves the full path pending.
    pub fn set_breakpoint_at_line(
        &self,
        file: &str,
        full_path: &str,
        line: u32,
    ) -> Result<Option<BreakpointSnapshot>> {
        let group = &self.config.thread_group;
        let first = format!("-break-insert --thread-group {group} -f {full_path}:{line}");
        let second = (file != full_path)
            .then(|| format!("-break-insert --thread-group {group} -f {file}:{line}"));
        self.insert_breakpoint(&first, second.as_deref())
    }

    pub fn set_breakpoint_at_function(&self, function: &str) -> Result<Option<BreakpointSnapshot>> {
        self.insert_breakpoint(&format!("-break-insert {function}"), None)
    }

    fn insert_breakpoint(
        &self,
        command: &str,
        fallback: Option<&str>,
    ) -> Result<Option<BreakpointSnapshot>> {
        if !self.is_alive() {
            return Ok(None);
        }
        self.prepare_to_modify_breakpoint()?;
        let outcome = self.request_insert(command, fallback);
        self.resume_from_interrupt()?;
        outcome
    }

    fn request_insert(
        &self,
        command: &str,
        fallback: Option<&str>,
    ) -> Result<Option<BreakpointSnapshot>> {
        let mut response = self.transport.request(command)?;
        if let Some(fallback) = fallback {
            if response.contains(PENDING_ADDRESS) {
                response = self.transport.request(fallback)?;
            }
        }
        if !response.starts_with("20") {
            warn!("breakpoint not inserted: `{command}` -> {response:?}");
            return Ok(None);
        }
        match breakpoints::handle(self, &response)? {
            BreakpointEvent::Inserted(snapshot) => Ok(Some(snapshot)),
            _ => Ok(None),
        }
    }

    pub fn delete_breakpoint(&self, id: GdbId) -> Result<bool> {
        if !self.is_alive() {
            return Ok(true);
        }
        self.prepare_to_modify_breakpoint()?;
        let outcome = self.request_id_echo(&format!("-break-delete {id}"), id);
        self.resume_from_interrupt()?;
        outcome
    }

    pub fn enable_breakpoint(&self, id: GdbId, enable: bool) -> Result<bool> {
        self.prepare_to_modify_breakpoint()?;
        let verb = if enable { "enable" } else { "disable" };
        let outcome = self.request_id_echo(&format!("-break-{verb} {id}"), id);
        self.resume_from_interrupt()?;
        outcome
    }

    /// Sends a command whose answer echoes the breakpoint id back.
    fn request_id_echo(&self, command: &str, id: GdbId) -> Result<bool> {
        let response = self.transport.request(command)?;
        if response.len() < 2 || !response.as_bytes()[0].is_ascii_digit() {
            warn!("`{command}` -> {response:?}");
            return Ok(false);
        }
        let echoed = match breakpoints::handle(self, &response)? {
            BreakpointEvent::Deleted(n) | BreakpointEvent::Enabled(n) | BreakpointEvent::Disabled(n) => n,
            _ => return Ok(false),
        };
        Ok(echoed == id)
    }

    /// Sets the gdb-side condition; an empty expression clears it.
    pub fn set_breakpoint_condition(&self, id: GdbId, condition: &str) -> Result<bool> {
        let command = if condition.is_empty() {
            format!("-break-condition {id}")
        } else {
            format!("-break-condition {id} {condition}")
        };
        self.request_and_handle(&command)
    }

    /// Lets the next `n - 1` hits pass. A non-positive `n` ignores forever.
    pub fn ignore_hit_count(&self, id: GdbId, n: i64) -> Result<bool> {
        let mut ignore = n - 1;
        if ignore < 0 {
            ignore = IGNORE_FOREVER;
        }
        let ignore = ignore.min(IGNORE_FOREVER);
        self.request_and_handle(&format!("-break-after {id} {ignore}"))
    }

    fn request_and_handle(&self, command: &str) -> Result<bool> {
        let response = self.transport.request(command)?;
        if response.is_empty() || response == "ERROR" {
            debug!("`{command}` -> {response:?}");
            return Ok(false);
        }
        breakpoints::handle(self, &response)?;
        Ok(true)
    }

    /// Re-creates the gdb breakpoint so its hit count starts over.
    pub fn reset_hit_count(&self, bound: &BoundBreakpoint, reset_condition: bool) -> Result<bool> {
        self.delete_breakpoint(bound.gdb_id())?;
        let inserted = match bound.location() {
            BreakpointLocation::FileLine {
                file,
                full_path,
                line,
            } => self.set_breakpoint_at_line(file, full_path, *line)?,
            BreakpointLocation::Function(function) => self.set_breakpoint_at_function(function)?,
        };
        let Some(snapshot) = inserted else {
            return Ok(false);
        };
        bound.set_gdb_id(snapshot.id);
        bound.state().hits = 0;
        let pass_count = bound.state().pass_count;
        self.set_pass_count(bound, pass_count)?;
        if reset_condition {
            let condition = bound.state().condition.clone();
            self.set_condition(bound, condition)?;
        }
        Ok(true)
    }

    /// Applies a pass-count policy, translating it into a gdb ignore count
    /// unless the breakpoint is evaluated on every hit.
    pub fn set_pass_count(&self, bound: &BoundBreakpoint, pass_count: PassCount) -> Result<()> {
        let _gate = bound.lock(Gates::HIT_COUNT);
        let _region = self.critical.enter();

        let was_running = self.state() == DebugState::Run && self.run_mode();
        if was_running {
            self.prepare_to_modify_breakpoint()?;
        }

        let (when_changed, hits) = {
            let mut st = bound.state();
            st.pass_count = pass_count;
            st.is_hit_count_equal = pass_count.style == PassCountStyle::Equal;
            st.hit_count_multiple = match pass_count.style {
                PassCountStyle::Mod => pass_count.count,
                _ => 0,
            };
            (st.break_when_changed, i64::from(st.hits))
        };

        let outcome = if when_changed {
            Ok(())
        } else {
            let n = i64::from(pass_count.count);
            let ignore = match pass_count.style {
                PassCountStyle::EqualOrGreater if n - hits >= 0 => n - hits,
                PassCountStyle::EqualOrGreater => 1,
                PassCountStyle::Equal => n - hits,
                PassCountStyle::Mod if n > 0 => n - hits % n,
                PassCountStyle::Mod | PassCountStyle::None => 1,
            };
            self.ignore_hit_count(bound.gdb_id(), ignore).map(drop)
        };

        if was_running {
            self.resume_from_interrupt()?;
        }
        outcome
    }

    /// Replaces the condition of a bound breakpoint. "When changed" is
    /// emulated: gdb stops every time and [`Self::breakpoint_hit`] compares values.
    pub fn set_condition(&self, bound: &BoundBreakpoint, condition: BreakCondition) -> Result<()> {
        let permit = self.conditional_update.try_acquire();
        let outcome = self.apply_condition(bound, condition);
        if permit {
            self.conditional_update.release();
        }
        outcome
    }

    fn apply_condition(&self, bound: &BoundBreakpoint, condition: BreakCondition) -> Result<()> {
        let (was_running, verify_pass_count) = {
            let _gate = bound.lock(Gates::CONDITION);
            if bound.hits() != 0 {
                self.reset_hit_count(bound, false)?;
            }
            let _region = self.critical.enter();

            let was_running = self.state() == DebugState::Run && self.run_mode();
            if was_running {
                self.prepare_to_modify_breakpoint()?;
                self.set_state(DebugState::Break);
            }

            let id = bound.gdb_id();
            let mut verify = false;
            match condition.style {
                ConditionStyle::WhenTrue | ConditionStyle::None => {
                    let expression = if condition.style == ConditionStyle::None {
                        String::new()
                    } else {
                        condition.expression.clone()
                    };
                    {
                        let mut st = bound.state();
                        // Leaving "when changed" means gdb must count hits again.
                        verify = std::mem::replace(&mut st.break_when_changed, false);
                        st.previous_value.clear();
                        st.condition = condition;
                    }
                    self.set_breakpoint_condition(id, &expression)?;
                }
                ConditionStyle::WhenChanged => {
                    {
                        let mut st = bound.state();
                        st.break_when_changed = true;
                        st.previous_value = condition.expression.clone();
                        st.condition = condition;
                    }
                    self.ignore_hit_count(id, 1)?;
                    self.set_breakpoint_condition(id, "")?;
                }
            }
            (was_running, verify)
        };

        if verify_pass_count {
            let pass_count = bound.state().pass_count;
            self.set_pass_count(bound, pass_count)?;
        }
        if was_running {
            self.set_state(DebugState::Run);
            self.resume_from_interrupt()?;
        }
        Ok(())
    }

    /// Hit count reported by the IDE user or by gdb. Zeroing a non-zero count
    /// re-creates the breakpoint.
    pub fn set_hit_count(&self, bound: &BoundBreakpoint, hits: u32) -> Result<()> {
        let previous = bound.hits();
        if hits == 0 && previous != 0 {
            bound.state().hits = 0;
            self.reset_hit_count(bound, true)?;
        } else {
            bound.state().hits = hits;
        }
        Ok(())
    }

    /// Hit count pushed by a "modified" record. "When changed" breakpoints
    /// keep their own count.
    pub fn update_hit_count(&self, id: GdbId, hits: u32) -> Result<()> {
        match self.host.bound_breakpoint(id) {
            Some(bound) if !bound.is_when_changed() => self.set_hit_count(&bound, hits),
            _ => Ok(()),
        }
    }
}
