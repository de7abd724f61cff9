//! Thread, process and stepping records (`4x`), plus gdb and signal
//! failures (`5x`).

use log::{debug, info};

use crate::{
    error::Result,
    host::{MessageLevel, ThreadId},
    record::{RecordCursor, RecordError, UNKNOWN_FUNCTION},
    session::{DebugState, SessionCoordinator, StepKind},
};

const NO_FUNCTION_BOUNDS: &str = "Cannot find bounds of current function";

const LOST_GDB: &str = "Lost communication with GDB. Please refer to documentation for more details.";
const LOST_DEVICE: &str = "Lost communication with the device/simulator.";
const SEGFAULT_WARNING: &str =
    "Segmentation Fault: If you continue debugging could take the environment to an unstable state.";
const SEGFAULT_FATAL: &str = "Segmentation Fault: Closing debugger.";
const ABORTED_FATAL: &str = "Program aborted: Closing debugger.";

/// Internal gdb assertion failures known to kill the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GdbAssertion {
    /// frame.c:2374 frame_cleanup_after_sniffer
    FrameCleanup,
    /// infrun.c:3550 handle_inferior_event
    InferiorEvent,
}

impl GdbAssertion {
    pub fn message(self) -> &'static str {
        match self {
            GdbAssertion::FrameCleanup => concat!(
                "This is a known issue that can happen when interrupting GDB's execution by ",
                "hitting \"break all\" or toggling a breakpoint in run mode.\n\n",
                "GDB CRASHED. Details: \"../../gdb/frame.c:2374: internal-error: ",
                "frame_cleanup_after_sniffer: Assertion `frame->prologue_cache == NULL' failed.\"\n\n",
                "Please close the app in the device/simulator if you want to debug it again."
            ),
            GdbAssertion::InferiorEvent => concat!(
                "This is a known issue that can happen while debugging multithreaded programs.\n\n",
                "GDB CRASHED. Details: \"../../gdb/infrun.c:3550: internal-error: ",
                "handle_inferior_event: Assertion `ptid_equal (singlestep_ptid, ecs->ptid)' failed.\"\n\n",
                "Please close the app in the device/simulator if you want to debug it again."
            ),
        }
    }
}

/// Where an interrupted target stopped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StopLocation {
    pub address: u64,
    pub function: String,
    pub file: String,
    pub line: u32,
    /// 0 when the record carries no thread.
    pub thread: ThreadId,
    pub unknown_code: bool,
}

/// Where a step or finish ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStop {
    pub file: String,
    pub line: u32,
    pub thread: ThreadId,
    pub unknown_code: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    ThreadCreated { thread: ThreadId, pid: u32 },
    /// thread 0 means every thread.
    Running { thread: ThreadId },
    Exited { code: u32 },
    Interrupted(StopLocation),
    SegfaultInterrupted(StopLocation),
    SteppingEnded(StepStop),
    FunctionFinished(StepStop),
    ExecInterrupted { thread: ThreadId },
    Killed,
    CommandError(String),
    Quit,
    ThreadExited { thread: ThreadId },
    GdbCrashed(GdbAssertion),
    RemoteLost,
    Signaled {
        name: String,
        meaning: String,
        thread: Option<ThreadId>,
    },
    Unused,
}

pub fn parse(record: &str) -> std::result::Result<ExecutionEvent, RecordError> {
    let mut cur = RecordCursor::new(record)?;
    let tag = cur.tag();
    let event = match (tag.category, tag.kind) {
        (4, 0) => {
            let thread = cur.next_or_rest("thread")?;
            let thread = cur.number(thread, "thread")?;
            // The pid is informational only.
            let pid = cur
                .rest_opt()
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(0);
            ExecutionEvent::ThreadCreated { thread, pid }
        }
        (4, 1) => ExecutionEvent::Running {
            thread: cur.rest_u32("thread")?,
        },
        (4, 2) => ExecutionEvent::Exited { code: 0 },
        (4, 3) => {
            let code = cur.next_or_rest("exit code")?;
            ExecutionEvent::Exited {
                code: cur.number(code, "exit code")?,
            }
        }
        (4, 4) => ExecutionEvent::Interrupted(parse_stop(&mut cur)?),
        (5, 4) => ExecutionEvent::SegfaultInterrupted(parse_stop(&mut cur)?),
        (4, 5) => ExecutionEvent::SteppingEnded(parse_step(&mut cur)?),
        (4, 6) => ExecutionEvent::FunctionFinished(parse_step(&mut cur)?),
        (4, 7) => ExecutionEvent::ExecInterrupted {
            thread: cur.rest_u32("thread")?,
        },
        (4, 8) => ExecutionEvent::Killed,
        (4, 9) => ExecutionEvent::CommandError(cur.rest_opt().unwrap_or_default().to_string()),
        (5, 0) => ExecutionEvent::Quit,
        (5, 1) => ExecutionEvent::ThreadExited {
            thread: cur.rest_u32("thread")?,
        },
        (5, 2) => ExecutionEvent::GdbCrashed(GdbAssertion::FrameCleanup),
        (5, 3) => ExecutionEvent::RemoteLost,
        (5, 5) => {
            let name = cur.next_field("signal name")?.to_string();
            let meaning = cur.next_or_rest("signal meaning")?.to_string();
            let thread = cur.rest_opt().and_then(|raw| raw.trim().parse().ok());
            ExecutionEvent::Signaled {
                name,
                meaning,
                thread,
            }
        }
        (5, 6) => ExecutionEvent::GdbCrashed(GdbAssertion::InferiorEvent),
        _ => ExecutionEvent::Unused,
    };
    Ok(event)
}

/// `addr;func;thread`, `addr;func;file;line` or `addr;func;file;line;thread`,
/// told apart by the number of delimiters.
fn parse_stop(cur: &mut RecordCursor<'_>) -> std::result::Result<StopLocation, RecordError> {
    let fields = cur.delimiter_count();
    let address = cur.next_field("address")?;
    let address = cur.hex(address, "address")?;
    let function = cur.next_field("function")?.to_string();
    let mut stop = StopLocation {
        address,
        unknown_code: function == UNKNOWN_FUNCTION,
        function,
        ..Default::default()
    };
    match fields {
        3 => {
            // No source for this frame.
            stop.unknown_code = true;
            stop.thread = cur.rest_u32("thread")?;
        }
        4 => {
            stop.file = cur.next_field("file")?.to_string();
            stop.line = cur.rest_u32("line")?;
        }
        5 => {
            stop.file = cur.next_field("file")?.to_string();
            stop.line = cur.next_u32("line")?;
            stop.thread = cur.rest_u32("thread")?;
        }
        _ => return Err(cur.shape_error()),
    }
    Ok(stop)
}

/// `file;line;thread`, or `thread` alone when the frame has no symbols.
fn parse_step(cur: &mut RecordCursor<'_>) -> std::result::Result<StepStop, RecordError> {
    if cur.has_delimiter() {
        Ok(StepStop {
            file: cur.next_field("file")?.to_string(),
            line: cur.next_u32("line")?,
            thread: cur.rest_u32("thread")?,
            unknown_code: false,
        })
    } else {
        Ok(StepStop {
            file: String::new(),
            line: 1,
            thread: cur.rest_u32("thread")?,
            unknown_code: true,
        })
    }
}

/// Parses `record` and drives the session state machine with it.
pub fn handle(session: &SessionCoordinator, record: &str) -> Result<ExecutionEvent> {
    let event = parse(record)?;
    let host = session.host();
    match &event {
        ExecutionEvent::ThreadCreated { thread, pid } => {
            debug!(target: "events", "thread {thread} created in process {pid}");
            session.set_run_mode(true);
            session.mark_threads_dirty();
            host.on_thread_created(*thread);
        }
        ExecutionEvent::Running { .. } => session.set_run_mode(true),
        ExecutionEvent::Exited { code } => session.end_debug_session(*code),
        ExecutionEvent::Interrupted(stop) => on_stopped(session, stop, false),
        ExecutionEvent::SegfaultInterrupted(stop) => on_stopped(session, stop, true),
        ExecutionEvent::SteppingEnded(stop) | ExecutionEvent::FunctionFinished(stop) => {
            host.reset_cached_stack_frames();
            session.set_run_mode(false);
            session.set_unknown_code(stop.unknown_code);
            host.clean_evaluated_thread_caches();
            session.refresh_threads();
            if stop.thread > 0 {
                if !stop.unknown_code && !stop.file.is_empty() {
                    session.set_thread_location(stop.thread, &stop.file, stop.line);
                }
                session.set_current_thread(stop.thread);
            }
            session.on_step_completed(&stop.file, stop.line);
        }
        ExecutionEvent::ExecInterrupted { thread } => {
            host.reset_cached_stack_frames();
            session.set_run_mode(false);
            host.clean_evaluated_thread_caches();
            session.refresh_threads();
            if *thread > 0 {
                session.set_current_thread(*thread);
            }
            if session.state() != DebugState::Break {
                session.on_interrupt(*thread, "", 0);
            }
            session.signal_interrupt_processed();
        }
        ExecutionEvent::Killed => session.end_debug_session(0),
        ExecutionEvent::CommandError(message) => {
            host.reset_cached_stack_frames();
            host.clean_evaluated_thread_caches();
            session.refresh_threads();
            if message == NO_FUNCTION_BOUNDS {
                // No symbols to step by line; get out of this function.
                session.set_unknown_code(true);
                session.step(StepKind::Out)?;
            } else {
                debug!(target: "events", "gdb error: {message}");
            }
        }
        ExecutionEvent::Quit => {
            let count = session.bump_sigint();
            if count > session.config().sigint_storm_limit {
                session.end_debug_session(0);
                host.show_message(MessageLevel::Error, "GDB failure", LOST_GDB);
            }
        }
        ExecutionEvent::ThreadExited { .. } => session.mark_threads_dirty(),
        ExecutionEvent::GdbCrashed(assertion) => {
            session.end_debug_session(0);
            host.show_message(MessageLevel::Error, "GDB failure", assertion.message());
        }
        ExecutionEvent::RemoteLost => {
            host.show_message(MessageLevel::Error, "Communication lost", LOST_DEVICE);
            session.end_debug_session(0);
        }
        ExecutionEvent::Signaled { name, meaning, .. } => match meaning.as_str() {
            "Segmentation fault" => {
                host.show_message(MessageLevel::Error, "Segmentation Fault", SEGFAULT_FATAL);
                session.end_debug_session(0);
            }
            "Aborted" => {
                host.show_message(MessageLevel::Error, "Program aborted", ABORTED_FATAL);
                session.end_debug_session(0);
            }
            _ => {
                info!("program terminated by {name} ({meaning})");
                session.end_debug_session(0);
            }
        },
        ExecutionEvent::Unused => {}
    }
    Ok(event)
}

fn on_stopped(session: &SessionCoordinator, stop: &StopLocation, segfault: bool) {
    let host = session.host();
    host.reset_cached_stack_frames();
    session.set_run_mode(false);
    session.set_unknown_code(stop.unknown_code);
    if segfault {
        host.show_message(MessageLevel::Warning, "Segmentation Fault", SEGFAULT_WARNING);
    }
    host.clean_evaluated_thread_caches();
    session.refresh_threads();
    if stop.thread > 0 {
        session.set_thread_location(stop.thread, &stop.file, stop.line);
        session.set_current_thread(stop.thread);
    }
    session.on_interrupt(stop.thread, &stop.file, stop.line);
    session.signal_interrupt_processed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{session_with, HostCall};

    fn messages(calls: &[HostCall]) -> Vec<(String, String)> {
        calls
            .iter()
            .filter_map(|c| match c {
                HostCall::Message(_, title, text) => Some((title.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_thread_only_interrupt() {
        let (session, _transport, host) = session_with(&[]);
        session.set_state(DebugState::Run);

        let event = handle(&session, "44,8048400,foo,3").unwrap();

        let ExecutionEvent::Interrupted(stop) = event else {
            panic!("expected an interrupt");
        };
        assert_eq!(stop.address, 0x8048400);
        assert_eq!(stop.function, "foo");
        assert_eq!(stop.thread, 3);
        assert!(stop.unknown_code);
        assert!(session.unknown_code());
        assert!(!session.run_mode());
        assert_eq!(session.state(), DebugState::Break);
        assert_eq!(session.current_thread(), 3);
        assert!(host.calls().contains(&HostCall::AsyncBreakComplete(3)));
    }

    #[test]
    fn test_interrupt_shapes() {
        let stop = |record: &str| match parse(record).unwrap() {
            ExecutionEvent::Interrupted(stop) | ExecutionEvent::SegfaultInterrupted(stop) => stop,
            other => panic!("unexpected {other:?}"),
        };
        let with_line = stop("44;0x401136;main;/src/m.c;12");
        assert_eq!((with_line.file.as_str(), with_line.line, with_line.thread), ("/src/m.c", 12, 0));
        assert!(!with_line.unknown_code);

        let full = stop("54;401136;main;/src/m.c;12;2");
        assert_eq!((full.line, full.thread), (12, 2));

        assert!(stop("44;401136;??;/src/m.c;12;2").unknown_code);
        assert!(matches!(
            parse("44;401136;main;a;b;c;d"),
            Err(RecordError::FieldCount { count: 6, .. })
        ));
    }

    #[test]
    fn test_interrupt_publishes_previous_line() {
        let (session, _transport, host) = session_with(&[]);
        session.set_state(DebugState::Run);
        handle(&session, "44;401136;main;/src/m.c;12;2").unwrap();
        let calls = host.calls();
        assert!(calls.contains(&HostCall::Location(2, "/src/m.c".into(), 12)));
        assert!(calls.contains(&HostCall::Document("/src/m.c".into(), 11)));
    }

    #[test]
    fn test_interrupt_after_edit_break_is_not_reported() {
        let (session, transport, host) = session_with(&[]);
        let session = std::sync::Arc::new(session);
        session.set_state(DebugState::Run);

        let edit = {
            let session = session.clone();
            std::thread::spawn(move || session.prepare_to_modify_breakpoint())
        };
        while !transport.sent().contains(&"-exec-interrupt".to_string()) {
            std::thread::yield_now();
        }
        crate::events::dispatch_response(&session, "47;1");
        edit.join().unwrap().unwrap();
        assert!(!host.calls().contains(&HostCall::AsyncBreakComplete(1)));

        session.resume_from_interrupt().unwrap();
        assert!(transport
            .sent()
            .contains(&"-exec-continue --thread-group i1".to_string()));
        assert!(!session.needs_resume_after_interrupt());
    }

    #[test]
    fn test_segfault_interrupt_warns() {
        let (session, _transport, host) = session_with(&[]);
        session.set_state(DebugState::Run);
        handle(&session, "54;401136;main;/src/m.c;12;2").unwrap();
        let calls = host.calls();
        assert_eq!(
            messages(&calls),
            vec![("Segmentation Fault".to_string(), SEGFAULT_WARNING.to_string())]
        );
        assert!(session.is_alive());
        assert_eq!(session.state(), DebugState::Break);
    }

    #[test]
    fn test_step_without_symbols() {
        let (session, _transport, host) = session_with(&[]);
        session.set_state(DebugState::Step);
        handle(&session, "45;4").unwrap();
        assert!(session.unknown_code());
        assert_eq!(session.current_thread(), 4);
        let calls = host.calls();
        assert!(calls.contains(&HostCall::StepCompleted));
        assert!(calls.contains(&HostCall::Document(String::new(), 0)));
        assert!(!calls.iter().any(|c| matches!(c, HostCall::Location(..))));
    }

    #[test]
    fn test_function_finished_with_source() {
        let (session, _transport, host) = session_with(&[]);
        session.set_unknown_code(true);
        session.set_state(DebugState::Step);
        handle(&session, "46;/src/m.c;30;1").unwrap();
        assert!(!session.unknown_code());
        assert_eq!(session.state(), DebugState::Break);
        let calls = host.calls();
        assert!(calls.contains(&HostCall::Location(1, "/src/m.c".into(), 30)));
        assert!(calls.contains(&HostCall::Document("/src/m.c".into(), 29)));
    }

    #[test]
    fn test_step_record_outside_step_mode_is_ignored() {
        let (session, _transport, host) = session_with(&[]);
        session.set_state(DebugState::Break);
        handle(&session, "45;/src/m.c;30;1").unwrap();
        assert!(!host.calls().contains(&HostCall::StepCompleted));
    }

    #[test]
    fn test_exec_interrupt_in_break_mode_skips_notification() {
        let (session, _transport, host) = session_with(&[]);
        session.set_state(DebugState::Break);
        handle(&session, "47;2").unwrap();
        assert_eq!(session.current_thread(), 2);
        assert!(!host
            .calls()
            .iter()
            .any(|c| matches!(c, HostCall::AsyncBreakComplete(_))));
    }

    #[test]
    fn test_thread_records_refresh_list_on_next_stop() {
        let (session, _transport, host) = session_with(&[]);
        handle(&session, "40;2").unwrap();
        assert!(session.run_mode());
        assert_eq!(
            parse("40;2").unwrap(),
            ExecutionEvent::ThreadCreated { thread: 2, pid: 0 }
        );
        handle(&session, "51;2").unwrap();
        session.set_state(DebugState::Run);
        handle(&session, "47;1").unwrap();
        let updates = host
            .calls()
            .iter()
            .filter(|c| **c == HostCall::UpdateThreads)
            .count();
        assert_eq!(updates, 1);
    }

    #[test]
    fn test_exit_records_end_session() {
        let (session, transport, host) = session_with(&[]);
        handle(&session, "43;3;").unwrap();
        handle(&session, "42").unwrap();
        assert_eq!(host.calls(), vec![HostCall::SessionEnd(3)]);
        assert!(transport.is_closed());
        assert_eq!(parse("43;1").unwrap(), ExecutionEvent::Exited { code: 1 });
    }

    #[test]
    fn test_missing_function_bounds_steps_out() {
        let (session, transport, _host) = session_with(&[]);
        session.set_state(DebugState::Break);
        handle(&session, "49;Cannot find bounds of current function").unwrap();
        assert!(session.unknown_code());
        assert_eq!(transport.sent(), vec!["-exec-continue --thread-group i1"]);

        let (session, transport, _host) = session_with(&[]);
        handle(&session, "49;No symbol \"x\" in current context.").unwrap();
        assert!(!session.unknown_code());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_gdb_crashes_are_fatal() {
        for (record, needle) in [
            ("52", "frame_cleanup_after_sniffer"),
            ("56", "handle_inferior_event"),
        ] {
            let (session, _transport, host) = session_with(&[]);
            handle(&session, record).unwrap();
            assert!(!session.is_alive());
            let msgs = messages(&host.calls());
            assert_eq!(msgs.len(), 1);
            assert_eq!(msgs[0].0, "GDB failure");
            assert!(msgs[0].1.contains(needle));
        }
    }

    #[test]
    fn test_remote_lost_is_fatal() {
        let (session, _transport, host) = session_with(&[]);
        handle(&session, "53").unwrap();
        assert!(!session.is_alive());
        assert_eq!(
            messages(&host.calls()),
            vec![("Communication lost".to_string(), LOST_DEVICE.to_string())]
        );
    }

    #[test]
    fn test_fatal_signals() {
        let (session, _transport, host) = session_with(&[]);
        handle(&session, "55;SIGSEGV;Segmentation fault;1").unwrap();
        assert!(!session.is_alive());
        assert_eq!(messages(&host.calls())[0].1, SEGFAULT_FATAL);

        let (session, _transport, host) = session_with(&[]);
        handle(&session, "55;SIGABRT;Aborted;").unwrap();
        assert!(!session.is_alive());
        assert_eq!(messages(&host.calls())[0].1, ABORTED_FATAL);

        assert_eq!(
            parse("55;SIGTERM;Terminated;x").unwrap(),
            ExecutionEvent::Signaled {
                name: "SIGTERM".into(),
                meaning: "Terminated".into(),
                thread: None
            }
        );
    }
}
