//! Classifier and dispatch loop for translated gdb event records.

pub mod breakpoints;
pub mod execution;
pub mod output;

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, warn};

use crate::{error::Error, session::SessionCoordinator};

/// Record tags that do not count as recovery from a SIGINT storm.
const SIGINT_TAG: &str = "50";
const CONSOLE_TAG: &str = "80";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Breakpoint,
    Execution,
    Output,
    /// Start-up, evaluation and stack records, answered synchronously elsewhere.
    Ignored,
}

impl EventClass {
    pub fn of(record: &str) -> EventClass {
        match record.as_bytes().first() {
            Some(b'2') => EventClass::Breakpoint,
            Some(b'4') | Some(b'5') => EventClass::Execution,
            Some(b'8') => EventClass::Output,
            _ => EventClass::Ignored,
        }
    }
}

/// Handles one record. A malformed record is logged and dropped; the
/// session carries on.
pub fn dispatch_event(session: &SessionCoordinator, record: &str) {
    if session.sigint_count() > 0
        && !record.starts_with(SIGINT_TAG)
        && !record.starts_with(CONSOLE_TAG)
    {
        session.reset_sigint();
    }
    debug!(target: "events", "{record}");
    let outcome = match EventClass::of(record) {
        EventClass::Breakpoint => breakpoints::handle(session, record).map(drop),
        EventClass::Execution => execution::handle(session, record).map(drop),
        EventClass::Output => output::handle(session, record).map(drop),
        EventClass::Ignored => Ok(()),
    };
    if let Err(e) = outcome {
        warn!(target: "events", "dropping {record:?}: {e}");
    }
}

/// Splits one delivery into its `\r\n` separated records and handles them
/// in order, stopping early once the session has ended.
pub fn dispatch_response(session: &SessionCoordinator, delivery: &str) {
    for record in delivery.split("\r\n") {
        if !session.is_alive() {
            break;
        }
        if record.len() <= 1 {
            continue;
        }
        dispatch_event(session, record);
    }
}

/// Drains the transport until `stop` is raised or the session ends.
pub fn dispatch_loop(session: &SessionCoordinator, stop: &AtomicBool) {
    let poll = session.config().poll_interval;
    while !stop.load(Ordering::Acquire) && session.is_alive() {
        match session.transport().pull_next_response(poll) {
            Ok(Some(delivery)) => dispatch_response(session, &delivery),
            Ok(None) => {}
            Err(Error::TransportClosed) => {
                if session.is_alive() {
                    warn!(target: "events", "gdb went away");
                    session.end_debug_session(0);
                }
                break;
            }
            Err(e) => {
                error!(target: "events", "reading gdb output: {e}");
                session.end_debug_session(0);
                break;
            }
        }
    }
    debug!(target: "events", "dispatch loop finished");
}

/// The dispatcher thread of a session.
pub struct EventDispatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub fn start(session: Arc<SessionCoordinator>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("gdb-events".into())
            .spawn(move || dispatch_loop(&session, &flag))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Raises the stop flag and waits for the record in flight to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(target: "events", "dispatcher thread panicked");
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
