use std::{
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStdin, Command, Stdio},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use crate::{
    error::{Error, Result},
    mi::{
        models::{MiLine, MiResponse, MiStatus},
        parser::{classify_line, parse_status},
        translate::{
            translate_error, translate_response, translate_stream, unused_console, Translator,
        },
    },
    transport::Transport,
};

/// The synchronous request waiting for its tokened result record.
struct Pending {
    token: u64,
    command: String,
    reply: Sender<String>,
    oob: Vec<String>,
}

type PendingSlot = Arc<Mutex<Option<Pending>>>;

/// gdb running in MI mode behind the [`Transport`] seam.
///
/// A reader thread owns stdout. Tokened result records answer `request`;
/// everything else is translated into event records and queued for
/// `pull_next_response`.
pub struct GdbTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    next_token: AtomicU64,
    request_lock: Mutex<()>,
    pending: PendingSlot,
    events: Receiver<String>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl GdbTransport {
    pub fn start(gdb_bin: &str, target: &str, args: &[String]) -> Result<Self> {
        let mut cmd = Command::new(gdb_bin);
        cmd.arg("-q").arg("-i=mi").arg("--args").arg(target);
        cmd.args(args);
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::GdbNotFound(gdb_bin.to_string())
                } else {
                    Error::Launch {
                        bin: gdb_bin.to_string(),
                        source: e,
                    }
                }
            })?;

        let stdin = child.stdin.take().ok_or(Error::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(Error::Pipe("stdout"))?;

        let pending: PendingSlot = Arc::new(Mutex::new(None));
        let (tx, rx) = unbounded();
        let slot = pending.clone();
        let reader = std::thread::Builder::new()
            .name("gdb-reader".into())
            .spawn(move || read_loop(BufReader::new(stdout), &slot, &tx))?;

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            next_token: AtomicU64::new(1),
            request_lock: Mutex::new(()),
            pending,
            events: rx,
            reader: Mutex::new(Some(reader)),
        })
    }

    fn send_line(&self, line: &str) -> Result<()> {
        debug!(target: "gdb", "[mi->] {}", line);
        let mut stdin = self.stdin.lock().unwrap_or_else(PoisonError::into_inner);
        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;
        Ok(())
    }
}

impl Transport for GdbTransport {
    fn pull_next_response(&self, timeout: Duration) -> Result<Option<String>> {
        match self.events.recv_timeout(timeout) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::TransportClosed),
        }
    }

    fn submit_command(&self, command: &str) -> Result<()> {
        self.send_line(command)
    }

    fn request(&self, command: &str) -> Result<String> {
        // One request in flight at a time.
        let _serial = self
            .request_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (reply, answer) = bounded(1);
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(Pending {
            token,
            command: command.to_string(),
            reply,
            oob: Vec::new(),
        });
        if let Err(e) = self.send_line(&format!("{token}{command}")) {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            return Err(e);
        }
        answer.recv().map_err(|_| Error::TransportClosed)
    }

    fn close(&self) -> Result<()> {
        self.send_line("-gdb-exit")
    }
}

impl Drop for GdbTransport {
    fn drop(&mut self) {
        let child = self.child.get_mut().unwrap_or_else(PoisonError::into_inner);
        let _ = child.kill();
        let _ = child.wait();
        if let Some(reader) = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = reader.join();
        }
    }
}

/// Reads gdb stdout until EOF. Dropping `events` on return is what tells
/// the dispatcher that gdb is gone.
fn read_loop<R: BufRead>(mut reader: R, pending: &Mutex<Option<Pending>>, events: &Sender<String>) {
    let mut translator = Translator::default();
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(target: "gdb", "reading gdb output failed: {e}");
                break;
            }
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }
        debug!(target: "gdb", "[mi<-] {}", trimmed);

        let record = match classify_line(trimmed) {
            MiLine::Result { token, record } => {
                let mut slot = pending.lock().unwrap_or_else(PoisonError::into_inner);
                match slot.take() {
                    Some(waiting) if token == Some(waiting.token) => {
                        let response = MiResponse {
                            status: parse_status(&record),
                            result: record,
                            oob: waiting.oob,
                        };
                        let _ = waiting
                            .reply
                            .send(translate_response(&waiting.command, &response));
                        // Console text the answer did not consume still reaches the host.
                        for text in unused_console(&waiting.command, &response.oob) {
                            if events.send(translate_stream(text, false)).is_err() {
                                return;
                            }
                        }
                        None
                    }
                    other => {
                        *slot = other;
                        match parse_status(&record) {
                            MiStatus::Error(msg) => Some(translate_error(&msg)),
                            _ => None,
                        }
                    }
                }
            }
            MiLine::Async(record) => translator.translate_async(&record),
            MiLine::Console(text) => {
                let mut slot = pending.lock().unwrap_or_else(PoisonError::into_inner);
                match slot.as_mut() {
                    Some(waiting) => {
                        waiting.oob.push(text);
                        None
                    }
                    None => Some(translate_stream(&text, false)),
                }
            }
            MiLine::Target(text) => Some(translate_stream(&text, true)),
            MiLine::Log(text) => {
                debug!(target: "gdb", "{}", text.trim_end());
                None
            }
            MiLine::Prompt => None,
        };

        if let Some(record) = record {
            if events.send(record).is_err() {
                break;
            }
        }
    }
    // Wake a requester stuck waiting on a reply that will never come.
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}
