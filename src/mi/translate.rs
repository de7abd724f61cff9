//! Rewrites gdb/MI output into the positional records the event handlers
//! consume.

use crate::{
    mi::{
        models::{MiResponse, MiStatus},
        parser::{field, number_field, raw_field, tuple, tuples},
    },
    record::{PENDING_ADDRESS, UNKNOWN_FUNCTION},
};

/// State carried between asynchronous records.
#[derive(Debug, Default)]
pub struct Translator {
    pid: u32,
}

impl Translator {
    /// Record for an `*` or `=` line, `None` when nothing downstream cares.
    pub fn translate_async(&mut self, line: &str) -> Option<String> {
        let (class, rest) = line.split_once(',').unwrap_or((line, ""));
        match class {
            "*running" => Some(match raw_field(rest, "thread-id") {
                Some("all") | None => "41;0".to_string(),
                Some(id) => format!("41;{id}"),
            }),
            "*stopped" => Some(stopped(rest)),
            "=breakpoint-created" => tuple(rest, "bkpt").map(|b| breakpoint_record(b, 0)),
            // A breakpoint still pending has nothing worth reporting.
            "=breakpoint-modified" => tuple(rest, "bkpt")
                .filter(|b| !is_pending(b))
                .map(|b| breakpoint_record(b, 1)),
            "=breakpoint-deleted" => raw_field(rest, "id").map(|id| format!("22;{id}")),
            "=thread-group-started" => {
                self.pid = number_field(rest, "pid").unwrap_or(0);
                None
            }
            "=thread-created" => raw_field(rest, "id").map(|id| format!("40;{id};{}", self.pid)),
            "=thread-exited" => raw_field(rest, "id").map(|id| format!("51;{id}")),
            _ => None,
        }
    }
}

fn stopped(rest: &str) -> String {
    let thread = number_field(rest, "thread-id").unwrap_or(0);
    let frame = tuple(rest, "frame").unwrap_or_default();
    match raw_field(rest, "reason") {
        Some("breakpoint-hit") => {
            let id = number_field(rest, "bkptno").unwrap_or(0);
            let (file, line) = source(frame).unwrap_or_default();
            format!("27;{id};{file};{line};{thread}")
        }
        Some(reason @ ("end-stepping-range" | "function-finished")) => {
            let tag = if reason == "end-stepping-range" { 45 } else { 46 };
            match source(frame) {
                Some((file, line)) => format!("{tag};{file};{line};{thread}"),
                None => format!("{tag};{thread}"),
            }
        }
        Some("exited-normally") => "42".to_string(),
        Some("exited") => {
            // gdb prints the exit code in octal.
            let code = raw_field(rest, "exit-code")
                .and_then(|c| u32::from_str_radix(c, 8).ok())
                .unwrap_or(0);
            format!("43;{code};")
        }
        Some("exited-signalled") => {
            let name = field(rest, "signal-name").unwrap_or_default();
            let meaning = field(rest, "signal-meaning").unwrap_or_default();
            format!("55;{name};{meaning};")
        }
        Some("signal-received") => {
            let name = raw_field(rest, "signal-name").unwrap_or_default();
            let meaning = raw_field(rest, "signal-meaning").unwrap_or_default();
            match (name, meaning) {
                ("SIGKILL", _) => "48".to_string(),
                (_, "Killed") => format!("47;{thread}"),
                ("SIGSEGV", _) => interrupted(54, frame, thread),
                _ => interrupted(44, frame, thread),
            }
        }
        None => format!("47;{thread}"),
        Some(_) => interrupted(44, frame, thread),
    }
}

fn interrupted(tag: u8, frame: &str, thread: u32) -> String {
    let addr = raw_field(frame, "addr").unwrap_or("0x0");
    let func = raw_field(frame, "func").unwrap_or(UNKNOWN_FUNCTION);
    match source(frame) {
        Some((file, line)) => format!("{tag};{addr};{func};{file};{line};{thread}"),
        None => format!("{tag};{addr};{func};{thread}"),
    }
}

/// Full path (or file name) and line of a frame with debug info.
fn source(frame: &str) -> Option<(String, u32)> {
    let file = field(frame, "fullname").or_else(|| field(frame, "file"))?;
    let line = number_field(frame, "line")?;
    Some((file, line))
}

fn is_pending(bkpt: &str) -> bool {
    !raw_field(bkpt, "addr").is_some_and(|a| a.starts_with("0x"))
}

fn breakpoint_record(bkpt: &str, kind: u8) -> String {
    let id = raw_field(bkpt, "number").unwrap_or("0");
    let enabled = raw_field(bkpt, "enabled").unwrap_or("y");
    if is_pending(bkpt) {
        return format!("2{kind};{id};{enabled};{PENDING_ADDRESS}");
    }
    let addr = raw_field(bkpt, "addr").unwrap_or_default();
    let func = raw_field(bkpt, "func").unwrap_or(UNKNOWN_FUNCTION);
    let file = field(bkpt, "fullname")
        .or_else(|| field(bkpt, "file"))
        .unwrap_or_default();
    let line = number_field(bkpt, "line").unwrap_or(0);
    let times = number_field(bkpt, "times").unwrap_or(0);
    format!("2{kind};{id};{enabled};{addr};{func};{file};{line};{times}")
}

/// Record for a failed fire-and-forget command.
pub fn translate_error(message: &str) -> String {
    if message.contains("Remote communication error") {
        "53".to_string()
    } else if message == "Quit" {
        "50".to_string()
    } else if message.contains("frame_cleanup_after_sniffer") {
        "52".to_string()
    } else if message.contains("handle_inferior_event") {
        "56".to_string()
    } else {
        format!("49;{message}")
    }
}

/// Console output (`80`) or target output (`81`) record.
pub fn translate_stream(text: &str, target: bool) -> String {
    let tag = if target { 81 } else { 80 };
    // Records are split on CRLF downstream.
    let text = text.replace("\r\n", "\n");
    format!("{tag};\"{text}\"!{tag}")
}

/// Console lines printed during `command` that its answer does not use.
pub fn unused_console<'a>(command: &str, oob: &'a [String]) -> impl Iterator<Item = &'a String> {
    let types = matches!(
        command.split_whitespace().next(),
        Some("whatis" | "ptype")
    );
    let mut answered = false;
    oob.iter().filter(move |line| {
        if types && !answered && line.starts_with(TYPE_PREFIX) {
            answered = true;
            return false;
        }
        true
    })
}

const TYPE_PREFIX: &str = "type = ";

/// Answer handed back to a synchronous `request`.
pub fn translate_response(command: &str, response: &MiResponse) -> String {
    let verb = command.split_whitespace().next().unwrap_or_default();
    let result = response.result.as_str();
    if let MiStatus::Error(msg) = &response.status {
        return if verb == "-data-evaluate-expression" {
            format!("61;\"{}\"", raw_field(result, "msg").unwrap_or(msg.as_str()))
        } else {
            "ERROR".to_string()
        };
    }

    let id_arg = || command.split_whitespace().nth(1).unwrap_or_default();
    match verb {
        "-data-evaluate-expression" => {
            format!("60;\"{}\"", raw_field(result, "value").unwrap_or_default())
        }
        "-var-create" => raw_field(result, "numchild").unwrap_or("0").to_string(),
        "-var-list-children" => {
            let entries: Vec<String> = tuples(result, "children")
                .into_iter()
                .map(|child| {
                    format!(
                        "{};{};{};{}",
                        field(child, "name").unwrap_or_default(),
                        raw_field(child, "numchild").unwrap_or("0"),
                        field(child, "value").unwrap_or_default(),
                        field(child, "type").unwrap_or_default(),
                    )
                })
                .collect();
            format!("65;{}", entries.join("#"))
        }
        "-stack-list-variables" => {
            let entries: Vec<String> = tuples(result, "variables")
                .into_iter()
                .map(|var| {
                    format!(
                        "{};{};{};{}",
                        field(var, "name").unwrap_or_default(),
                        if raw_field(var, "arg") == Some("1") { 1 } else { 0 },
                        field(var, "type").unwrap_or_default(),
                        field(var, "value").unwrap_or_default(),
                    )
                })
                .collect();
            format!("11;{}", entries.join("#"))
        }
        "whatis" | "ptype" => response
            .oob
            .iter()
            .find_map(|line| line.strip_prefix(TYPE_PREFIX))
            .map(|ty| ty.lines().next().unwrap_or_default().trim_end().to_string())
            .unwrap_or_default(),
        "-break-insert" => tuple(result, "bkpt")
            .map(|b| breakpoint_record(b, 0))
            .unwrap_or_else(|| "ERROR".to_string()),
        "-break-delete" => format!("25;{}", id_arg()),
        "-break-enable" => format!("23;{}", id_arg()),
        "-break-disable" => format!("24;{}", id_arg()),
        "-break-after" => {
            let mut args = command.split_whitespace().skip(1);
            let id = args.next().unwrap_or_default();
            let count = args.next().unwrap_or("0");
            format!("26;{id};{count}")
        }
        "-break-condition" => {
            let mut parts = command.splitn(3, ' ').skip(1);
            let id = parts.next().unwrap_or_default();
            match parts.next().map(str::trim).filter(|c| !c.is_empty()) {
                Some(condition) => format!("28;{id};{condition}"),
                None => format!("28;{id}"),
            }
        }
        "-stack-info-depth" => raw_field(result, "depth").unwrap_or("0").to_string(),
        _ => String::new(),
    }
}
