//! Console and target output records (`80;"text"!80`, `81;"text"!81`).

use crate::{
    error::Result,
    host::OutputStream,
    record::{RecordCursor, RecordTag},
    session::SessionCoordinator,
};

const PAYLOAD_START: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Text { stream: OutputStream, text: String },
    Unused,
}

pub fn parse(record: &str) -> std::result::Result<OutputEvent, crate::record::RecordError> {
    let tag = RecordCursor::new(record)?.tag();
    let stream = match (tag.category, tag.kind) {
        (8, 0) => OutputStream::Console,
        (8, 1) => OutputStream::Target,
        _ => return Ok(OutputEvent::Unused),
    };
    Ok(OutputEvent::Text {
        stream,
        text: payload(record, tag).to_string(),
    })
}

/// Text between the opening quote and the `"!8x` terminator. A record cut
/// short keeps everything after the quote.
fn payload(record: &str, tag: RecordTag) -> &str {
    let body = record.get(PAYLOAD_START..).unwrap_or_default();
    let terminator = format!("\"!{}{}", tag.category, tag.kind);
    match body.rfind(&terminator) {
        Some(end) => &body[..end],
        None => body,
    }
}

pub fn handle(session: &SessionCoordinator, record: &str) -> Result<OutputEvent> {
    let event = parse(record)?;
    if let OutputEvent::Text { stream, text } = &event {
        session.host().on_output(*stream, text);
    }
    Ok(event)
}
