//! Positional records produced by the gdb translator.
//!
//! Every record starts with a two digit tag (category, kind) followed by a
//! delimiter byte. The byte at offset 2 is the record's field delimiter, `;`
//! for everything the translator emits; `,` is accepted for hand-written
//! records. Fields are never named, so a missing one is a hard error.

/// Address literal gdb reports for a breakpoint it could not resolve yet.
pub const PENDING_ADDRESS: &str = "<PENDING>";
/// Function name gdb reports when it has no symbols for a frame.
pub const UNKNOWN_FUNCTION: &str = "??";

const BODY_START: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record too short: {0:?}")]
    TooShort(String),
    #[error("record has no numeric tag: {0:?}")]
    BadTag(String),
    #[error("record {record:?} is missing the {field} field")]
    MissingField { record: String, field: &'static str },
    #[error("record {record:?} has a non numeric {field}: {value:?}")]
    BadNumber {
        record: String,
        field: &'static str,
        value: String,
    },
    #[error("record {record:?} has an unexpected shape ({count} fields)")]
    FieldCount { record: String, count: usize },
}

/// The two leading digits of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTag {
    pub category: u8,
    pub kind: u8,
}

impl RecordTag {
    pub fn parse(record: &str) -> Result<Self, RecordError> {
        let bytes = record.as_bytes();
        if bytes.len() < 2 {
            return Err(RecordError::TooShort(record.to_string()));
        }
        if !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
            return Err(RecordError::BadTag(record.to_string()));
        }
        Ok(Self {
            category: bytes[0] - b'0',
            kind: bytes[1] - b'0',
        })
    }

    /// True when the record starts with the given two character tag.
    pub fn is(&self, tag: &str) -> bool {
        let b = tag.as_bytes();
        b.len() == 2 && b[0] == self.category + b'0' && b[1] == self.kind + b'0'
    }
}

/// Forward-only cursor over the fields of one record.
#[derive(Debug, Clone)]
pub struct RecordCursor<'a> {
    record: &'a str,
    pos: usize,
    delim: char,
}

impl<'a> RecordCursor<'a> {
    pub fn new(record: &'a str) -> Result<Self, RecordError> {
        RecordTag::parse(record)?;
        if !record.is_char_boundary(BODY_START.min(record.len())) {
            return Err(RecordError::BadTag(record.to_string()));
        }
        let delim = match record.as_bytes().get(2) {
            Some(b',') => ',',
            _ => ';',
        };
        Ok(Self {
            record,
            pos: BODY_START.min(record.len()),
            delim,
        })
    }

    pub fn tag(&self) -> RecordTag {
        // Checked in `new`.
        RecordTag {
            category: self.record.as_bytes()[0] - b'0',
            kind: self.record.as_bytes()[1] - b'0',
        }
    }

    pub fn record(&self) -> &'a str {
        self.record
    }

    pub fn delimiter(&self) -> char {
        self.delim
    }

    /// Whether anything is left after the cursor.
    pub fn has_more(&self) -> bool {
        self.pos < self.record.len()
    }

    /// Whether another delimiter follows the cursor.
    pub fn has_delimiter(&self) -> bool {
        self.record[self.pos..].contains(self.delim)
    }

    /// Number of delimiters in the whole record, the one after the tag included.
    pub fn delimiter_count(&self) -> usize {
        self.record.matches(self.delim).count()
    }

    /// Field up to the next delimiter. Fails when no delimiter follows.
    pub fn next_field(&mut self, field: &'static str) -> Result<&'a str, RecordError> {
        self.next_until(self.delim, field)
    }

    /// Field up to the next occurrence of `delim`, regardless of the record delimiter.
    pub fn next_until(&mut self, delim: char, field: &'static str) -> Result<&'a str, RecordError> {
        let rest = &self.record[self.pos..];
        match rest.find(delim) {
            Some(end) => {
                self.pos += end + delim.len_utf8();
                Ok(&rest[..end])
            }
            None => Err(self.missing(field)),
        }
    }

    /// Field up to the next delimiter, or the remainder when this is the last one.
    pub fn next_or_rest(&mut self, field: &'static str) -> Result<&'a str, RecordError> {
        if self.has_delimiter() {
            self.next_field(field)
        } else {
            self.rest(field)
        }
    }

    /// Everything after the cursor. Fails when the record ends at the cursor.
    pub fn rest(&mut self, field: &'static str) -> Result<&'a str, RecordError> {
        self.rest_opt().ok_or_else(|| self.missing(field))
    }

    /// Everything after the cursor, `None` when nothing is left.
    pub fn rest_opt(&mut self) -> Option<&'a str> {
        if !self.has_more() {
            return None;
        }
        let rest = &self.record[self.pos..];
        self.pos = self.record.len();
        Some(rest)
    }

    pub fn next_u32(&mut self, field: &'static str) -> Result<u32, RecordError> {
        let raw = self.next_field(field)?;
        self.number(raw, field)
    }

    pub fn rest_u32(&mut self, field: &'static str) -> Result<u32, RecordError> {
        let raw = self.rest(field)?;
        self.number(raw, field)
    }

    pub fn number(&self, raw: &str, field: &'static str) -> Result<u32, RecordError> {
        raw.trim().parse::<u32>().map_err(|_| RecordError::BadNumber {
            record: self.record.to_string(),
            field,
            value: raw.to_string(),
        })
    }

    /// Hex address with or without the `0x` prefix.
    pub fn hex(&self, raw: &str, field: &'static str) -> Result<u64, RecordError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        u64::from_str_radix(digits, 16).map_err(|_| RecordError::BadNumber {
            record: self.record.to_string(),
            field,
            value: raw.to_string(),
        })
    }

    pub fn shape_error(&self) -> RecordError {
        RecordError::FieldCount {
            record: self.record.to_string(),
            count: self.delimiter_count(),
        }
    }

    fn missing(&self, field: &'static str) -> RecordError {
        RecordError::MissingField {
            record: self.record.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_parses_leading_digits() {
        let tag = RecordTag::parse("27;1;a.c;3;1").unwrap();
        assert_eq!(tag.category, 2);
        assert_eq!(tag.kind, 7);
        assert!(tag.is("27"));
        assert!(!tag.is("72"));
        assert!(matches!(RecordTag::parse("x1"), Err(RecordError::BadTag(_))));
        assert!(matches!(RecordTag::parse("2"), Err(RecordError::TooShort(_))));
    }

    #[test]
    fn test_cursor_walks_semicolon_fields() {
        let mut cur = RecordCursor::new("26;4;100").unwrap();
        assert_eq!(cur.delimiter(), ';');
        assert_eq!(cur.next_u32("id").unwrap(), 4);
        assert!(!cur.has_delimiter());
        assert_eq!(cur.rest_u32("ignore").unwrap(), 100);
        assert!(!cur.has_more());
        assert!(cur.rest_opt().is_none());
    }

    #[test]
    fn test_cursor_accepts_comma_records() {
        let mut cur = RecordCursor::new("44,8048400,foo,3").unwrap();
        assert_eq!(cur.delimiter(), ',');
        assert_eq!(cur.delimiter_count(), 3);
        let addr = cur.next_field("address").unwrap();
        assert_eq!(cur.hex(addr, "address").unwrap(), 0x8048400);
        assert_eq!(cur.next_field("function").unwrap(), "foo");
        assert_eq!(cur.rest("thread").unwrap(), "3");
    }

    #[test]
    fn test_cursor_reports_missing_fields() {
        let mut cur = RecordCursor::new("26;4").unwrap();
        let err = cur.next_u32("id").unwrap_err();
        assert_eq!(
            err,
            RecordError::MissingField {
                record: "26;4".into(),
                field: "id"
            }
        );
        let mut cur = RecordCursor::new("43;x;").unwrap();
        assert!(matches!(
            cur.next_u32("exit code"),
            Err(RecordError::BadNumber { .. })
        ));
    }

    #[test]
    fn test_next_or_rest_takes_last_field() {
        let mut cur = RecordCursor::new("45;7").unwrap();
        assert_eq!(cur.next_or_rest("first").unwrap(), "7");
        assert!(!cur.has_more());
    }
}
