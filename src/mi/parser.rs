use std::sync::OnceLock;

use crate::mi::models::{MiLine, MiStatus};
use regex::Regex;

pub(crate) fn classify_line(line: &str) -> MiLine {
    if line == "(gdb)" {
        return MiLine::Prompt;
    }
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    let (token, body) = line.split_at(digits);
    match body.as_bytes().first() {
        Some(b'^') => MiLine::Result {
            token: token.parse().ok(),
            record: body.to_string(),
        },
        Some(b'*') | Some(b'=') => MiLine::Async(body.to_string()),
        Some(b'~') => MiLine::Console(stream_text(body)),
        Some(b'@') => MiLine::Target(stream_text(body)),
        Some(b'&') => MiLine::Log(stream_text(body)),
        _ => MiLine::Target(line.to_string()),
    }
}

/// Decoded text of a `~"..."` style stream record.
fn stream_text(record: &str) -> String {
    let quoted = &record[1..];
    let inner = quoted
        .strip_prefix('"')
        .and_then(|q| q.strip_suffix('"'))
        .unwrap_or(quoted);
    unescape_value(inner)
}

pub(crate) fn parse_status(line: &str) -> MiStatus {
    if line.starts_with("^done") {
        MiStatus::Done
    } else if line.starts_with("^running") {
        MiStatus::Running
    } else if line.starts_with("^error") {
        let msg = parse_msg_field(line).unwrap_or_else(|| line.to_string());
        MiStatus::Error(msg)
    } else {
        MiStatus::Other(line.to_string())
    }
}

pub(crate) fn parse_msg_field(s: &str) -> Option<String> {
    field(s, "msg")
}

/// Position right after `key=` when `key` starts a field.
fn key_position(s: &str, key: &str) -> Option<usize> {
    let pattern = format!("{key}=");
    s.match_indices(&pattern).find_map(|(at, _)| {
        let starts_field = at == 0 || matches!(s.as_bytes()[at - 1], b',' | b'{' | b'[');
        starts_field.then_some(at + pattern.len())
    })
}

/// A quoted MI string at the start of the input.
fn quoted_value() -> &'static Regex {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    QUOTED.get_or_init(|| Regex::new(r#"^"((?:\\.|[^"\\])*)""#).expect("must compile"))
}

/// Raw (still escaped) content of `key="..."`.
pub(crate) fn raw_field<'a>(s: &'a str, key: &str) -> Option<&'a str> {
    let start = key_position(s, key)?;
    quoted_value()
        .captures(&s[start..])
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub(crate) fn field(s: &str, key: &str) -> Option<String> {
    raw_field(s, key).map(unescape_value)
}

pub(crate) fn number_field(s: &str, key: &str) -> Option<u32> {
    raw_field(s, key).and_then(|v| v.trim().parse().ok())
}

/// The `{...}` tuples of `key={...}` or `key=[{...},...]` /
/// `key=[child={...},...]`. Quoted strings may hold braces.
pub(crate) fn tuples<'a>(s: &'a str, key: &str) -> Vec<&'a str> {
    let Some(start) = key_position(s, key) else {
        return Vec::new();
    };
    let bytes = s.as_bytes();
    let tuple_depth = match bytes.get(start) {
        Some(b'[') => 2,
        Some(b'{') => 1,
        _ => return Vec::new(),
    };
    let mut out = Vec::new();
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut open = start;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if b == b'{' && depth == tuple_depth {
                    open = i;
                }
            }
            b'}' | b']' => {
                if b == b'}' && depth == tuple_depth {
                    out.push(&s[open..=i]);
                }
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    out
}

pub(crate) fn tuple<'a>(s: &'a str, key: &str) -> Option<&'a str> {
    tuples(s, key).into_iter().next()
}

pub(crate) fn unescape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek().copied() {
                Some('\\') => {
                    out.push('\\');
                    chars.next();
                    continue;
                }
                Some('"') => {
                    out.push('"');
                    chars.next();
                    continue;
                }
                Some('n') => {
                    out.push('\n');
                    chars.next();
                    continue;
                }
                Some('r') => {
                    out.push('\r');
                    chars.next();
                    continue;
                }
                Some('t') => {
                    out.push('\t');
                    chars.next();
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

/// Wraps an expression in MI quotes.
pub(crate) fn mi_escape(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len() + 2);
    out.push('"');
    for ch in expr.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_line_splits_token() {
        assert_eq!(
            classify_line("12^done,value=\"3\""),
            MiLine::Result {
                token: Some(12),
                record: "^done,value=\"3\"".into()
            }
        );
        assert_eq!(
            classify_line("^running"),
            MiLine::Result {
                token: None,
                record: "^running".into()
            }
        );
        assert_eq!(classify_line("~\"hi\\n\""), MiLine::Console("hi\n".into()));
        assert_eq!(classify_line("(gdb)"), MiLine::Prompt);
        assert!(matches!(classify_line("*stopped,reason=\"x\""), MiLine::Async(_)));
    }

    #[test]
    fn test_unescape_value_handles_common_sequences() {
        assert_eq!(unescape_value("foo\\nbar"), "foo\nbar");
        assert_eq!(unescape_value("foo\\\"bar"), "foo\"bar");
        assert_eq!(unescape_value("foo\\\\bar"), "foo\\bar");
    }

    #[test]
    fn test_field_matches_whole_keys() {
        let line = r#"*stopped,thread-id="2",frame={addr="0x1",func="main",line="7"},id="9""#;
        assert_eq!(field(line, "id").as_deref(), Some("9"));
        assert_eq!(number_field(line, "thread-id"), Some(2));
        assert_eq!(raw_field(r#"^done,value="\"a\\000\"""#, "value"), Some(r#"\"a\\000\""#));
        assert_eq!(field(line, "missing"), None);
    }

    #[test]
    fn test_tuples_skip_braces_in_strings() {
        let line = r#"^done,numchild="2",children=[child={name="s.a",value="{...}"},child={name="s.b",value="}"}]"#;
        let children = tuples(line, "children");
        assert_eq!(children.len(), 2);
        assert_eq!(field(children[1], "name").as_deref(), Some("s.b"));
        assert_eq!(field(children[1], "value").as_deref(), Some("}"));

        let bkpt = tuple(r#"=breakpoint-created,bkpt={number="1",addr="0x4"}"#, "bkpt").unwrap();
        assert_eq!(field(bkpt, "number").as_deref(), Some("1"));
    }

    #[test]
    fn test_quoted_value_pattern_is_built_once() {
        assert!(std::ptr::eq(quoted_value(), quoted_value()));
        let line = r#"*stopped,reason="end-stepping-range",thread-id="3""#;
        for _ in 0..3 {
            assert_eq!(raw_field(line, "reason"), Some("end-stepping-range"));
            assert_eq!(number_field(line, "thread-id"), Some(3));
        }
    }

    #[test]
    fn test_mi_escape_quotes() {
        assert_eq!(mi_escape("a \"b\""), r#""a \"b\"""#);
    }
}
