//! Breakpoint lifecycle records (`2x`).

use log::debug;

use crate::{
    breakpoint::{BreakpointAddress, BreakpointSnapshot, GdbId, ALL_BREAKPOINTS},
    error::Result,
    host::ThreadId,
    record::{RecordCursor, RecordError, PENDING_ADDRESS, UNKNOWN_FUNCTION},
    session::{DebugState, SessionCoordinator},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointEvent {
    /// `20;id;y;addr;func;file;line;hits` or `20;id;y;<PENDING>`.
    Inserted(BreakpointSnapshot),
    /// `21;id;y;addr;func;file;line;hits`.
    Modified(BreakpointSnapshot),
    /// `22[;id]` (gdb removed a temporary breakpoint) and `25[;id]`.
    Deleted(GdbId),
    Enabled(GdbId),
    Disabled(GdbId),
    /// `26;id;count`
    IgnoreCount { id: GdbId, count: u32 },
    /// `27;id;file;line;thread`
    Hit {
        id: GdbId,
        file: String,
        line: u32,
        thread: ThreadId,
    },
    /// `28;id[;expr]`. An empty condition clears it.
    Condition { id: GdbId, condition: String },
    /// `29`. gdb failed to evaluate a condition; it reports that on the console.
    ConditionError,
    Unused,
}

pub fn parse(record: &str) -> std::result::Result<BreakpointEvent, RecordError> {
    let mut cur = RecordCursor::new(record)?;
    let event = match cur.tag().kind {
        0 => BreakpointEvent::Inserted(parse_snapshot(&mut cur, true)?),
        1 => BreakpointEvent::Modified(parse_snapshot(&mut cur, false)?),
        2 | 5 => BreakpointEvent::Deleted(optional_id(&mut cur)?),
        3 => BreakpointEvent::Enabled(optional_id(&mut cur)?),
        4 => BreakpointEvent::Disabled(optional_id(&mut cur)?),
        6 => BreakpointEvent::IgnoreCount {
            id: cur.next_u32("id")?,
            count: cur.rest_u32("ignore count")?,
        },
        7 => BreakpointEvent::Hit {
            id: cur.next_u32("id")?,
            file: cur.next_field("file")?.to_string(),
            line: cur.next_u32("line")?,
            thread: cur.rest_u32("thread")?,
        },
        8 if cur.has_delimiter() => BreakpointEvent::Condition {
            id: cur.next_u32("id")?,
            condition: cur.rest_opt().unwrap_or_default().to_string(),
        },
        8 => BreakpointEvent::Condition {
            id: cur.rest_u32("id")?,
            condition: String::new(),
        },
        9 => BreakpointEvent::ConditionError,
        _ => BreakpointEvent::Unused,
    };
    Ok(event)
}

fn parse_snapshot(
    cur: &mut RecordCursor<'_>,
    allow_pending: bool,
) -> std::result::Result<BreakpointSnapshot, RecordError> {
    let id = cur.next_u32("id")?;
    let enabled = cur.next_field("enabled")? == "y";
    let address = cur.next_or_rest("address")?;
    if allow_pending && address == PENDING_ADDRESS {
        // Nothing follows the address of a pending breakpoint.
        return Ok(BreakpointSnapshot {
            id,
            enabled,
            address: BreakpointAddress::Pending,
            function: UNKNOWN_FUNCTION.to_string(),
            ..Default::default()
        });
    }
    let address = BreakpointAddress::Resolved(cur.hex(address, "address")?);
    let function = cur.next_field("function")?.to_string();
    let file = cur.next_field("file")?.to_string();
    let line = cur.next_u32("line")?;
    let hits = cur.rest_u32("hits")?;
    Ok(BreakpointSnapshot {
        id,
        enabled,
        address,
        function,
        file,
        line,
        hits,
        ..Default::default()
    })
}

/// A bare tag addresses every breakpoint.
fn optional_id(cur: &mut RecordCursor<'_>) -> std::result::Result<GdbId, RecordError> {
    match cur.rest_opt() {
        Some(raw) => cur.number(raw, "id"),
        None => Ok(ALL_BREAKPOINTS),
    }
}

/// Parses `record` and applies it to the session.
pub fn handle(session: &SessionCoordinator, record: &str) -> Result<BreakpointEvent> {
    let event = parse(record)?;
    match &event {
        BreakpointEvent::Inserted(snapshot) => {
            // Only a pending insert says anything about the current frame.
            if snapshot.is_pending() {
                session.set_unknown_code(true);
            }
            session.record_breakpoint(snapshot.clone());
        }
        BreakpointEvent::Modified(snapshot) => {
            session.set_unknown_code(snapshot.function == UNKNOWN_FUNCTION);
            session.record_breakpoint(snapshot.clone());
            session.update_hit_count(snapshot.id, snapshot.hits)?;
        }
        BreakpointEvent::Deleted(id) => session.forget_breakpoint(*id),
        BreakpointEvent::Enabled(id) => session.mark_breakpoint_enabled(*id, true),
        BreakpointEvent::Disabled(id) => session.mark_breakpoint_enabled(*id, false),
        BreakpointEvent::IgnoreCount { id, count } => session.record_ignore_count(*id, *count),
        BreakpointEvent::Condition { id, condition } => session.record_condition(*id, condition),
        BreakpointEvent::Hit {
            id,
            file,
            line,
            thread,
        } => {
            if session.conditional_update().try_acquire() {
                let outcome = on_hit(session, *id, file, *line, *thread);
                session.conditional_update().release();
                outcome?;
            } else {
                debug!(target: "events", "condition update in flight, hit on {id} dropped");
            }
        }
        BreakpointEvent::ConditionError | BreakpointEvent::Unused => {}
    }
    Ok(event)
}

fn on_hit(
    session: &SessionCoordinator,
    id: GdbId,
    file: &str,
    line: u32,
    thread: ThreadId,
) -> Result<()> {
    let host = session.host();
    host.reset_cached_stack_frames();
    host.clean_evaluated_thread_caches();
    session.refresh_threads();
    session.set_thread_location(thread, file, line);
    session.set_current_thread(thread);

    if session.state() == DebugState::Step {
        // Stepping onto a breakpoint ends the step.
        session.on_step_completed(file, line);
        return Ok(());
    }
    session.publish_location(file, line);
    session.breakpoint_hit(id, thread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        breakpoint::{BreakCondition, BreakpointLocation, Gates, PassCount, PassCountStyle},
        events::dispatch_response,
        session::StepKind,
        testing::{session_with, HostCall},
    };
    use proptest::prelude::*;

    fn function_bp() -> BreakpointLocation {
        BreakpointLocation::Function("foo".into())
    }

    #[test]
    fn test_inserted_record_with_commas() {
        let event = parse("20,7,y,0x08048400,foo,/tmp/a.c,42,0").unwrap();
        let BreakpointEvent::Inserted(bp) = event else {
            panic!("expected an inserted breakpoint");
        };
        assert_eq!(bp.id, 7);
        assert!(bp.enabled);
        assert_eq!(bp.address, BreakpointAddress::Resolved(0x08048400));
        assert_eq!(bp.function, "foo");
        assert_eq!(bp.file, "/tmp/a.c");
        assert_eq!(bp.line, 42);
        assert_eq!(bp.hits, 0);
    }

    #[test]
    fn test_pending_insert_reads_nothing_past_address() {
        let (session, _transport, _host) = session_with(&[]);
        let event = handle(&session, "20;3;n;<PENDING>").unwrap();
        let BreakpointEvent::Inserted(bp) = event else {
            panic!("expected an inserted breakpoint");
        };
        assert!(bp.is_pending());
        assert!(!bp.enabled);
        assert_eq!(bp.function, "??");
        assert_eq!(bp.file, "");
        assert_eq!(bp.line, 0);
        assert_eq!(bp.hits, 0);
        assert!(session.unknown_code());
        // Whatever trails the sentinel is never looked at.
        assert!(matches!(
            parse("20;3;y;<PENDING>;x;y"),
            Ok(BreakpointEvent::Inserted(bp)) if bp.is_pending() && bp.file.is_empty()
        ));
    }

    #[test]
    fn test_bulk_records_default_to_all_breakpoints() {
        assert_eq!(parse("23").unwrap(), BreakpointEvent::Enabled(0));
        assert_eq!(parse("24;2").unwrap(), BreakpointEvent::Disabled(2));
        assert_eq!(parse("25").unwrap(), BreakpointEvent::Deleted(0));
        assert_eq!(parse("22;9").unwrap(), BreakpointEvent::Deleted(9));
        assert_eq!(
            parse("26;1;100").unwrap(),
            BreakpointEvent::IgnoreCount { id: 1, count: 100 }
        );
        assert_eq!(
            parse("28;1;i > 2").unwrap(),
            BreakpointEvent::Condition {
                id: 1,
                condition: "i > 2".into()
            }
        );
        assert_eq!(
            parse("28;1").unwrap(),
            BreakpointEvent::Condition {
                id: 1,
                condition: String::new()
            }
        );
        assert_eq!(parse("29").unwrap(), BreakpointEvent::ConditionError);
    }

    #[test]
    fn test_table_follows_lifecycle_records() {
        let (session, _transport, _host) = session_with(&[]);
        dispatch_response(
            &session,
            "20;1;y;0x1000;main;/src/m.c;3;0\r\n20;2;y;0x1010;f;/src/m.c;9;0\r\n24\r\n26;2;4\r\n28;2;x==1",
        );
        let bps = session.breakpoints();
        assert_eq!(bps.len(), 2);
        assert!(bps.iter().all(|bp| !bp.enabled));
        let second = session.breakpoint(2).unwrap();
        assert_eq!(second.ignore_count, 4);
        assert_eq!(second.condition, "x==1");
        dispatch_response(&session, "25;1");
        assert_eq!(session.breakpoints().len(), 1);
        dispatch_response(&session, "25");
        assert!(session.breakpoints().is_empty());
    }

    #[test]
    fn test_resolved_insert_keeps_unknown_code() {
        let (session, transport, _host) = session_with(&[]);
        handle(&session, "20;3;n;<PENDING>").unwrap();
        handle(&session, "20;4;y;0x1000;main;/src/m.c;3;0").unwrap();
        assert!(session.unknown_code());

        session.step(StepKind::Over).unwrap();
        assert_eq!(
            transport.take_sent(),
            vec!["-exec-continue --thread-group i1".to_string()]
        );
    }

    #[test]
    fn test_modified_record_sets_unknown_code() {
        let (session, _transport, _host) = session_with(&[]);
        handle(&session, "21;1;y;0x1000;??;;0;2").unwrap();
        assert!(session.unknown_code());
        handle(&session, "21;1;y;0x1000;main;/src/m.c;3;3").unwrap();
        assert!(!session.unknown_code());
    }

    #[test]
    fn test_plain_breakpoint_hit_notifies_once() {
        let (session, transport, host) = session_with(&[]);
        let bound = host.bind(1, function_bp());
        bound.state().is_hit_count_equal = true;
        session.set_state(DebugState::Run);

        handle(&session, "27;1;/tmp/a.c;10;2").unwrap();

        let hits: Vec<_> = host
            .calls()
            .into_iter()
            .filter(|c| matches!(c, HostCall::BreakpointHit { .. }))
            .collect();
        assert_eq!(
            hits,
            vec![HostCall::BreakpointHit {
                thread: 2,
                ids: vec![1]
            }]
        );
        let calls = host.calls();
        assert!(calls.contains(&HostCall::Location(2, "/tmp/a.c".into(), 10)));
        assert!(calls.contains(&HostCall::Document("/tmp/a.c".into(), 9)));
        assert_eq!(session.state(), DebugState::Break);
        assert!(!session.run_mode());
        assert_eq!(session.current_thread(), 2);
        // Plain breakpoints take their hit count from "modified" records.
        assert_eq!(bound.hits(), 0);
        assert_eq!(transport.sent(), vec!["-break-after 1 2147483646"]);
        assert!(!bound.is_locked(Gates::BOTH));
        assert!(!session.critical_region().is_held());
        assert!(session.conditional_update().is_available());
    }

    #[test]
    fn test_hit_rearms_modulo_breakpoints() {
        let (session, transport, host) = session_with(&[]);
        let bound = host.bind(4, function_bp());
        {
            let mut st = bound.state();
            st.hit_count_multiple = 3;
            st.hits = 4;
        }
        handle(&session, "27;4;/tmp/a.c;10;1").unwrap();
        // 3 - 4 % 3 = 2 hits to the next multiple, gdb ignores one.
        assert_eq!(transport.sent(), vec!["-break-after 4 1"]);
    }

    #[test]
    fn test_hit_without_bound_breakpoint_is_left_alone() {
        let (session, transport, host) = session_with(&[]);
        handle(&session, "27;5;/tmp/a.c;10;1").unwrap();
        assert!(transport.sent().is_empty());
        assert!(!host
            .calls()
            .iter()
            .any(|c| matches!(c, HostCall::BreakpointHit { .. })));
    }

    #[test]
    fn test_hit_on_locked_breakpoint_resumes() {
        let (session, transport, host) = session_with(&[]);
        let bound = host.bind(1, function_bp());
        let _edit = bound.try_lock(Gates::HIT_COUNT).unwrap();
        session.set_run_mode(false);

        handle(&session, "27;1;/tmp/a.c;10;1").unwrap();

        assert_eq!(transport.sent(), vec!["-exec-continue --thread-group i1"]);
        assert!(session.run_mode());
        assert_eq!(session.state(), DebugState::Run);
        assert!(!host
            .calls()
            .iter()
            .any(|c| matches!(c, HostCall::BreakpointHit { .. })));
    }

    #[test]
    fn test_hit_during_condition_update_is_dropped() {
        let (session, transport, host) = session_with(&[]);
        host.bind(1, function_bp());
        assert!(session.conditional_update().try_acquire());
        handle(&session, "27;1;/tmp/a.c;10;1").unwrap();
        assert!(host.calls().is_empty());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_hit_while_stepping_completes_the_step() {
        let (session, _transport, host) = session_with(&[]);
        host.bind(1, function_bp());
        session.set_state(DebugState::Step);
        handle(&session, "27;1;/tmp/a.c;10;1").unwrap();
        let calls = host.calls();
        assert!(calls.contains(&HostCall::StepCompleted));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, HostCall::BreakpointHit { .. })));
        assert_eq!(session.state(), DebugState::Break);
    }

    #[test]
    fn test_when_changed_breakpoint_honours_equal_pass_count() {
        let values: Vec<(&str, String)> = (1..=5)
            .map(|v| ("-data-evaluate-expression \"counter\"", format!("60;\"{v}\"")))
            .collect();
        let script: Vec<(&str, &str)> = values.iter().map(|(c, r)| (*c, r.as_str())).collect();
        let (session, _transport, host) = session_with(&script);
        let bound = host.bind(1, function_bp());
        {
            let mut st = bound.state();
            st.break_when_changed = true;
            st.condition = BreakCondition::when_changed("counter");
            st.pass_count = PassCount::new(PassCountStyle::Equal, 3);
        }

        let mut stops = Vec::new();
        for hits in 1..=5 {
            bound.state().hits = hits;
            let before = host.calls().len();
            handle(&session, "27;1;/tmp/a.c;10;1").unwrap();
            stops.push(
                host.calls()[before..]
                    .iter()
                    .any(|c| matches!(c, HostCall::BreakpointHit { .. })),
            );
        }
        assert_eq!(stops, vec![false, false, true, false, false]);
        assert_eq!(bound.state().previous_value, "5");
    }

    #[test]
    fn test_when_changed_breakpoint_skips_unchanged_value() {
        let (session, transport, host) =
            session_with(&[("-data-evaluate-expression \"flag\"", "60;\"0\"")]);
        let bound = host.bind(1, function_bp());
        {
            let mut st = bound.state();
            st.break_when_changed = true;
            st.condition = BreakCondition::when_changed("flag");
        }
        handle(&session, "27;1;/tmp/a.c;10;1").unwrap();
        handle(&session, "27;1;/tmp/a.c;10;1").unwrap();
        let hits = host
            .calls()
            .iter()
            .filter(|c| matches!(c, HostCall::BreakpointHit { .. }))
            .count();
        assert_eq!(hits, 1);
        assert_eq!(bound.hits(), 1);
        assert!(transport
            .sent()
            .contains(&"-exec-continue --thread-group i1".to_string()));
    }

    proptest! {
        #[test]
        fn test_modified_hit_count_is_last_value(hits in prop::collection::vec(1u32..10_000, 1..20)) {
            let (session, _transport, host) = session_with(&[]);
            let bound = host.bind(5, function_bp());
            for h in &hits {
                handle(&session, &format!("21;5;y;0x00401000;main;/src/m.c;3;{h}")).unwrap();
            }
            let last = *hits.last().unwrap();
            prop_assert_eq!(bound.hits(), last);
            prop_assert_eq!(session.breakpoint(5).unwrap().hits, last);
        }
    }
}
