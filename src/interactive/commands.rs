use anyhow::{bail, Context, Result};
use gdb_mi_bridge::{
    BreakCondition, BreakpointLocation, PassCount, PassCountStyle, SessionCoordinator, StepKind,
    VariableResolver,
};

use super::{
    console::ConsoleHost,
    printers::{print_breakpoints, print_variable},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Break(BreakpointLocation),
    Delete(u32),
    Enable(u32, bool),
    Condition(u32, BreakCondition),
    PassCount(u32, PassCount),
    Breakpoints,
    Continue,
    Step(StepKind),
    Pause,
    Print(String),
    Help,
    Quit,
}

pub enum CommandOutcome {
    Continue,
    Quit,
}

pub fn parse_command(input: &str) -> Result<Command> {
    let mut parts = input.trim().splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();
    let command = match cmd {
        "break" | "b" => Command::Break(parse_location(rest)?),
        "delete" | "d" => Command::Delete(parse_id(rest)?),
        "enable" => Command::Enable(parse_id(rest)?, true),
        "disable" => Command::Enable(parse_id(rest)?, false),
        "cond" => {
            let (id, expr) = split_id(rest)?;
            if expr.is_empty() {
                Command::Condition(id, BreakCondition::default())
            } else {
                Command::Condition(id, BreakCondition::when_true(expr))
            }
        }
        "when-changed" => {
            let (id, expr) = split_id(rest)?;
            if expr.is_empty() {
                bail!("usage: when-changed <id> <expr>");
            }
            Command::Condition(id, BreakCondition::when_changed(expr))
        }
        "passcount" => {
            let (id, policy) = split_id(rest)?;
            Command::PassCount(id, parse_pass_count(policy)?)
        }
        "info" | "breakpoints" => Command::Breakpoints,
        "continue" | "c" => Command::Continue,
        "next" | "n" => Command::Step(StepKind::Over),
        "step" | "s" => Command::Step(StepKind::Into),
        "finish" => Command::Step(StepKind::Out),
        "pause" => Command::Pause,
        "print" | "p" => {
            if rest.is_empty() {
                bail!("usage: print <expr>");
            }
            Command::Print(rest.to_string())
        }
        "help" => Command::Help,
        "quit" | "q" => Command::Quit,
        _ => bail!("unknown command: '{}'", input.trim()),
    };
    Ok(command)
}

/// `file:line` or a function name.
fn parse_location(rest: &str) -> Result<BreakpointLocation> {
    if rest.is_empty() {
        bail!("usage: break <file:line | function>");
    }
    if let Some((path, line)) = rest.rsplit_once(':') {
        if let Ok(line) = line.parse::<u32>() {
            let file = std::path::Path::new(path)
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or(path)
                .to_string();
            return Ok(BreakpointLocation::FileLine {
                file,
                full_path: path.to_string(),
                line,
            });
        }
    }
    Ok(BreakpointLocation::Function(rest.to_string()))
}

fn parse_id(rest: &str) -> Result<u32> {
    rest.parse()
        .with_context(|| format!("invalid breakpoint id: '{rest}'"))
}

fn split_id(rest: &str) -> Result<(u32, &str)> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let id = parse_id(parts.next().unwrap_or(""))?;
    Ok((id, parts.next().unwrap_or("").trim()))
}

/// `none`, `eq N`, `ge N` or `mod N`.
fn parse_pass_count(policy: &str) -> Result<PassCount> {
    let mut parts = policy.split_whitespace();
    let style = match parts.next() {
        Some("none") | None => return Ok(PassCount::default()),
        Some("eq") => PassCountStyle::Equal,
        Some("ge") => PassCountStyle::EqualOrGreater,
        Some("mod") => PassCountStyle::Mod,
        Some(other) => bail!("unknown pass count style '{other}' (none|eq|ge|mod)"),
    };
    let count = parts
        .next()
        .context("pass count needs a number")?
        .parse::<u32>()
        .context("invalid pass count")?;
    Ok(PassCount::new(style, count))
}

pub fn execute_command(
    command: Command,
    session: &SessionCoordinator,
    host: &ConsoleHost,
) -> Result<CommandOutcome> {
    match command {
        Command::Break(location) => {
            let inserted = match &location {
                BreakpointLocation::FileLine {
                    file,
                    full_path,
                    line,
                } => session.set_breakpoint_at_line(file, full_path, *line)?,
                BreakpointLocation::Function(function) => {
                    session.set_breakpoint_at_function(function)?
                }
            };
            match inserted {
                Some(snapshot) => {
                    println!("breakpoint {} at {}", snapshot.id, describe(&location));
                    host.bind(snapshot.id, location);
                }
                None => println!("no breakpoint set at {}", describe(&location)),
            }
        }
        Command::Delete(id) => {
            if session.delete_breakpoint(id)? {
                host.unbind(id);
            } else {
                println!("breakpoint {id} not deleted");
            }
        }
        Command::Enable(id, enable) => {
            if !session.enable_breakpoint(id, enable)? {
                println!("breakpoint {id} unchanged");
            }
        }
        Command::Condition(id, condition) => {
            let bound = host.bound(id)?;
            session.set_condition(&bound, condition)?;
        }
        Command::PassCount(id, pass_count) => {
            let bound = host.bound(id)?;
            session.set_pass_count(&bound, pass_count)?;
        }
        Command::Breakpoints => print_breakpoints(&session.breakpoints()),
        Command::Continue => session.continue_execution()?,
        Command::Step(kind) => session.step(kind)?,
        Command::Pause => session.cause_break()?,
        Command::Print(expr) => {
            let resolver = VariableResolver::for_session(session);
            let mut frame = resolver.frame_variables(session.current_thread(), 0)?;
            let node = resolver.get(&expr, &mut frame)?;
            print_variable(&node);
        }
        Command::Help => print_help(),
        Command::Quit => return Ok(CommandOutcome::Quit),
    }
    Ok(CommandOutcome::Continue)
}

fn describe(location: &BreakpointLocation) -> String {
    match location {
        BreakpointLocation::FileLine {
            full_path, line, ..
        } => format!("{full_path}:{line}"),
        BreakpointLocation::Function(function) => function.clone(),
    }
}

pub fn print_help() {
    println!("Commands:");
    println!("  break <loc> | b        - set breakpoint ('break main', 'b file.c:42')");
    println!("  delete <id> | d        - delete breakpoint");
    println!("  enable / disable <id>  - toggle breakpoint");
    println!("  cond <id> [expr]       - stop only when expr is true (no expr clears)");
    println!("  when-changed <id> <e>  - stop only when e changed since the last hit");
    println!("  passcount <id> <p>     - none | eq N | ge N | mod N");
    println!("  info                   - list breakpoints");
    println!("  continue | c           - resume all threads");
    println!("  next | n / step | s    - step over / into");
    println!("  finish                 - step out of the current function");
    println!("  pause                  - interrupt the running program");
    println!("  print <expr> | p       - evaluate and expand an expression");
    println!("  help                   - show this message");
    println!("  quit | q               - exit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("b main", Command::Break(BreakpointLocation::Function("main".into())))]
    #[case(
        "break src/list.c:42",
        Command::Break(BreakpointLocation::FileLine {
            file: "list.c".into(),
            full_path: "src/list.c".into(),
            line: 42,
        })
    )]
    #[case("disable 3", Command::Enable(3, false))]
    #[case("cond 2 n > 10", Command::Condition(2, BreakCondition::when_true("n > 10")))]
    #[case("cond 2", Command::Condition(2, BreakCondition::default()))]
    #[case("when-changed 1 head->len", Command::Condition(1, BreakCondition::when_changed("head->len")))]
    #[case("passcount 4 mod 3", Command::PassCount(4, PassCount::new(PassCountStyle::Mod, 3)))]
    #[case("passcount 4 none", Command::PassCount(4, PassCount::default()))]
    #[case("finish", Command::Step(StepKind::Out))]
    #[case("p list->head", Command::Print("list->head".into()))]
    fn test_parse_command(#[case] input: &str, #[case] expected: Command) {
        assert_eq!(parse_command(input).unwrap(), expected);
    }

    #[rstest]
    #[case("frobnicate")]
    #[case("delete x")]
    #[case("when-changed 1")]
    #[case("passcount 1 sometimes 2")]
    #[case("print")]
    fn test_rejects_bad_input(#[case] input: &str) {
        assert!(parse_command(input).is_err());
    }
}
