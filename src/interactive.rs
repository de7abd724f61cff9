mod commands;
mod console;
mod printers;

use std::io::{self, Write};

use anyhow::Result;
use gdb_mi_bridge::SessionCoordinator;

pub use console::ConsoleHost;

use commands::{execute_command, parse_command, CommandOutcome};

pub fn repl(session: &SessionCoordinator, host: &ConsoleHost) -> Result<()> {
    println!("Commands: break | delete | enable | disable | cond | when-changed | passcount | info | continue | next | step | finish | pause | print | help | quit");
    let stdin = io::stdin();
    let mut line = String::new();
    while session.is_alive() {
        print!("bridge> ");
        io::stdout().flush()?;
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            println!();
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match execute_command(command, session, host) {
            Ok(CommandOutcome::Continue) => {}
            Ok(CommandOutcome::Quit) => break,
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}
