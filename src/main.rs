mod interactive;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use gdb_mi_bridge::{
    logger, BreakpointLocation, EventDispatcher, GdbTransport, SessionConfig, SessionCoordinator,
};
use interactive::ConsoleHost;

/// Drive a program under gdb through the event bridge.
#[derive(Parser, Debug)]
#[command(name = "gdb-bridge", version)]
struct Cli {
    /// gdb binary to launch.
    #[arg(long, env = "GDB", default_value = "gdb")]
    gdb: String,

    /// Log MI traffic.
    #[arg(short, long)]
    verbose: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Thread group used for breakpoints and resumes.
    #[arg(long, default_value = "i1")]
    thread_group: String,

    /// Program to debug.
    target: PathBuf,

    /// Arguments for the program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.log_file.as_deref(), cli.verbose).context("failed to open log file")?;

    if !cli.target.exists() {
        bail!("target not found: {}", cli.target.display());
    }
    let target = cli.target.to_string_lossy();
    println!(
        "[gdb-bridge] gdb: {} | target: {} {:?}",
        cli.gdb, target, cli.args
    );

    let transport = Arc::new(
        GdbTransport::start(&cli.gdb, &target, &cli.args)
            .with_context(|| format!("failed to start {}", cli.gdb))?,
    );
    let host = Arc::new(ConsoleHost::default());
    let config = SessionConfig {
        thread_group: cli.thread_group,
        ..SessionConfig::default()
    };
    let session = Arc::new(SessionCoordinator::new(transport, host.clone(), config));
    let dispatcher =
        EventDispatcher::start(session.clone()).context("failed to start event dispatcher")?;

    match session.set_breakpoint_at_function("main")? {
        Some(bp) => host.bind(bp.id, BreakpointLocation::Function("main".into())),
        None => println!("could not break at main, running anyway"),
    }
    session.launch()?;
    println!("Running. Type 'help' for commands.");

    interactive::repl(&session, &host)?;

    if session.is_alive() {
        let _ = session.kill_process();
        session.end_debug_session(host.exit_code().unwrap_or(0));
    }
    dispatcher.stop();
    Ok(())
}
