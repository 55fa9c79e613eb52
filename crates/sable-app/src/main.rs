//! sable: a terminal text editor with shell buffers.

mod keys;
mod ui;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use crossterm::terminal;
use sable_editor::{InputMultiplexer, PollOutcome, Workspace};
use sable_script::ScriptHost;

use crate::keys::{Control, KeyDispatcher};
use crate::ui::CHROME_ROWS;

#[derive(Parser)]
#[command(name = "sable", version, about = "A terminal text editor with shell buffers")]
struct Cli {
    /// Files to open at startup.
    files: Vec<PathBuf>,

    /// Shell to launch in shell buffers (default: $SHELL, then /bin/sh).
    #[arg(long)]
    shell: Option<String>,

    /// Append diagnostics to this file; RUST_LOG selects the filter.
    #[arg(long)]
    log: Option<PathBuf>,
}

fn init_logging(path: &PathBuf) -> io::Result<()> {
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn main() -> io::Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.log {
        init_logging(path)?;
    }

    let mut ws = Workspace::new();
    for file in &cli.files {
        ws.open_file(&file.display().to_string());
    }

    let host = ScriptHost::new();
    let mut dispatcher = KeyDispatcher::new(cli.shell);
    let mut mux = InputMultiplexer::new();

    ui::install_panic_hook();
    let guard = ui::TerminalGuard::enter()?;

    let mut stdin = io::stdin();
    let mut stdout = io::stdout();
    let (mut cols, mut rows) = terminal::size()?;
    log::info!("sable started ({cols}x{rows})");

    loop {
        // The resize signal is delivered by the frontend as a size change
        // observed between iterations.
        let size = terminal::size()?;
        if size != (cols, rows) {
            (cols, rows) = size;
            ws.resize_sessions(rows.saturating_sub(CHROME_ROWS).max(1), cols.max(1));
        }
        let edit_rows = rows.saturating_sub(CHROME_ROWS).max(1);

        ui::draw(&mut stdout, &mut ws, &dispatcher, cols, rows)?;

        match mux.poll_step(&mut ws, &mut stdin) {
            PollOutcome::Key(key) => {
                if dispatcher.dispatch(&mut ws, &host, key, edit_rows, cols) == Control::Quit {
                    break;
                }
            }
            PollOutcome::Quiet => {}
        }
    }

    ws.shutdown();
    drop(guard);
    log::info!("sable exited");
    Ok(())
}
