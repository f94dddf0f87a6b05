// SPDX-License-Identifier: MIT
//
// ked — the raw-mode core of a terminal text editor.
//
// This binary wires ked-term together:
//
//   stdin → KeyDecoder → EventLoop → keymap (Ctrl-Q quits) → KeyEcho
//
// Until a renderer and a text buffer plug into the `KeyHandler` seam, the
// only thing to do with a key is show it: `--show-keys` prints each decoded
// event on its own line.
//
// Exit status: 0 after Ctrl-Q, 1 on any terminal or input error. The
// diagnostic goes to stderr once the terminal is back in cooked mode.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

use ked_term::IoError;
use ked_term::event_loop::{EventLoop, KeyHandler, LoopConfig, RunState};
use ked_term::input::KeyEvent;

// ─── Command line ───────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "ked", version, about = "Raw-mode terminal editor core (Ctrl-Q quits)")]
struct Args {
    /// Append a debug log to this file (the terminal itself is in raw mode).
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log level for --log-file.
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: LevelFilter,

    /// Milliseconds to wait for the rest of an escape sequence before
    /// treating ESC as the Escape key.
    #[arg(long, default_value_t = 100, value_name = "MS")]
    escape_timeout_ms: u64,

    /// Print every decoded key.
    #[arg(long)]
    show_keys: bool,
}

impl Args {
    fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            escape_timeout: Duration::from_millis(self.escape_timeout_ms),
        }
    }
}

// ─── Logging ────────────────────────────────────────────────────────────────

/// Install the file logger, if one was asked for.
///
/// A logger that can't be set up is not fatal; the message says why.
fn init_logging(args: &Args) -> Result<(), String> {
    let Some(path) = &args.log_file else {
        return Ok(());
    };

    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open log file {}: {e}", path.display()))?;

    WriteLogger::init(args.log_level, config, file)
        .map_err(|e| format!("cannot install logger for {}: {e}", path.display()))
}

// ─── Key inspector ──────────────────────────────────────────────────────────

/// Handler for keys the keymap doesn't bind: prints them when enabled.
struct KeyEcho<W: Write> {
    out: W,
    enabled: bool,
}

impl<W: Write> KeyEcho<W> {
    const fn new(out: W, enabled: bool) -> Self {
        Self { out, enabled }
    }

    /// Output post-processing is off in raw mode, so lines end in `\r\n`.
    fn echo(&mut self, key: KeyEvent) -> io::Result<()> {
        write!(self.out, "{key}\r\n")?;
        self.out.flush()
    }
}

impl<W: Write> KeyHandler for KeyEcho<W> {
    fn on_key(&mut self, key: KeyEvent, _run: &mut RunState) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.echo(key) {
            log::warn!("could not print key {key}: {e}");
        }
    }
}

// ─── Entry point ────────────────────────────────────────────────────────────

fn run(args: &Args) -> Result<(), IoError> {
    let mut event_loop = EventLoop::stdin(args.loop_config());
    let mut echo = KeyEcho::new(io::stdout(), args.show_keys);
    event_loop.run(&mut echo)
}

fn main() {
    let args = Args::parse();
    if let Err(msg) = init_logging(&args) {
        eprintln!("ked: {msg}");
    }
    log::info!("ked starting ({args:?})");

    if let Err(e) = run(&args) {
        log::error!("fatal: {e}");
        eprintln!("ked: {e}");
        process::exit(e.exit_code());
    }

    log::info!("ked exiting cleanly");
}

// ─── Tests ──────────────────────────────────────────────────────────────────
