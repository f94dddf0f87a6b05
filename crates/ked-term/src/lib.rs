// SPDX-License-Identifier: MIT
//
// ked-term — Terminal core for the ked editor.
//
// Puts the controlling terminal into raw mode, reads keystrokes one byte at
// a time, decodes them into key events (plain bytes, control chords, escape
// sequences for navigation keys), and dispatches them to actions. The
// terminal is restored on every way out of the process: normal return,
// error, panic, `process::exit`, or a termination signal.
//
// Like the rest of ked, this crate talks to the terminal through termios
// directly rather than through a TUI framework.

#[cfg(not(unix))]
compile_error!("ked-term drives the terminal through termios and needs a unix target");

pub mod error;
pub mod event_loop;
pub mod input;
pub mod reader;
pub mod terminal;

pub use error::IoError;
