// SPDX-License-Identifier: MIT
//
// Input dispatch loop — one key in, one action out.
//
// The loop owns everything the editor core needs: the raw-mode guard, the
// key decoder over its byte source, the action table and the run state. It
// is built once at startup and handed its guard explicitly; there is no
// process-wide editor state.
//
// Each iteration blocks in `read_key()`, looks the event up in the keymap
// (a hash map, so dispatch is constant time), and either runs the bound
// command or forwards the key to the `KeyHandler` — the seam where the
// renderer, buffer and file I/O plug in. Keys are handled strictly in
// arrival order.
//
// Raw mode is switched off whenever the loop ends, on success or on error,
// before the result reaches the caller.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::IoError;
use crate::input::{DEFAULT_ESCAPE_TIMEOUT, KeyDecoder, KeyEvent};
use crate::reader::{ByteSource, FdSource};
use crate::terminal::{RawMode, Tty, TtyFd};

// ─── RunState ────────────────────────────────────────────────────────────────

/// Whether the dispatch loop keeps going.
///
/// Starts [`Running`](RunState::Running); [`request_stop`](RunState::request_stop)
/// moves it to [`Stopping`](RunState::Stopping) once and for all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Running,
    Stopping,
}

impl RunState {
    /// Whether the loop should read another key.
    #[inline]
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Ask the loop to stop after the current key. Idempotent.
    pub fn request_stop(&mut self) {
        if self.is_running() {
            log::debug!("stop requested");
            *self = Self::Stopping;
        }
    }
}

// ─── Keymap ──────────────────────────────────────────────────────────────────

/// A command the core itself knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Stop the loop and restore the terminal.
    Quit,
}

/// Action table from key events to commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keymap {
    bindings: HashMap<KeyEvent, Command>,
}

impl Keymap {
    /// A keymap with no bindings.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Bind `key` to `command`, returning the previous binding.
    pub fn bind(&mut self, key: KeyEvent, command: Command) -> Option<Command> {
        self.bindings.insert(key, command)
    }

    /// Remove the binding for `key`.
    pub fn unbind(&mut self, key: KeyEvent) -> Option<Command> {
        self.bindings.remove(&key)
    }

    /// The command bound to `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: KeyEvent) -> Option<Command> {
        self.bindings.get(&key).copied()
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the keymap has no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for Keymap {
    /// The built-in bindings: Ctrl-Q quits.
    fn default() -> Self {
        let mut keymap = Self::empty();
        keymap.bind(KeyEvent::QUIT, Command::Quit);
        keymap
    }
}

// ─── KeyHandler ──────────────────────────────────────────────────────────────

/// Receiver for every key the keymap does not bind.
///
/// Implement this to connect editing, rendering or file I/O. The run state
/// is passed in so a handler can end the session.
pub trait KeyHandler {
    /// Handle one unbound key. The default ignores it.
    fn on_key(&mut self, _key: KeyEvent, _run: &mut RunState) {}
}

/// Ignores every key.
impl KeyHandler for () {}

// ─── Loop Config ─────────────────────────────────────────────────────────────

/// Runtime settings for the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// How long to wait for each byte after an ESC before deciding the
    /// user pressed Escape on its own.
    pub escape_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            escape_timeout: DEFAULT_ESCAPE_TIMEOUT,
        }
    }
}

// ─── EventLoop ───────────────────────────────────────────────────────────────

/// The input dispatch loop.
///
/// # Example
///
/// ```no_run
/// use ked_term::event_loop::{EventLoop, LoopConfig};
///
/// let mut event_loop = EventLoop::stdin(LoopConfig::default());
/// // Runs until Ctrl-Q; the terminal is restored before `run` returns.
/// event_loop.run(&mut ())?;
/// # Ok::<(), ked_term::IoError>(())
/// ```
pub struct EventLoop<D: Tty = TtyFd, S: ByteSource = FdSource> {
    raw_mode: RawMode<D>,
    keys: KeyDecoder<S>,
    keymap: Keymap,
    run_state: RunState,
}

impl EventLoop {
    /// Loop over the process's standard input terminal.
    #[must_use]
    pub fn stdin(config: LoopConfig) -> Self {
        Self::new(RawMode::stdin(), FdSource::stdin(), config)
    }
}

impl<D: Tty, S: ByteSource> EventLoop<D, S> {
    /// Assemble a loop from its guard and byte source, with the default
    /// keymap.
    #[must_use]
    pub fn new(raw_mode: RawMode<D>, source: S, config: LoopConfig) -> Self {
        Self {
            raw_mode,
            keys: KeyDecoder::with_escape_timeout(source, config.escape_timeout),
            keymap: Keymap::default(),
            run_state: RunState::Running,
        }
    }

    /// The action table, for adding or removing bindings.
    pub const fn keymap_mut(&mut self) -> &mut Keymap {
        &mut self.keymap
    }

    /// Current run state.
    #[must_use]
    pub const fn run_state(&self) -> RunState {
        self.run_state
    }

    /// The raw-mode guard.
    #[must_use]
    pub const fn raw_mode(&self) -> &RawMode<D> {
        &self.raw_mode
    }

    /// The key decoder.
    #[must_use]
    pub const fn decoder(&self) -> &KeyDecoder<S> {
        &self.keys
    }

    /// Enter raw mode and dispatch keys until the run state says stop.
    ///
    /// Raw mode is disabled before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Any [`IoError`] from entering raw mode, reading keys, or restoring
    /// the terminal. A loop error wins over a restore error; all of them
    /// are fatal to the session.
    pub fn run(&mut self, handler: &mut impl KeyHandler) -> Result<(), IoError> {
        self.raw_mode.enable()?;
        log::debug!("input loop started");

        let result = self.run_inner(handler);
        let restored = self.raw_mode.disable();

        match (result, restored) {
            (Err(e), Err(restore)) => {
                log::error!("terminal restore failed after loop error: {restore}");
                Err(e)
            }
            (Err(e), Ok(())) => {
                log::error!("input loop failed: {e}");
                Err(e)
            }
            (Ok(()), restored) => {
                log::debug!("input loop stopped");
                restored
            }
        }
    }

    /// The loop proper, separated so `run` can restore on every outcome.
    fn run_inner(&mut self, handler: &mut impl KeyHandler) -> Result<(), IoError> {
        while self.run_state.is_running() {
            let key = self.keys.read_key()?;
            self.dispatch(key, handler);
        }
        Ok(())
    }

    /// Route one key: run its bound command, or hand it to `handler`.
    pub fn dispatch(&mut self, key: KeyEvent, handler: &mut impl KeyHandler) {
        match self.keymap.lookup(key) {
            Some(Command::Quit) => {
                log::info!("quit chord received");
                self.run_state.request_stop();
            }
            None => handler.on_key(key, &mut self.run_state),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
