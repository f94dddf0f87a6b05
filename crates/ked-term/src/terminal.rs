// SPDX-License-Identifier: MIT
//
// Terminal mode guard — raw mode via termios, with restoration on every
// exit path.
//
// Safety: This module necessarily uses `unsafe` for termios (tcgetattr,
// tcsetattr), isatty, atexit and sigaction. These are the standard POSIX
// interfaces for terminal control — there is no safe alternative. Each
// unsafe block is minimal.
#![allow(unsafe_code)]
//
// `RawMode` is an owned value: whoever holds it holds the terminal. It
// captures the original attributes once, derives a raw attribute set from
// them, and puts the original back on `disable()` or on drop. Nothing else
// in the crate writes terminal attributes.
//
// Structured cleanup covers normal returns, `?` error paths and unwinding.
// Three exits bypass it: `std::process::exit` called from anywhere, a panic
// hook that prints before unwinding, and termination signals (SIGTERM,
// SIGHUP, SIGINT sent with kill, SIGQUIT). For those, the snapshot of the
// process's input terminal is also kept in a process-wide backup slot that
// an `atexit` hook, a panic hook and a signal handler restore from. The slot
// holds at most one snapshot, which is also what makes a second raw-mode
// session on the same terminal an error.

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::{Mutex, Once, PoisonError};

use crate::error::IoError;

// ─── TerminalState ──────────────────────────────────────────────────────────

/// Opaque snapshot of a terminal's attributes.
///
/// Wraps `libc::termios`: input, output, control and local mode flags, the
/// control-character table (including `VMIN`/`VTIME`) and line speeds.
/// Snapshots are plain values; deriving raw mode produces a new one.
#[derive(Clone, Copy)]
pub struct TerminalState(libc::termios);

impl TerminalState {
    /// Derive the raw-mode attribute set from this snapshot.
    ///
    /// Disables software flow control, CR→NL translation, break signals,
    /// parity checking and 8th-bit stripping on input; all output
    /// post-processing; echo, canonical (line-buffered) input, signal
    /// characters and literal-next on the local side. Forces 8-bit
    /// characters. `VMIN=1, VTIME=0`: a read blocks until one byte arrives.
    #[must_use]
    pub fn to_raw(&self) -> Self {
        let mut raw = self.0;
        raw.c_iflag &= !(libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON);
        raw.c_oflag &= !libc::OPOST;
        raw.c_cflag &= !libc::CSIZE;
        raw.c_cflag |= libc::CS8;
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        Self(raw)
    }

    /// Whether every flag [`to_raw`](Self::to_raw) touches is in its raw
    /// position.
    #[must_use]
    pub const fn is_raw(&self) -> bool {
        let t = &self.0;
        t.c_iflag & (libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON) == 0
            && t.c_oflag & libc::OPOST == 0
            && t.c_cflag & libc::CSIZE == libc::CS8
            && t.c_lflag & (libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG) == 0
    }

    /// The underlying `termios` structure.
    #[must_use]
    pub const fn as_termios(&self) -> &libc::termios {
        &self.0
    }

    fn input_speed(&self) -> libc::speed_t {
        unsafe { libc::cfgetispeed(&raw const self.0) }
    }

    fn output_speed(&self) -> libc::speed_t {
        unsafe { libc::cfgetospeed(&raw const self.0) }
    }
}

impl From<libc::termios> for TerminalState {
    fn from(termios: libc::termios) -> Self {
        Self(termios)
    }
}

impl PartialEq for TerminalState {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.0, &other.0);
        a.c_iflag == b.c_iflag
            && a.c_oflag == b.c_oflag
            && a.c_cflag == b.c_cflag
            && a.c_lflag == b.c_lflag
            && a.c_cc == b.c_cc
            && self.input_speed() == other.input_speed()
            && self.output_speed() == other.output_speed()
    }
}

impl Eq for TerminalState {}

impl fmt::Debug for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.0;
        f.debug_struct("TerminalState")
            .field("iflag", &format_args!("{:#x}", t.c_iflag))
            .field("oflag", &format_args!("{:#x}", t.c_oflag))
            .field("cflag", &format_args!("{:#x}", t.c_cflag))
            .field("lflag", &format_args!("{:#x}", t.c_lflag))
            .field("vmin", &t.c_cc[libc::VMIN])
            .field("vtime", &t.c_cc[libc::VTIME])
            .finish_non_exhaustive()
    }
}

// ─── Tty ────────────────────────────────────────────────────────────────────

/// A device whose terminal attributes can be read and written.
pub trait Tty {
    /// Read the current attributes.
    ///
    /// # Errors
    ///
    /// [`IoError::AttributeReadFailed`] if the device is not a terminal or
    /// cannot be queried.
    fn get_attributes(&self) -> Result<TerminalState, IoError>;

    /// Apply `state`, discarding input that has not been read yet.
    ///
    /// # Errors
    ///
    /// [`IoError::AttributeWriteFailed`] if the device rejects the write.
    fn set_attributes(&self, state: &TerminalState) -> Result<(), IoError>;

    /// File descriptor to protect with the process-wide safety net, if this
    /// device is the process's own input terminal.
    fn safety_net_fd(&self) -> Option<RawFd> {
        None
    }
}

/// A terminal addressed by file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtyFd {
    fd: RawFd,
    process_input: bool,
}

impl TtyFd {
    /// The process's standard input, protected by the safety net.
    #[must_use]
    pub const fn stdin() -> Self {
        Self {
            fd: libc::STDIN_FILENO,
            process_input: true,
        }
    }

    /// Any other terminal descriptor (e.g. a pseudo-terminal). The caller
    /// keeps ownership of `fd`; no exit-time restoration is registered.
    #[must_use]
    pub const fn from_raw_fd(fd: RawFd) -> Self {
        Self {
            fd,
            process_input: false,
        }
    }

    /// The wrapped descriptor.
    #[must_use]
    pub const fn fd(&self) -> RawFd {
        self.fd
    }

    /// Whether the descriptor refers to a terminal.
    #[must_use]
    pub fn is_tty(&self) -> bool {
        unsafe { libc::isatty(self.fd) != 0 }
    }
}

impl Tty for TtyFd {
    fn get_attributes(&self) -> Result<TerminalState, IoError> {
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(self.fd, &raw mut termios) } != 0 {
            return Err(IoError::attribute_read());
        }
        Ok(TerminalState(termios))
    }

    fn set_attributes(&self, state: &TerminalState) -> Result<(), IoError> {
        if unsafe { libc::tcsetattr(self.fd, libc::TCSAFLUSH, &raw const state.0) } != 0 {
            return Err(IoError::attribute_write());
        }
        Ok(())
    }

    fn safety_net_fd(&self) -> Option<RawFd> {
        self.process_input.then_some(self.fd)
    }
}

// ─── Safety Net ─────────────────────────────────────────────────────────────

/// Original attributes of the process's input terminal while raw mode is on.
struct Backup {
    fd: RawFd,
    state: libc::termios,
}

/// Process-wide backup for the exit, panic and signal hooks. Behind a
/// [`Mutex`], not `static mut`.
static BACKUP: Mutex<Option<Backup>> = Mutex::new(None);

/// Guard so the hooks are installed at most once per process.
static HOOKS_INSTALLED: Once = Once::new();

/// Signals whose default action terminates the process without unwinding.
const TERMINATION_SIGNALS: [libc::c_int; 4] =
    [libc::SIGTERM, libc::SIGHUP, libc::SIGINT, libc::SIGQUIT];

/// Store `state` as the snapshot to restore on abnormal exit.
///
/// Fails with [`IoError::SessionActive`] if a snapshot is already held.
fn arm_safety_net(fd: RawFd, state: &TerminalState) -> Result<(), IoError> {
    {
        let mut slot = BACKUP.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(IoError::SessionActive);
        }
        *slot = Some(Backup { fd, state: state.0 });
    }
    install_hooks();
    Ok(())
}

/// Drop the backup once the original attributes are back in place.
fn disarm_safety_net() {
    let mut slot = BACKUP.lock().unwrap_or_else(PoisonError::into_inner);
    *slot = None;
}

/// Write the backup snapshot to its terminal. Best-effort, ignores errors.
fn restore(backup: &Backup) {
    unsafe {
        let _ = libc::tcsetattr(backup.fd, libc::TCSAFLUSH, &raw const backup.state);
    }
}

fn restore_from_backup() {
    let slot = BACKUP.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(ref backup) = *slot {
        restore(backup);
    }
}

/// Registered with `atexit`: runs on `std::process::exit` from any path.
extern "C" fn restore_at_exit() {
    restore_from_backup();
}

/// Termination signal handler.
///
/// Installed with `SA_RESETHAND`, so the disposition is already back to
/// default when we re-raise; the re-raised signal is delivered as soon as
/// the handler returns. `try_lock` only: the interrupted thread may hold
/// the lock.
extern "C" fn on_termination_signal(sig: libc::c_int) {
    if let Ok(slot) = BACKUP.try_lock() {
        if let Some(ref backup) = *slot {
            restore(backup);
        }
    }
    unsafe {
        libc::raise(sig);
    }
}

/// Install the exit hook, the panic hook and the signal handlers.
fn install_hooks() {
    HOOKS_INSTALLED.call_once(|| {
        if unsafe { libc::atexit(restore_at_exit) } != 0 {
            log::warn!("atexit registration failed; relying on guard drop");
        }

        let original = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            restore_from_backup();
            original(info);
        }));

        for sig in TERMINATION_SIGNALS {
            unsafe {
                let mut sa: libc::sigaction = std::mem::zeroed();
                sa.sa_sigaction = on_termination_signal as *const () as usize;
                sa.sa_flags = libc::SA_RESETHAND;
                libc::sigemptyset(&raw mut sa.sa_mask);
                libc::sigaction(sig, &raw const sa, std::ptr::null_mut());
            }
        }

        log::debug!("terminal restore hooks installed");
    });
}

// ─── RawMode ────────────────────────────────────────────────────────────────

/// Raw-mode guard with RAII cleanup.
///
/// Call [`enable`](Self::enable) to switch the terminal to raw mode. The
/// original attributes come back on [`disable`](Self::disable) or when the
/// guard is dropped. If that restoration fails during drop, the process
/// reports the error and exits with status 1.
///
/// # Example
///
/// ```no_run
/// use ked_term::terminal::RawMode;
///
/// let mut raw = RawMode::stdin();
/// raw.enable()?;
/// // ... read keys ...
/// raw.disable()?;
/// # Ok::<(), ked_term::IoError>(())
/// ```
pub struct RawMode<D: Tty = TtyFd> {
    device: D,
    /// Attributes captured by `enable()`. `Some` exactly while raw mode is
    /// on (or a restore attempt has failed and must be retried).
    original: Option<TerminalState>,
}

impl RawMode<TtyFd> {
    /// Guard for the process's standard input.
    #[must_use]
    pub const fn stdin() -> Self {
        Self::new(TtyFd::stdin())
    }
}

impl<D: Tty> RawMode<D> {
    /// Wrap `device`. Does **not** touch the terminal.
    #[must_use]
    pub const fn new(device: D) -> Self {
        Self {
            device,
            original: None,
        }
    }

    /// Whether raw mode is currently on.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.original.is_some()
    }

    /// The snapshot captured by the last successful `enable()`.
    #[must_use]
    pub const fn original(&self) -> Option<&TerminalState> {
        self.original.as_ref()
    }

    /// The wrapped device.
    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Enter raw mode.
    ///
    /// Order: capture the original attributes, register exit-time
    /// restoration, derive the raw set, apply it. Idempotent: calling
    /// `enable()` while enabled is a no-op.
    ///
    /// # Errors
    ///
    /// - [`IoError::AttributeReadFailed`] if the attributes cannot be read
    ///   (e.g. the device is not a terminal).
    /// - [`IoError::SessionActive`] if another guard already holds the
    ///   process's input terminal.
    /// - [`IoError::AttributeWriteFailed`] if the raw set cannot be applied.
    ///   Nothing stays registered, so a later `enable()` may try again.
    pub fn enable(&mut self) -> Result<(), IoError> {
        if self.original.is_some() {
            return Ok(());
        }

        let original = self.device.get_attributes()?;

        if let Some(fd) = self.device.safety_net_fd() {
            arm_safety_net(fd, &original)?;
        }

        let raw = original.to_raw();
        if let Err(e) = self.device.set_attributes(&raw) {
            log::error!("could not apply raw mode: {e}");
            // Nothing changed on the device, so no session is live.
            if self.device.safety_net_fd().is_some() {
                disarm_safety_net();
            }
            return Err(e);
        }

        self.original = Some(original);
        log::debug!("raw mode enabled (original {original:?})");
        Ok(())
    }

    /// Restore the attributes captured by [`enable`](Self::enable).
    ///
    /// Idempotent: a no-op when raw mode is off, so restoration happens
    /// once per `enable()`.
    ///
    /// # Errors
    ///
    /// [`IoError::AttributeWriteFailed`] if the restore fails. The guard
    /// stays enabled so the next attempt (or drop) retries. Callers must
    /// treat this as fatal.
    pub fn disable(&mut self) -> Result<(), IoError> {
        let Some(original) = self.original else {
            return Ok(());
        };

        self.device.set_attributes(&original)?;

        if self.device.safety_net_fd().is_some() {
            disarm_safety_net();
        }
        self.original = None;
        log::debug!("raw mode disabled");
        Ok(())
    }
}

impl<D: Tty> Drop for RawMode<D> {
    fn drop(&mut self) {
        if let Err(e) = self.disable() {
            log::error!("terminal restore failed: {e}");
            eprintln!("ked: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

// ─── Test Support ────────────────────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────
