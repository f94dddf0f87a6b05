// SPDX-License-Identifier: MIT
//
// Key decoder.
//
// Turns raw terminal bytes into discrete key events, one event per call:
//
// - Plain bytes (printable ASCII, Tab, Enter, Backspace, bytes >= 0x80)
// - Control chords (Ctrl + letter, the letter with its upper 3 bits cleared)
// - Escape sequences for navigation keys, in CSI (`ESC [`) and SS3
//   (`ESC O`) form
//
// # Design
//
// The decoder pulls bytes from a `ByteSource` on demand instead of
// buffering them. The first byte of a key blocks; follow-up bytes of an
// escape sequence are each bounded by a short timeout so a lone ESC (the
// Escape key) never hangs. A sequence we don't know, or one cut short by
// the timeout, is dropped whole and reported as `Unrecognized`.

use std::fmt;
use std::time::Duration;

use crate::error::IoError;
use crate::reader::{ByteSource, ReadByte};

/// The escape byte that starts every multi-byte key sequence.
pub const ESC: u8 = 0x1B;

/// Default time to wait for each byte after an ESC.
pub const DEFAULT_ESCAPE_TIMEOUT: Duration = Duration::from_millis(100);

/// The control-chord byte for `key`: its upper 3 bits cleared.
///
/// `ctrl_key(b'q') == 17`.
#[inline]
#[must_use]
pub const fn ctrl_key(key: u8) -> u8 {
    key & 0x1F
}

// ─── Event Types ────────────────────────────────────────────────────────────

/// A navigation key reported through an escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavKey {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Home,
    End,
    PageUp,
    PageDown,
    Delete,
}

/// A decoded keypress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEvent {
    /// A byte that stands for itself: printable ASCII, Tab, Enter,
    /// Backspace, a bare Escape, or one byte of a UTF-8 sequence.
    PlainChar(u8),
    /// Ctrl + key, carried as the chord byte (`0x00..=0x1F`).
    CtrlChord(u8),
    /// A navigation key decoded from an escape sequence.
    Nav(NavKey),
    /// An escape sequence we don't map, or one that never completed.
    Unrecognized,
}

impl KeyEvent {
    /// Ctrl-Q, the quit chord.
    pub const QUIT: Self = Self::CtrlChord(ctrl_key(b'q'));

    /// Classify a single byte that is not the start of an escape sequence.
    ///
    /// Chord bytes that terminals also send for named keys stay plain:
    /// Backspace (`0x08`), Tab (`0x09`), Enter (`0x0A`, `0x0D`) and a bare
    /// ESC.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x08 | 0x09 | 0x0A | 0x0D | ESC => Self::PlainChar(byte),
            b if b == ctrl_key(b) => Self::CtrlChord(b),
            b => Self::PlainChar(b),
        }
    }

    /// Whether this is the chord for `key` (`KeyEvent::is_ctrl(ev, b'q')`).
    #[must_use]
    pub const fn is_ctrl(self, key: u8) -> bool {
        matches!(self, Self::CtrlChord(b) if b == ctrl_key(key))
    }
}

impl fmt::Display for KeyEvent {
    /// Inspector form: `PlainChar(97) 'a'`, `CtrlChord(17) ^Q`,
    /// `Nav(ArrowUp)`, `Unrecognized`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PlainChar(b) if b.is_ascii_graphic() || b == b' ' => {
                write!(f, "PlainChar({b}) '{}'", char::from(b))
            }
            Self::PlainChar(b) => write!(f, "PlainChar({b})"),
            Self::CtrlChord(b) => write!(f, "CtrlChord({b}) ^{}", char::from(b | 0x40)),
            Self::Nav(key) => write!(f, "Nav({key:?})"),
            Self::Unrecognized => f.write_str("Unrecognized"),
        }
    }
}

// ─── Decoder ────────────────────────────────────────────────────────────────

/// Pull-based key decoder.
///
/// Each [`read_key`](Self::read_key) call consumes the bytes of exactly one
/// key from the source.
///
/// # Example
///
/// ```no_run
/// use ked_term::input::{KeyDecoder, KeyEvent};
/// use ked_term::reader::FdSource;
///
/// let mut keys = KeyDecoder::new(FdSource::stdin());
/// while keys.read_key()? != KeyEvent::QUIT {}
/// # Ok::<(), ked_term::IoError>(())
/// ```
pub struct KeyDecoder<S> {
    source: S,
    escape_timeout: Duration,
}

impl<S: ByteSource> KeyDecoder<S> {
    /// Decoder with the default escape timeout.
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self::with_escape_timeout(source, DEFAULT_ESCAPE_TIMEOUT)
    }

    /// Decoder that waits `escape_timeout` for each byte after an ESC.
    #[must_use]
    pub const fn with_escape_timeout(source: S, escape_timeout: Duration) -> Self {
        Self {
            source,
            escape_timeout,
        }
    }

    /// The underlying byte source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Block until one key has been read and decode it.
    ///
    /// # Errors
    ///
    /// [`IoError::ReadFailed`] or [`IoError::StreamClosed`] from the byte
    /// source. Transient "no data" reads are retried here and never
    /// surface.
    pub fn read_key(&mut self) -> Result<KeyEvent, IoError> {
        let first = loop {
            if let ReadByte::Byte(b) = self.source.read_byte()? {
                break b;
            }
        };

        let key = if first == ESC {
            self.read_escape()?
        } else {
            KeyEvent::from_byte(first)
        };

        log::trace!("key {key}");
        Ok(key)
    }

    /// Next byte of an escape sequence, or `None` if it didn't arrive in
    /// time.
    fn next_in_sequence(&mut self) -> Result<Option<u8>, IoError> {
        match self.source.read_byte_timeout(self.escape_timeout)? {
            ReadByte::Byte(b) => Ok(Some(b)),
            ReadByte::NoData => Ok(None),
        }
    }

    /// Decode whatever follows an ESC.
    fn read_escape(&mut self) -> Result<KeyEvent, IoError> {
        let Some(intro) = self.next_in_sequence()? else {
            // Nothing followed: the Escape key itself.
            return Ok(KeyEvent::PlainChar(ESC));
        };
        let Some(code) = self.next_in_sequence()? else {
            log::warn!("escape sequence cut short after {intro:#04x}");
            return Ok(KeyEvent::Unrecognized);
        };

        let key = match intro {
            b'[' => self.read_csi(code)?,
            b'O' => final_letter(code),
            _ => None,
        };

        Ok(key.map_or_else(
            || {
                log::warn!("unrecognized escape sequence ESC {intro:#04x} {code:#04x}");
                KeyEvent::Unrecognized
            },
            KeyEvent::Nav,
        ))
    }

    /// Rest of a CSI sequence, `first` being the byte after `ESC [`.
    ///
    /// Parameter and intermediate bytes (`0x20..=0x3F`) are consumed up to
    /// the final byte (`0x40..=0x7E`), so a sequence we don't map leaves
    /// nothing behind in the stream. Only `<letter>` and `<digit> ~` map to
    /// a key.
    fn read_csi(&mut self, first: u8) -> Result<Option<NavKey>, IoError> {
        let mut params = Vec::new();
        let mut byte = first;
        while (0x20..=0x3F).contains(&byte) {
            params.push(byte);
            match self.next_in_sequence()? {
                Some(b) => byte = b,
                None => {
                    log::warn!("CSI sequence cut short after {params:?}");
                    return Ok(None);
                }
            }
        }

        if !(0x40..=0x7E).contains(&byte) {
            // Invalid byte inside a CSI sequence: drop what we have.
            return Ok(None);
        }

        Ok(match (params.as_slice(), byte) {
            ([], _) => final_letter(byte),
            (&[digit], b'~') => csi_tilde(digit),
            _ => None,
        })
    }
}

/// `ESC [ <digit> ~` sequences.
const fn csi_tilde(digit: u8) -> Option<NavKey> {
    match digit {
        b'1' | b'7' => Some(NavKey::Home),
        b'3' => Some(NavKey::Delete),
        b'4' | b'8' => Some(NavKey::End),
        b'5' => Some(NavKey::PageUp),
        b'6' => Some(NavKey::PageDown),
        _ => None,
    }
}

/// `ESC [ <letter>` and `ESC O <letter>` sequences.
const fn final_letter(letter: u8) -> Option<NavKey> {
    match letter {
        b'A' => Some(NavKey::ArrowUp),
        b'B' => Some(NavKey::ArrowDown),
        b'C' => Some(NavKey::ArrowRight),
        b'D' => Some(NavKey::ArrowLeft),
        b'H' => Some(NavKey::Home),
        b'F' => Some(NavKey::End),
        _ => None,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
