// SPDX-License-Identifier: MIT
//
// Error taxonomy for the terminal core.
//
// Every variant is fatal to the editor session. The transient "no data yet"
// read outcome is not an error at all — it lives in `reader::ReadByte` and
// never leaves the key decoder.

use std::io;

/// A failure of terminal control or terminal input.
///
/// The `Display` form names the failing system call followed by the
/// platform's description, e.g. `tcgetattr: Inappropriate ioctl for device`.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Reading the terminal attributes failed (stdin is not a terminal, or
    /// the process lacks permission).
    #[error("tcgetattr: {source}")]
    AttributeReadFailed {
        #[source]
        source: io::Error,
    },

    /// Applying raw attributes, or restoring the original ones, failed.
    #[error("tcsetattr: {source}")]
    AttributeWriteFailed {
        #[source]
        source: io::Error,
    },

    /// A genuine I/O error on the input stream.
    #[error("read: {source}")]
    ReadFailed {
        #[source]
        source: io::Error,
    },

    /// The input stream reached end-of-file.
    #[error("read: end of input stream")]
    StreamClosed,

    /// Another raw-mode session already owns the process's terminal.
    #[error("tcsetattr: raw mode is already active on this terminal")]
    SessionActive,
}

impl IoError {
    /// Process exit status for this error. All terminal-core errors are
    /// fatal and share status 1.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }

    /// The system call (or pseudo-operation) that failed.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::AttributeReadFailed { .. } => "tcgetattr",
            Self::AttributeWriteFailed { .. } | Self::SessionActive => "tcsetattr",
            Self::ReadFailed { .. } | Self::StreamClosed => "read",
        }
    }

    /// Wrap the calling thread's last OS error as an attribute read failure.
    pub(crate) fn attribute_read() -> Self {
        Self::AttributeReadFailed {
            source: io::Error::last_os_error(),
        }
    }

    /// Wrap the calling thread's last OS error as an attribute write failure.
    pub(crate) fn attribute_write() -> Self {
        Self::AttributeWriteFailed {
            source: io::Error::last_os_error(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
