// SPDX-License-Identifier: MIT
//
// Raw byte source — one byte at a time from the terminal.
//
// Safety: This module uses `unsafe` for read and poll on a raw descriptor
// (and fcntl, pipe and close in its tests). Each unsafe block is a single
// libc call on a descriptor the caller owns.
#![allow(unsafe_code)]
//
// The editor core is single-threaded: the key decoder calls straight into
// `read(2)` and blocks until a byte arrives. With raw mode's VMIN=1/VTIME=0
// that read only returns 0 at end-of-file, so zero bytes always means the
// stream is closed.
//
// Escape-sequence follow-up bytes must not block forever (a lone ESC is a
// real keypress), so those go through `poll(2)` with a short timeout first.
// A timeout and EAGAIN come back as `ReadByte::NoData`: "nothing yet, not
// an error". A poll interrupted by a signal is restarted with what is left
// of the timeout.

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::error::IoError;

/// Outcome of a single-byte read that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadByte {
    /// One byte arrived.
    Byte(u8),
    /// No data yet: a timeout, or a transient "try again"/"interrupted"
    /// condition. Retry or give up, but never treat it as an error.
    NoData,
}

/// Source of raw input bytes for the key decoder.
pub trait ByteSource {
    /// Block until one byte is available.
    ///
    /// May return [`ReadByte::NoData`] on a transient condition; the caller
    /// retries.
    ///
    /// # Errors
    ///
    /// [`IoError::StreamClosed`] at end-of-file, [`IoError::ReadFailed`] on
    /// any other I/O error.
    fn read_byte(&mut self) -> Result<ReadByte, IoError>;

    /// Wait at most `timeout` for one byte.
    ///
    /// # Errors
    ///
    /// As for [`read_byte`](Self::read_byte).
    fn read_byte_timeout(&mut self, timeout: Duration) -> Result<ReadByte, IoError>;
}

/// Byte source over a file descriptor (normally stdin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdSource {
    fd: RawFd,
}

impl FdSource {
    /// Read from the process's standard input.
    #[must_use]
    pub const fn stdin() -> Self {
        Self {
            fd: libc::STDIN_FILENO,
        }
    }

    /// Read from `fd`. The caller keeps ownership of the descriptor.
    #[must_use]
    pub const fn from_raw_fd(fd: RawFd) -> Self {
        Self { fd }
    }

    fn read_one(self) -> Result<ReadByte, IoError> {
        let mut byte = 0u8;
        let n = unsafe { libc::read(self.fd, (&raw mut byte).cast(), 1) };
        match n {
            1 => Ok(ReadByte::Byte(byte)),
            0 => Err(IoError::StreamClosed),
            _ => transient_or_fatal(io::Error::last_os_error()),
        }
    }

    /// Wait up to `timeout` for the descriptor to have something to report.
    fn poll_readable(self, timeout: Duration) -> io::Result<bool> {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        match unsafe { libc::poll(&raw mut pfd, 1, ms) } {
            0 => Ok(false),
            r if r < 0 => Err(io::Error::last_os_error()),
            _ => Ok(true),
        }
    }
}

impl ByteSource for FdSource {
    fn read_byte(&mut self) -> Result<ReadByte, IoError> {
        self.read_one()
    }

    fn read_byte_timeout(&mut self, timeout: Duration) -> Result<ReadByte, IoError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let left = deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
            match self.poll_readable(left) {
                Ok(false) => return Ok(ReadByte::NoData),
                // Readable, hung up or errored: the read reports which.
                Ok(true) => return self.read_one(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return transient_or_fatal(e),
            }
        }
    }
}

/// "Would block" and "interrupted" are retry conditions, everything else is
/// a real failure.
fn transient_or_fatal(err: io::Error) -> Result<ReadByte, IoError> {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(ReadByte::NoData),
        _ => Err(IoError::ReadFailed { source: err }),
    }
}

// ─── Test Support ────────────────────────────────────────────────────────────

/// Scripted byte source for decoder and loop tests.
#[cfg(test)]
pub(crate) mod script {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::{ByteSource, ReadByte};
    use crate::error::IoError;

    /// Replays a fixed list of read outcomes.
    ///
    /// When the script runs out, blocking reads report end-of-file and
    /// timed reads report a timeout.
    #[derive(Default)]
    pub struct Script {
        steps: VecDeque<Result<ReadByte, IoError>>,
        pub timed_reads: usize,
    }

    impl Script {
        pub fn bytes(bytes: &[u8]) -> Self {
            let mut script = Self::default();
            script.push_bytes(bytes);
            script
        }

        pub fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
            self.steps
                .extend(bytes.iter().map(|&b| Ok(ReadByte::Byte(b))));
            self
        }

        pub fn push(&mut self, step: Result<ReadByte, IoError>) -> &mut Self {
            self.steps.push_back(step);
            self
        }

        pub fn remaining(&self) -> usize {
            self.steps.len()
        }
    }

    impl ByteSource for Script {
        fn read_byte(&mut self) -> Result<ReadByte, IoError> {
            self.steps.pop_front().unwrap_or(Err(IoError::StreamClosed))
        }

        fn read_byte_timeout(&mut self, _timeout: Duration) -> Result<ReadByte, IoError> {
            self.timed_reads += 1;
            self.steps.pop_front().unwrap_or(Ok(ReadByte::NoData))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// A pipe pair, closed on drop (the write end may be closed early).
    struct Pipe {
        read: RawFd,
        write: Option<RawFd>,
    }

    impl Pipe {
        fn new() -> Self {
            let mut fds = [0; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            Self {
                read: fds[0],
                write: Some(fds[1]),
            }
        }

        fn send(&self, bytes: &[u8]) {
            let fd = self.write.unwrap();
            let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
            assert_eq!(usize::try_from(n).unwrap(), bytes.len());
        }

        fn close_write(&mut self) {
            if let Some(fd) = self.write.take() {
                unsafe { libc::close(fd) };
            }
        }

        fn source(&self) -> FdSource {
            FdSource::from_raw_fd(self.read)
        }
    }

    impl Drop for Pipe {
        fn drop(&mut self) {
            self.close_write();
            unsafe { libc::close(self.read) };
        }
    }

    #[test]
    fn reads_bytes_in_order() {
        let pipe = Pipe::new();
        pipe.send(b"ab");
        let mut src = pipe.source();
        assert_eq!(src.read_byte().unwrap(), ReadByte::Byte(b'a'));
        assert_eq!(src.read_byte().unwrap(), ReadByte::Byte(b'b'));
    }

    #[test]
    fn eof_is_stream_closed() {
        let mut pipe = Pipe::new();
        pipe.close_write();
        let err = pipe.source().read_byte().unwrap_err();
        assert!(matches!(err, IoError::StreamClosed));
    }

    #[test]
    fn timed_read_times_out_on_empty_input() {
        let pipe = Pipe::new();
        let got = pipe
            .source()
            .read_byte_timeout(Duration::from_millis(10))
            .unwrap();
        assert_eq!(got, ReadByte::NoData);
    }

    #[test]
    fn timed_read_returns_pending_byte() {
        let pipe = Pipe::new();
        pipe.send(b"[");
        let got = pipe
            .source()
            .read_byte_timeout(Duration::from_millis(100))
            .unwrap();
        assert_eq!(got, ReadByte::Byte(b'['));
    }

    #[test]
    fn timed_read_reports_eof() {
        let mut pipe = Pipe::new();
        pipe.close_write();
        let err = pipe
            .source()
            .read_byte_timeout(Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, IoError::StreamClosed));
    }

    extern "C" fn ignore_signal(_sig: libc::c_int) {}

    #[test]
    fn interrupted_poll_keeps_waiting() {
        let pipe = Pipe::new();
        let write_fd = pipe.write.unwrap();
        unsafe {
            // No SA_RESTART: poll always fails with EINTR when interrupted.
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = ignore_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            libc::sigemptyset(&raw mut action.sa_mask);
            assert_eq!(libc::sigaction(libc::SIGUSR1, &raw const action, std::ptr::null_mut()), 0);
        }

        let reader = unsafe { libc::pthread_self() };
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            unsafe { libc::pthread_kill(reader, libc::SIGUSR1) };
            std::thread::sleep(Duration::from_millis(30));
            let byte = b'[';
            unsafe { libc::write(write_fd, (&raw const byte).cast(), 1) };
        });

        let got = pipe
            .source()
            .read_byte_timeout(Duration::from_millis(2000))
            .unwrap();
        sender.join().unwrap();
        assert_eq!(got, ReadByte::Byte(b'['));
    }

    #[test]
    fn would_block_is_no_data() {
        let pipe = Pipe::new();
        unsafe {
            let flags = libc::fcntl(pipe.read, libc::F_GETFL);
            libc::fcntl(pipe.read, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        assert_eq!(pipe.source().read_byte().unwrap(), ReadByte::NoData);
    }

    #[test]
    fn bad_descriptor_is_read_failed() {
        let err = FdSource::from_raw_fd(-1).read_byte().unwrap_err();
        assert!(matches!(err, IoError::ReadFailed { .. }));
        assert!(err.to_string().starts_with("read: "));
    }

    #[test]
    fn transient_kinds() {
        let eagain = io::Error::from_raw_os_error(libc::EAGAIN);
        let eintr = io::Error::from_raw_os_error(libc::EINTR);
        let eio = io::Error::from_raw_os_error(libc::EIO);
        assert_eq!(transient_or_fatal(eagain).unwrap(), ReadByte::NoData);
        assert_eq!(transient_or_fatal(eintr).unwrap(), ReadByte::NoData);
        assert!(transient_or_fatal(eio).is_err());
    }
}
