//! Non-blocking character source.
//!
//! Wraps a blocking byte stream (`Read + AsFd`) and an [`Encoding`] into a character stream
//! with `read(timeout)` / `peek(timeout)` semantics. A single deadline spans decoding a whole
//! code point, even when that takes several polled reads (multi-byte UTF-8, UTF-16 surrogate
//! pairs), rather than resetting the budget per byte.

use std::io::{ErrorKind, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::encoding::{Decoder, Encoding, Step};
use crate::error::TermError;

/// How long [`CharReader::read`] / [`CharReader::peek`] should wait for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeout {
    /// Wait indefinitely.
    Block,
    /// Return immediately if nothing is available.
    Poll,
    /// Wait up to the given duration.
    After(Duration),
}

/// Result of one `read`/`peek` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    CodePoint(u32),
    /// No complete code point arrived within the timeout.
    Expired,
    /// The stream ended.
    Eof,
}

/// Non-blocking character source over a byte stream.
pub struct CharReader<S: Read + AsFd> {
    stream: S,
    decoder: Decoder,
    closed: bool,
    /// A code point already decoded by a `peek` call, not yet consumed by `read`.
    peeked: Option<u32>,
}

impl<S: Read + AsFd> CharReader<S> {
    pub fn new(stream: S, encoding: Encoding) -> Self {
        CharReader {
            stream,
            decoder: Decoder::new(encoding),
            closed: false,
            peeked: None,
        }
    }

    /// Read and consume the next code point.
    pub fn read(&mut self, timeout: ReadTimeout) -> Result<ReadOutcome, TermError> {
        if let Some(cp) = self.peeked.take() {
            return Ok(ReadOutcome::CodePoint(cp));
        }
        self.next_code_point(timeout)
    }

    /// Look at the next code point without consuming it.
    pub fn peek(&mut self, timeout: ReadTimeout) -> Result<ReadOutcome, TermError> {
        if let Some(cp) = self.peeked {
            return Ok(ReadOutcome::CodePoint(cp));
        }
        match self.next_code_point(timeout)? {
            ReadOutcome::CodePoint(cp) => {
                self.peeked = Some(cp);
                Ok(ReadOutcome::CodePoint(cp))
            }
            other => Ok(other),
        }
    }

    /// Mark this source closed. Subsequent reads fail with [`TermError::Closed`].
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn next_code_point(&mut self, timeout: ReadTimeout) -> Result<ReadOutcome, TermError> {
        if self.closed {
            return Err(TermError::Closed);
        }

        let deadline = match timeout {
            ReadTimeout::Block => None,
            ReadTimeout::Poll => Some(Instant::now()),
            ReadTimeout::After(d) => Some(Instant::now() + d),
        };

        let raw_fd = {
            use std::os::fd::AsRawFd;
            self.stream.as_fd().as_raw_fd()
        };

        loop {
            let remaining = match deadline {
                None => PollTimeout::NONE,
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        let ms = 0u16;
                        PollTimeout::from(ms)
                    } else {
                        let ms = (dl - now).as_millis().min(u16::MAX as u128) as u16;
                        PollTimeout::from(ms)
                    }
                }
            };

            // SAFETY: `raw_fd` was obtained from `self.stream.as_fd()` above and `self.stream`
            // is not dropped or closed anywhere in this loop, so the fd stays valid for the
            // duration of this borrow.
            let borrowed: BorrowedFd<'_> = unsafe { BorrowedFd::borrow_raw(raw_fd) };
            let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];

            let ready = poll(&mut fds, remaining)
                .map_err(|e| TermError::Io(std::io::Error::from_raw_os_error(e as i32)))?;

            if ready == 0 {
                if deadline.is_some() && Instant::now() >= deadline.unwrap() {
                    return Ok(ReadOutcome::Expired);
                }
                if matches!(timeout, ReadTimeout::Poll) {
                    return Ok(ReadOutcome::Expired);
                }
                continue;
            }

            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(_) => match self.decoder.feed_byte(byte[0]) {
                    Step::CodePoint(cp) => return Ok(ReadOutcome::CodePoint(cp)),
                    Step::NeedMore => continue,
                    Step::Invalid => {
                        return Err(TermError::Io(std::io::Error::new(
                            ErrorKind::InvalidData,
                            "invalid encoded byte sequence",
                        )));
                    }
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TermError::Io(e)),
            }
        }
    }
}
