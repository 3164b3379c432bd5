//! The `Pty` collaborator trait and a reference implementation over already-open file
//! descriptors.
//!
//! This crate never calls `openpty(2)` itself — acquiring and spawning a pty is a peer
//! concern. `Pty` is a narrow trait over the `tcgetattr`/`tcsetattr` raw-mode dance and the
//! `TIOCGWINSZ`/`TIOCSWINSZ` ioctls, so `SystemTerminal` can be driven by a fake in tests.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::pty::Winsize;
use nix::sys::termios::{SetArg, Termios, cfmakeraw, tcgetattr, tcsetattr};

/// A pseudo-terminal's slave side, as consumed by [`crate::terminal::SystemTerminal`].
///
/// Implementors own exactly two streams (input, output) plus the ability to query/set raw-mode
/// attributes and window size. `SystemTerminal` never reaches past this trait to the
/// operating system directly.
pub trait Pty: Send {
    type Input: Read + AsFd;
    type Output: Write + AsFd;

    fn input(&mut self) -> &mut Self::Input;
    fn output(&mut self) -> &mut Self::Output;

    /// Current terminal attributes, for callers that want to save/restore around a raw-mode
    /// transition themselves.
    fn attributes(&self) -> io::Result<Termios>;

    /// Install `termios` as the current attributes (`TCSANOW`).
    fn set_attributes(&mut self, termios: &Termios) -> io::Result<()>;

    /// Put the pty into raw mode, returning the previous attributes so the caller can restore
    /// them later.
    fn set_raw_mode(&mut self) -> io::Result<Termios> {
        let original = self.attributes()?;
        let mut raw = original.clone();
        cfmakeraw(&mut raw);
        self.set_attributes(&raw)?;
        Ok(original)
    }

    fn window_size(&self) -> io::Result<Winsize>;
    fn set_window_size(&mut self, size: Winsize) -> io::Result<()>;
}

/// Reference [`Pty`] implementation wrapping a pair of already-open slave file descriptors
/// (typically obtained from `nix::pty::openpty` or `portable-pty` by the caller).
pub struct UnixPty {
    input: PtyStream,
    output: PtyStream,
}

/// A single half (read or write side) of the pty slave, holding the owned fd.
pub struct PtyStream(OwnedFd);

impl PtyStream {
    fn raw(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        self.0.as_raw_fd()
    }
}

impl AsFd for PtyStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Read for PtyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `self.0` is a valid, open fd for the lifetime of this call; `buf` is a valid
        // writable slice supplied by the caller, matching `libc::read`'s contract.
        let n = unsafe {
            libc::read(self.raw(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

impl Write for PtyStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `self.0` is a valid, open fd; `buf` is a valid readable slice, matching
        // `libc::write`'s contract.
        let n = unsafe {
            libc::write(self.raw(), buf.as_ptr() as *const libc::c_void, buf.len())
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl UnixPty {
    /// Wrap the slave input/output file descriptors of an already-open pty. Takes ownership:
    /// both fds are closed when the returned `UnixPty` (and, transitively, the owning
    /// `SystemTerminal`) is dropped.
    pub fn new(input_fd: OwnedFd, output_fd: OwnedFd) -> Self {
        UnixPty {
            input: PtyStream(input_fd),
            output: PtyStream(output_fd),
        }
    }
}

impl Pty for UnixPty {
    type Input = PtyStream;
    type Output = PtyStream;

    fn input(&mut self) -> &mut PtyStream {
        &mut self.input
    }

    fn output(&mut self) -> &mut PtyStream {
        &mut self.output
    }

    fn attributes(&self) -> io::Result<Termios> {
        tcgetattr(&self.input).map_err(|e| io::Error::from_raw_os_error(e as i32))
    }

    fn set_attributes(&mut self, termios: &Termios) -> io::Result<()> {
        tcsetattr(&self.input, SetArg::TCSANOW, termios)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))
    }

    fn window_size(&self) -> io::Result<Winsize> {
        // SAFETY: `ws` is fully initialized by `mem::zeroed` before the ioctl writes into it;
        // the fd is valid for the lifetime of `self`; `TIOCGWINSZ` is the documented request
        // for reading window size.
        let mut ws: Winsize = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            libc::ioctl(self.input.raw(), libc::TIOCGWINSZ as libc::c_ulong, &mut ws)
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(ws)
    }

    fn set_window_size(&mut self, size: Winsize) -> io::Result<()> {
        // SAFETY: `size` is a fully-initialized `Winsize`; the fd is valid; `TIOCSWINSZ` is the
        // documented request for writing window size.
        let ret = unsafe {
            libc::ioctl(self.input.raw(), libc::TIOCSWINSZ as libc::c_ulong, &size)
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
