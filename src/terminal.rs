//! POSIX system terminal: composes the character source, the signal bridge and the shutdown
//! registry with a [`Pty`], exposing reader/writer/input/output, routing signals, parsing
//! terminfo capabilities, and closing deterministically.

use std::collections::HashMap;
use std::io::{self, BufWriter, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::char_reader::CharReader;
use crate::encoding::Encoding;
use crate::error::{CloseResult, TermError};
use crate::pty::Pty;
use crate::shutdown::{self, ShutdownHandle};
use crate::signal::{Signal, SignalBridge, SignalHandler, Token};

/// One half of a duplicated pty slave fd: owns it, reads or writes through raw `libc` calls.
///
/// `SystemTerminal` dup's the pty's input/output fds on construction so the `CharReader` and
/// `Writer` can each own a stream independent of the `Pty` trait object's `&mut self` borrows,
/// the way `UnixPty` (`pty.rs`) itself wraps already-open fds.
pub struct Half(OwnedFd);

impl AsFd for Half {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Read for Half {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `self.0` is a valid, open fd for the lifetime of this call.
        let n = unsafe { libc::read(self.0.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 { Err(io::Error::last_os_error()) } else { Ok(n as usize) }
    }
}

impl Write for Half {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `self.0` is a valid, open fd for the lifetime of this call.
        let n = unsafe { libc::write(self.0.as_raw_fd(), buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 { Err(io::Error::last_os_error()) } else { Ok(n as usize) }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn dup_fd(fd: BorrowedFd<'_>) -> Result<OwnedFd, TermError> {
    // SAFETY: `libc::dup` either returns a fresh valid fd or -1; on success the returned fd is
    // wrapped immediately, giving it a single owner.
    let raw = unsafe { libc::dup(fd.as_raw_fd()) };
    if raw < 0 {
        return Err(TermError::Io(io::Error::last_os_error()));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Buffered text writer over a byte stream, encoding `str`s as the chosen [`Encoding`].
pub struct Writer<W: Write> {
    inner: BufWriter<W>,
    encoding: Encoding,
}

impl<W: Write> Writer<W> {
    fn new(inner: W, encoding: Encoding) -> Self {
        Writer { inner: BufWriter::new(inner), encoding }
    }

    /// Encode and write `s` under this writer's encoding.
    pub fn write_str(&mut self, s: &str) -> io::Result<()> {
        match self.encoding {
            Encoding::Utf8 => self.inner.write_all(s.as_bytes()),
            Encoding::Utf16 => {
                let mut buf = Vec::with_capacity(s.len() * 2);
                for unit in s.encode_utf16() {
                    buf.extend_from_slice(&unit.to_le_bytes());
                }
                self.inner.write_all(&buf)
            }
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Parsed terminfo capability table for a declared terminal type.
///
/// Wraps the `terminfo` crate's `Database`, looked up once at construction by
/// `SystemTerminal::open` and held for the terminal's lifetime.
pub struct CapabilityTable {
    db: terminfo::Database,
}

impl CapabilityTable {
    fn load(term_type: &str) -> Result<Self, TermError> {
        terminfo::Database::from_name(term_type)
            .map(|db| CapabilityTable { db })
            .map_err(|e| TermError::Config(format!("unknown terminal type {term_type:?}: {e}")))
    }

    /// The string capability named `name` (terminfo short name, e.g. `"cup"`), if present and
    /// string-valued.
    pub fn string(&self, name: &str) -> Option<String> {
        match self.db.raw(name)? {
            terminfo::Value::String(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    /// The numeric capability named `name` (e.g. `"cols"`, `"colors"`), if present and
    /// number-valued.
    pub fn number(&self, name: &str) -> Option<i32> {
        match self.db.raw(name)? {
            terminfo::Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// A POSIX system terminal: a pty plus the character source, signal routing, and terminfo
/// capability lookup built over it.
///
/// Returned wrapped in `Arc` because native `Custom` signal handlers need a stable, 'static
/// handle to call back into `raise` from the signal dispatcher thread (see
/// `crate::signal::SignalBridge`) — the same reason the shutdown hook needs one to call `close`
/// if the process exits without it being called explicitly. Every owned, mutable resource sits
/// behind a `Mutex` so `&Arc<Self>` is sufficient for every operation; see `DESIGN.md`.
pub struct SystemTerminal<P: Pty> {
    name: String,
    term_type: String,
    encoding: Encoding,
    capabilities: CapabilityTable,
    pty: Mutex<Option<P>>,
    reader: Mutex<CharReader<Half>>,
    writer: Mutex<Writer<Half>>,
    handlers: Mutex<HashMap<Signal, SignalHandler>>,
    tokens: Mutex<HashMap<Signal, Token>>,
    shutdown_handle: Mutex<Option<ShutdownHandle>>,
    closed: AtomicBool,
    self_weak: OnceLock<Weak<SystemTerminal<P>>>,
}

impl<P: Pty> SystemTerminal<P> {
    /// Build a terminal over `pty`, installing signal dispositions per `initial_handler` if
    /// `native_signals` is true, and registering `close` with the process-wide shutdown
    /// registry.
    pub fn open(
        name: impl Into<String>,
        term_type: impl Into<String>,
        mut pty: P,
        encoding: Encoding,
        native_signals: bool,
        initial_handler: SignalHandler,
    ) -> Result<Arc<Self>, TermError> {
        let term_type = term_type.into();
        let capabilities = CapabilityTable::load(&term_type)?;

        let in_fd = dup_fd(pty.input().as_fd())?;
        let out_fd = dup_fd(pty.output().as_fd())?;
        let reader = CharReader::new(Half(in_fd), encoding);
        let writer = Writer::new(Half(out_fd), encoding);

        let terminal = Arc::new(SystemTerminal {
            name: name.into(),
            term_type,
            encoding,
            capabilities,
            pty: Mutex::new(Some(pty)),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            handlers: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            shutdown_handle: Mutex::new(None),
            closed: AtomicBool::new(false),
            self_weak: OnceLock::new(),
        });
        let _ = terminal.self_weak.set(Arc::downgrade(&terminal));

        if native_signals {
            terminal.install_native_signals(&initial_handler)?;
        }

        let weak = terminal.self_weak.get().unwrap().clone();
        let handle = shutdown::register(move || {
            if let Some(t) = weak.upgrade() {
                let _ = t.close();
            }
        });
        *terminal.shutdown_handle.lock().unwrap() = Some(handle);

        tracing::info!(
            name = %terminal.name,
            term_type = %terminal.term_type,
            native_signals,
            "terminal opened"
        );
        Ok(terminal)
    }

    fn install_native_signals(&self, initial_handler: &SignalHandler) -> Result<(), TermError> {
        let bridge = SignalBridge::global();
        let mut handlers = self.handlers.lock().unwrap();
        let mut tokens = self.tokens.lock().unwrap();
        for signal in Signal::all() {
            match initial_handler {
                SignalHandler::Default => {
                    bridge.register_default(signal)?;
                    handlers.insert(signal, SignalHandler::Default);
                }
                SignalHandler::Ignore => {
                    bridge.register_ignore(signal)?;
                    handlers.insert(signal, SignalHandler::Ignore);
                }
                SignalHandler::Custom(_) => {
                    let weak = self.self_weak.get().unwrap().clone();
                    let token = bridge.register(signal, move |s| {
                        if let Some(t) = weak.upgrade() {
                            t.raise(s);
                        }
                    })?;
                    tokens.insert(signal, token);
                    handlers.insert(signal, initial_handler.clone());
                }
            }
        }
        Ok(())
    }

    /// Update the in-memory handler for `signal`, returning whatever was previously installed,
    /// and synchronize the native disposition to match.
    pub fn handle(&self, signal: Signal, handler: SignalHandler) -> SignalHandler {
        let bridge = SignalBridge::global();

        let previous = {
            let mut handlers = self.handlers.lock().unwrap();
            handlers.insert(signal, handler.clone()).unwrap_or(SignalHandler::Default)
        };

        if let Some(old_token) = self.tokens.lock().unwrap().remove(&signal) {
            let _ = bridge.unregister(old_token);
        }

        match &handler {
            SignalHandler::Default => {
                let _ = bridge.register_default(signal);
            }
            SignalHandler::Ignore => {
                let _ = bridge.register_ignore(signal);
            }
            SignalHandler::Custom(_) => {
                let weak = self.self_weak.get().unwrap().clone();
                if let Ok(token) = bridge.register(signal, move |s| {
                    if let Some(t) = weak.upgrade() {
                        t.raise(s);
                    }
                }) {
                    self.tokens.lock().unwrap().insert(signal, token);
                }
            }
        }

        previous
    }

    /// Invoke the currently-installed handler for `signal`. Called from the signal bridge's
    /// dispatcher thread for natively-routed signals, or directly by an embedding application
    /// simulating a signal for tests.
    pub fn raise(&self, signal: Signal) {
        let handler = self.handlers.lock().unwrap().get(&signal).cloned();
        if let Some(SignalHandler::Custom(cb)) = handler {
            cb(signal);
        }
    }

    /// Let the native disposition that was active before this terminal's own registration run
    /// now. A `Custom` handler calls this explicitly when it chooses to defer to the OS's prior
    /// action after observing the signal, preserving chainability.
    pub fn chain_to_native(&self, signal: Signal) {
        if let Some(token) = self.tokens.lock().unwrap().get(&signal) {
            SignalBridge::global().invoke_previous(token);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn term_type(&self) -> &str {
        &self.term_type
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The string capability named `name`, e.g. `self.capability("cup")` for cursor addressing.
    pub fn capability(&self, name: &str) -> Option<String> {
        self.capabilities.string(name)
    }

    /// The numeric capability named `name`, e.g. `self.numeric_capability("colors")`.
    pub fn numeric_capability(&self, name: &str) -> Option<i32> {
        self.capabilities.number(name)
    }

    /// Exclusive access to the non-blocking character source driving this terminal's input.
    pub fn reader(&self) -> std::sync::MutexGuard<'_, CharReader<Half>> {
        self.reader.lock().unwrap()
    }

    /// Exclusive access to the buffered text writer driving this terminal's output.
    pub fn writer(&self) -> std::sync::MutexGuard<'_, Writer<Half>> {
        self.writer.lock().unwrap()
    }

    /// Run `f` against the pty's raw input stream, if the terminal has not yet been closed.
    pub fn with_input<R>(&self, f: impl FnOnce(&mut P::Input) -> R) -> Option<R> {
        let mut guard = self.pty.lock().unwrap();
        guard.as_mut().map(|p| f(p.input()))
    }

    /// Run `f` against the pty's raw output stream, if the terminal has not yet been closed.
    pub fn with_output<R>(&self, f: impl FnOnce(&mut P::Output) -> R) -> Option<R> {
        let mut guard = self.pty.lock().unwrap();
        guard.as_mut().map(|p| f(p.output()))
    }

    /// Deregister from the shutdown registry, restore every native signal disposition this
    /// terminal installed, and release the pty. Idempotent; safe to call more than once and
    /// safe to have invoked implicitly by the shutdown registry.
    pub fn close(&self) -> CloseResult {
        let mut result = CloseResult::new();

        if self.closed.swap(true, Ordering::SeqCst) {
            return result;
        }

        tracing::info!(name = %self.name, "closing terminal");

        if let Some(handle) = self.shutdown_handle.lock().unwrap().take() {
            shutdown::unregister(handle);
        }

        let bridge = SignalBridge::global();
        let tokens: Vec<Token> = self.tokens.lock().unwrap().drain().map(|(_, t)| t).collect();
        for token in tokens {
            if let Err(e) = bridge.unregister(token) {
                result.push(e);
            }
        }

        self.reader.lock().unwrap().close();

        if let Err(e) = self.writer.lock().unwrap().flush() {
            result.push(TermError::Io(e));
        }

        let _ = self.pty.lock().unwrap().take();

        if !result.is_ok() {
            tracing::warn!(name = %self.name, errors = result.errors().len(), "close completed with errors");
        }

        result
    }
}
