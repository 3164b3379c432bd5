//! Process-wide signal bridge.
//!
//! Maps POSIX signals to in-process callbacks, remembering prior native dispositions so they
//! can be restored later. Default/ignore dispositions are installed with a raw `sigaction`;
//! custom dispositions go through `signal-hook`'s self-pipe primitive so the signal handler
//! itself does only async-signal-safe work (write one byte), with the callback running on a
//! dedicated dispatcher thread.

use std::collections::HashMap;
use std::io::Read;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, OnceLock};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal as NixSignal, sigaction};
use signal_hook::SigId;

use crate::error::TermError;

/// Recognized asynchronous events. A closed enumeration: the bridge only ever sees these five.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Int,
    Quit,
    Tstp,
    Cont,
    Winch,
}

impl Signal {
    /// Stable name, used in logging and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Int => "INT",
            Signal::Quit => "QUIT",
            Signal::Tstp => "TSTP",
            Signal::Cont => "CONT",
            Signal::Winch => "WINCH",
        }
    }

    pub(crate) fn all() -> [Signal; 5] {
        [
            Signal::Int,
            Signal::Quit,
            Signal::Tstp,
            Signal::Cont,
            Signal::Winch,
        ]
    }

    fn to_nix(self) -> NixSignal {
        match self {
            Signal::Int => NixSignal::SIGINT,
            Signal::Quit => NixSignal::SIGQUIT,
            Signal::Tstp => NixSignal::SIGTSTP,
            Signal::Cont => NixSignal::SIGCONT,
            Signal::Winch => NixSignal::SIGWINCH,
        }
    }
}

type Callback = Arc<dyn Fn(Signal) + Send + Sync + 'static>;

/// A handler an application installs for a [`Signal`].
#[derive(Clone)]
pub enum SignalHandler {
    /// Restore the OS default disposition.
    Default,
    /// Swallow the signal.
    Ignore,
    /// Run a user callback when the signal arrives.
    Custom(Callback),
}

impl SignalHandler {
    /// Convenience constructor for [`SignalHandler::Custom`].
    pub fn custom(f: impl Fn(Signal) + Send + Sync + 'static) -> Self {
        SignalHandler::Custom(Arc::new(f))
    }
}

impl std::fmt::Debug for SignalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalHandler::Default => write!(f, "SignalHandler::Default"),
            SignalHandler::Ignore => write!(f, "SignalHandler::Ignore"),
            SignalHandler::Custom(_) => write!(f, "SignalHandler::Custom(..)"),
        }
    }
}

/// What a [`Token`] restores when [`SignalBridge::unregister`] consumes it.
enum Previous {
    Default,
    Ignore,
    Custom(Callback),
}

/// Opaque proof of a prior registration. Captures what disposition was active *before* the
/// registration that returned this token, so `unregister` is a pure undo.
pub struct Token {
    signal: Signal,
    previous: Previous,
}

struct Slot {
    callback: Option<Callback>,
    /// The `signal-hook` registration id backing `callback`'s self-pipe, if any is currently
    /// live. `signal-hook` stacks registrations rather than replacing them, so this must be
    /// torn down (via [`SignalBridge::teardown_pipe`]) before installing a new one for the same
    /// signal — otherwise one delivery would write to every still-registered pipe and the
    /// dispatcher would invoke more than one callback for it.
    sig_id: Option<SigId>,
}

struct Inner {
    slots: Mutex<HashMap<Signal, Slot>>,
}

/// Process-wide bridge between native signal delivery and in-process callbacks.
///
/// Safe to call from any thread. Registration survives terminal recreation — this is
/// deliberately a singleton, ambient resource.
pub struct SignalBridge {
    inner: Arc<Inner>,
}

static BRIDGE: OnceLock<SignalBridge> = OnceLock::new();

impl SignalBridge {
    /// Access the process-wide bridge, creating it on first use.
    pub fn global() -> &'static SignalBridge {
        BRIDGE.get_or_init(|| SignalBridge {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Restore the OS default disposition for `signal`.
    pub fn register_default(&self, signal: Signal) -> Result<(), TermError> {
        self.teardown_pipe(signal);
        self.install_raw(signal, SigHandler::SigDfl)?;
        let mut slots = self.inner.slots.lock().unwrap();
        slots.remove(&signal);
        tracing::debug!(signal = signal.name(), "installed default disposition");
        Ok(())
    }

    /// Install an ignore disposition for `signal`.
    pub fn register_ignore(&self, signal: Signal) -> Result<(), TermError> {
        self.teardown_pipe(signal);
        self.install_raw(signal, SigHandler::SigIgn)?;
        let mut slots = self.inner.slots.lock().unwrap();
        slots.remove(&signal);
        tracing::debug!(signal = signal.name(), "installed ignore disposition");
        Ok(())
    }

    /// Install a custom callback for `signal`, returning a token that captures whatever
    /// disposition was active before this call.
    pub fn register(
        &self,
        signal: Signal,
        callback: impl Fn(Signal) + Send + Sync + 'static,
    ) -> Result<Token, TermError> {
        let callback: Callback = Arc::new(callback);

        let previous = {
            let slots = self.inner.slots.lock().unwrap();
            match slots.get(&signal) {
                Some(slot) => match &slot.callback {
                    Some(cb) => Previous::Custom(cb.clone()),
                    None => Previous::Default, // slot exists but pipe not yet wired; treat as default
                },
                None => Previous::Default,
            }
        };

        // Tear down any pipe this bridge already has registered for `signal` first:
        // `signal-hook` stacks registrations rather than replacing them, so a delivery after
        // this call would otherwise write to both the old and the new pipe.
        self.teardown_pipe(signal);

        let (read_end, write_end) = UnixStream::pair().map_err(|e| {
            TermError::Signal(format!("failed to create self-pipe for {}: {e}", signal.name()))
        })?;
        read_end
            .set_nonblocking(true)
            .map_err(|e| TermError::Signal(format!("fcntl failed: {e}")))?;

        // SAFETY: `register` below only permits async-signal-safe work in the handler itself
        // (signal-hook writes a single byte to the pipe's raw fd); the actual callback runs on
        // the dispatcher thread, never inside the signal handler.
        let sig_id = unsafe {
            signal_hook::low_level::pipe::register(signal.to_nix() as i32, write_end)
                .map_err(|e| TermError::Signal(format!("sigaction {} failed: {e}", signal.name())))?
        };

        {
            let mut slots = self.inner.slots.lock().unwrap();
            slots.insert(
                signal,
                Slot {
                    callback: Some(callback.clone()),
                    sig_id: Some(sig_id),
                },
            );
        }

        Dispatcher::global().watch(signal, read_end, self.inner.clone());

        tracing::debug!(signal = signal.name(), "installed custom handler");
        Ok(Token { signal, previous })
    }

    /// Unregister `signal`'s currently-live self-pipe (if any) at the `signal-hook` level and
    /// stop the dispatcher thread from watching it, so at most one pipe is ever live for a
    /// given signal at a time.
    fn teardown_pipe(&self, signal: Signal) {
        let sig_id = {
            let mut slots = self.inner.slots.lock().unwrap();
            slots.get_mut(&signal).and_then(|slot| slot.sig_id.take())
        };
        if let Some(id) = sig_id {
            signal_hook::low_level::unregister(id);
            Dispatcher::global().unwatch(signal);
        }
    }

    /// Restore whatever disposition `token` captured.
    pub fn unregister(&self, token: Token) -> Result<(), TermError> {
        match token.previous {
            Previous::Default => self.register_default(token.signal),
            Previous::Ignore => self.register_ignore(token.signal),
            Previous::Custom(cb) => {
                let signal = token.signal;
                let token = self.register(signal, move |s| cb(s))?;
                // The freshly-created token's `previous` is discarded: we already know what it
                // is (whatever `register` just replaced), and the caller only wanted the
                // restoration, not a fresh undo point.
                std::mem::forget(token);
                Ok(())
            }
        }
    }

    /// Synchronously invoke the callback captured by `token`'s *previous* disposition. Used by
    /// [`crate::terminal::SystemTerminal::raise`] to let the OS's prior action run after the
    /// application's own handler returns.
    pub fn invoke_previous(&self, token: &Token) {
        match &token.previous {
            Previous::Default => {
                // There is no programmatic "run the OS default action" short of re-raising the
                // signal with the default disposition temporarily installed.
                let nix_sig = token.signal.to_nix();
                let saved = unsafe {
                    sigaction(
                        nix_sig,
                        &SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty()),
                    )
                };
                let _ = nix::sys::signal::raise(nix_sig);
                if let Ok(saved) = saved {
                    let _ = unsafe { sigaction(nix_sig, &saved) };
                }
            }
            Previous::Ignore => {}
            Previous::Custom(cb) => cb(token.signal),
        }
    }

    fn install_raw(&self, signal: Signal, handler: SigHandler) -> Result<(), TermError> {
        let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
        unsafe { sigaction(signal.to_nix(), &action) }
            .map_err(|e| TermError::Signal(format!("sigaction {} failed: {e}", signal.name())))?;
        Ok(())
    }
}

/// A request sent to the [`Dispatcher`] thread. Both the watch set and its mutation happen
/// exclusively on that thread, so there's never a race between a fd being polled and it being
/// torn down from under the poll.
enum DispatchMsg {
    Watch(Signal, UnixStream, Arc<Inner>),
    Unwatch(Signal),
}

/// Background thread that drains self-pipes and invokes the registered callbacks. Spawned
/// lazily on first `register`; lives for the process so callbacks always run off the signal
/// handler's restricted context. At most one self-pipe is ever watched per [`Signal`]: a
/// [`DispatchMsg::Watch`] for a signal already being watched replaces the old entry (which
/// [`SignalBridge::teardown_pipe`] always pairs with an `unregister` at the `signal-hook`
/// level beforehand), so a single delivery never invokes more than one callback.
struct Dispatcher {
    tx: Mutex<std::sync::mpsc::Sender<DispatchMsg>>,
}

static DISPATCHER: OnceLock<Dispatcher> = OnceLock::new();

impl Dispatcher {
    fn global() -> &'static Dispatcher {
        DISPATCHER.get_or_init(|| {
            let (tx, rx) = std::sync::mpsc::channel::<DispatchMsg>();
            std::thread::spawn(move || Self::run(rx));
            Dispatcher { tx: Mutex::new(tx) }
        })
    }

    fn watch(&self, signal: Signal, read_end: UnixStream, inner: Arc<Inner>) {
        let _ = self.tx.lock().unwrap().send(DispatchMsg::Watch(signal, read_end, inner));
    }

    fn unwatch(&self, signal: Signal) {
        let _ = self.tx.lock().unwrap().send(DispatchMsg::Unwatch(signal));
    }

    fn apply(watched: &mut HashMap<Signal, (UnixStream, Arc<Inner>)>, msg: DispatchMsg) {
        match msg {
            DispatchMsg::Watch(signal, stream, inner) => {
                watched.insert(signal, (stream, inner));
            }
            DispatchMsg::Unwatch(signal) => {
                watched.remove(&signal);
            }
        }
    }

    fn run(rx: std::sync::mpsc::Receiver<DispatchMsg>) {
        use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

        let mut watched: HashMap<Signal, (UnixStream, Arc<Inner>)> = HashMap::new();
        loop {
            while let Ok(msg) = rx.try_recv() {
                Self::apply(&mut watched, msg);
            }
            if watched.is_empty() {
                // Nothing registered yet; wait for the first registration.
                match rx.recv() {
                    Ok(msg) => Self::apply(&mut watched, msg),
                    Err(_) => return,
                }
                continue;
            }

            let entries: Vec<(Signal, std::os::fd::RawFd)> = watched
                .iter()
                .map(|(signal, (stream, _))| (*signal, stream.as_raw_fd()))
                .collect();
            let mut fds: Vec<PollFd> = entries
                .iter()
                .map(|(_, raw)| {
                    let borrowed = unsafe { BorrowedFd::borrow_raw(*raw) };
                    PollFd::new(borrowed, PollFlags::POLLIN)
                })
                .collect();

            match poll(&mut fds, PollTimeout::from(200u16)) {
                Ok(_) => {}
                Err(_) => continue,
            }

            for (i, pfd) in fds.iter().enumerate() {
                let Some(revents) = pfd.revents() else { continue };
                if !revents.contains(PollFlags::POLLIN) {
                    continue;
                }
                let signal = entries[i].0;
                let Some((stream, inner)) = watched.get_mut(&signal) else { continue };
                let mut buf = [0u8; 64];
                let _ = stream.read(&mut buf);
                let callback = {
                    let slots = inner.slots.lock().unwrap();
                    slots.get(&signal).and_then(|s| s.callback.clone())
                };
                if let Some(cb) = callback {
                    tracing::trace!(signal = signal.name(), "dispatching signal");
                    cb(signal);
                }
            }
        }
    }
}
