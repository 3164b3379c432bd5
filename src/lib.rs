//! termbind: POSIX terminal abstraction and key-sequence binding dispatch core.
//!
//! Two tightly coupled subsystems carry the real weight:
//!
//! - [`terminal::SystemTerminal`] wraps a [`pty::Pty`], bridging blocking byte streams into a
//!   non-blocking [`char_reader::CharReader`], mediating native signal delivery through
//!   [`signal::SignalBridge`], and guaranteeing orderly teardown via [`shutdown`].
//! - [`binding_reader::BindingReader`] consumes code points from a `CharReader` and resolves
//!   them against a [`keymap::KeyMap`] trie, with prefix/ambiguity handling, a bounded timeout,
//!   Unicode fall-through, no-match fall-through, and macro push-back.
//!
//! Line editing, completion, history, widget dispatch and concrete pty acquisition
//! (`openpty(2)`, ioctl choreography) are peer concerns this crate does not implement; see
//! [`pty::Pty`] for the narrow contract this crate consumes instead of reaching past it to the
//! operating system itself.

pub mod binding_reader;
pub mod char_reader;
pub mod config;
pub mod encoding;
pub mod error;
pub mod keymap;
pub mod pty;
pub mod shutdown;
pub mod signal;
pub mod terminal;

pub use binding_reader::BindingReader;
pub use char_reader::{CharReader, ReadOutcome, ReadTimeout};
pub use config::TerminalConfig;
pub use encoding::Encoding;
pub use error::{CloseResult, TermError};
pub use keymap::{BindResult, KeyMap, KeyMapError, KEYMAP_LENGTH};
pub use pty::{Pty, UnixPty};
pub use signal::{Signal, SignalBridge, SignalHandler};
pub use terminal::SystemTerminal;
