//! Error types for the terminal core.
//!
//! A typed enum for library-facing failures, with `#[from]` conversions for the I/O errors
//! that naturally bubble up from the underlying streams.

use std::fmt;

/// Errors surfaced by [`crate::terminal::SystemTerminal`], [`crate::char_reader::CharReader`]
/// and [`crate::binding_reader::BindingReader`].
#[derive(Debug, thiserror::Error)]
pub enum TermError {
    /// Underlying stream read/write failure. Fatal for the current operation; does not poison
    /// the terminal.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The character source or terminal has been closed. [`crate::binding_reader::BindingReader`]
    /// converts this into `Ok(None)` rather than propagating it.
    #[error("stream closed")]
    Closed,

    /// Unknown encoding or unknown terminal type at construction.
    #[error("config error: {0}")]
    Config(String),

    /// The signal bridge could not install or restore a disposition. Reported, but never
    /// prevents [`crate::terminal::SystemTerminal::close`] from completing its remaining steps.
    #[error("signal error: {0}")]
    Signal(String),

    /// A code point outside `[0, KEYMAP_LENGTH)` was bound directly into a [`crate::keymap::KeyMap`].
    #[error(transparent)]
    KeyMap(#[from] crate::keymap::KeyMapError),
}

/// Aggregated result of [`crate::terminal::SystemTerminal::close`].
///
/// Cleanup proceeds through every owned resource regardless of earlier failures; this collects
/// whatever went wrong along the way instead of stopping at the first one.
#[derive(Debug, Default)]
pub struct CloseResult {
    errors: Vec<TermError>,
}

impl CloseResult {
    pub(crate) fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub(crate) fn push(&mut self, err: TermError) {
        self.errors.push(err);
    }

    /// True if every resource closed without error.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// The errors collected during close, in the order they occurred.
    pub fn errors(&self) -> &[TermError] {
        &self.errors
    }
}

impl fmt::Display for CloseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "close completed without error");
        }
        write!(f, "close completed with {} error(s): ", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseResult {}
