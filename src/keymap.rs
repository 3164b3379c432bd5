//! Key-sequence trie.
//!
//! A [`KeyMap<T>`] binds sequences of `char`s to values of `T` and resolves an incoming buffer
//! to the longest bound prefix, the way a line editor resolves multi-char escape sequences
//! (arrow keys, function keys) one char at a time without blocking on more input than
//! necessary.

use std::time::Duration;

/// Number of direct-indexed children per trie node: every ASCII code point.
pub const KEYMAP_LENGTH: usize = 128;

/// How long [`crate::binding_reader::BindingReader`] should wait, after an exact match, to see
/// whether more input is about to arrive that would extend it into a longer binding.
pub const DEFAULT_AMBIGUOUS_TIMEOUT: Duration = Duration::from_millis(500);

/// Failure modes when binding directly into a [`KeyMap`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyMapError {
    /// The first code point of a sequence fell outside `[0, KEYMAP_LENGTH)`; use
    /// [`KeyMap::bind_unicode`] for code points past that range.
    #[error("code point {0} is out of range for direct keymap indexing (must be < {KEYMAP_LENGTH})")]
    OutOfRange(u32),

    /// An empty sequence cannot be bound.
    #[error("cannot bind an empty key sequence")]
    EmptySequence,
}

struct Node<T> {
    /// Value bound to the sequence that ends exactly at this node.
    value: Option<T>,
    children: Vec<Option<Box<Node<T>>>>,
}

impl<T> Node<T> {
    fn empty() -> Self {
        let mut children = Vec::with_capacity(KEYMAP_LENGTH);
        children.resize_with(KEYMAP_LENGTH, || None);
        Node { value: None, children }
    }

    fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }
}

/// Outcome of resolving a buffer of already-read characters against a [`KeyMap`].
pub enum BindResult<'a, T> {
    /// No bound sequence is a prefix of `buffer` at all.
    NoMatch,
    /// `buffer[..buffer.len() - remaining]` is bound to `value`. `remaining` is the count of
    /// trailing characters in `buffer` that lie outside that match (0 when the whole buffer
    /// matched exactly).
    Matched { value: &'a T, remaining: usize },
    /// `buffer` is itself a proper prefix of some longer binding, with no binding of its own.
    Ambiguous,
}

/// A trie mapping character sequences to values of `T`.
pub struct KeyMap<T> {
    root: Node<T>,
    unicode: Option<T>,
    nomatch: Option<T>,
    ambiguous_timeout: Duration,
}

impl<T> Default for KeyMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> KeyMap<T> {
    pub fn new() -> Self {
        KeyMap {
            root: Node::empty(),
            unicode: None,
            nomatch: None,
            ambiguous_timeout: DEFAULT_AMBIGUOUS_TIMEOUT,
        }
    }

    pub fn ambiguous_timeout(&self) -> Duration {
        self.ambiguous_timeout
    }

    pub fn set_ambiguous_timeout(&mut self, timeout: Duration) {
        self.ambiguous_timeout = timeout;
    }

    /// Bind `sequence` to `value`. Every code point in `sequence` must be `< KEYMAP_LENGTH`.
    pub fn bind(&mut self, sequence: &str, value: T) -> Result<(), KeyMapError> {
        let chars: Vec<char> = sequence.chars().collect();
        if chars.is_empty() {
            return Err(KeyMapError::EmptySequence);
        }
        for &c in &chars {
            if c as u32 >= KEYMAP_LENGTH as u32 {
                return Err(KeyMapError::OutOfRange(c as u32));
            }
        }
        let mut node = &mut self.root;
        for &c in &chars {
            let idx = c as usize;
            node = node.children[idx].get_or_insert_with(|| Box::new(Node::empty()));
        }
        node.value = Some(value);
        Ok(())
    }

    /// Remove the binding for `sequence`, if any. Prunes interior nodes left with neither a
    /// value nor any live child along the way, so a since-removed binding doesn't keep its
    /// former prefixes reporting [`BindResult::Ambiguous`] forever.
    pub fn unbind(&mut self, sequence: &str) -> Option<T> {
        let chars: Vec<char> = sequence.chars().collect();
        if chars.iter().any(|&c| c as u32 >= KEYMAP_LENGTH as u32) {
            return None;
        }
        Self::unbind_at(&mut self.root, &chars)
    }

    /// Recursive helper for [`Self::unbind`]: removes the value at the end of `chars`, then
    /// unlinks any child along the path that is left dead (no value, no remaining children).
    fn unbind_at(node: &mut Node<T>, chars: &[char]) -> Option<T> {
        let (&c, rest) = chars.split_first()?;
        let idx = c as usize;
        let child = node.children[idx].as_mut()?;

        let removed = if rest.is_empty() {
            child.value.take()
        } else {
            Self::unbind_at(child, rest)
        };

        if removed.is_some() && child.value.is_none() && !child.has_children() {
            node.children[idx] = None;
        }
        removed
    }

    /// Bind the fallback used for code points `>= KEYMAP_LENGTH` that [`BindingReader`] consumes
    /// on its own, one code point at a time, when no sequence matches.
    ///
    /// [`BindingReader`]: crate::binding_reader::BindingReader
    pub fn bind_unicode(&mut self, value: T) {
        self.unicode = Some(value);
    }

    /// Bind the fallback used for an unmatched code point `< KEYMAP_LENGTH`.
    pub fn bind_nomatch(&mut self, value: T) {
        self.nomatch = Some(value);
    }

    pub fn unicode(&self) -> Option<&T> {
        self.unicode.as_ref()
    }

    pub fn nomatch(&self) -> Option<&T> {
        self.nomatch.as_ref()
    }

    /// Resolve `buffer` (already-read characters, in order) against the trie.
    pub fn get_bound(&self, buffer: &[char]) -> BindResult<'_, T> {
        let mut node = &self.root;
        // Deepest node reached so far that carries its own value, and how many characters of
        // `buffer` remained unconsumed at that point.
        let mut last_match: Option<(&T, usize)> = None;

        for (i, &c) in buffer.iter().enumerate() {
            let idx = c as usize;
            let next = if idx < KEYMAP_LENGTH {
                node.children[idx].as_deref()
            } else {
                None
            };
            match next {
                Some(child) => {
                    node = child;
                    if let Some(v) = &node.value {
                        last_match = Some((v, buffer.len() - (i + 1)));
                    }
                }
                None => {
                    return match last_match {
                        Some((value, remaining)) => BindResult::Matched { value, remaining },
                        None => BindResult::NoMatch,
                    };
                }
            }
        }

        // Consumed the whole buffer while still inside the trie.
        match (&node.value, node.has_children()) {
            (Some(value), _) => BindResult::Matched { value, remaining: 0 },
            (None, true) => BindResult::Ambiguous,
            (None, false) => BindResult::NoMatch,
        }
    }
}
