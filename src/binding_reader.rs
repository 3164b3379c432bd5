//! Binding reader: drives a [`CharReader`] against a [`KeyMap`] trie, resolving
//! prefix/ambiguity, Unicode fall-through, no-match fall-through, and macro push-back.

use std::collections::VecDeque;
use std::io::Read;
use std::os::fd::AsFd;
use std::time::Duration;

use crate::char_reader::{CharReader, ReadOutcome, ReadTimeout};
use crate::error::TermError;
use crate::keymap::{BindResult, KeyMap, KEYMAP_LENGTH};

/// How long [`BindingReader::read_character`]'s retry loop waits on each attempt while
/// collapsing [`ReadOutcome::Expired`] into continued polling, so that a pending multi-unit
/// code point doesn't stall the caller forever even on a platform without a native timed read.
const RETRY_SLICE: Duration = Duration::from_millis(100);

/// Drives a non-blocking character source against one or two [`KeyMap`]s, producing resolved
/// bindings.
///
/// Borrows its [`CharReader`] rather than owning it, so a caller can interleave binding reads
/// with direct access to the same source (e.g. via [`crate::terminal::SystemTerminal::reader`])
/// between calls.
pub struct BindingReader<'a, S: Read + AsFd> {
    source: &'a mut CharReader<S>,
    /// Code points read (directly or via push-back) but not yet bound or discarded.
    buf: Vec<char>,
    /// Drained in FIFO order before new characters are read from `source`.
    pushback: VecDeque<char>,
    last_binding: String,
    /// Set when the most recent `Ok(None)` was the non-blocking "nothing yet" case rather than
    /// true end of input, so callers can distinguish the two without a separate error variant.
    would_block: bool,
}

impl<'a, S: Read + AsFd> BindingReader<'a, S> {
    pub fn new(source: &'a mut CharReader<S>) -> Self {
        BindingReader {
            source,
            buf: Vec::new(),
            pushback: VecDeque::new(),
            last_binding: String::new(),
            would_block: false,
        }
    }

    /// Content of the operation buffer: code points read but not yet bound or discarded.
    pub fn current_buffer(&self) -> String {
        self.buf.iter().collect()
    }

    /// The literal key sequence of the most recent emission (a matched sequence, or the single
    /// code point routed to a Unicode/no-match fallback).
    pub fn last_binding(&self) -> &str {
        &self.last_binding
    }

    /// True only immediately after a `read_binding*` call returned `Ok(None)` because no input
    /// was available in non-blocking mode — as opposed to true end of input. Unset by the next
    /// call that reads real input or blocks.
    pub fn would_block(&self) -> bool {
        self.would_block
    }

    /// Append `s`'s code points to the tail of the push-back queue. Subsequent reads drain the
    /// push-back queue before touching the underlying character source.
    pub fn run_macro(&mut self, s: &str) {
        self.pushback.extend(s.chars());
    }

    /// Read and consume the next code point, draining the push-back queue first.
    pub fn read_character(&mut self) -> Result<ReadOutcome, TermError> {
        if let Some(c) = self.pushback.pop_front() {
            return Ok(ReadOutcome::CodePoint(c as u32));
        }
        loop {
            match self.source.read(ReadTimeout::After(RETRY_SLICE)) {
                Ok(ReadOutcome::Expired) => continue,
                Ok(other) => return Ok(other),
                Err(TermError::Closed) => return Ok(ReadOutcome::Eof),
                Err(e) => return Err(e),
            }
        }
    }

    /// Look at the next code point without consuming it, checking the push-back queue first.
    pub fn peek_character(&mut self, timeout: ReadTimeout) -> Result<ReadOutcome, TermError> {
        if let Some(&c) = self.pushback.front() {
            return Ok(ReadOutcome::CodePoint(c as u32));
        }
        match self.source.peek(timeout) {
            Err(TermError::Closed) => Ok(ReadOutcome::Eof),
            other => other,
        }
    }

    /// Read and consume the next code point without waiting: drains the push-back queue first,
    /// otherwise polls `source` exactly once and reports `Expired` rather than retrying.
    fn poll_character(&mut self) -> Result<ReadOutcome, TermError> {
        if let Some(c) = self.pushback.pop_front() {
            return Ok(ReadOutcome::CodePoint(c as u32));
        }
        match self.source.read(ReadTimeout::Poll) {
            Err(TermError::Closed) => Ok(ReadOutcome::Eof),
            other => other,
        }
    }

    /// Blocking read against `keys` alone.
    pub fn read_binding<'k, T>(&mut self, keys: &'k KeyMap<T>) -> Result<Option<&'k T>, TermError> {
        self.read_binding_opts(keys, None, true)
    }

    /// Blocking read, consulting `local` first (it takes precedence, and its own ambiguity
    /// suppresses falling through to `keys`).
    pub fn read_binding_local<'k, T>(
        &mut self,
        keys: &'k KeyMap<T>,
        local: &'k KeyMap<T>,
    ) -> Result<Option<&'k T>, TermError> {
        self.read_binding_opts(keys, Some(local), true)
    }

    /// Full form: optional local overlay, and a `block` flag that, when false, polls instead of
    /// waiting whenever the state machine needs another character, returning `Ok(None)` (with
    /// [`would_block`](Self::would_block) set) the moment one isn't immediately available.
    pub fn read_binding_opts<'k, T>(
        &mut self,
        keys: &'k KeyMap<T>,
        local: Option<&'k KeyMap<T>>,
        block: bool,
    ) -> Result<Option<&'k T>, TermError> {
        self.would_block = false;

        loop {
            // Step 1: lookup. A local map reporting `Ambiguous` suppresses the primary lookup
            // so the user cannot accidentally disambiguate through it.
            let local_result = local.map(|m| m.get_bound(&self.buf));
            let lookup = match local_result {
                Some(BindResult::Ambiguous) => BindResult::Ambiguous,
                Some(BindResult::NoMatch) | None => keys.get_bound(&self.buf),
                Some(matched @ BindResult::Matched { .. }) => matched,
            };

            let mut need_more = true;

            match lookup {
                BindResult::Matched { value, remaining } if remaining > 0 => {
                    // Step 2: push back the unconsumed tail, emit the matched prefix.
                    let split = self.buf.len() - remaining;
                    let tail: String = self.buf[split..].iter().collect();
                    self.last_binding = self.buf[..split].iter().collect();
                    self.buf.clear();
                    self.run_macro(&tail);
                    return Ok(Some(value));
                }
                BindResult::Matched { value, remaining: 0 } => {
                    // Step 3: an exact match that might still be a proper prefix of something
                    // longer. Wait up to the ambiguity timeout to see if more input refines it.
                    let timeout = keys.ambiguous_timeout();
                    let mut refine = false;
                    if timeout > Duration::ZERO {
                        if let ReadOutcome::CodePoint(_) = self.peek_character(ReadTimeout::After(timeout))? {
                            refine = true;
                        }
                    }
                    if refine {
                        // Fall through to "need more input" below: read the real character that
                        // was just peeked, grow the buffer, and re-evaluate next iteration.
                    } else {
                        self.last_binding = self.buf.iter().collect();
                        self.buf.clear();
                        return Ok(Some(value));
                    }
                }
                BindResult::NoMatch if !self.buf.is_empty() => {
                    // Step 5: route the first code point to a fallback, or drop it and retry.
                    let cp = self.buf.remove(0);
                    self.last_binding = cp.to_string();
                    let fallback = if cp as u32 >= KEYMAP_LENGTH as u32 {
                        keys.unicode()
                    } else {
                        keys.nomatch()
                    };
                    if let Some(value) = fallback {
                        return Ok(Some(value));
                    }
                    need_more = false;
                }
                _ => {}
            }

            if need_more {
                // Step 6: need more input. In blocking mode, wait (in retry slices) for it; in
                // non-blocking mode, poll once and bail the moment nothing is immediately ready,
                // whether this is the first character of a fresh binding or the Nth.
                let outcome = if block {
                    self.read_character()?
                } else {
                    self.poll_character()?
                };
                match outcome {
                    ReadOutcome::Eof => return Ok(None),
                    ReadOutcome::CodePoint(cp) => {
                        self.buf.push(char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER));
                    }
                    ReadOutcome::Expired => {
                        self.would_block = true;
                        return Ok(None);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;
    use std::io::Write as _;
    use std::os::fd::{AsFd, BorrowedFd};
    use std::time::Duration as StdDuration;

    struct FakeStream {
        _write_end: Option<std::os::unix::net::UnixStream>,
        read_end: std::os::unix::net::UnixStream,
    }

    impl FakeStream {
        fn new(bytes: &[u8]) -> Self {
            let (mut write_end, read_end) = std::os::unix::net::UnixStream::pair().unwrap();
            write_end.write_all(bytes).unwrap();
            FakeStream { _write_end: Some(write_end), read_end }
        }

        /// A stream with nothing available yet, but whose write end stays open (so reads
        /// `Expired`, never `Eof`).
        fn empty() -> (Self, std::os::unix::net::UnixStream) {
            let (write_end, read_end) = std::os::unix::net::UnixStream::pair().unwrap();
            (FakeStream { _write_end: Some(write_end.try_clone().unwrap()), read_end }, write_end)
        }

        /// A stream whose write end is already closed, so a read immediately reports `Eof`.
        fn eof() -> Self {
            let (write_end, read_end) = std::os::unix::net::UnixStream::pair().unwrap();
            drop(write_end);
            FakeStream { _write_end: None, read_end }
        }
    }

    impl Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read_end.read(buf)
        }
    }

    impl AsFd for FakeStream {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.read_end.as_fd()
        }
    }

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    enum Op {
        A,
        Ab,
        Up,
        Unicode,
        Nomatch,
        Xy,
    }

    #[test]
    fn macro_round_trip_reads_before_source() {
        let (stream, _keep_open) = FakeStream::empty();
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);
        br.run_macro("xy");

        let mut map: KeyMap<Op> = KeyMap::new();
        map.bind("xy", Op::Xy).unwrap();
        map.set_ambiguous_timeout(StdDuration::ZERO);

        assert_eq!(br.read_binding(&map).unwrap(), Some(&Op::Xy));
        assert_eq!(br.current_buffer(), "");
        assert_eq!(br.last_binding(), "xy");
    }

    #[test]
    fn nomatch_fallback_emits_per_unbound_character() {
        let stream = FakeStream::new(b"ac");
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);

        let mut map: KeyMap<Op> = KeyMap::new();
        map.bind("ab", Op::Ab).unwrap();
        map.bind_nomatch(Op::Nomatch);
        map.set_ambiguous_timeout(StdDuration::ZERO);

        assert_eq!(br.read_binding(&map).unwrap(), Some(&Op::Nomatch));
        assert_eq!(br.last_binding(), "a");
        assert_eq!(br.read_binding(&map).unwrap(), Some(&Op::Nomatch));
        assert_eq!(br.last_binding(), "c");
    }

    #[test]
    fn unicode_fallback_for_high_code_points() {
        // U+00E9 'é', encoded as 0xC3 0xA9, is unbound and >= KEYMAP_LENGTH.
        let stream = FakeStream::new(&[0xC3, 0xA9]);
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);

        let mut map: KeyMap<Op> = KeyMap::new();
        map.bind_unicode(Op::Unicode);
        map.set_ambiguous_timeout(StdDuration::ZERO);

        assert_eq!(br.read_binding(&map).unwrap(), Some(&Op::Unicode));
        assert_eq!(br.last_binding(), "\u{00E9}");
    }

    #[test]
    fn local_map_takes_precedence_over_primary() {
        let stream = FakeStream::new(b"x");
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);

        let mut primary: KeyMap<Op> = KeyMap::new();
        primary.bind("x", Op::Nomatch).unwrap();
        let mut local: KeyMap<Op> = KeyMap::new();
        local.bind("x", Op::Up).unwrap();
        local.set_ambiguous_timeout(StdDuration::ZERO);

        assert_eq!(br.read_binding_local(&primary, &local).unwrap(), Some(&Op::Up));
    }

    #[test]
    fn local_ambiguity_suppresses_primary_exact_match() {
        // local has only "xy" (buf "x" is ambiguous there); primary has an exact match on "x".
        // The reader must wait for disambiguation rather than emitting the primary's "x".
        let (write_end, read_end) = std::os::unix::net::UnixStream::pair().unwrap();
        let stream = FakeStream { _write_end: Some(write_end.try_clone().unwrap()), read_end };
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);

        let mut primary: KeyMap<Op> = KeyMap::new();
        primary.bind("x", Op::Nomatch).unwrap();
        let mut local: KeyMap<Op> = KeyMap::new();
        local.bind("xy", Op::Xy).unwrap();

        std::thread::spawn(move || {
            let mut w = write_end;
            w.write_all(b"x").unwrap();
            std::thread::sleep(StdDuration::from_millis(20));
            w.write_all(b"y").unwrap();
        });

        assert_eq!(br.read_binding_local(&primary, &local).unwrap(), Some(&Op::Xy));
    }

    #[test]
    fn ambiguity_resolves_to_shorter_binding_after_timeout() {
        let (write_end, read_end) = std::os::unix::net::UnixStream::pair().unwrap();
        let stream = FakeStream { _write_end: Some(write_end.try_clone().unwrap()), read_end };
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);

        let mut map: KeyMap<Op> = KeyMap::new();
        map.bind("a", Op::A).unwrap();
        map.bind("ab", Op::Ab).unwrap();
        map.set_ambiguous_timeout(StdDuration::from_millis(30));

        std::thread::spawn(move || {
            let mut w = write_end;
            w.write_all(b"a").unwrap();
            // Silence past the ambiguity timeout; never send 'b'.
        });

        assert_eq!(br.read_binding(&map).unwrap(), Some(&Op::A));
    }

    #[test]
    fn ambiguity_resolves_to_longer_binding_within_timeout() {
        let (write_end, read_end) = std::os::unix::net::UnixStream::pair().unwrap();
        let stream = FakeStream { _write_end: Some(write_end.try_clone().unwrap()), read_end };
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);

        let mut map: KeyMap<Op> = KeyMap::new();
        map.bind("a", Op::A).unwrap();
        map.bind("ab", Op::Ab).unwrap();
        map.set_ambiguous_timeout(StdDuration::from_millis(100));

        std::thread::spawn(move || {
            let mut w = write_end;
            w.write_all(b"a").unwrap();
            std::thread::sleep(StdDuration::from_millis(10));
            w.write_all(b"b").unwrap();
        });

        assert_eq!(br.read_binding(&map).unwrap(), Some(&Op::Ab));
    }

    #[test]
    fn zero_timeout_disambiguates_immediately() {
        let stream = FakeStream::new(b"a");
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);

        let mut map: KeyMap<Op> = KeyMap::new();
        map.bind("a", Op::A).unwrap();
        map.bind("ab", Op::Ab).unwrap();
        map.set_ambiguous_timeout(StdDuration::ZERO);

        assert_eq!(br.read_binding(&map).unwrap(), Some(&Op::A));
    }

    #[test]
    fn nonblocking_returns_none_when_nothing_available() {
        let (stream, _keep_open) = FakeStream::empty();
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);

        let map: KeyMap<Op> = KeyMap::new();
        assert_eq!(br.read_binding_opts(&map, None, false).unwrap(), None);
        assert!(br.would_block());
        assert_eq!(br.current_buffer(), "");
    }

    #[test]
    fn eof_propagates_and_is_sticky() {
        let stream = FakeStream::eof();
        let mut reader = CharReader::new(stream, Encoding::Utf8);
        let mut br = BindingReader::new(&mut reader);

        let map: KeyMap<Op> = KeyMap::new();
        assert_eq!(br.read_binding(&map).unwrap(), None);
        assert_eq!(br.read_binding(&map).unwrap(), None);
    }
}
