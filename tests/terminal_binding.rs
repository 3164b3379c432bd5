//! Integration tests driving `SystemTerminal` and `BindingReader` together against an
//! in-memory `Pty` test double.
//!
//! The double is backed by `UnixStream::pair()` rather than a plain `Cursor`: `CharReader` polls
//! a real file descriptor (`nix::poll`), so the fake needs one too, same as the crate's own unit
//! tests.

use std::io::Write;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::time::Duration;

use serial_test::serial;

use termbind::{BindingReader, Encoding, KeyMap, Signal, SignalHandler, SystemTerminal, UnixPty};

/// Builds a `UnixPty` over two socket pairs: the terminal's `input`/`output` are one end of
/// each pair, with the other ends returned here so a test can drive input and observe output.
fn build_fake_pty() -> (
    UnixPty,
    std::os::unix::net::UnixStream,
    std::os::unix::net::UnixStream,
) {
    let (input_write, input_read) = std::os::unix::net::UnixStream::pair().unwrap();
    let (output_read, output_write) = std::os::unix::net::UnixStream::pair().unwrap();
    let input_fd: OwnedFd = unsafe { OwnedFd::from_raw_fd(input_read.into_raw_fd()) };
    let output_fd: OwnedFd = unsafe { OwnedFd::from_raw_fd(output_write.into_raw_fd()) };
    (UnixPty::new(input_fd, output_fd), input_write, output_read)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Op {
    Up,
    Escape,
}

fn arrow_keymap() -> KeyMap<Op> {
    let mut map = KeyMap::new();
    map.bind("\x1b", Op::Escape).unwrap();
    map.bind("\x1b[A", Op::Up).unwrap();
    map.set_ambiguous_timeout(Duration::from_millis(30));
    map
}

#[test]
fn terminal_and_binding_reader_resolve_an_escape_sequence() {
    let (pty, mut drive_input, _drive_output) = build_fake_pty();
    let terminal = SystemTerminal::open(
        "integration",
        "xterm",
        pty,
        Encoding::Utf8,
        false,
        SignalHandler::Default,
    )
    .expect("xterm is a standard terminfo entry");

    drive_input.write_all(b"\x1b[A").unwrap();

    let keys = arrow_keymap();
    let mut reader = terminal.reader();
    let mut binding = BindingReader::new(&mut reader);

    assert_eq!(binding.read_binding(&keys).unwrap(), Some(&Op::Up));
    assert_eq!(binding.last_binding(), "\x1b[A");

    drop(binding);
    drop(reader);
    terminal.close();
}

#[test]
fn terminal_writer_reaches_the_pty_output_side() {
    use std::io::Read;

    let (pty, _drive_input, mut drive_output) = build_fake_pty();
    let terminal = SystemTerminal::open(
        "integration",
        "xterm",
        pty,
        Encoding::Utf8,
        false,
        SignalHandler::Default,
    )
    .unwrap();

    {
        let mut writer = terminal.writer();
        writer.write_str("hello").unwrap();
        writer.flush().unwrap();
    }

    let mut buf = [0u8; 5];
    drive_output.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    terminal.close();
}

#[test]
fn capability_lookup_reflects_the_declared_terminal_type() {
    let (pty, _drive_input, _drive_output) = build_fake_pty();
    let terminal = SystemTerminal::open(
        "integration",
        "xterm",
        pty,
        Encoding::Utf8,
        false,
        SignalHandler::Default,
    )
    .unwrap();

    // "cols" is a standard numeric capability every xterm terminfo entry carries.
    assert!(terminal.numeric_capability("cols").is_some());
    terminal.close();
}

#[test]
#[serial(signal_bridge)]
fn custom_signal_handler_observes_a_raised_signal_end_to_end() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    let (pty, _drive_input, _drive_output) = build_fake_pty();
    let terminal = SystemTerminal::open(
        "integration",
        "xterm",
        pty,
        Encoding::Utf8,
        false,
        SignalHandler::Default,
    )
    .unwrap();

    let seen = Arc::new(AtomicBool::new(false));
    let seen2 = seen.clone();
    terminal.handle(
        Signal::Winch,
        SignalHandler::custom(move |_| {
            seen2.store(true, Ordering::SeqCst);
        }),
    );

    terminal.raise(Signal::Winch);
    assert!(seen.load(Ordering::SeqCst));

    terminal.close();
}

#[test]
fn non_blocking_binding_reads_report_would_block_before_any_input_arrives() {
    let (pty, _drive_input, _drive_output) = build_fake_pty();
    let terminal = SystemTerminal::open(
        "integration",
        "xterm",
        pty,
        Encoding::Utf8,
        false,
        SignalHandler::Default,
    )
    .unwrap();

    let keys = arrow_keymap();
    let mut reader = terminal.reader();
    let mut binding = BindingReader::new(&mut reader);

    assert_eq!(binding.read_binding_opts(&keys, None, false).unwrap(), None);
    assert!(binding.would_block());

    drop(binding);
    drop(reader);
    terminal.close();
}
