//! Minimal demonstration of `termbind` configured from the environment: opens a pty, puts it in
//! raw mode, and echoes resolved key bindings back to stdout until `Ctrl-C` or EOF.
//!
//! Run with e.g. `TERMBIND_TERM=xterm TERMBIND_ENCODING=utf-8 cargo run --example raw_echo`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::pty::openpty;

use termbind::{
    BindingReader, KeyMap, Signal, SignalHandler, SystemTerminal, TerminalConfig, UnixPty,
};

#[derive(Clone, Copy, Debug)]
enum Action {
    Up,
    Down,
    Left,
    Right,
    Interrupt,
}

fn arrow_keys() -> KeyMap<Action> {
    let mut map = KeyMap::new();
    map.bind("\x1b[A", Action::Up).expect("valid sequence");
    map.bind("\x1b[B", Action::Down).expect("valid sequence");
    map.bind("\x1b[C", Action::Right).expect("valid sequence");
    map.bind("\x1b[D", Action::Left).expect("valid sequence");
    map.bind("\x03", Action::Interrupt).expect("valid sequence");
    map
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = TerminalConfig::from_env().with_initial_handler(SignalHandler::custom(|_| {}));

    let winsize = nix::pty::Winsize { ws_row: 24, ws_col: 80, ws_xpixel: 0, ws_ypixel: 0 };
    let pty = openpty(&winsize, None)?;

    // `SystemTerminal` reads and writes the master side, the way a terminal emulator would
    // against a child attached to the slave. Nothing else has the slave open in this demo, so
    // it's kept alive here only to keep the master from seeing EIO.
    let master_dup = {
        use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
        let raw = unsafe { libc::dup(pty.master.as_raw_fd()) };
        if raw < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        unsafe { OwnedFd::from_raw_fd(raw) }
    };
    let _slave_fd = pty.slave;
    let pty_impl = UnixPty::new(pty.master, master_dup);

    let terminal = SystemTerminal::open(
        config.name.clone(),
        config.term_type.clone(),
        pty_impl,
        config.encoding,
        config.native_signals,
        config.initial_handler,
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop2 = stop.clone();
    terminal.handle(
        Signal::Int,
        SignalHandler::custom(move |_| {
            stop2.store(true, Ordering::SeqCst);
        }),
    );

    let keys = arrow_keys();
    let mut reader = terminal.reader();
    let mut binding = BindingReader::new(&mut reader);

    println!("reading from {} ({}); ctrl-c to stop", terminal.name(), terminal.term_type());

    while !stop.load(Ordering::SeqCst) {
        match binding.read_binding_opts(&keys, None, false) {
            Ok(Some(Action::Interrupt)) => {
                println!("interrupt bound directly, stopping");
                break;
            }
            Ok(Some(action)) => println!("resolved: {action:?} ({:?})", binding.last_binding()),
            Ok(None) if binding.would_block() => {
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            Ok(None) => {
                println!("input closed");
                break;
            }
            Err(e) => {
                eprintln!("read error: {e}");
                break;
            }
        }
    }

    drop(binding);
    drop(reader);
    terminal.close();
    Ok(())
}
