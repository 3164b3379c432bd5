//! Terminal construction configuration.
//!
//! An explicit builder rather than process-wide ambient state: this crate has no environment of
//! its own, so the choice of name/type/encoding/signal policy is the embedding application's to
//! make. `TerminalConfig::from_env` layers the `TERMBIND_*` env var convention over the
//! defaults, for a consuming binary (see `demos/raw_echo.rs`) that wants that.

use crate::encoding::Encoding;
use crate::signal::SignalHandler;

/// Everything `SystemTerminal::open` needs, gathered into one value so construction sites don't
/// have to juggle five positional arguments.
#[derive(Clone)]
pub struct TerminalConfig {
    pub name: String,
    pub term_type: String,
    pub encoding: Encoding,
    pub native_signals: bool,
    pub initial_handler: SignalHandler,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig {
            name: "terminal".to_string(),
            term_type: "xterm-256color".to_string(),
            encoding: Encoding::Utf8,
            native_signals: true,
            initial_handler: SignalHandler::Default,
        }
    }
}

impl TerminalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_term_type(mut self, term_type: impl Into<String>) -> Self {
        self.term_type = term_type.into();
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_native_signals(mut self, native_signals: bool) -> Self {
        self.native_signals = native_signals;
        self
    }

    pub fn with_initial_handler(mut self, initial_handler: SignalHandler) -> Self {
        self.initial_handler = initial_handler;
        self
    }

    /// Layer `TERMBIND_TERM`, `TERMBIND_ENCODING` (`"utf-8"` or `"utf-16"`) and
    /// `TERMBIND_NAME` over the defaults. Unrecognized `TERMBIND_ENCODING` values are ignored
    /// (construction still validates the term type itself via terminfo at `open` time).
    pub fn from_env() -> Self {
        use std::env;

        let mut config = Self::default();

        if let Ok(term_type) = env::var("TERMBIND_TERM") {
            if !term_type.is_empty() {
                config.term_type = term_type;
            }
        }

        if let Ok(name) = env::var("TERMBIND_NAME") {
            if !name.is_empty() {
                config.name = name;
            }
        }

        if let Ok(encoding) = env::var("TERMBIND_ENCODING") {
            config.encoding = match encoding.to_ascii_lowercase().as_str() {
                "utf-16" | "utf16" => Encoding::Utf16,
                "utf-8" | "utf8" => Encoding::Utf8,
                _ => config.encoding,
            };
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn with_env<F: FnOnce()>(key: &str, value: &str, f: F) {
        // SAFETY: tests run serially (#[serial]); no concurrent env access.
        unsafe {
            env::set_var(key, value);
        }
        f();
        unsafe {
            env::remove_var(key);
        }
    }

    #[test]
    fn default_config_uses_xterm_256color_and_utf8() {
        let config = TerminalConfig::default();
        assert_eq!(config.term_type, "xterm-256color");
        assert_eq!(config.encoding, Encoding::Utf8);
        assert!(config.native_signals);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = TerminalConfig::new()
            .with_name("demo")
            .with_term_type("vt100")
            .with_encoding(Encoding::Utf16)
            .with_native_signals(false);
        assert_eq!(config.name, "demo");
        assert_eq!(config.term_type, "vt100");
        assert_eq!(config.encoding, Encoding::Utf16);
        assert!(!config.native_signals);
    }

    #[test]
    #[serial]
    fn from_env_reads_termbind_term() {
        with_env("TERMBIND_TERM", "vt220", || {
            let config = TerminalConfig::from_env();
            assert_eq!(config.term_type, "vt220");
        });
    }

    #[test]
    #[serial]
    fn from_env_reads_termbind_encoding() {
        with_env("TERMBIND_ENCODING", "utf-16", || {
            let config = TerminalConfig::from_env();
            assert_eq!(config.encoding, Encoding::Utf16);
        });
    }
}
