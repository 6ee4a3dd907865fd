//! Process-wide log sink.
//!
//! One global sink, created lazily and shared by every thread. It carries
//! two channels, mirroring how a terminal session separates streams:
//!
//! - the *log* channel: timestamped, level-filtered `[HH:MM:SS] [LEVEL]
//!   file:line: msg` lines, stderr by default;
//! - the *device* channel: raw bytes produced by emulated devices (UART
//!   TX), stdout by default.
//!
//! Either channel can be redirected to a file. An output handler can be
//! installed to capture everything instead (the interactive console uses
//! this to mirror output into its own pane); installing or clearing the
//! handler is safe at any time from any thread.

use std::fmt::Arguments;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use once_cell::sync::Lazy;

/// Severity for the log channel, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parses the CLI spelling. Unknown strings are rejected.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warn => "WARN ",
            Self::Error => "ERROR",
        }
    }
}

/// Callback receiving every line the sink would otherwise write.
pub type OutputHandler = Box<dyn Fn(&str) + Send>;

enum Output {
    Stdout,
    Stderr,
    File(File),
}

impl Output {
    fn write_str(&mut self, text: &str) {
        let result = match self {
            Self::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes()).and_then(|()| out.flush())
            }
            Self::Stderr => {
                let mut out = io::stderr().lock();
                out.write_all(text.as_bytes()).and_then(|()| out.flush())
            }
            Self::File(file) => file.write_all(text.as_bytes()).and_then(|()| file.flush()),
        };
        // Sink failures are swallowed; logging never stops the machine.
        let _ = result;
    }
}

struct SinkState {
    level: LogLevel,
    log_out: Output,
    device_out: Output,
    handler: Option<OutputHandler>,
}

impl SinkState {
    fn write_channel(&mut self, device: bool, text: &str) {
        if let Some(handler) = &self.handler {
            handler(text);
            return;
        }
        let out = if device {
            &mut self.device_out
        } else {
            &mut self.log_out
        };
        out.write_str(text);
    }
}

static SINK: Lazy<Mutex<SinkState>> = Lazy::new(|| {
    Mutex::new(SinkState {
        level: LogLevel::Info,
        log_out: Output::Stderr,
        device_out: Output::Stdout,
        handler: None,
    })
});

/// Sets the minimum severity the log channel passes through.
pub fn set_level(level: LogLevel) {
    SINK.lock().unwrap().level = level;
}

#[must_use]
pub fn level() -> LogLevel {
    SINK.lock().unwrap().level
}

/// Redirects the log channel to a file. Failure falls back to stderr and
/// is reported there.
pub fn set_log_file(path: &Path) {
    let mut sink = SINK.lock().unwrap();
    match File::create(path) {
        Ok(file) => sink.log_out = Output::File(file),
        Err(err) => {
            sink.log_out = Output::Stderr;
            sink.write_channel(false, &format!("failed to open log file {}: {err}\n", path.display()));
        }
    }
}

/// Redirects the device channel to a file. Failure falls back to stdout.
pub fn set_device_file(path: &Path) {
    let mut sink = SINK.lock().unwrap();
    match File::create(path) {
        Ok(file) => sink.device_out = Output::File(file),
        Err(err) => {
            sink.device_out = Output::Stdout;
            sink.write_channel(false, &format!("failed to open device log file {}: {err}\n", path.display()));
        }
    }
}

/// Installs (or with `None`, clears) the output handler that captures
/// both channels. Safe at any time from any thread.
pub fn set_output_handler(handler: Option<OutputHandler>) {
    SINK.lock().unwrap().handler = handler;
}

/// Formatted, level-filtered write to the log channel. Use through the
/// `log_*!` macros, which capture the call site.
pub fn write(level: LogLevel, file: &str, line: u32, args: Arguments<'_>) {
    let mut sink = SINK.lock().unwrap();
    if level < sink.level {
        return;
    }
    let short_file = file.rsplit(['/', '\\']).next().unwrap_or(file);
    let stamp = Local::now().format("%H:%M:%S");
    let text = format!(
        "[{stamp}] [{}] {short_file}:{line}: {args}\n",
        level.label()
    );
    sink.write_channel(false, &text);
}

/// Unfiltered write to the log channel (command output, trace lines).
pub fn print(args: Arguments<'_>) {
    let mut sink = SINK.lock().unwrap();
    let text = args.to_string();
    sink.write_channel(false, &text);
}

/// Raw write to the device channel (UART TX and friends).
pub fn device_print(args: Arguments<'_>) {
    let mut sink = SINK.lock().unwrap();
    let text = args.to_string();
    sink.write_channel(true, &text);
}

/// Raw bytes to the device channel, written verbatim (lossy on invalid
/// UTF-8 when a handler is installed).
pub fn device_write_bytes(bytes: &[u8]) {
    let mut sink = SINK.lock().unwrap();
    if sink.handler.is_some() {
        let text = String::from_utf8_lossy(bytes).into_owned();
        sink.write_channel(true, &text);
        return;
    }
    match &mut sink.device_out {
        Output::Stdout => {
            let mut out = io::stdout().lock();
            let _ = out.write_all(bytes).and_then(|()| out.flush());
        }
        Output::Stderr => {
            let mut out = io::stderr().lock();
            let _ = out.write_all(bytes).and_then(|()| out.flush());
        }
        Output::File(file) => {
            let _ = file.write_all(bytes).and_then(|()| file.flush());
        }
    }
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::write($crate::LogLevel::Trace, file!(), line!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::write($crate::LogLevel::Debug, file!(), line!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::write($crate::LogLevel::Info, file!(), line!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::write($crate::LogLevel::Warn, file!(), line!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::write($crate::LogLevel::Error, file!(), line!(), format_args!($($arg)*))
    };
}

/// Unfiltered line to the log channel.
#[macro_export]
macro_rules! log_print {
    ($($arg:tt)*) => {
        $crate::print(format_args!($($arg)*))
    };
}

/// Raw output on the device channel.
#[macro_export]
macro_rules! device_print {
    ($($arg:tt)*) => {
        $crate::device_print(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn level_parse_accepts_known_spellings() {
        assert_eq!(LogLevel::parse("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn levels_order_from_trace_to_error() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn output_handler_captures_both_channels_and_filtering() {
        let (tx, rx) = mpsc::channel::<String>();
        set_output_handler(Some(Box::new(move |text| {
            let _ = tx.send(text.to_string());
        })));
        set_level(LogLevel::Warn);

        log_info!("dropped by the filter");
        log_error!("kept: {}", 7);
        device_print!("OK\n");

        set_output_handler(None);
        set_level(LogLevel::Info);

        let lines: Vec<String> = rx.try_iter().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("kept: 7"));
        assert!(lines[0].contains("[ERROR]"));
        assert_eq!(lines[1], "OK\n");
    }
}
