/// Structured logging module for the VelaOS kernel
/// Provides logging with format: [subsys][LEVEL] message
/// Supports log levels: ERROR, WARN, INFO, DEBUG, TRACE
///
/// Formatted records accumulate in a fixed in-kernel ring buffer so a
/// dmesg-style consumer can drain them after the fact.

use spin::Mutex;
use core::fmt;

/// Size of the kernel log ring buffer in bytes
const KLOG_SIZE: usize = 16384;

/// Log levels for kernel logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Critical errors that may cause system instability
    Error = 0,
    /// Warning conditions that should be addressed
    Warn = 1,
    /// Informational messages about important events
    Info = 2,
    /// Detailed debugging information
    Debug = 3,
    /// Very verbose tracing information
    Trace = 4,
}

impl LogLevel {
    /// Get the string representation of the log level
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Global log level filter
/// Only messages at or below this level will be logged
static LOG_LEVEL: core::sync::atomic::AtomicU8 =
    core::sync::atomic::AtomicU8::new(LogLevel::Info as u8);

/// Set the global log level
pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, core::sync::atomic::Ordering::Relaxed);
}

/// Get the current global log level
pub fn get_log_level() -> LogLevel {
    let level = LOG_LEVEL.load(core::sync::atomic::Ordering::Relaxed);
    match level {
        0 => LogLevel::Error,
        1 => LogLevel::Warn,
        2 => LogLevel::Info,
        3 => LogLevel::Debug,
        4 => LogLevel::Trace,
        _ => LogLevel::Info,
    }
}

/// Check if a log level should be logged
#[inline]
pub fn should_log(level: LogLevel) -> bool {
    level <= get_log_level()
}

/// Fixed-size byte ring holding formatted log records
struct LogRing {
    buf: [u8; KLOG_SIZE],
    /// Index of the oldest byte
    head: usize,
    /// Number of live bytes
    len: usize,
}

impl LogRing {
    const fn new() -> Self {
        Self {
            buf: [0; KLOG_SIZE],
            head: 0,
            len: 0,
        }
    }

    /// Append a byte, overwriting the oldest byte when full
    fn push(&mut self, byte: u8) {
        let tail = (self.head + self.len) % KLOG_SIZE;
        self.buf[tail] = byte;
        if self.len < KLOG_SIZE {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % KLOG_SIZE;
        }
    }

    /// Copy the current contents into `out`, oldest byte first
    fn snapshot(&self, out: &mut alloc::vec::Vec<u8>) {
        out.reserve(self.len);
        for i in 0..self.len {
            out.push(self.buf[(self.head + i) % KLOG_SIZE]);
        }
    }
}

impl fmt::Write for LogRing {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.push(byte);
        }
        Ok(())
    }
}

/// Global kernel log ring
static KLOG: Mutex<LogRing> = Mutex::new(LogRing::new());

/// Internal logging function
/// Format: [subsys][LEVEL] message
#[doc(hidden)]
pub fn _log(level: LogLevel, subsys: &str, args: fmt::Arguments) {
    use core::fmt::Write;

    if !should_log(level) {
        return;
    }

    let mut ring = KLOG.lock();
    // Formatting into the ring cannot fail
    let _ = write!(ring, "[{}][{}] {}\n", subsys, level.as_str(), args);
}

/// Take a snapshot of the kernel log contents as a string
///
/// Bytes that were overwritten mid-record may leave a truncated first
/// line; the ring only guarantees the most recent KLOG_SIZE bytes.
pub fn log_snapshot() -> alloc::string::String {
    let mut bytes = alloc::vec::Vec::new();
    KLOG.lock().snapshot(&mut bytes);
    alloc::string::String::from_utf8_lossy(&bytes).into_owned()
}

/// Log an error message
/// Format: [subsys][ERROR] message
#[macro_export]
macro_rules! log_error {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Error,
            $subsys,
            format_args!($($arg)*)
        )
    };
}

/// Log a warning message
/// Format: [subsys][WARN] message
#[macro_export]
macro_rules! log_warn {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Warn,
            $subsys,
            format_args!($($arg)*)
        )
    };
}

/// Log an informational message
/// Format: [subsys][INFO] message
#[macro_export]
macro_rules! log_info {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Info,
            $subsys,
            format_args!($($arg)*)
        )
    };
}

/// Log a debug message
/// Format: [subsys][DEBUG] message
#[macro_export]
macro_rules! log_debug {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Debug,
            $subsys,
            format_args!($($arg)*)
        )
    };
}

/// Log a trace message
/// Format: [subsys][TRACE] message
#[macro_export]
macro_rules! log_trace {
    ($subsys:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Trace,
            $subsys,
            format_args!($($arg)*)
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert!(should_log(LogLevel::Error));
        assert!(should_log(LogLevel::Info));

        set_log_level(LogLevel::Error);
        assert!(!should_log(LogLevel::Info));
        set_log_level(LogLevel::Info);
    }

    #[test]
    fn test_ring_wraps() {
        let mut ring = LogRing::new();
        for _ in 0..KLOG_SIZE + 10 {
            ring.push(b'a');
        }
        assert_eq!(ring.len, KLOG_SIZE);

        ring.push(b'z');
        let mut out = alloc::vec::Vec::new();
        ring.snapshot(&mut out);
        assert_eq!(out.len(), KLOG_SIZE);
        assert_eq!(*out.last().unwrap(), b'z');
    }

    #[test]
    fn test_log_reaches_ring() {
        log_warn!("selftest", "ring smoke {}", 42);
        let text = log_snapshot();
        assert!(text.contains("[selftest][WARN] ring smoke 42"));
    }
}
