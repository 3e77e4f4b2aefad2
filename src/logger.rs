//! Destinations for forwarded container output.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Receives the output of one container, line by line.
pub trait Logger: Send + Sync {
    fn out(&self, line: &str);
    fn err(&self, line: &str);
}

/// Creates one [`Logger`] per container name.
pub trait LoggerFactory: Send + Sync {
    fn create(&self, name: &str) -> Box<dyn Logger>;
}

/// Writes `name | line` to the process stdout/stderr.
#[derive(Debug, Clone, Default)]
pub struct PrefixLoggerFactory {
    width: usize,
}

impl PrefixLoggerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pad prefixes so that output of containers with names up to `width` aligns.
    pub fn with_width(width: usize) -> Self {
        Self { width }
    }
}

impl LoggerFactory for PrefixLoggerFactory {
    fn create(&self, name: &str) -> Box<dyn Logger> {
        Box::new(PrefixLogger {
            prefix: format!("{:<width$} | ", name, width = self.width),
        })
    }
}

struct PrefixLogger {
    prefix: String,
}

impl Logger for PrefixLogger {
    fn out(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}{}", self.prefix, line);
    }

    fn err(&self, line: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}{}", self.prefix, line);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLoggerFactory;

impl LoggerFactory for NullLoggerFactory {
    fn create(&self, _name: &str) -> Box<dyn Logger> {
        Box::new(NullLogger)
    }
}

struct NullLogger;

impl Logger for NullLogger {
    fn out(&self, _line: &str) {}
    fn err(&self, _line: &str) {}
}

/// A line captured by [`MemoryLoggerFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub name: String,
    pub stderr: bool,
    pub line: String,
}

/// Keeps every forwarded line in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoggerFactory {
    lines: Arc<Mutex<Vec<CapturedLine>>>,
}

impl MemoryLoggerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<CapturedLine> {
        self.lines.lock().clone()
    }
}

impl LoggerFactory for MemoryLoggerFactory {
    fn create(&self, name: &str) -> Box<dyn Logger> {
        Box::new(MemoryLogger {
            name: name.to_string(),
            lines: Arc::clone(&self.lines),
        })
    }
}

struct MemoryLogger {
    name: String,
    lines: Arc<Mutex<Vec<CapturedLine>>>,
}

impl MemoryLogger {
    fn push(&self, stderr: bool, line: &str) {
        self.lines.lock().push(CapturedLine {
            name: self.name.clone(),
            stderr,
            line: line.to_string(),
        });
    }
}

impl Logger for MemoryLogger {
    fn out(&self, line: &str) {
        self.push(false, line);
    }

    fn err(&self, line: &str) {
        self.push(true, line);
    }
}
