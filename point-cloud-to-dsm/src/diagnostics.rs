/// Diagnostic sink handed to every stage entry point.
/// Tile functions never touch a global logger; they report through this handle.
use std::sync::Mutex;

/// Stable code for the resolution/geographic CRS warning.
pub const CRS_MISMATCH_WARNING: &str = "crs_mismatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, level: Level, code: &str, message: &str);

    fn debug(&self, code: &str, message: &str) {
        self.emit(Level::Debug, code, message);
    }

    fn info(&self, code: &str, message: &str) {
        self.emit(Level::Info, code, message);
    }

    fn warn(&self, code: &str, message: &str) {
        self.emit(Level::Warn, code, message);
    }
}

/// Forwards diagnostics to `tracing`, keeping the code as a structured field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, level: Level, code: &str, message: &str) {
        match level {
            Level::Debug => tracing::debug!(code, "{message}"),
            Level::Info => tracing::info!(code, "{message}"),
            Level::Warn => tracing::warn!(code, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub code: String,
    pub message: String,
}

/// Records every diagnostic in memory. Used by tests and by `--check` runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// True if a diagnostic with this level and code was recorded.
    pub fn contains(&self, level: Level, code: &str) -> bool {
        self.entries()
            .iter()
            .any(|d| d.level == level && d.code == code)
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, level: Level, code: &str, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(Diagnostic {
                level,
                code: code.to_string(),
                message: message.to_string(),
            });
        }
    }
}
