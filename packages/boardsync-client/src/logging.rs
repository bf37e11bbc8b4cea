/// Logger setup: env_logger output to stderr plus an in-memory ring of recent
/// warnings and errors that a UI can poll for a status indicator.
use env_logger::Logger;
use log::{Level, Log, Metadata, Record, SetLoggerError};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{LazyLock, Mutex};

const MAX_LOG_ENTRIES: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

struct RecentLog {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl RecentLog {
    fn push(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push_back(entry);
            while entries.len() > MAX_LOG_ENTRIES {
                entries.pop_front();
            }
        }
    }

    fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

static RECENT: LazyLock<RecentLog> = LazyLock::new(|| RecentLog {
    entries: Mutex::new(VecDeque::with_capacity(MAX_LOG_ENTRIES)),
});

struct RecordingLogger {
    inner: Logger,
}

impl Log for RecordingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if record.level() <= Level::Warn {
            RECENT.push(LogEntry {
                timestamp: chrono::Utc::now().to_rfc3339(),
                level: record.level().to_string().to_lowercase(),
                target: record.target().to_string(),
                message: record.args().to_string(),
            });
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the global logger. Filter defaults to `info`; `RUST_LOG` overrides.
pub fn init() -> Result<(), SetLoggerError> {
    let inner =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let max_level = inner.filter();
    let logger = Box::leak(Box::new(RecordingLogger { inner }));
    log::set_logger(logger)?;
    log::set_max_level(max_level);
    Ok(())
}

/// Most recent warnings and errors, oldest first.
pub fn recent_entries() -> Vec<LogEntry> {
    RECENT.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_bounded() {
        let ring = RecentLog {
            entries: Mutex::new(VecDeque::new()),
        };
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            ring.push(LogEntry {
                timestamp: String::new(),
                level: "warn".into(),
                target: "test".into(),
                message: format!("entry {}", i),
            });
        }
        let entries = ring.snapshot();
        assert_eq!(entries.len(), MAX_LOG_ENTRIES);
        assert_eq!(entries[0].message, "entry 5");
    }
}
