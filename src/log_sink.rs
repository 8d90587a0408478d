use crate::models::CleanupStatus;
use parking_lot::Mutex;
use tracing::info;

/// Destination for the human readable progress lines of a cleanup run.
pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);

    fn status(&self, _status: CleanupStatus) {}
}

/// Keeps every line in memory. Backs the GUI log history and the tests.
#[derive(Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for MemoryLog {
    fn log(&self, line: &str) {
        info!(target: "gmail_cleanup::progress", "{line}");
        self.lines.lock().push(line.to_string());
    }
}

impl<T: LogSink + ?Sized> LogSink for &T {
    fn log(&self, line: &str) {
        (**self).log(line)
    }

    fn status(&self, status: CleanupStatus) {
        (**self).status(status)
    }
}
