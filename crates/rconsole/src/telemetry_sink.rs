use std::sync::Arc;

use rconsole_protocol::Console;
use rconsole_protocol::LogEntry;

/// Consumer of the log and stream entries the remote ships.
pub trait TelemetrySink: Send + Sync {
    fn log_entries(&self, entries: &[LogEntry]);
    fn stream_entries(&self, batch_id: u64, entries: &[LogEntry]);
}

/// Prints remote log lines on the operator console. Stream values are only
/// traced; they arrive too often to print.
pub struct ConsoleTelemetrySink {
    console: Arc<dyn Console>,
}

impl ConsoleTelemetrySink {
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self { console }
    }
}

impl TelemetrySink for ConsoleTelemetrySink {
    fn log_entries(&self, entries: &[LogEntry]) {
        for entry in entries {
            let line = format!("[{}] {}\n", entry.source, entry.payload);
            if entry.is_error {
                self.console.print_err(&line);
            } else {
                self.console.print_sys(&line);
            }
        }
        self.console.flush();
    }

    fn stream_entries(&self, batch_id: u64, entries: &[LogEntry]) {
        for entry in entries {
            tracing::debug!(batch_id, source = %entry.source, value = %entry.payload, "Stream value");
        }
    }
}
