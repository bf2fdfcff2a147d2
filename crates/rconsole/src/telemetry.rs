//! Diagnostic logging for both subcommands.
//!
//! The operator console owns stdout, so tracing output goes to stderr or,
//! when `RCONSOLE_LOG` names a file, to that file through a non-blocking
//! writer.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const LOG_FILE_VAR: &str = "RCONSOLE_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogDestination {
    Stderr,
    File(PathBuf),
}

impl LogDestination {
    fn from_var(value: Option<OsString>) -> Self {
        match value {
            Some(path) if !path.is_empty() => LogDestination::File(PathBuf::from(path)),
            _ => LogDestination::Stderr,
        }
    }
}

/// Holds the file writer's worker; buffered lines are flushed when it drops.
#[derive(Debug)]
pub struct TelemetryGuard {
    _worker: Option<WorkerGuard>,
}

/// Installs the global subscriber. `RUST_LOG` overrides `default_level`.
/// A second call leaves the first subscriber in place.
pub fn init_tracing(default_level: &str) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let destination = LogDestination::from_var(std::env::var_os(LOG_FILE_VAR));
    let (writer, worker) = open_writer(&destination);
    let ansi = destination == LogDestination::Stderr && io::stderr().is_terminal();

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_ansi(ansi)
        .with_writer(writer)
        .try_init();

    match installed {
        Ok(()) => TelemetryGuard { _worker: worker },
        Err(_) => TelemetryGuard { _worker: None },
    }
}

fn open_writer(destination: &LogDestination) -> (BoxMakeWriter, Option<WorkerGuard>) {
    let LogDestination::File(path) = destination else {
        return (BoxMakeWriter::new(io::stderr), None);
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            let (writer, worker) = tracing_appender::non_blocking(file);
            (BoxMakeWriter::new(writer), Some(worker))
        }
        Err(e) => {
            // No subscriber exists yet to carry this.
            eprintln!("rconsole: cannot log to {}: {}; using stderr", path.display(), e);
            (BoxMakeWriter::new(io::stderr), None)
        }
    }
}
