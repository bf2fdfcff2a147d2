//! Ctrl-C and `kill` stop `rconsole serve` through the accept loop's
//! shutdown flag, so the operator link is closed the normal way.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGTERM;
use signal_hook::iterator::Handle;
use signal_hook::iterator::Signals;
use tracing::debug;
use tracing::info;

use crate::error::ServerError;

/// Raises the shutdown flag on the first SIGINT or SIGTERM. Dropping it
/// stops watching.
pub struct SignalHandler {
    signals: Handle,
    watcher: Option<JoinHandle<()>>,
}

impl SignalHandler {
    pub fn setup(shutdown: Arc<AtomicBool>) -> Result<Self, ServerError> {
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).map_err(|e| ServerError::SignalSetup(e.to_string()))?;
        let handle = signals.handle();

        let watcher = thread::Builder::new()
            .name("rconsole-signals".to_string())
            .spawn(move || match signals.forever().next() {
                Some(signal) => {
                    let name = if signal == SIGINT { "SIGINT" } else { "SIGTERM" };
                    info!(signal = name, "Stopping remote console");
                    shutdown.store(true, Ordering::SeqCst);
                }
                None => debug!("Signal watch closed"),
            })
            .map_err(|e| ServerError::SignalSetup(format!("cannot start signal watcher: {}", e)))?;

        Ok(Self {
            signals: handle,
            watcher: Some(watcher),
        })
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.signals.close();
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
    }
}

impl std::fmt::Debug for SignalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHandler")
            .field("closed", &self.signals.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_sigterm_raises_shutdown_flag() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handler = SignalHandler::setup(Arc::clone(&shutdown)).unwrap();

        signal_hook::low_level::raise(SIGTERM).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !shutdown.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(shutdown.load(Ordering::SeqCst));
        drop(handler);
    }
}
