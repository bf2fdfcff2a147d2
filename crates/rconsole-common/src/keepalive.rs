//! Heartbeat sender and liveness deadline for one process session.

use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;

use crate::sync::mutex_lock_or_recover;
use crate::waiter::Waiter;

/// When the peer was last heard from. Cloned into whichever thread sees
/// the peer's traffic first, so the deadline never waits on a busy reader.
#[derive(Debug, Clone)]
pub struct Liveness {
    last_seen: Arc<Mutex<Instant>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            last_seen: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Records traffic from the peer.
    pub fn continue_keepalive(&self) {
        *mutex_lock_or_recover(&self.last_seen) = Instant::now();
    }

    pub fn last_seen(&self) -> Instant {
        *mutex_lock_or_recover(&self.last_seen)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    duration: Duration,
    liveness: Liveness,
    stopped: Mutex<bool>,
    wake: Waiter,
}

impl Shared {
    fn expired(&self) -> bool {
        Instant::now() > self.liveness.last_seen() + self.duration
    }

    fn is_stopped(&self) -> bool {
        *mutex_lock_or_recover(&self.stopped)
    }
}

/// Periodically sends a heartbeat and fires a terminate callback once the
/// peer has been silent for longer than `duration`.
///
/// The check runs once per `send_interval`, so a dead peer is detected at most
/// one interval after its deadline. Dropping the watchdog stops it.
pub struct KeepaliveWatchdog {
    shared: Arc<Shared>,
}

impl KeepaliveWatchdog {
    pub fn start<H, T>(
        label: &str,
        duration: Duration,
        send_interval: Duration,
        heartbeat: H,
        on_timeout: T,
    ) -> std::io::Result<Self>
    where
        H: FnMut() + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        Self::watch(label, Liveness::new(), duration, send_interval, heartbeat, on_timeout)
    }

    /// Like [`start`](Self::start), but the deadline follows a `Liveness`
    /// the caller keeps refreshing from elsewhere. The clock restarts now.
    pub fn watch<H, T>(
        label: &str,
        liveness: Liveness,
        duration: Duration,
        send_interval: Duration,
        mut heartbeat: H,
        on_timeout: T,
    ) -> std::io::Result<Self>
    where
        H: FnMut() + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        liveness.continue_keepalive();
        let shared = Arc::new(Shared {
            duration,
            liveness,
            stopped: Mutex::new(false),
            wake: Waiter::new(),
        });

        let worker = Arc::clone(&shared);
        let name = format!("keepalive-{}", label);
        thread::Builder::new().name(name).spawn(move || {
            loop {
                worker.wake.pause_timeout(send_interval);
                if worker.is_stopped() {
                    return;
                }

                // A slow peer can stall this send; stop_watching must not
                // wait behind it.
                heartbeat();

                let mut stopped = mutex_lock_or_recover(&worker.stopped);
                if *stopped {
                    return;
                }
                if worker.expired() {
                    *stopped = true;
                    drop(stopped);
                    debug!("Peer silent past keepalive deadline");
                    on_timeout();
                    return;
                }
            }
        })?;

        Ok(Self { shared })
    }

    /// Records traffic from the peer, pushing the deadline out by `duration`.
    pub fn continue_keepalive(&self) {
        self.shared.liveness.continue_keepalive();
    }

    /// Stops the watchdog. Idempotent and safe to call from the terminate
    /// callback itself.
    pub fn stop_watching(&self) {
        *mutex_lock_or_recover(&self.shared.stopped) = true;
        self.shared.wake.resume();
    }

    pub fn is_watching(&self) -> bool {
        !self.shared.is_stopped()
    }

    pub fn last_seen(&self) -> Instant {
        self.shared.liveness.last_seen()
    }
}

impl Drop for KeepaliveWatchdog {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

impl std::fmt::Debug for KeepaliveWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepaliveWatchdog")
            .field("duration", &self.shared.duration)
            .field("watching", &self.is_watching())
            .finish()
    }
}
