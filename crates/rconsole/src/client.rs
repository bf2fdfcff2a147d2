//! Operator-side connection manager.
//!
//! Owns the link to the remote, reconnects on a timer after it drops, and
//! routes process traffic to the session currently being driven.

use std::env;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use rconsole_common::mutex_lock_or_recover;
use rconsole_common::Handoff;
use rconsole_common::Liveness;
use rconsole_common::SignalWaiter;
use rconsole_common::Waiter;
use rconsole_protocol::config::env_millis;
use rconsole_protocol::connect_stream;
use rconsole_protocol::Console;
use rconsole_protocol::Family;
use rconsole_protocol::FramedTransport;
use rconsole_protocol::HelpEntry;
use rconsole_protocol::Instruction;
use rconsole_protocol::Message;
use rconsole_protocol::MessageSink;
use rconsole_protocol::Response;
use rconsole_protocol::SessionConfig;
use rconsole_protocol::TransportError;
use rconsole_protocol::DEFAULT_PORT;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::driver::RemoteProcessHandler;
use crate::driver::SessionEvent;
use crate::driver::SessionOutcome;
use crate::error::ClientError;
use crate::telemetry_sink::TelemetrySink;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_RECONNECT_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub reconnect_interval: Duration,
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_MS),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            host: env::var("RCONSOLE_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: env::var("RCONSOLE_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            connect_timeout: env_millis("RCONSOLE_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect_interval: env_millis("RCONSOLE_RECONNECT_MS", DEFAULT_RECONNECT_MS),
            session: SessionConfig::from_env(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Route {
    process_id: u32,
    events: Sender<SessionEvent>,
    liveness: Liveness,
}

struct Link {
    generation: u64,
    transport: Arc<FramedTransport>,
}

struct Shared {
    config: ClientConfig,
    console: Arc<dyn Console>,
    telemetry: Arc<dyn TelemetrySink>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    route: Mutex<Option<Route>>,
    commands: Mutex<Vec<HelpEntry>>,
    check: SignalWaiter<()>,
    // Serializes connection checks; the waiter carries one answer at a time.
    checking: Mutex<()>,
    // (epoch, batch id) of the last stream batch applied.
    last_stream_batch: Mutex<Option<(u64, u64)>>,
    next_process_id: AtomicU32,
    loss_reported: AtomicBool,
    shutdown: AtomicBool,
    wake: Arc<Waiter>,
}

impl Shared {
    fn establish(self: &Arc<Self>) -> Result<(), ClientError> {
        let addr = self.config.address();
        let stream = connect_stream(&self.config.host, self.config.port, self.config.connect_timeout)
            .map_err(|e| ClientError::ConnectFailed {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        let transport = FramedTransport::new(stream, Some(self.config.session.write_timeout))?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        *mutex_lock_or_recover(&self.link) = Some(Link {
            generation,
            transport: Arc::clone(&transport),
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        let on_message = {
            let weak = weak.clone();
            move |message| {
                if let (Some(shared), Message::Response(response)) = (weak.upgrade(), message) {
                    shared.dispatch(response);
                }
            }
        };
        let on_error = move |e| {
            if let Some(shared) = weak.upgrade() {
                shared.connection_failed(generation, e);
            }
        };
        if let Err(e) = transport.start_receiving(Family::Response, on_message, on_error) {
            *mutex_lock_or_recover(&self.link) = None;
            transport.close();
            return Err(e.into());
        }

        self.loss_reported.store(false, Ordering::SeqCst);
        info!(addr = %addr, "Connected to remote console");
        Ok(())
    }

    fn dispatch(&self, response: Response) {
        match response {
            Response::ConnectionResponse => {
                self.check.receive(());
            }
            Response::CommandOutput(output) => {
                let process_id = output.process_id;
                self.route_traffic(process_id, Some(SessionEvent::Output(output)));
            }
            Response::Keepalive { process_id } => self.route_traffic(process_id, None),
            Response::CommandsListing { commands } => {
                debug!(count = commands.len(), "Received command listing");
                *mutex_lock_or_recover(&self.commands) = commands;
            }
            Response::LogData { entries } => self.telemetry.log_entries(&entries),
            Response::StreamData {
                epoch,
                batch_id,
                entries,
            } => {
                {
                    let mut last = mutex_lock_or_recover(&self.last_stream_batch);
                    // Only the batch in flight is ever resent, so a repeat of
                    // the last applied id from the same buffer is the one
                    // duplicate possible. A new epoch means a restarted remote.
                    if *last == Some((epoch, batch_id)) {
                        debug!(epoch, batch_id, "Dropping duplicate stream batch");
                        return;
                    }
                    *last = Some((epoch, batch_id));
                }
                self.telemetry.stream_entries(batch_id, &entries);
            }
        }
    }

    /// Any traffic for the active process counts as a sign of life. The
    /// deadline is refreshed here because the driver may sit in a local read
    /// for longer than the keepalive duration.
    fn route_traffic(&self, process_id: u32, event: Option<SessionEvent>) {
        let route = mutex_lock_or_recover(&self.route);
        match route.as_ref() {
            Some(route) if route.process_id == process_id => {
                route.liveness.continue_keepalive();
                if let Some(event) = event {
                    let _ = route.events.send(event);
                }
            }
            _ => debug!(process_id, "Dropping traffic for inactive process"),
        }
    }

    fn connection_failed(&self, generation: u64, error: TransportError) {
        {
            let mut link = mutex_lock_or_recover(&self.link);
            match link.as_ref() {
                Some(current) if current.generation == generation => *link = None,
                _ => return,
            }
        }

        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }

        warn!(error = %error, "Connection to remote lost");
        if !self.loss_reported.swap(true, Ordering::SeqCst) {
            self.console.print_err(&format!(
                "Connection to remote lost ({}). Reconnecting...\n",
                error
            ));
            self.console.flush();
        }

        if let Some(route) = mutex_lock_or_recover(&self.route).as_ref() {
            let _ = route.events.send(SessionEvent::Disconnected);
        }
        self.wake.resume();
    }

    fn current_transport(&self) -> Option<Arc<FramedTransport>> {
        mutex_lock_or_recover(&self.link)
            .as_ref()
            .map(|link| Arc::clone(&link.transport))
    }

    fn is_connected(&self) -> bool {
        mutex_lock_or_recover(&self.link).is_some()
    }

    fn reconnect_loop(weak: Weak<Self>, wake: Arc<Waiter>, interval: Duration) {
        loop {
            {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if !shared.is_connected() {
                    shared.try_reconnect();
                }
            }
            wake.pause_timeout(interval);
        }
    }

    fn try_reconnect(self: &Arc<Self>) {
        let was_reported = self.loss_reported.load(Ordering::SeqCst);
        match self.establish() {
            Ok(()) => {
                let verb = if was_reported { "Reconnected" } else { "Connected" };
                self.console
                    .print_sys(&format!("{} to {}\n", verb, self.config.address()));
                self.console.flush();
            }
            Err(e) => debug!(error = %e, "Reconnect attempt failed"),
        }
    }
}

impl MessageSink for Shared {
    fn send_message(&self, message: Message) -> Result<(), TransportError> {
        match self.current_transport() {
            Some(transport) => transport.send(&message),
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

/// Handle to the remote console. Dropping it closes the connection and stops
/// reconnecting.
pub struct RemoteClient {
    shared: Arc<Shared>,
}

impl RemoteClient {
    /// Connects, failing if the remote is unreachable right now.
    pub fn connect(
        config: ClientConfig,
        console: Arc<dyn Console>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, ClientError> {
        let client = Self::build(config, console, telemetry);
        client.shared.establish()?;
        client.spawn_reconnect()?;
        Ok(client)
    }

    /// Starts without requiring the remote to be up. The first failure is
    /// reported on the console and connecting continues in the background.
    pub fn start(
        config: ClientConfig,
        console: Arc<dyn Console>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, ClientError> {
        let client = Self::build(config, console, telemetry);
        if let Err(e) = client.shared.establish() {
            warn!(error = %e, "Initial connection failed");
            client.shared.loss_reported.store(true, Ordering::SeqCst);
            client.shared.console.print_err(&format!(
                "Unable to reach remote at {}: {}. Retrying in the background.\n",
                client.shared.config.address(),
                e
            ));
            client.shared.console.flush();
        }
        client.spawn_reconnect()?;
        Ok(client)
    }

    fn build(config: ClientConfig, console: Arc<dyn Console>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                console,
                telemetry,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                route: Mutex::new(None),
                commands: Mutex::new(Vec::new()),
                check: SignalWaiter::new(),
                checking: Mutex::new(()),
                last_stream_batch: Mutex::new(None),
                next_process_id: AtomicU32::new(1),
                loss_reported: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                wake: Arc::new(Waiter::new()),
            }),
        }
    }

    fn spawn_reconnect(&self) -> Result<(), ClientError> {
        let weak = Arc::downgrade(&self.shared);
        let wake = Arc::clone(&self.shared.wake);
        let interval = self.shared.config.reconnect_interval;
        thread::Builder::new()
            .name("rconsole-reconnect".to_string())
            .spawn(move || Shared::reconnect_loop(weak, wake, interval))
            .map_err(|e| ClientError::spawn("reconnect thread", e))?;
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Round-trips a connection check. Returns `false` when no answer comes
    /// back within `timeout`.
    pub fn check_connection(&self, timeout: Duration) -> bool {
        let _checking = mutex_lock_or_recover(&self.shared.checking);
        if !self.shared.check.arm() {
            return false;
        }
        if let Err(e) = self.shared.send_message(Instruction::ConnectionCheck.into()) {
            debug!(error = %e, "Connection check not sent");
            return false;
        }
        matches!(self.shared.check.pause_timeout(timeout), Handoff::Value(()))
    }

    /// Commands the remote announced on the most recent connection.
    pub fn commands(&self) -> Vec<HelpEntry> {
        mutex_lock_or_recover(&self.shared.commands).clone()
    }

    /// Runs `command_line` remotely against the client's console. Blocks
    /// until the process session ends.
    pub fn execute(&self, command_line: &str) -> Result<SessionOutcome, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let process_id = self.shared.next_process_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = crossbeam_channel::unbounded();
        let liveness = Liveness::new();
        *mutex_lock_or_recover(&self.shared.route) = Some(Route {
            process_id,
            events: tx.clone(),
            liveness: liveness.clone(),
        });

        let link: Arc<dyn MessageSink> = self.shared.clone();
        let handler = RemoteProcessHandler::new(
            process_id,
            link,
            Arc::clone(&self.shared.console),
            (tx, rx),
            self.shared.config.session.clone(),
        )
        .with_liveness(liveness);
        let outcome = handler.execute(command_line);

        let mut route = mutex_lock_or_recover(&self.shared.route);
        if route.as_ref().is_some_and(|r| r.process_id == process_id) {
            *route = None;
        }
        outcome
    }

    /// Closes the connection and stops reconnecting.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.check.kill();
        if let Some(link) = mutex_lock_or_recover(&self.shared.link).take() {
            link.transport.close();
        }
        self.shared.wake.resume();
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("address", &self.shared.config.address())
            .field("connected", &self.is_connected())
            .finish()
    }
}
