//! TCP listener for the operator connection.
//!
//! Exactly one operator is served at a time. A new connection replaces the
//! current one; errors raised by a replaced connection are ignored by
//! comparing connection generations.

use std::io;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use rconsole_common::mutex_lock_or_recover;
use rconsole_protocol::Family;
use rconsole_protocol::FramedTransport;
use rconsole_protocol::Message;
use rconsole_protocol::MessageSink;
use rconsole_protocol::Response;
use rconsole_protocol::TransportError;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::ServerConfig;
use crate::delivery::BatchKind;
use crate::delivery::DeliveryBuffer;
use crate::delivery::TelemetryProducer;
use crate::error::ServerError;
use crate::process::CommandProcessHandler;
use crate::registry::CommandRegistry;
use crate::router::InstructionRouter;

const ACCEPT_POLL: Duration = Duration::from_millis(10);

struct Connection {
    generation: u64,
    transport: Arc<FramedTransport>,
}

struct Link {
    router: InstructionRouter,
    telemetry: TelemetryProducer,
    logs: Arc<DeliveryBuffer>,
    streams: Arc<DeliveryBuffer>,
    current: Mutex<Option<Connection>>,
    generation: AtomicU64,
    write_timeout: Duration,
}

impl Link {
    fn adopt(self: &Arc<Self>, stream: TcpStream) -> Result<(), TransportError> {
        // Accepted sockets must block even though the listener does not.
        stream.set_nonblocking(false)?;
        let transport = FramedTransport::new(stream, Some(self.write_timeout))?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = mutex_lock_or_recover(&self.current).replace(Connection {
            generation,
            transport: Arc::clone(&transport),
        });
        if let Some(previous) = previous {
            info!(
                peer = ?previous.transport.peer_addr(),
                "Replacing existing operator connection"
            );
            self.router.connection_lost();
            previous.transport.close();
        }

        let sink: Arc<dyn MessageSink> = transport.clone();
        let on_message = {
            let link = Arc::clone(self);
            let sink = Arc::clone(&sink);
            move |message| {
                if let Message::Instruction(instruction) = message {
                    link.router.route(instruction, &sink);
                }
            }
        };
        let on_error = {
            let link = Arc::clone(self);
            move |e| link.connection_failed(generation, e)
        };
        if let Err(e) = transport.start_receiving(Family::Instruction, on_message, on_error) {
            self.forget(generation);
            transport.close();
            return Err(e);
        }

        let listing = Response::CommandsListing {
            commands: self.router.registry().help_entries(),
        };
        if let Err(e) = transport.send(&listing.into()) {
            warn!(error = %e, "Failed to announce commands");
        }

        self.logs.send_data(Arc::clone(&sink));
        self.streams.send_data(sink);
        Ok(())
    }

    fn forget(&self, generation: u64) -> Option<Connection> {
        let mut current = mutex_lock_or_recover(&self.current);
        match current.as_ref() {
            Some(connection) if connection.generation == generation => current.take(),
            _ => None,
        }
    }

    fn connection_failed(&self, generation: u64, error: TransportError) {
        let Some(connection) = self.forget(generation) else {
            debug!(generation, error = %error, "Ignoring error from replaced connection");
            return;
        };

        if error.is_disconnect() {
            info!(peer = ?connection.transport.peer_addr(), "Operator disconnected");
        } else {
            warn!(error = %error, "Operator connection failed");
        }
        self.router.connection_lost();
        self.logs.clear_sink();
        self.streams.clear_sink();
        connection.transport.close();
    }

    fn drop_connection(&self) {
        if let Some(connection) = mutex_lock_or_recover(&self.current).as_ref() {
            connection.transport.close();
        }
    }

    fn is_connected(&self) -> bool {
        mutex_lock_or_recover(&self.current).is_some()
    }

    fn shutdown(&self) {
        self.router.connection_lost();
        if let Some(connection) = mutex_lock_or_recover(&self.current).take() {
            connection.transport.close();
        }
        self.logs.shutdown();
        self.streams.shutdown();
    }
}

pub struct RemoteServer {
    listener: TcpListener,
    link: Arc<Link>,
    shutdown: Arc<AtomicBool>,
}

impl RemoteServer {
    /// Binds the listener and starts the delivery senders.
    pub fn bind(config: ServerConfig, registry: CommandRegistry) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.bind_address, config.port);
        let bind_error = |e: io::Error| ServerError::Bind {
            address: address.clone(),
            reason: e.to_string(),
        };
        let listener =
            TcpListener::bind((config.bind_address.as_str(), config.port)).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;

        let logs = DeliveryBuffer::new(BatchKind::Log, config.log_capacity, config.flush_interval);
        let streams =
            DeliveryBuffer::new(BatchKind::Stream, config.log_capacity, config.flush_interval);
        logs.spawn_sender()
            .map_err(|e| ServerError::spawn("log delivery thread", e))?;
        if let Err(e) = streams.spawn_sender() {
            logs.shutdown();
            return Err(ServerError::spawn("stream delivery thread", e));
        }

        let telemetry = TelemetryProducer::new(Arc::clone(&logs), Arc::clone(&streams));
        let router = InstructionRouter::new(
            Arc::new(registry),
            telemetry.clone(),
            config.session.clone(),
        );

        Ok(Self {
            listener,
            link: Arc::new(Link {
                router,
                telemetry,
                logs,
                streams,
                current: Mutex::new(None),
                generation: AtomicU64::new(0),
                write_timeout: config.session.write_timeout,
            }),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn telemetry(&self) -> TelemetryProducer {
        self.link.telemetry.clone()
    }

    /// Setting the flag stops [`run`](Self::run) within one poll interval.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Accepts operator connections until the shutdown flag is set.
    pub fn run(&self) {
        info!(addr = ?self.local_addr().ok(), "Remote console listening");

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "Operator connected");
                    if let Err(e) = self.link.adopt(stream) {
                        error!(peer = %peer, error = %e, "Failed to set up operator connection");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::Relaxed) {
                        error!(error = %e, "Error accepting connection");
                    }
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        info!("Shutting down remote console");
        self.link.shutdown();
    }

    /// Runs the accept loop on a background thread.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let addr = self
            .local_addr()
            .map_err(|e| ServerError::spawn("accept loop", e))?;
        let shutdown = self.shutdown_flag();
        let link = Arc::clone(&self.link);
        let thread = thread::Builder::new()
            .name("rconsole-accept".to_string())
            .spawn(move || self.run())
            .map_err(|e| ServerError::spawn("accept loop", e))?;

        Ok(ServerHandle {
            addr,
            shutdown,
            link,
            thread: Some(thread),
        })
    }
}

impl Drop for RemoteServer {
    fn drop(&mut self) {
        self.link.shutdown();
    }
}

/// Owner of a server started with [`RemoteServer::spawn`]. Dropping it stops
/// the server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    link: Arc<Link>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn telemetry(&self) -> TelemetryProducer {
        self.link.telemetry.clone()
    }

    pub fn active_session(&self) -> Option<Arc<CommandProcessHandler>> {
        self.link.router.active_session()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Closes the operator connection as if the network had dropped it.
    pub fn drop_connection(&self) {
        self.link.drop_connection();
    }

    pub fn stop(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Accept loop panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("addr", &self.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
