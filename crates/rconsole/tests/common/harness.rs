use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use rconsole::{ClientConfig, TelemetrySink};
use rconsole_protocol::{Console, LogEntry, RecordingConsole, SessionConfig, Terminated};
use rconsole_remote::builtins::register_builtins;
use rconsole_remote::{CommandRegistry, RemoteServer, ServerConfig, ServerHandle};

/// An in-process remote endpoint on a loopback port.
pub struct TestRemote {
    pub handle: ServerHandle,
}

impl TestRemote {
    pub fn start() -> Self {
        Self::start_on(0)
    }

    pub fn start_on(port: u16) -> Self {
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry);
        let config = ServerConfig::default()
            .with_bind_address("127.0.0.1")
            .with_port(port)
            .with_flush_interval(Duration::from_millis(10))
            .with_session(session_config());
        let handle = RemoteServer::bind(config, registry)
            .expect("bind test remote")
            .spawn()
            .expect("spawn test remote");
        Self { handle }
    }

    pub fn port(&self) -> u16 {
        self.handle.local_addr().port()
    }
}

fn session_config() -> SessionConfig {
    SessionConfig::default().with_keepalive(Duration::from_secs(5), Duration::from_millis(200))
}

pub fn client_config(port: u16) -> ClientConfig {
    ClientConfig::default()
        .with_port(port)
        .with_connect_timeout(Duration::from_millis(500))
        .with_reconnect_interval(Duration::from_millis(50))
        .with_session(session_config())
}

/// Port nothing is listening on.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

/// Recording console whose reads block until a line is fed, like a person
/// at a keyboard.
pub struct GatedConsole {
    screen: RecordingConsole,
    lines_tx: Mutex<Option<Sender<String>>>,
    lines: Receiver<String>,
}

impl GatedConsole {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            screen: RecordingConsole::new(),
            lines_tx: Mutex::new(Some(tx)),
            lines: rx,
        }
    }

    pub fn feed(&self, line: &str) {
        if let Some(tx) = self.lines_tx.lock().unwrap().as_ref() {
            tx.send(line.to_string()).unwrap();
        }
    }

    /// Ends input; blocked and later reads fail.
    pub fn close_input(&self) {
        self.lines_tx.lock().unwrap().take();
    }

    pub fn screen(&self) -> &RecordingConsole {
        &self.screen
    }

    pub fn text(&self) -> String {
        self.screen.text()
    }

    pub fn errors(&self) -> Vec<String> {
        self.screen.snapshot().errors
    }

    pub fn system(&self) -> Vec<String> {
        self.screen.snapshot().system
    }
}

impl Console for GatedConsole {
    fn print(&self, text: &str) {
        self.screen.print(text);
    }

    fn print_err(&self, text: &str) {
        self.screen.print_err(text);
    }

    fn print_sys(&self, text: &str) {
        self.screen.print_sys(text);
    }

    fn move_up(&self, lines: u32) {
        self.screen.move_up(lines);
    }

    fn clear_line(&self) {
        self.screen.clear_line();
    }

    fn clear(&self) {
        self.screen.clear();
    }

    fn save_cursor_pos(&self) {
        self.screen.save_cursor_pos();
    }

    fn restore_cursor_pos(&self) {
        self.screen.restore_cursor_pos();
    }

    fn flush(&self) {
        self.screen.flush();
    }

    fn has_input_ready(&self) -> Result<bool, Terminated> {
        Ok(!self.lines.is_empty())
    }

    fn read_input_line(&self) -> Result<String, Terminated> {
        self.lines.recv().map_err(|_| Terminated)
    }

    fn clear_waiting_input_lines(&self) {
        while self.lines.try_recv().is_ok() {}
        self.screen.clear_waiting_input_lines();
    }
}

#[derive(Default)]
pub struct CollectingTelemetry {
    logs: Mutex<Vec<LogEntry>>,
    streams: Mutex<Vec<(u64, LogEntry)>>,
}

impl CollectingTelemetry {
    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().unwrap().clone()
    }

    pub fn streams(&self) -> Vec<(u64, LogEntry)> {
        self.streams.lock().unwrap().clone()
    }
}

impl TelemetrySink for CollectingTelemetry {
    fn log_entries(&self, entries: &[LogEntry]) {
        self.logs.lock().unwrap().extend_from_slice(entries);
    }

    fn stream_entries(&self, batch_id: u64, entries: &[LogEntry]) {
        self.streams
            .lock()
            .unwrap()
            .extend(entries.iter().cloned().map(|e| (batch_id, e)));
    }
}
