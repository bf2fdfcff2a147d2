//! Bounded buffers that ship log and stream entries to the operator.
//!
//! Entries wait in the buffer until a send succeeds. A batch that fails stays
//! in flight and is resent with the same id, so the operator side can drop
//! the duplicate if the first attempt did arrive.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rconsole_common::mutex_lock_or_recover;
use rconsole_common::Waiter;
use rconsole_protocol::LogEntry;
use rconsole_protocol::MessageSink;
use rconsole_protocol::Response;
use rconsole_protocol::TransportError;
use tracing::debug;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Log,
    Stream,
}

impl BatchKind {
    fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Log => "log",
            BatchKind::Stream => "stream",
        }
    }
}

/// Distinct per buffer, including across restarts of the remote process.
fn new_epoch() -> u64 {
    static CREATED: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    (nanos ^ (u64::from(std::process::id()) << 32))
        .wrapping_add(CREATED.fetch_add(1, Ordering::Relaxed))
}

struct Buffered {
    seq: u64,
    entry: LogEntry,
}

#[derive(Clone, Copy)]
struct InFlight {
    batch_id: u64,
    last_seq: u64,
}

struct State {
    entries: VecDeque<Buffered>,
    next_seq: u64,
    next_batch_id: u64,
    in_flight: Option<InFlight>,
    sink: Option<Arc<dyn MessageSink>>,
    sink_generation: u64,
    shutdown: bool,
}

pub struct DeliveryBuffer {
    kind: BatchKind,
    epoch: u64,
    capacity: usize,
    flush_interval: Duration,
    state: Mutex<State>,
    // Serializes snapshot-send-remove so two flushes never ship the same batch.
    sending: Mutex<()>,
    wake: Waiter,
}

impl DeliveryBuffer {
    pub fn new(kind: BatchKind, capacity: usize, flush_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            epoch: new_epoch(),
            capacity: capacity.max(1),
            flush_interval,
            state: Mutex::new(State {
                entries: VecDeque::new(),
                next_seq: 0,
                next_batch_id: 1,
                in_flight: None,
                sink: None,
                sink_generation: 0,
                shutdown: false,
            }),
            sending: Mutex::new(()),
            wake: Waiter::new(),
        })
    }

    /// Starts the background sender. It flushes whenever woken and at least
    /// once per flush interval until [`shutdown`](Self::shutdown).
    pub fn spawn_sender(self: &Arc<Self>) -> io::Result<()> {
        let buffer = Arc::clone(self);
        thread::Builder::new()
            .name(format!("delivery-{}", self.kind.as_str()))
            .spawn(move || buffer.sender_loop())?;
        Ok(())
    }

    fn sender_loop(&self) {
        loop {
            self.wake.pause_timeout(self.flush_interval);
            if mutex_lock_or_recover(&self.state).shutdown {
                debug!(kind = self.kind.as_str(), "Delivery sender stopped");
                return;
            }
            if let Err(e) = self.flush_once() {
                warn!(
                    kind = self.kind.as_str(),
                    error = %e,
                    "Delivery failed, entries kept for retry"
                );
            }
        }
    }

    /// Buffers an entry, evicting the oldest when full.
    pub fn add_data(&self, entry: LogEntry) {
        {
            let mut state = mutex_lock_or_recover(&self.state);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push_back(Buffered { seq, entry });
            if state.entries.len() > self.capacity {
                state.entries.pop_front();
            }
        }
        self.wake.resume();
    }

    /// Supplies the live connection and wakes the sender.
    pub fn send_data(&self, sink: Arc<dyn MessageSink>) {
        {
            let mut state = mutex_lock_or_recover(&self.state);
            state.sink = Some(sink);
            state.sink_generation += 1;
        }
        self.wake.resume();
    }

    /// Forgets the current connection. Entries stay buffered.
    pub fn clear_sink(&self) {
        let mut state = mutex_lock_or_recover(&self.state);
        state.sink = None;
        state.sink_generation += 1;
    }

    /// Ships one batch of everything buffered, or resends the batch still in
    /// flight. Returns the number of entries delivered.
    pub fn flush_once(&self) -> Result<usize, TransportError> {
        let _sending = mutex_lock_or_recover(&self.sending);

        let (sink, generation, batch, entries) = {
            let mut state = mutex_lock_or_recover(&self.state);
            let Some(sink) = state.sink.clone() else {
                return Ok(0);
            };
            let batch = match state.in_flight {
                Some(batch) => batch,
                None => {
                    let Some(last) = state.entries.back() else {
                        return Ok(0);
                    };
                    let batch = InFlight {
                        batch_id: state.next_batch_id,
                        last_seq: last.seq,
                    };
                    state.in_flight = Some(batch);
                    batch
                }
            };
            let entries: Vec<LogEntry> = state
                .entries
                .iter()
                .take_while(|b| b.seq <= batch.last_seq)
                .map(|b| b.entry.clone())
                .collect();
            if entries.is_empty() {
                // Everything in flight was evicted; the batch is gone either way.
                state.in_flight = None;
                state.next_batch_id = batch.batch_id + 1;
                return Ok(0);
            }
            (sink, state.sink_generation, batch, entries)
        };

        let count = entries.len();
        let response = match self.kind {
            BatchKind::Log => Response::LogData { entries },
            BatchKind::Stream => Response::StreamData {
                epoch: self.epoch,
                batch_id: batch.batch_id,
                entries,
            },
        };

        let result = sink.send_message(response.into());

        let mut state = mutex_lock_or_recover(&self.state);
        match result {
            Ok(()) => {
                state.entries.retain(|b| b.seq > batch.last_seq);
                state.in_flight = None;
                state.next_batch_id = batch.batch_id + 1;
                debug!(
                    kind = self.kind.as_str(),
                    batch_id = batch.batch_id,
                    count,
                    "Delivered batch"
                );
                Ok(count)
            }
            Err(e) => {
                if state.sink_generation == generation {
                    state.sink = None;
                }
                Err(e)
            }
        }
    }

    /// Stops the sender thread. Buffered entries are dropped with the buffer.
    pub fn shutdown(&self) {
        mutex_lock_or_recover(&self.state).shutdown = true;
        self.wake.resume();
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    /// Tags stream batches so the operator can tell a restarted remote
    /// from a resend.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        mutex_lock_or_recover(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_sink(&self) -> bool {
        mutex_lock_or_recover(&self.state).sink.is_some()
    }

    /// Id the next new batch will carry. A failed batch keeps its id.
    pub fn next_batch_id(&self) -> u64 {
        let state = mutex_lock_or_recover(&self.state);
        state
            .in_flight
            .map(|b| b.batch_id)
            .unwrap_or(state.next_batch_id)
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        mutex_lock_or_recover(&self.state)
            .entries
            .iter()
            .map(|b| b.entry.clone())
            .collect()
    }
}

impl std::fmt::Debug for DeliveryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryBuffer")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// Handle commands use to emit log lines and stream values.
#[derive(Debug, Clone)]
pub struct TelemetryProducer {
    logs: Arc<DeliveryBuffer>,
    streams: Arc<DeliveryBuffer>,
}

impl TelemetryProducer {
    pub fn new(logs: Arc<DeliveryBuffer>, streams: Arc<DeliveryBuffer>) -> Self {
        Self { logs, streams }
    }

    pub fn log(&self, source: &str, payload: &str) {
        self.logs.add_data(LogEntry::new(source, payload, false));
    }

    pub fn error(&self, source: &str, payload: &str) {
        self.logs.add_data(LogEntry::new(source, payload, true));
    }

    pub fn stream(&self, source: &str, value: &str) {
        self.streams.add_data(LogEntry::new(source, value, false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;
    use rconsole_protocol::Message;
    use std::time::Instant;

    fn entry(n: usize) -> LogEntry {
        LogEntry::new("test", format!("entry {}", n), false)
    }

    fn stream_batches(sink: &RecordingSink) -> Vec<(u64, Vec<LogEntry>)> {
        sink.responses()
            .into_iter()
            .filter_map(|r| match r {
                Response::StreamData {
                    batch_id, entries, ..
                } => Some((batch_id, entries)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_nothing_sent_without_sink() {
        let buffer = DeliveryBuffer::new(BatchKind::Log, 10, Duration::from_secs(1));
        buffer.add_data(entry(1));

        assert_eq!(buffer.flush_once().unwrap(), 0);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_success_removes_entries() {
        let buffer = DeliveryBuffer::new(BatchKind::Log, 10, Duration::from_secs(1));
        let sink = Arc::new(RecordingSink::new());
        buffer.add_data(entry(1));
        buffer.add_data(entry(2));
        buffer.send_data(sink.clone());

        assert_eq!(buffer.flush_once().unwrap(), 2);
        assert!(buffer.is_empty());
        assert_eq!(
            sink.responses(),
            vec![Response::LogData {
                entries: vec![entry(1), entry(2)]
            }]
        );
    }

    #[test]
    fn test_failure_keeps_entries_and_drops_sink() {
        let buffer = DeliveryBuffer::new(BatchKind::Log, 10, Duration::from_secs(1));
        let sink = Arc::new(RecordingSink::new());
        sink.set_failing(true);
        buffer.add_data(entry(1));
        buffer.send_data(sink.clone());

        assert!(buffer.flush_once().is_err());
        assert_eq!(buffer.snapshot(), vec![entry(1)]);
        assert!(!buffer.has_sink());
    }

    #[test]
    fn test_retry_delivers_each_entry_once_in_order() {
        let buffer = DeliveryBuffer::new(BatchKind::Log, 10, Duration::from_secs(1));
        let sink = Arc::new(RecordingSink::new());
        sink.set_failing(true);
        buffer.send_data(sink.clone());
        buffer.add_data(entry(1));
        assert!(buffer.flush_once().is_err());

        buffer.add_data(entry(2));
        sink.set_failing(false);
        buffer.send_data(sink.clone());
        assert_eq!(buffer.flush_once().unwrap(), 1);
        assert_eq!(buffer.flush_once().unwrap(), 1);
        assert_eq!(buffer.flush_once().unwrap(), 0);

        let delivered: Vec<LogEntry> = sink
            .responses()
            .into_iter()
            .flat_map(|r| match r {
                Response::LogData { entries } => entries,
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(delivered, vec![entry(1), entry(2)]);
    }

    #[test]
    fn test_batch_id_advances_only_on_success() {
        let buffer = DeliveryBuffer::new(BatchKind::Stream, 10, Duration::from_secs(1));
        let sink = Arc::new(RecordingSink::new());
        buffer.send_data(sink.clone());
        assert_eq!(buffer.next_batch_id(), 1);

        buffer.add_data(entry(1));
        buffer.flush_once().unwrap();
        assert_eq!(buffer.next_batch_id(), 2);

        sink.set_failing(true);
        buffer.add_data(entry(2));
        assert!(buffer.flush_once().is_err());
        assert_eq!(buffer.next_batch_id(), 2);

        sink.set_failing(false);
        buffer.add_data(entry(3));
        buffer.send_data(sink.clone());
        buffer.flush_once().unwrap();
        buffer.flush_once().unwrap();

        assert_eq!(
            stream_batches(&sink),
            vec![
                (1, vec![entry(1)]),
                (2, vec![entry(2)]),
                (3, vec![entry(3)]),
            ]
        );
        assert_eq!(buffer.next_batch_id(), 4);
    }

    #[test]
    fn test_stream_batches_carry_buffer_epoch() {
        let first = DeliveryBuffer::new(BatchKind::Stream, 10, Duration::from_secs(1));
        let second = DeliveryBuffer::new(BatchKind::Stream, 10, Duration::from_secs(1));
        assert_ne!(first.epoch(), second.epoch());

        let sink = Arc::new(RecordingSink::new());
        first.send_data(sink.clone());
        first.add_data(entry(1));
        first.flush_once().unwrap();

        assert_eq!(
            sink.responses(),
            vec![Response::StreamData {
                epoch: first.epoch(),
                batch_id: 1,
                entries: vec![entry(1)],
            }]
        );
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let buffer = DeliveryBuffer::new(BatchKind::Log, 3, Duration::from_secs(1));
        for n in 0..5 {
            buffer.add_data(entry(n));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.snapshot(), vec![entry(2), entry(3), entry(4)]);
    }

    #[test]
    fn test_in_flight_batch_fully_evicted_is_abandoned() {
        let buffer = DeliveryBuffer::new(BatchKind::Stream, 2, Duration::from_secs(1));
        let sink = Arc::new(RecordingSink::new());
        sink.set_failing(true);
        buffer.send_data(sink.clone());
        buffer.add_data(entry(1));
        assert!(buffer.flush_once().is_err());

        buffer.add_data(entry(2));
        buffer.add_data(entry(3));
        sink.set_failing(false);
        buffer.send_data(sink.clone());

        assert_eq!(buffer.flush_once().unwrap(), 0);
        assert_eq!(buffer.flush_once().unwrap(), 2);
        assert_eq!(stream_batches(&sink), vec![(2, vec![entry(2), entry(3)])]);
    }

    #[test]
    fn test_sender_thread_delivers_after_connection_supplied() {
        let buffer = DeliveryBuffer::new(BatchKind::Log, 10, Duration::from_millis(20));
        buffer.spawn_sender().unwrap();
        buffer.add_data(entry(1));

        thread::sleep(Duration::from_millis(60));
        assert_eq!(buffer.len(), 1);

        let sink = Arc::new(RecordingSink::new());
        buffer.send_data(sink.clone());

        let deadline = Instant::now() + Duration::from_secs(2);
        while !buffer.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        buffer.shutdown();

        assert!(buffer.is_empty());
        assert_eq!(
            sink.sent(),
            vec![Message::from(Response::LogData {
                entries: vec![entry(1)]
            })]
        );
    }

    #[test]
    fn test_telemetry_producer_routes_entries() {
        let logs = DeliveryBuffer::new(BatchKind::Log, 10, Duration::from_secs(1));
        let streams = DeliveryBuffer::new(BatchKind::Stream, 10, Duration::from_secs(1));
        let producer = TelemetryProducer::new(logs.clone(), streams.clone());

        producer.log("disk", "mounted");
        producer.error("disk", "read failed");
        producer.stream("temp", "41.5");

        assert_eq!(
            logs.snapshot(),
            vec![
                LogEntry::new("disk", "mounted", false),
                LogEntry::new("disk", "read failed", true),
            ]
        );
        assert_eq!(streams.snapshot(), vec![LogEntry::new("temp", "41.5", false)]);
    }
}
