use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rconsole_protocol::{Message, MessageSink, Response, TransportError};

/// Sink that records every message and can be switched into failing.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Message>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn responses(&self) -> Vec<Response> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Message::Response(r) => Some(r),
                Message::Instruction(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl MessageSink for RecordingSink {
    fn send_message(&self, message: Message) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}
