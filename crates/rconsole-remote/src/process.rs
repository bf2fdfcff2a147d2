//! One running command on the remote side.
//!
//! `CommandProcessHandler` is the `Console` a command writes to. Output is
//! buffered and shipped as `CommandOutput` batches; reads ship the buffer with
//! an input request and block until the operator answers or the session ends.

use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use rconsole_common::mutex_lock_or_recover;
use rconsole_common::Handoff;
use rconsole_common::KeepaliveWatchdog;
use rconsole_common::SignalWaiter;
use rconsole_protocol::CommandInput;
use rconsole_protocol::CommandOutput;
use rconsole_protocol::Console;
use rconsole_protocol::ConsoleOperation;
use rconsole_protocol::InputRequest;
use rconsole_protocol::MessageSink;
use rconsole_protocol::Response;
use rconsole_protocol::SessionConfig;
use rconsole_protocol::Terminated;
use rconsole_protocol::TransportError;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Pending operations are shipped early once this many accumulate.
pub const MAX_PENDING_OPERATIONS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Completed,
    KeepaliveTimeout,
    /// A newer command replaced this one on the same connection.
    Superseded,
    DeliveryFailed,
    ConnectionLost,
}

impl TerminationReason {
    fn notice(&self) -> Option<&'static str> {
        match self {
            TerminationReason::KeepaliveTimeout => {
                Some("Remote process terminated: operator stopped responding.\n")
            }
            TerminationReason::Superseded => {
                Some("Remote process terminated: replaced by a newer command.\n")
            }
            _ => None,
        }
    }

    fn can_deliver(&self) -> bool {
        !matches!(
            self,
            TerminationReason::DeliveryFailed | TerminationReason::ConnectionLost
        )
    }
}

#[derive(Debug)]
enum State {
    Running { outstanding: InputRequest },
    Terminated(TerminationReason),
}

pub struct CommandProcessHandler {
    process_id: u32,
    sink: Arc<dyn MessageSink>,
    pending: Mutex<Vec<ConsoleOperation>>,
    // Held across take-and-send so batches leave in the order they were cut.
    shipping: Mutex<()>,
    state: Mutex<State>,
    input: SignalWaiter<CommandInput>,
    keepalive: Mutex<Option<KeepaliveWatchdog>>,
}

impl CommandProcessHandler {
    /// Creates the session and starts its keepalive watchdog.
    pub fn start(
        process_id: u32,
        sink: Arc<dyn MessageSink>,
        config: &SessionConfig,
    ) -> io::Result<Arc<Self>> {
        let handler = Arc::new(Self {
            process_id,
            sink: Arc::clone(&sink),
            pending: Mutex::new(Vec::new()),
            shipping: Mutex::new(()),
            state: Mutex::new(State::Running {
                outstanding: InputRequest::None,
            }),
            input: SignalWaiter::new(),
            keepalive: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&handler);
        let watchdog = KeepaliveWatchdog::start(
            &format!("remote-{}", process_id),
            config.keepalive_duration,
            config.keepalive_interval,
            move || {
                if let Err(e) = sink.send_message(Response::Keepalive { process_id }.into()) {
                    debug!(process_id, error = %e, "Keepalive send failed");
                }
            },
            move || {
                if let Some(handler) = weak.upgrade() {
                    warn!(process_id, "Operator stopped responding");
                    handler.terminate(TerminationReason::KeepaliveTimeout);
                }
            },
        )?;
        *mutex_lock_or_recover(&handler.keepalive) = Some(watchdog);

        debug!(process_id, "Process session started");
        Ok(handler)
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn is_terminated(&self) -> bool {
        self.termination_reason().is_some()
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        match *mutex_lock_or_recover(&self.state) {
            State::Running { .. } => None,
            State::Terminated(reason) => Some(reason),
        }
    }

    /// The input request the command is currently blocked on.
    pub fn outstanding_request(&self) -> InputRequest {
        match *mutex_lock_or_recover(&self.state) {
            State::Running { outstanding } => outstanding,
            State::Terminated(_) => InputRequest::None,
        }
    }

    pub fn continue_keepalive(&self) {
        if let Some(watchdog) = mutex_lock_or_recover(&self.keepalive).as_ref() {
            watchdog.continue_keepalive();
        }
    }

    /// Delivers operator input to the blocked command.
    ///
    /// Accepted only when the process id matches and the input answers the
    /// request currently outstanding. Anything else is stale and dropped.
    pub fn handle_input(&self, input: CommandInput) -> bool {
        if input.process_id != self.process_id {
            return false;
        }
        self.continue_keepalive();

        let answers_request = {
            let mut state = mutex_lock_or_recover(&self.state);
            match &mut *state {
                State::Running { outstanding }
                    if !outstanding.is_none() && *outstanding == input.request =>
                {
                    *outstanding = InputRequest::None;
                    true
                }
                _ => false,
            }
        };

        if !answers_request {
            debug!(
                process_id = self.process_id,
                request = ?input.request,
                "Discarding input that answers no outstanding request"
            );
            return false;
        }
        self.input.receive(input)
    }

    /// Ends the session. The first call wins; later calls return `false`.
    ///
    /// Stops the keepalive, releases a blocked read, and, when the link is
    /// still usable, ships the remaining output with the terminate flag set.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        {
            let mut state = mutex_lock_or_recover(&self.state);
            if let State::Terminated(_) = *state {
                return false;
            }
            *state = State::Terminated(reason);
        }

        if let Some(watchdog) = mutex_lock_or_recover(&self.keepalive).take() {
            watchdog.stop_watching();
        }
        self.input.kill();

        if let Some(notice) = reason.notice() {
            mutex_lock_or_recover(&self.pending).push(ConsoleOperation::PrintErr(notice.to_string()));
        }
        if reason.can_deliver() {
            if let Err(e) = self.ship(InputRequest::None, true) {
                debug!(process_id = self.process_id, error = %e, "Final output not delivered");
            }
        }

        info!(process_id = self.process_id, ?reason, "Process session terminated");
        true
    }

    /// Normal completion once the command body returns.
    pub fn finish(&self) {
        self.terminate(TerminationReason::Completed);
    }

    fn push(&self, operation: ConsoleOperation) {
        if self.is_terminated() {
            return;
        }
        let full = {
            let mut pending = mutex_lock_or_recover(&self.pending);
            pending.push(operation);
            pending.len() >= MAX_PENDING_OPERATIONS
        };
        if full {
            self.ship_or_fail();
        }
    }

    fn ship_or_fail(&self) {
        if let Err(e) = self.ship(InputRequest::None, false) {
            warn!(process_id = self.process_id, error = %e, "Output delivery failed");
            self.terminate(TerminationReason::DeliveryFailed);
        }
    }

    fn ship(&self, request: InputRequest, terminate: bool) -> Result<(), TransportError> {
        let _shipping = mutex_lock_or_recover(&self.shipping);
        // Nothing follows the terminate batch.
        if !terminate && self.is_terminated() {
            return Ok(());
        }
        let operations = std::mem::take(&mut *mutex_lock_or_recover(&self.pending));
        if operations.is_empty() && request.is_none() && !terminate {
            return Ok(());
        }

        let output = CommandOutput {
            process_id: self.process_id,
            terminate,
            request,
            operations,
        };
        self.sink.send_message(Response::CommandOutput(output).into())
    }

    fn request_input(&self, request: InputRequest) -> Result<CommandInput, Terminated> {
        // Armed before the request is visible so an instant reply is not lost.
        if !self.input.arm() {
            return Err(Terminated);
        }
        {
            let mut state = mutex_lock_or_recover(&self.state);
            match &mut *state {
                State::Terminated(_) => return Err(Terminated),
                State::Running { outstanding } => *outstanding = request,
            }
        }

        if let Err(e) = self.ship(request, false) {
            warn!(process_id = self.process_id, error = %e, "Input request not delivered");
            self.terminate(TerminationReason::DeliveryFailed);
            return Err(Terminated);
        }

        match self.input.pause() {
            Handoff::Value(input) => Ok(input),
            Handoff::Killed | Handoff::TimedOut => Err(Terminated),
        }
    }
}

impl Console for CommandProcessHandler {
    fn print(&self, text: &str) {
        self.push(ConsoleOperation::Print(text.to_string()));
    }

    fn print_err(&self, text: &str) {
        self.push(ConsoleOperation::PrintErr(text.to_string()));
    }

    fn print_sys(&self, text: &str) {
        self.push(ConsoleOperation::PrintSys(text.to_string()));
    }

    fn move_up(&self, lines: u32) {
        self.push(ConsoleOperation::MoveUp(lines));
    }

    fn clear_line(&self) {
        self.push(ConsoleOperation::ClearLine);
    }

    fn clear(&self) {
        self.push(ConsoleOperation::Clear);
    }

    fn save_cursor_pos(&self) {
        self.push(ConsoleOperation::SaveCursor);
    }

    fn restore_cursor_pos(&self) {
        self.push(ConsoleOperation::RestoreCursor);
    }

    fn flush(&self) {
        if self.is_terminated() {
            return;
        }
        mutex_lock_or_recover(&self.pending).push(ConsoleOperation::Flush);
        self.ship_or_fail();
    }

    fn has_input_ready(&self) -> Result<bool, Terminated> {
        self.request_input(InputRequest::HasInputReady)
            .map(|input| input.has_input_ready)
    }

    fn read_input_line(&self) -> Result<String, Terminated> {
        self.request_input(InputRequest::ReadInputLine)
            .map(|input| input.input_line.unwrap_or_default())
    }

    fn clear_waiting_input_lines(&self) {
        self.push(ConsoleOperation::ClearPendingInput);
    }
}

impl Drop for CommandProcessHandler {
    fn drop(&mut self) {
        if let Some(watchdog) = mutex_lock_or_recover(&self.keepalive).take() {
            watchdog.stop_watching();
        }
    }
}

impl std::fmt::Debug for CommandProcessHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProcessHandler")
            .field("process_id", &self.process_id)
            .field("state", &*mutex_lock_or_recover(&self.state))
            .finish()
    }
}
