//! Operator-side driver for one remote process session.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use rconsole_common::KeepaliveWatchdog;
use rconsole_common::Liveness;
use rconsole_protocol::apply_operations;
use rconsole_protocol::CommandInput;
use rconsole_protocol::CommandOutput;
use rconsole_protocol::Console;
use rconsole_protocol::InputRequest;
use rconsole_protocol::Instruction;
use rconsole_protocol::MessageSink;
use rconsole_protocol::SessionConfig;
use tracing::debug;
use tracing::warn;

use crate::error::ClientError;

/// Traffic routed to a session by process id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Output(CommandOutput),
    Disconnected,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    /// The remote went silent for longer than the keepalive duration.
    TimedOut,
    Disconnected,
    /// The local console closed while the remote waited for a line.
    LocalInputClosed,
}

pub struct RemoteProcessHandler {
    process_id: u32,
    link: Arc<dyn MessageSink>,
    console: Arc<dyn Console>,
    events: Receiver<SessionEvent>,
    events_tx: Sender<SessionEvent>,
    session: SessionConfig,
    liveness: Liveness,
}

impl RemoteProcessHandler {
    pub fn new(
        process_id: u32,
        link: Arc<dyn MessageSink>,
        console: Arc<dyn Console>,
        events: (Sender<SessionEvent>, Receiver<SessionEvent>),
        session: SessionConfig,
    ) -> Self {
        let (events_tx, events) = events;
        Self {
            process_id,
            link,
            console,
            events,
            events_tx,
            session,
            liveness: Liveness::new(),
        }
    }

    /// Shares the session's deadline with the thread that receives remote
    /// traffic, so heartbeats count while this driver waits on local input.
    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Starts `command_line` on the remote and services the session until
    /// it ends. Blocks the caller.
    pub fn execute(&self, command_line: &str) -> Result<SessionOutcome, ClientError> {
        let process_id = self.process_id;
        self.link.send_message(
            Instruction::StartCommand {
                process_id,
                command_line: command_line.to_string(),
            }
            .into(),
        )?;

        let watchdog = {
            let link = Arc::clone(&self.link);
            let timeouts = self.events_tx.clone();
            KeepaliveWatchdog::watch(
                &format!("local-{}", process_id),
                self.liveness.clone(),
                self.session.keepalive_duration,
                self.session.keepalive_interval,
                move || {
                    if let Err(e) = link.send_message(Instruction::Keepalive { process_id }.into()) {
                        debug!(process_id, error = %e, "Keepalive send failed");
                    }
                },
                move || {
                    let _ = timeouts.send(SessionEvent::TimedOut);
                },
            )
            .map_err(|e| ClientError::spawn("keepalive thread", e))?
        };

        let outcome = self.service(&watchdog);
        watchdog.stop_watching();
        debug!(process_id, ?outcome, "Process session ended");
        Ok(outcome)
    }

    fn service(&self, watchdog: &KeepaliveWatchdog) -> SessionOutcome {
        loop {
            let Ok(event) = self.events.recv() else {
                return SessionOutcome::Disconnected;
            };

            match event {
                SessionEvent::Output(output) => {
                    if output.process_id != self.process_id {
                        debug!(
                            process_id = output.process_id,
                            "Ignoring output for another process"
                        );
                        continue;
                    }
                    watchdog.continue_keepalive();
                    apply_operations(&output.operations, &*self.console);
                    self.console.flush();

                    if output.terminate {
                        return SessionOutcome::Completed;
                    }
                    if let Err(outcome) = self.answer(output.request) {
                        return outcome;
                    }
                }
                SessionEvent::Disconnected => return SessionOutcome::Disconnected,
                SessionEvent::TimedOut => {
                    warn!(process_id = self.process_id, "Remote process stopped responding");
                    self.console
                        .print_err("Remote process stopped responding; session closed.\n");
                    self.console.flush();
                    return SessionOutcome::TimedOut;
                }
            }
        }
    }

    fn answer(&self, request: InputRequest) -> Result<(), SessionOutcome> {
        let reply = match request {
            InputRequest::None => return Ok(()),
            InputRequest::HasInputReady => {
                let ready = self.console.has_input_ready().unwrap_or(false);
                CommandInput::input_ready(self.process_id, ready)
            }
            InputRequest::ReadInputLine => match self.console.read_input_line() {
                Ok(line) => CommandInput::line(self.process_id, line),
                Err(_) => return Err(SessionOutcome::LocalInputClosed),
            },
        };

        self.link
            .send_message(Instruction::CommandInput(reply).into())
            .map_err(|e| {
                debug!(process_id = self.process_id, error = %e, "Input reply not delivered");
                SessionOutcome::Disconnected
            })
    }
}

impl std::fmt::Debug for RemoteProcessHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcessHandler")
            .field("process_id", &self.process_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rconsole_protocol::{ConsoleOperation, Message, RecordingConsole, TransportError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct LinkRecorder {
        sent: Mutex<Vec<Instruction>>,
        broken: AtomicBool,
    }

    impl LinkRecorder {
        fn instructions(&self) -> Vec<Instruction> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl MessageSink for LinkRecorder {
        fn send_message(&self, message: Message) -> Result<(), TransportError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionClosed);
            }
            if let Message::Instruction(instruction) = message {
                self.sent.lock().unwrap().push(instruction);
            }
            Ok(())
        }
    }

    fn quiet() -> SessionConfig {
        SessionConfig::default().with_keepalive(Duration::from_secs(60), Duration::from_secs(30))
    }

    fn output(process_id: u32, ops: Vec<ConsoleOperation>, request: InputRequest, terminate: bool) -> SessionEvent {
        SessionEvent::Output(CommandOutput {
            process_id,
            terminate,
            request,
            operations: ops,
        })
    }

    fn driver(
        link: &Arc<LinkRecorder>,
        console: &Arc<RecordingConsole>,
        events: Vec<SessionEvent>,
        session: SessionConfig,
    ) -> RemoteProcessHandler {
        let (tx, rx) = crossbeam_channel::unbounded();
        for event in events {
            tx.send(event).unwrap();
        }
        RemoteProcessHandler::new(1, link.clone(), console.clone(), (tx, rx), session)
    }

    #[test]
    fn test_echo_session_completes() {
        let link = Arc::new(LinkRecorder::default());
        let console = Arc::new(RecordingConsole::new());
        let handler = driver(
            &link,
            &console,
            vec![output(
                1,
                vec![ConsoleOperation::Print("hi\n".to_string())],
                InputRequest::None,
                true,
            )],
            quiet(),
        );

        assert_eq!(handler.execute("echo hi").unwrap(), SessionOutcome::Completed);
        assert_eq!(console.text(), "hi");
        assert_eq!(
            link.instructions(),
            vec![Instruction::StartCommand {
                process_id: 1,
                command_line: "echo hi".to_string()
            }]
        );
    }

    #[test]
    fn test_read_line_request_is_answered() {
        let link = Arc::new(LinkRecorder::default());
        let console = Arc::new(RecordingConsole::with_input(["42"]));
        let handler = driver(
            &link,
            &console,
            vec![
                output(
                    1,
                    vec![ConsoleOperation::Print("Input: ".to_string())],
                    InputRequest::ReadInputLine,
                    false,
                ),
                output(
                    1,
                    vec![ConsoleOperation::Print("You said: 42\n".to_string())],
                    InputRequest::None,
                    true,
                ),
            ],
            quiet(),
        );

        assert_eq!(handler.execute("prompt").unwrap(), SessionOutcome::Completed);
        assert_eq!(link.instructions()[1], Instruction::CommandInput(CommandInput::line(1, "42")));
        assert_eq!(console.text(), "Input: You said: 42");
    }

    #[test]
    fn test_has_input_ready_reports_console_state() {
        let link = Arc::new(LinkRecorder::default());
        let console = Arc::new(RecordingConsole::new());
        let handler = driver(
            &link,
            &console,
            vec![
                output(1, Vec::new(), InputRequest::HasInputReady, false),
                output(1, Vec::new(), InputRequest::None, true),
            ],
            quiet(),
        );

        handler.execute("countdown 3").unwrap();
        assert_eq!(
            link.instructions()[1],
            Instruction::CommandInput(CommandInput::input_ready(1, false))
        );
    }

    #[test]
    fn test_output_for_other_process_is_ignored() {
        let link = Arc::new(LinkRecorder::default());
        let console = Arc::new(RecordingConsole::new());
        let handler = driver(
            &link,
            &console,
            vec![
                output(
                    9,
                    vec![ConsoleOperation::Print("stale\n".to_string())],
                    InputRequest::ReadInputLine,
                    true,
                ),
                output(1, vec![ConsoleOperation::Print("ok\n".to_string())], InputRequest::None, true),
            ],
            quiet(),
        );

        assert_eq!(handler.execute("echo ok").unwrap(), SessionOutcome::Completed);
        assert_eq!(console.text(), "ok");
        assert_eq!(link.instructions().len(), 1);
    }

    #[test]
    fn test_closed_local_input_ends_session() {
        let link = Arc::new(LinkRecorder::default());
        let console = Arc::new(RecordingConsole::new());
        let handler = driver(
            &link,
            &console,
            vec![output(1, Vec::new(), InputRequest::ReadInputLine, false)],
            quiet(),
        );

        assert_eq!(
            handler.execute("prompt").unwrap(),
            SessionOutcome::LocalInputClosed
        );
    }

    #[test]
    fn test_disconnect_event_ends_session() {
        let link = Arc::new(LinkRecorder::default());
        let console = Arc::new(RecordingConsole::new());
        let handler = driver(&link, &console, vec![SessionEvent::Disconnected], quiet());

        assert_eq!(handler.execute("echo").unwrap(), SessionOutcome::Disconnected);
    }

    #[test]
    fn test_start_fails_without_link() {
        let link = Arc::new(LinkRecorder::default());
        link.broken.store(true, Ordering::SeqCst);
        let console = Arc::new(RecordingConsole::new());
        let handler = driver(&link, &console, Vec::new(), quiet());

        assert!(matches!(
            handler.execute("echo"),
            Err(ClientError::Transport(TransportError::ConnectionClosed))
        ));
    }

    #[test]
    fn test_shared_liveness_holds_off_timeout_during_local_read() {
        let link = Arc::new(LinkRecorder::default());
        let console = Arc::new(RecordingConsole::new());
        let session = SessionConfig::default()
            .with_keepalive(Duration::from_millis(80), Duration::from_millis(10));
        let (tx, rx) = crossbeam_channel::unbounded();
        let liveness = Liveness::new();
        let handler =
            RemoteProcessHandler::new(1, link.clone(), console.clone(), (tx.clone(), rx), session)
                .with_liveness(liveness.clone());

        // Heartbeats land on the shared liveness, never in the event queue.
        let remote = std::thread::spawn(move || {
            for _ in 0..15 {
                std::thread::sleep(Duration::from_millis(20));
                liveness.continue_keepalive();
            }
            let done = vec![ConsoleOperation::Print("done\n".to_string())];
            tx.send(output(1, done, InputRequest::None, true)).unwrap();
        });

        assert_eq!(handler.execute("slow").unwrap(), SessionOutcome::Completed);
        remote.join().unwrap();
        assert_eq!(console.text(), "done");
        assert!(console.snapshot().errors.is_empty());
    }

    #[test]
    fn test_silent_remote_times_out() {
        let link = Arc::new(LinkRecorder::default());
        let console = Arc::new(RecordingConsole::new());
        let session = SessionConfig::default()
            .with_keepalive(Duration::from_millis(50), Duration::from_millis(10));
        let handler = driver(&link, &console, Vec::new(), session);

        assert_eq!(handler.execute("hang").unwrap(), SessionOutcome::TimedOut);
        assert_eq!(
            console.snapshot().errors,
            vec!["Remote process stopped responding; session closed.\n"]
        );
        assert!(link
            .instructions()
            .contains(&Instruction::Keepalive { process_id: 1 }));
    }
}
