use std::sync::Arc;
use std::sync::Mutex;
use std::thread;

use rconsole_common::mutex_lock_or_recover;
use rconsole_protocol::Console;
use rconsole_protocol::Instruction;
use rconsole_protocol::MessageSink;
use rconsole_protocol::Response;
use rconsole_protocol::SessionConfig;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::delivery::TelemetryProducer;
use crate::process::CommandProcessHandler;
use crate::process::TerminationReason;
use crate::registry::CommandRegistry;

/// Dispatches instructions from the operator. Holds at most one active
/// process session; starting a command supersedes the previous one.
pub struct InstructionRouter {
    registry: Arc<CommandRegistry>,
    telemetry: TelemetryProducer,
    session: SessionConfig,
    active: Mutex<Option<Arc<CommandProcessHandler>>>,
}

impl InstructionRouter {
    pub fn new(registry: Arc<CommandRegistry>, telemetry: TelemetryProducer, session: SessionConfig) -> Self {
        Self {
            registry,
            telemetry,
            session,
            active: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn route(&self, instruction: Instruction, sink: &Arc<dyn MessageSink>) {
        match instruction {
            Instruction::ConnectionCheck => {
                if let Err(e) = sink.send_message(Response::ConnectionResponse.into()) {
                    debug!(error = %e, "Connection check reply failed");
                }
            }
            Instruction::StartCommand {
                process_id,
                command_line,
            } => self.start_command(process_id, command_line, sink),
            Instruction::CommandInput(input) => match self.session_for(input.process_id) {
                Some(handler) => {
                    handler.handle_input(input);
                }
                None => debug!(process_id = input.process_id, "Input for unknown process"),
            },
            Instruction::Keepalive { process_id } => match self.session_for(process_id) {
                Some(handler) => handler.continue_keepalive(),
                None => debug!(process_id, "Keepalive for unknown process"),
            },
        }
    }

    /// Most recently started session, finished or not.
    pub fn active_session(&self) -> Option<Arc<CommandProcessHandler>> {
        mutex_lock_or_recover(&self.active).clone()
    }

    /// Ends the active session without trying to reach the operator.
    pub fn connection_lost(&self) {
        if let Some(handler) = mutex_lock_or_recover(&self.active).take() {
            handler.terminate(TerminationReason::ConnectionLost);
        }
    }

    fn session_for(&self, process_id: u32) -> Option<Arc<CommandProcessHandler>> {
        mutex_lock_or_recover(&self.active)
            .as_ref()
            .filter(|h| h.process_id() == process_id)
            .cloned()
    }

    fn start_command(&self, process_id: u32, command_line: String, sink: &Arc<dyn MessageSink>) {
        let handler = match CommandProcessHandler::start(process_id, Arc::clone(sink), &self.session) {
            Ok(handler) => handler,
            Err(e) => {
                error!(process_id, error = %e, "Failed to start process session");
                return;
            }
        };

        let previous = mutex_lock_or_recover(&self.active).replace(Arc::clone(&handler));
        if let Some(previous) = previous {
            if previous.terminate(TerminationReason::Superseded) {
                info!(
                    process_id = previous.process_id(),
                    "Superseded by process {}", process_id
                );
            }
        }

        let registry = Arc::clone(&self.registry);
        let telemetry = self.telemetry.clone();
        let runner = Arc::clone(&handler);
        let spawned = thread::Builder::new()
            .name(format!("command-{}", process_id))
            .spawn(move || {
                info!(process_id, command_line = %command_line, "Running command");
                registry.execute(&command_line, &*runner, &telemetry);
                runner.finish();
            });

        if let Err(e) = spawned {
            error!(process_id, error = %e, "Failed to spawn command thread");
            handler.print_err("Remote could not start the command.\n");
            handler.finish();
        }
    }
}

impl std::fmt::Debug for InstructionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionRouter")
            .field("registry", &self.registry)
            .field(
                "active",
                &self.active_session().map(|h| h.process_id()),
            )
            .finish()
    }
}
