use std::collections::BTreeMap;

use rconsole_protocol::Console;
use rconsole_protocol::HelpEntry;
use tracing::debug;

use crate::args::ArgReader;
use crate::delivery::TelemetryProducer;
use crate::error::CommandError;

pub type CommandResult = Result<(), CommandError>;

/// Everything a command body gets to work with.
pub struct Invocation<'a> {
    pub console: &'a dyn Console,
    pub args: ArgReader,
    pub telemetry: &'a TelemetryProducer,
}

type Handler = Box<dyn Fn(&mut Invocation<'_>) -> CommandResult + Send + Sync>;

struct RegisteredCommand {
    help: HelpEntry,
    handler: Handler,
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: &str, usage: &str, description: &str, handler: F) -> &mut Self
    where
        F: Fn(&mut Invocation<'_>) -> CommandResult + Send + Sync + 'static,
    {
        self.commands.insert(
            name.to_string(),
            RegisteredCommand {
                help: HelpEntry {
                    name: name.to_string(),
                    usage: usage.to_string(),
                    description: description.to_string(),
                },
                handler: Box::new(handler),
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Help entries sorted by command name.
    pub fn help_entries(&self) -> Vec<HelpEntry> {
        self.commands.values().map(|c| c.help.clone()).collect()
    }

    pub fn run(&self, command_line: &str, console: &dyn Console, telemetry: &TelemetryProducer) -> CommandResult {
        let args = ArgReader::parse(command_line)?;
        let command = self
            .commands
            .get(args.command())
            .ok_or_else(|| CommandError::NotRecognized(args.command().to_string()))?;
        let mut invocation = Invocation {
            console,
            args,
            telemetry,
        };
        (command.handler)(&mut invocation)
    }

    /// Runs a command line and reports any failure on `console`.
    pub fn execute(&self, command_line: &str, console: &dyn Console, telemetry: &TelemetryProducer) {
        match self.run(command_line, console, telemetry) {
            Ok(()) => {}
            Err(CommandError::Terminated(_)) => {
                debug!(command_line, "Command stopped by session termination");
            }
            Err(CommandError::BadArguments(message)) => {
                let usage = ArgReader::parse(command_line)
                    .ok()
                    .and_then(|args| self.commands.get(args.command()))
                    .map(|c| format!("\nUsage: {}", c.help.usage))
                    .unwrap_or_default();
                console.print_err(&format!("Bad arguments: {}{}\n", message, usage));
            }
            Err(CommandError::NotRecognized(name)) => {
                console.print_err(&format!(
                    "Command not recognized: {}. Type 'help' for a list of commands.\n",
                    name
                ));
            }
        }
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}
