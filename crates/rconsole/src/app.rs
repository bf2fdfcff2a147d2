use std::ops::ControlFlow;
use std::sync::Arc;

use rconsole_protocol::Console;
use rconsole_remote::builtins::register_builtins;
use rconsole_remote::CommandRegistry;
use rconsole_remote::RemoteServer;
use rconsole_remote::ServerConfig;
use rconsole_remote::ServerError;
use tracing::debug;
use tracing::info;

use crate::client::ClientConfig;
use crate::client::RemoteClient;
use crate::driver::SessionOutcome;
use crate::error::ClientError;
use crate::telemetry_sink::ConsoleTelemetrySink;
use crate::terminal::TerminalConsole;

const PROMPT: &str = "> ";

const LOCAL_COMMANDS: [(&str, &str); 3] = [
    ("help", "List available commands"),
    ("status", "Check that the remote answers"),
    ("exit", "Leave the console"),
];

/// Entry points behind the CLI subcommands.
pub struct Application;

impl Application {
    /// Hosts the built-in commands until SIGINT or SIGTERM.
    pub fn serve(port: Option<u16>, bind: Option<String>) -> Result<(), ServerError> {
        let mut config = ServerConfig::from_env();
        if let Some(port) = port {
            config = config.with_port(port);
        }
        if let Some(bind) = bind {
            config = config.with_bind_address(bind);
        }

        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry);

        let server = RemoteServer::bind(config, registry)?;
        #[cfg(unix)]
        let _signal_handler = rconsole_remote::SignalHandler::setup(server.shutdown_flag())?;

        server.run();
        info!("Remote console stopped");
        Ok(())
    }

    /// Runs the interactive operator console on this terminal.
    pub fn connect(host: Option<String>, port: Option<u16>, colors: bool) -> Result<(), ClientError> {
        let mut config = ClientConfig::from_env();
        if let Some(host) = host {
            config = config.with_host(host);
        }
        if let Some(port) = port {
            config = config.with_port(port);
        }

        let console: Arc<dyn Console> = Arc::new(TerminalConsole::new(colors)?);
        let telemetry = Arc::new(ConsoleTelemetrySink::new(Arc::clone(&console)));
        let client = RemoteClient::start(config, Arc::clone(&console), telemetry)?;

        Repl::new(&client, console).run();
        client.shutdown();
        Ok(())
    }
}

/// Read-eval loop: each line is a remote command unless handled locally.
pub struct Repl<'a> {
    client: &'a RemoteClient,
    console: Arc<dyn Console>,
}

impl<'a> Repl<'a> {
    pub fn new(client: &'a RemoteClient, console: Arc<dyn Console>) -> Self {
        Self { client, console }
    }

    pub fn run(&self) {
        loop {
            self.console.print(PROMPT);
            self.console.flush();
            let Ok(line) = self.console.read_input_line() else {
                debug!("Console input closed");
                return;
            };
            if self.handle_line(line.trim()).is_break() {
                return;
            }
        }
    }

    pub fn handle_line(&self, line: &str) -> ControlFlow<()> {
        match line {
            "" => {}
            "exit" | "quit" => return ControlFlow::Break(()),
            "help" => self.print_help(),
            "status" => self.print_status(),
            command_line => match self.client.execute(command_line) {
                Ok(SessionOutcome::LocalInputClosed) => return ControlFlow::Break(()),
                Ok(outcome) => debug!(?outcome, command_line, "Command finished"),
                Err(e) => {
                    self.console.print_err(&format!("Error: {}\n", e));
                    self.console.flush();
                }
            },
        }
        ControlFlow::Continue(())
    }

    fn print_help(&self) {
        let commands = self.client.commands();
        let mut text = String::new();
        if commands.is_empty() {
            text.push_str("No command listing received from the remote yet.\n");
        } else {
            text.push_str("Remote commands:\n");
            let width = commands.iter().map(|c| c.usage.len()).max().unwrap_or(0);
            for command in &commands {
                text.push_str(&format!(
                    "  {:width$}  {}\n",
                    command.usage,
                    command.description,
                    width = width
                ));
            }
        }
        text.push_str("Local commands:\n");
        for (name, description) in LOCAL_COMMANDS {
            text.push_str(&format!("  {:6}  {}\n", name, description));
        }
        self.console.print(&text);
        self.console.flush();
    }

    fn print_status(&self) {
        let address = self.client.config().address();
        if self.client.check_connection(self.client.config().connect_timeout) {
            self.console.print_sys(&format!("Remote at {} is responding\n", address));
        } else {
            self.console
                .print_err(&format!("Remote at {} did not answer\n", address));
        }
        self.console.flush();
    }
}
