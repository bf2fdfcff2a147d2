use clap::Parser;
use clap::Subcommand;
pub use clap_complete::Shell;

const LONG_ABOUT: &str = r#"rconsole runs commands on a remote process and shows their output on your terminal.

The remote side hosts a command registry and listens for one operator at a
time. The operator side is a line-oriented console: every line you type is
started as a command on the remote, and anything the command prints or asks
for is relayed to you. Dropped connections are retried automatically.

LOCAL COMMANDS:
    help      List the commands the remote offers
    status    Check that the remote answers
    exit      Leave the console

EXAMPLES:
    # On the machine being administered
    rconsole serve --port 5800

    # On the operator's machine
    rconsole connect --host 10.0.0.7 --port 5800
    > echo hello
    hello
    > prompt Favorite number
    Favorite number: 42
    You said: 42"#;

#[derive(Debug, Parser)]
#[command(name = "rconsole")]
#[command(author, version)]
#[command(about = "Operator console for running commands on a remote process")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output. A non-empty NO_COLOR does the same.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Host the built-in commands and wait for an operator
    Serve {
        /// Port to listen on (default: RCONSOLE_PORT or 5800)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (default: RCONSOLE_BIND or 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Open an interactive console to a remote
    Connect {
        /// Remote host (default: RCONSOLE_HOST or 127.0.0.1)
        #[arg(long)]
        host: Option<String>,

        /// Remote port (default: RCONSOLE_PORT or 5800)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate shell completion scripts
    #[command(long_about = r#"Generate shell completion scripts.

EXAMPLES:
    rconsole completions bash > ~/.local/share/bash-completion/completions/rconsole
    rconsole completions zsh > /usr/local/share/zsh/site-functions/_rconsole"#)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults_left_to_config() {
        let cli = Cli::parse_from(["rconsole", "serve"]);
        let Commands::Serve { port, bind } = cli.command else {
            panic!("Expected Serve command, got {:?}", cli.command);
        };
        assert_eq!(port, None);
        assert_eq!(bind, None);
    }

    #[test]
    fn test_connect_with_host_and_port() {
        let cli = Cli::parse_from(["rconsole", "connect", "--host", "10.0.0.7", "-p", "6000"]);
        let Commands::Connect { host, port } = cli.command else {
            panic!("Expected Connect command, got {:?}", cli.command);
        };
        assert_eq!(host.as_deref(), Some("10.0.0.7"));
        assert_eq!(port, Some(6000));
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Cli::try_parse_from(["rconsole", "connect", "--port", "99999"]).is_err());
    }

    #[test]
    fn test_completions_command() {
        let cli = Cli::parse_from(["rconsole", "completions", "fish"]);
        let Commands::Completions { shell } = cli.command else {
            panic!("Expected Completions command, got {:?}", cli.command);
        };
        assert!(matches!(shell, Shell::Fish));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["rconsole", "serve", "--no-color", "-v"]);
        assert!(cli.no_color);
        assert!(cli.verbose);
    }
}
