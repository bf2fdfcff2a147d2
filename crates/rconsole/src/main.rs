use clap::CommandFactory;
use clap::Parser;
use clap_complete::generate;

use rconsole::color::color_init;
use rconsole::color::colors_enabled;
use rconsole::commands::Cli;
use rconsole::commands::Commands;
use rconsole::telemetry::init_tracing;
use rconsole::Application;
use rconsole::ClientError;
use rconsole::Colors;
use rconsole_remote::ServerError;

fn main() {
    if let Err(e) = run() {
        if let Some(client_error) = e.downcast_ref::<ClientError>() {
            eprintln!("{} {}", Colors::error("Error:"), client_error);
            if let Some(suggestion) = client_error.suggestion() {
                eprintln!("{} {}", Colors::dim("Suggestion:"), suggestion);
            }
            if client_error.is_retryable() {
                eprintln!(
                    "{}",
                    Colors::dim("(This error may be transient - retry may succeed)")
                );
            }
            std::process::exit(client_error.exit_code());
        } else if let Some(server_error) = e.downcast_ref::<ServerError>() {
            eprintln!("{} {}", Colors::error("Error:"), server_error);
            eprintln!(
                "{} {}",
                Colors::dim("Suggestion:"),
                server_error.suggestion()
            );
            if server_error.is_retryable() {
                eprintln!(
                    "{}",
                    Colors::dim("(This error may be transient - retry may succeed)")
                );
            }
            std::process::exit(74); // EX_IOERR
        } else {
            eprintln!("{} {}", Colors::error("Error:"), e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    color_init(cli.no_color);
    // The operator console shares the terminal with logs, so it stays quieter.
    let default_level = match (&cli.command, cli.verbose) {
        (_, true) => "debug",
        (Commands::Serve { .. }, false) => "info",
        _ => "warn",
    };
    let _telemetry = init_tracing(default_level);

    match cli.command {
        Commands::Serve { port, bind } => Application::serve(port, bind)?,
        Commands::Connect { host, port } => Application::connect(host, port, colors_enabled())?,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rconsole", &mut std::io::stdout());
        }
    }

    Ok(())
}
