#![deny(clippy::all)]

pub mod app;
pub mod client;
pub mod color;
pub mod commands;
pub mod driver;
pub mod error;
pub mod telemetry;
pub mod telemetry_sink;
pub mod terminal;

pub use app::Application;
pub use client::ClientConfig;
pub use client::RemoteClient;
pub use color::Colors;
pub use driver::RemoteProcessHandler;
pub use driver::SessionEvent;
pub use driver::SessionOutcome;
pub use error::ClientError;
pub use telemetry_sink::ConsoleTelemetrySink;
pub use telemetry_sink::TelemetrySink;
pub use terminal::TerminalConsole;
