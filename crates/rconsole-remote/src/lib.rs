//! Remote side of an rconsole link.
//!
//! Runs commands against a virtual console whose output is shipped to the
//! operator, and keeps the single operator connection alive across drops.

#![deny(clippy::all)]

mod args;
pub mod builtins;
mod config;
mod delivery;
mod error;
mod process;
mod registry;
mod router;
mod server;
#[cfg(unix)]
mod signal_handler;
#[cfg(test)]
mod test_support;

pub use args::ArgReader;
pub use config::ServerConfig;
pub use delivery::BatchKind;
pub use delivery::DeliveryBuffer;
pub use delivery::TelemetryProducer;
pub use error::CommandError;
pub use error::ServerError;
pub use process::CommandProcessHandler;
pub use process::TerminationReason;
pub use process::MAX_PENDING_OPERATIONS;
pub use registry::CommandRegistry;
pub use registry::CommandResult;
pub use registry::Invocation;
pub use router::InstructionRouter;
pub use server::RemoteServer;
pub use server::ServerHandle;
#[cfg(unix)]
pub use signal_handler::SignalHandler;

pub type Result<T> = std::result::Result<T, ServerError>;
