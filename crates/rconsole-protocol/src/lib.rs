#![deny(clippy::all)]

pub mod codec;
pub mod config;
mod console;
mod error;
mod message;
mod transport;

pub use config::SessionConfig;
pub use config::DEFAULT_PORT;
pub use console::apply_operations;
pub use console::Console;
pub use console::RecordingConsole;
pub use console::ScreenSnapshot;
pub use console::Terminated;
pub use error::TransportError;
pub use message::CommandInput;
pub use message::CommandOutput;
pub use message::ConsoleOperation;
pub use message::Family;
pub use message::HelpEntry;
pub use message::InputRequest;
pub use message::Instruction;
pub use message::LogEntry;
pub use message::Message;
pub use message::Response;
pub use transport::connect_stream;
pub use transport::FramedTransport;
pub use transport::MessageSink;

pub type Result<T> = std::result::Result<T, TransportError>;
