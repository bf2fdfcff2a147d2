//! The closed message taxonomy exchanged over an rconsole link.
//!
//! Instructions flow from the operator side to the remote side, responses
//! flow back. Every message is a plain value; identity is structural.

use serde::Deserialize;
use serde::Serialize;

/// What the remote side is blocked on after a batch of output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRequest {
    #[default]
    None,
    HasInputReady,
    ReadInputLine,
}

impl InputRequest {
    pub fn is_none(&self) -> bool {
        matches!(self, InputRequest::None)
    }
}

/// One terminal side effect, replayed on the operator's real terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum ConsoleOperation {
    Print(String),
    PrintErr(String),
    PrintSys(String),
    MoveUp(u32),
    ClearLine,
    Clear,
    SaveCursor,
    RestoreCursor,
    Flush,
    ClearPendingInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub source: String,
    pub payload: String,
    pub is_error: bool,
}

impl LogEntry {
    pub fn new(source: impl Into<String>, payload: impl Into<String>, is_error: bool) -> Self {
        Self {
            source: source.into(),
            payload: payload.into(),
            is_error,
        }
    }
}

/// One invocable command as announced to the operator after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpEntry {
    pub name: String,
    pub usage: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInput {
    pub process_id: u32,
    pub has_input_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_line: Option<String>,
    pub request: InputRequest,
}

impl CommandInput {
    pub fn input_ready(process_id: u32, ready: bool) -> Self {
        Self {
            process_id,
            has_input_ready: ready,
            input_line: None,
            request: InputRequest::HasInputReady,
        }
    }

    pub fn line(process_id: u32, line: impl Into<String>) -> Self {
        Self {
            process_id,
            has_input_ready: true,
            input_line: Some(line.into()),
            request: InputRequest::ReadInputLine,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub process_id: u32,
    pub terminate: bool,
    pub request: InputRequest,
    pub operations: Vec<ConsoleOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    ConnectionCheck,
    StartCommand { process_id: u32, command_line: String },
    CommandInput(CommandInput),
    Keepalive { process_id: u32 },
}

impl Instruction {
    pub fn process_id(&self) -> Option<u32> {
        match self {
            Instruction::ConnectionCheck => None,
            Instruction::StartCommand { process_id, .. } | Instruction::Keepalive { process_id } => {
                Some(*process_id)
            }
            Instruction::CommandInput(input) => Some(input.process_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    ConnectionResponse,
    CommandOutput(CommandOutput),
    Keepalive { process_id: u32 },
    CommandsListing { commands: Vec<HelpEntry> },
    LogData { entries: Vec<LogEntry> },
    /// `epoch` identifies the remote's stream buffer; batch ids restart
    /// whenever it changes.
    StreamData {
        epoch: u64,
        batch_id: u64,
        entries: Vec<LogEntry>,
    },
}

impl Response {
    pub fn process_id(&self) -> Option<u32> {
        match self {
            Response::CommandOutput(output) => Some(output.process_id),
            Response::Keepalive { process_id } => Some(*process_id),
            Response::ConnectionResponse
            | Response::CommandsListing { .. }
            | Response::LogData { .. }
            | Response::StreamData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Instruction,
    Response,
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::Instruction => write!(f, "instruction"),
            Family::Response => write!(f, "response"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", content = "body", rename_all = "snake_case")]
pub enum Message {
    Instruction(Instruction),
    Response(Response),
}

impl Message {
    pub fn family(&self) -> Family {
        match self {
            Message::Instruction(_) => Family::Instruction,
            Message::Response(_) => Family::Response,
        }
    }
}

impl From<Instruction> for Message {
    fn from(instruction: Instruction) -> Self {
        Message::Instruction(instruction)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}
