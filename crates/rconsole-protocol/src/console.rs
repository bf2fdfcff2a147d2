//! The line-oriented terminal capability both sides program against.
//!
//! On the remote side a `Console` records operations for shipping; on the
//! operator side it drives the real terminal. `ConsoleOperation::apply`
//! connects the two.

use std::collections::VecDeque;
use std::sync::Mutex;

use rconsole_common::mutex_lock_or_recover;
use thiserror::Error;

use crate::message::ConsoleOperation;

/// Returned from a read when the process session it belongs to has ended.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("process session terminated")]
pub struct Terminated;

pub trait Console: Send + Sync {
    fn print(&self, text: &str);
    fn print_err(&self, text: &str);
    /// Prints a line produced by the console machinery rather than a command.
    fn print_sys(&self, text: &str);
    fn move_up(&self, lines: u32);
    fn clear_line(&self);
    fn clear(&self);
    fn save_cursor_pos(&self);
    fn restore_cursor_pos(&self);
    fn flush(&self);
    fn has_input_ready(&self) -> Result<bool, Terminated>;
    fn read_input_line(&self) -> Result<String, Terminated>;
    fn clear_waiting_input_lines(&self);
}

impl ConsoleOperation {
    pub fn apply(&self, console: &dyn Console) {
        match self {
            ConsoleOperation::Print(text) => console.print(text),
            ConsoleOperation::PrintErr(text) => console.print_err(text),
            ConsoleOperation::PrintSys(text) => console.print_sys(text),
            ConsoleOperation::MoveUp(lines) => console.move_up(*lines),
            ConsoleOperation::ClearLine => console.clear_line(),
            ConsoleOperation::Clear => console.clear(),
            ConsoleOperation::SaveCursor => console.save_cursor_pos(),
            ConsoleOperation::RestoreCursor => console.restore_cursor_pos(),
            ConsoleOperation::Flush => console.flush(),
            ConsoleOperation::ClearPendingInput => console.clear_waiting_input_lines(),
        }
    }
}

/// Applies a batch strictly in order.
pub fn apply_operations(operations: &[ConsoleOperation], console: &dyn Console) {
    for operation in operations {
        operation.apply(console);
    }
}

/// Rendered state of a `RecordingConsole`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSnapshot {
    pub lines: Vec<String>,
    pub cursor_row: usize,
    pub errors: Vec<String>,
    pub system: Vec<String>,
    pub flushes: usize,
}

#[derive(Debug)]
struct Screen {
    lines: Vec<String>,
    cursor_row: usize,
    saved_row: Option<usize>,
    errors: Vec<String>,
    system: Vec<String>,
    flushes: usize,
    pending_input: VecDeque<String>,
    applied: Vec<ConsoleOperation>,
}

impl Screen {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_row: 0,
            saved_row: None,
            errors: Vec::new(),
            system: Vec::new(),
            flushes: 0,
            pending_input: VecDeque::new(),
            applied: Vec::new(),
        }
    }

    fn write(&mut self, text: &str) {
        let mut parts = text.split('\n');
        if let Some(first) = parts.next() {
            self.lines[self.cursor_row].push_str(first);
        }
        for part in parts {
            self.cursor_row += 1;
            if self.cursor_row == self.lines.len() {
                self.lines.push(String::new());
            }
            self.lines[self.cursor_row].push_str(part);
        }
    }
}

/// In-memory terminal model. Renders a line-oriented screen, keeps a
/// transcript of every operation, and serves scripted input lines.
#[derive(Debug)]
pub struct RecordingConsole {
    screen: Mutex<Screen>,
}

impl Default for RecordingConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self {
            screen: Mutex::new(Screen::new()),
        }
    }

    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let console = Self::new();
        console.push_input(lines);
        console
    }

    pub fn push_input<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut screen = mutex_lock_or_recover(&self.screen);
        screen.pending_input.extend(lines.into_iter().map(Into::into));
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        let screen = mutex_lock_or_recover(&self.screen);
        ScreenSnapshot {
            lines: screen.lines.clone(),
            cursor_row: screen.cursor_row,
            errors: screen.errors.clone(),
            system: screen.system.clone(),
            flushes: screen.flushes,
        }
    }

    /// Every operation applied so far, in order.
    pub fn transcript(&self) -> Vec<ConsoleOperation> {
        mutex_lock_or_recover(&self.screen).applied.clone()
    }

    /// Screen contents joined with newlines, trailing empty line dropped.
    pub fn text(&self) -> String {
        let screen = mutex_lock_or_recover(&self.screen);
        let mut text = screen.lines.join("\n");
        if text.ends_with('\n') {
            text.pop();
        }
        text
    }

    fn record(&self, operation: ConsoleOperation, mutate: impl FnOnce(&mut Screen)) {
        let mut screen = mutex_lock_or_recover(&self.screen);
        mutate(&mut screen);
        screen.applied.push(operation);
    }
}

impl Console for RecordingConsole {
    fn print(&self, text: &str) {
        self.record(ConsoleOperation::Print(text.to_string()), |s| s.write(text));
    }

    fn print_err(&self, text: &str) {
        self.record(ConsoleOperation::PrintErr(text.to_string()), |s| {
            s.errors.push(text.to_string());
            s.write(text);
        });
    }

    fn print_sys(&self, text: &str) {
        self.record(ConsoleOperation::PrintSys(text.to_string()), |s| {
            s.system.push(text.to_string());
            s.write(text);
        });
    }

    fn move_up(&self, lines: u32) {
        self.record(ConsoleOperation::MoveUp(lines), |s| {
            s.cursor_row = s.cursor_row.saturating_sub(lines as usize);
        });
    }

    fn clear_line(&self) {
        self.record(ConsoleOperation::ClearLine, |s| {
            let row = s.cursor_row;
            s.lines[row].clear();
        });
    }

    fn clear(&self) {
        self.record(ConsoleOperation::Clear, |s| {
            s.lines = vec![String::new()];
            s.cursor_row = 0;
        });
    }

    fn save_cursor_pos(&self) {
        self.record(ConsoleOperation::SaveCursor, |s| {
            s.saved_row = Some(s.cursor_row);
        });
    }

    fn restore_cursor_pos(&self) {
        self.record(ConsoleOperation::RestoreCursor, |s| {
            if let Some(row) = s.saved_row {
                s.cursor_row = row.min(s.lines.len() - 1);
            }
        });
    }

    fn flush(&self) {
        self.record(ConsoleOperation::Flush, |s| s.flushes += 1);
    }

    fn has_input_ready(&self) -> Result<bool, Terminated> {
        Ok(!mutex_lock_or_recover(&self.screen).pending_input.is_empty())
    }

    fn read_input_line(&self) -> Result<String, Terminated> {
        mutex_lock_or_recover(&self.screen)
            .pending_input
            .pop_front()
            .ok_or(Terminated)
    }

    fn clear_waiting_input_lines(&self) {
        self.record(ConsoleOperation::ClearPendingInput, |s| {
            s.pending_input.clear();
        });
    }
}
