//! The operator's real terminal.
//!
//! Output goes through crossterm. Input lines are read by a background
//! thread so `has_input_ready` can answer without blocking.

use std::io;
use std::io::BufRead;
use std::io::Stdout;
use std::io::Write;
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::Receiver;
use crossterm::cursor;
use crossterm::queue;
use crossterm::style::Color;
use crossterm::style::Print;
use crossterm::style::ResetColor;
use crossterm::style::SetForegroundColor;
use crossterm::terminal::Clear;
use crossterm::terminal::ClearType;
use rconsole_common::mutex_lock_or_recover;
use rconsole_protocol::Console;
use rconsole_protocol::Terminated;
use tracing::debug;

pub struct TerminalConsole {
    out: Mutex<Stdout>,
    input: Receiver<String>,
    colors: bool,
}

impl TerminalConsole {
    pub fn new(colors: bool) -> io::Result<Self> {
        let (tx, input) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "Stdin read failed");
                            return;
                        }
                    }
                }
                debug!("Stdin closed");
            })?;

        Ok(Self {
            out: Mutex::new(io::stdout()),
            input,
            colors,
        })
    }

    fn emit(&self, write: impl FnOnce(&mut Stdout) -> io::Result<()>) {
        let mut out = mutex_lock_or_recover(&self.out);
        if let Err(e) = write(&mut out) {
            debug!(error = %e, "Terminal write failed");
        }
    }

    fn print_colored(&self, text: &str, color: Color) {
        if self.colors {
            self.emit(|out| queue!(out, SetForegroundColor(color), Print(text), ResetColor));
        } else {
            self.emit(|out| queue!(out, Print(text)));
        }
    }
}

impl Console for TerminalConsole {
    fn print(&self, text: &str) {
        self.emit(|out| queue!(out, Print(text)));
    }

    fn print_err(&self, text: &str) {
        self.print_colored(text, Color::Red);
    }

    fn print_sys(&self, text: &str) {
        self.print_colored(text, Color::DarkGrey);
    }

    fn move_up(&self, lines: u32) {
        if lines == 0 {
            return;
        }
        let lines = u16::try_from(lines).unwrap_or(u16::MAX);
        self.emit(|out| queue!(out, cursor::MoveToPreviousLine(lines)));
    }

    fn clear_line(&self) {
        self.emit(|out| queue!(out, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine)));
    }

    fn clear(&self) {
        self.emit(|out| queue!(out, Clear(ClearType::All), cursor::MoveTo(0, 0)));
    }

    fn save_cursor_pos(&self) {
        self.emit(|out| queue!(out, cursor::SavePosition));
    }

    fn restore_cursor_pos(&self) {
        self.emit(|out| queue!(out, cursor::RestorePosition));
    }

    fn flush(&self) {
        self.emit(|out| out.flush());
    }

    fn has_input_ready(&self) -> Result<bool, Terminated> {
        Ok(!self.input.is_empty())
    }

    fn read_input_line(&self) -> Result<String, Terminated> {
        self.flush();
        self.input.recv().map_err(|_| Terminated)
    }

    fn clear_waiting_input_lines(&self) {
        while self.input.try_recv().is_ok() {}
    }
}

impl std::fmt::Debug for TerminalConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalConsole")
            .field("colors", &self.colors)
            .field("queued_lines", &self.input.len())
            .finish()
    }
}
