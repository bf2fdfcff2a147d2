use std::str::FromStr;

use crate::error::CommandError;

/// Positional argument reader over a tokenized command line.
///
/// Tokens are separated by whitespace. Single quotes group text literally;
/// double quotes group text and honor `\"` and `\\` escapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgReader {
    command: String,
    args: Vec<String>,
    position: usize,
}

impl ArgReader {
    pub fn parse(command_line: &str) -> Result<Self, CommandError> {
        let mut tokens = tokenize(command_line)?.into_iter();
        let command = tokens
            .next()
            .ok_or_else(|| CommandError::bad_arguments("empty command line"))?;
        Ok(Self {
            command,
            args: tokens.collect(),
            position: 0,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn remaining(&self) -> usize {
        self.args.len() - self.position
    }

    pub fn next_arg(&mut self) -> Option<String> {
        let arg = self.args.get(self.position).cloned();
        if arg.is_some() {
            self.position += 1;
        }
        arg
    }

    pub fn require(&mut self, name: &str) -> Result<String, CommandError> {
        self.next_arg()
            .ok_or_else(|| CommandError::bad_arguments(format!("missing <{}>", name)))
    }

    pub fn require_parsed<T: FromStr>(&mut self, name: &str) -> Result<T, CommandError> {
        let raw = self.require(name)?;
        raw.parse()
            .map_err(|_| CommandError::bad_arguments(format!("invalid <{}>: {}", name, raw)))
    }

    pub fn optional_parsed<T: FromStr>(&mut self, name: &str, default: T) -> Result<T, CommandError> {
        match self.next_arg() {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| CommandError::bad_arguments(format!("invalid [{}]: {}", name, raw))),
        }
    }

    /// Consumes every remaining argument.
    pub fn rest(&mut self) -> Vec<String> {
        let rest = self.args[self.position..].to_vec();
        self.position = self.args.len();
        rest
    }

    /// Fails if arguments are left over.
    pub fn finish(&self) -> Result<(), CommandError> {
        match self.args.get(self.position) {
            None => Ok(()),
            Some(extra) => Err(CommandError::bad_arguments(format!(
                "unexpected argument: {}",
                extra
            ))),
        }
    }
}

fn tokenize(line: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(CommandError::bad_arguments("unterminated quote")),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(CommandError::bad_arguments("unterminated quote")),
                        },
                        Some(c) => current.push(c),
                        None => return Err(CommandError::bad_arguments("unterminated quote")),
                    }
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
