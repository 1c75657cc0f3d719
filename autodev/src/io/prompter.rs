//! Interactive user prompts (task entry and push confirmation).

use std::io::{BufRead, IsTerminal};

use anyhow::{Context, Result};
use tracing::debug;

/// Source of user decisions for the run loop.
pub trait Prompter {
    /// Ask whether to push the commit just made.
    fn confirm_push(&self, summary: &str) -> Result<bool>;
    /// Next task typed by the user; `None` stops interactive mode.
    fn next_task(&self) -> Result<Option<String>>;
}

/// What a line of interactive input means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    Quit,
    Empty,
    Task(String),
}

pub fn interpret_input(line: &str) -> InputLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return InputLine::Empty;
    }
    match trimmed.to_lowercase().as_str() {
        "quit" | "exit" | "q" => InputLine::Quit,
        _ => InputLine::Task(trimmed.to_string()),
    }
}

/// Prompter reading from the controlling terminal, or plain stdin when
/// input is piped.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line(&self) -> Result<Option<String>> {
        if std::io::stdin().is_terminal() {
            let read = dialoguer::Input::<String>::new()
                .with_prompt("Task (quit to exit)")
                .allow_empty(true)
                .interact_text();
            return match read {
                Ok(line) => Ok(Some(line)),
                Err(dialoguer::Error::IO(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    Ok(None)
                }
                Err(err) => Err(err).context("reading task input"),
            };
        }
        let mut line = String::new();
        let n = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("reading task input")?;
        Ok((n > 0).then_some(line))
    }
}

impl Prompter for TerminalPrompter {
    fn confirm_push(&self, summary: &str) -> Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(format!("Push to remote? ({summary})"))
            .default(false)
            .interact()
            .context("reading user confirmation")
    }

    fn next_task(&self) -> Result<Option<String>> {
        loop {
            let Some(line) = self.read_line()? else {
                debug!("end of input");
                return Ok(None);
            };
            match interpret_input(&line) {
                InputLine::Quit => return Ok(None),
                InputLine::Empty => continue,
                InputLine::Task(task) => return Ok(Some(task)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_quit_words() {
        for word in ["quit", "exit", "q", "  QUIT \n", "Exit"] {
            assert_eq!(interpret_input(word), InputLine::Quit, "{word:?}");
        }
    }

    #[test]
    fn blank_lines_are_empty() {
        assert_eq!(interpret_input(""), InputLine::Empty);
        assert_eq!(interpret_input("   \n"), InputLine::Empty);
    }

    #[test]
    fn other_input_is_a_trimmed_task() {
        assert_eq!(
            interpret_input("  add a quick test \n"),
            InputLine::Task("add a quick test".to_string())
        );
        assert_eq!(
            interpret_input("quit smoking"),
            InputLine::Task("quit smoking".to_string())
        );
    }
}
