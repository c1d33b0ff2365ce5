//! Interactive prompting for unresolved inputs
//!
//! Prompts go to stderr so that compiled documents written to stdout stay
//! clean. Hidden entry (SecureString inputs) reads keys in raw mode.

use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{bail, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

/// Source of operator answers
pub trait Prompter {
    /// Show `prompt` and read one line (without the trailing newline)
    fn read_line(&mut self, prompt: &str, echo: bool) -> Result<String>;

    /// Show an informational line
    fn message(&mut self, text: &str) -> Result<()>;
}

/// Prompter bound to the process terminal
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for TerminalPrompter {
    fn read_line(&mut self, prompt: &str, echo: bool) -> Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{}", prompt)?;
        stderr.flush()?;

        // Raw mode needs a real terminal; piped input is read as is
        if echo || !io::stdin().is_terminal() {
            read_visible()
        } else {
            read_hidden()
        }
    }

    fn message(&mut self, text: &str) -> Result<()> {
        writeln!(io::stderr(), "{}", text)?;
        Ok(())
    }
}

fn read_visible() -> Result<String> {
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        bail!("unexpected end of input");
    }
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(line)
}

fn read_hidden() -> Result<String> {
    enable_raw_mode()?;
    let result = collect_hidden_keys();
    disable_raw_mode()?;
    writeln!(io::stderr())?;
    result
}

fn collect_hidden_keys() -> Result<String> {
    let mut value = String::new();
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }
        match (modifiers, code) {
            (KeyModifiers::CONTROL, KeyCode::Char('c')) => bail!("interrupted"),
            (KeyModifiers::CONTROL, KeyCode::Char('d')) => bail!("unexpected end of input"),
            (_, KeyCode::Enter) => return Ok(value),
            (_, KeyCode::Backspace) => {
                value.pop();
            }
            (_, KeyCode::Char(c)) => value.push(c),
            _ => {}
        }
    }
}

/// Prompter that replays canned answers and records what it was asked
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    prompts: Vec<(String, bool)>,
    messages: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Prompts shown so far, with their echo flag
    pub fn prompts(&self) -> &[(String, bool)] {
        &self.prompts
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Answers not consumed yet
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompter for ScriptedPrompter {
    fn read_line(&mut self, prompt: &str, echo: bool) -> Result<String> {
        self.prompts.push((prompt.to_string(), echo));
        match self.answers.pop_front() {
            Some(answer) => Ok(answer),
            None => bail!("no scripted answer for prompt '{}'", prompt.trim_end()),
        }
    }

    fn message(&mut self, text: &str) -> Result<()> {
        self.messages.push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_answers_in_order() {
        let mut prompter = ScriptedPrompter::new(["one", "two"]);
        assert_eq!(prompter.read_line("First: ", true).unwrap(), "one");
        assert_eq!(prompter.read_line("Second: ", false).unwrap(), "two");
        assert_eq!(prompter.remaining(), 0);
        assert_eq!(
            prompter.prompts(),
            &[("First: ".to_string(), true), ("Second: ".to_string(), false)]
        );
    }

    #[test]
    fn scripted_runs_out() {
        let mut prompter = ScriptedPrompter::new(Vec::<String>::new());
        let err = prompter.read_line("Enter Foo: ", true).unwrap_err();
        assert!(err.to_string().contains("Enter Foo:"));
    }

    #[test]
    fn scripted_records_messages() {
        let mut prompter = ScriptedPrompter::default();
        prompter.message("hello").unwrap();
        assert_eq!(prompter.messages(), &["hello".to_string()]);
    }
}
