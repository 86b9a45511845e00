//! Interactive terminal seam
//!
//! The orchestrator only talks to the user through [`Prompter`], so flows
//! that branch on interactive input (OTP entry, sign-in) run unattended in
//! tests against [`ScriptedPrompter`].

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

pub trait Prompter: Send + Sync {
    /// Ask a question, echoing the answer
    fn ask(&self, prompt: &str) -> io::Result<String>;

    /// Ask for a secret without echoing it
    fn ask_hidden(&self, prompt: &str) -> io::Result<String>;

    /// Status line for the user (not a question)
    fn say(&self, message: &str);
}

/// Real prompter reading from the terminal
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, prompt: &str) -> io::Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn ask_hidden(&self, prompt: &str) -> io::Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let answer = read_masked();
        println!();
        answer
    }

    fn say(&self, message: &str) {
        println!("{message}");
    }
}

/// Read a line in raw mode so the password never echoes.
fn read_masked() -> io::Result<String> {
    use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
    use crossterm::terminal;

    terminal::enable_raw_mode()?;
    let mut buffer = String::new();
    let result = loop {
        let event = match event::read() {
            Ok(event) => event,
            Err(e) => break Err(e),
        };
        let Event::Key(key) = event else { continue };
        if key.kind == KeyEventKind::Release {
            continue;
        }
        match key.code {
            KeyCode::Enter => break Ok(buffer),
            KeyCode::Backspace => {
                buffer.pop();
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                break Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
            }
            KeyCode::Char(c) => buffer.push(c),
            _ => {}
        }
    };
    terminal::disable_raw_mode()?;
    result
}

/// Scripted prompter for tests: canned answers, recorded transcript
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    transcript: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Everything asked or said, in order
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().unwrap().clone()
    }

    pub fn saw(&self, fragment: &str) -> bool {
        self.transcript
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains(fragment))
    }

    fn answer(&self, prompt: &str) -> io::Result<String> {
        self.transcript.lock().unwrap().push(prompt.to_string());
        self.answers.lock().unwrap().pop_front().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("no scripted answer for {prompt:?}"),
            )
        })
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, prompt: &str) -> io::Result<String> {
        self.answer(prompt)
    }

    fn ask_hidden(&self, prompt: &str) -> io::Result<String> {
        self.answer(prompt)
    }

    fn say(&self, message: &str) {
        self.transcript.lock().unwrap().push(message.to_string());
    }
}
