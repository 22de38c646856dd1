use std::io;
use std::time::Duration;

use crossterm::{event, terminal};
use rustyline::{Cmd, Config, Editor, KeyCode, KeyEvent, Modifiers};

pub const DEFAULT_PROMPT: &str = "I'm all ears... > ";

pub fn generate_prompt(custom_prompt: Option<&str>) -> String {
    custom_prompt.unwrap_or(DEFAULT_PROMPT).to_string()
}

/// Line editor where Enter submits and Alt+Enter starts a new line.
pub fn rl() -> rustyline::Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .build();
    let mut editor = Editor::with_config(config)?;
    editor.bind_sequence(KeyEvent(KeyCode::Enter, Modifiers::ALT), Cmd::Newline);
    Ok(editor)
}

/// Where interactive input comes from.
///
/// `hold` is called once a turn is submitted and `release` once its reply has
/// settled. Anything typed in between must be dropped by `release`, never
/// returned by the next `read_line`.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> rustyline::Result<String>;

    fn add_history(&mut self, line: &str);

    fn hold(&mut self) -> io::Result<()>;

    fn release(&mut self) -> io::Result<()>;
}

pub struct TerminalInput {
    editor: Editor<()>,
}

impl TerminalInput {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self { editor: rl()? })
    }
}

impl LineSource for TerminalInput {
    fn read_line(&mut self, prompt: &str) -> rustyline::Result<String> {
        self.editor.readline(prompt)
    }

    fn add_history(&mut self, line: &str) {
        self.editor.add_history_entry(line);
    }

    /// Raw mode keeps keystrokes from echoing over the busy indicator.
    fn hold(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()
    }

    fn release(&mut self) -> io::Result<()> {
        let drained = discard_pending_events();
        terminal::disable_raw_mode()?;
        drained
    }
}

fn discard_pending_events() -> io::Result<()> {
    while event::poll(Duration::ZERO)? {
        event::read()?;
    }
    Ok(())
}
