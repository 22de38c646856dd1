pub mod conversation_state;
pub mod fetcher;
pub mod prompt;

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use color_print::cformat;
use conversation_state::{ConversationState, Message, PendingTurn, Sender};
use crossterm::cursor::{MoveToColumn, MoveToPreviousLine};
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::queue;
use eyre::Result;
use fetcher::Fetcher;
use prompt::{generate_prompt, LineSource, TerminalInput};
use rustyline::error::ReadlineError;
use tracing::{debug, info, warn};

const WELCOME_TEXT: &str = "
useless gpt
Tell me something. I'll try my best.

/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
useless gpt

Type a statement and press Enter. Alt+Enter starts a new line.

/help         Show this help dialogue
/quit         Quit the application (Ctrl-D works too)
";

const BUSY_TEXT: &str = "Thinking really hard...";
const BUSY_FRAMES: [&str; 3] = [".  ", ".. ", "..."];
const BUSY_TICK: Duration = Duration::from_millis(300);

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    conversation_state: ConversationState,
    fetcher: Fetcher,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        fetcher: Fetcher,
    ) -> Self {
        Self {
            output,
            input,
            interactive,
            conversation_state: ConversationState::new(),
            fetcher,
        }
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation_state
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        info!(model = self.fetcher.model(), "Starting chat");

        if self.interactive {
            self.print_welcome()?;
        }

        // Non-interactive mode (single statement)
        if let Some(mut input) = self.input.take() {
            self.take_turn(&mut input).await?;
            return Ok(ExitCode::SUCCESS);
        }

        if self.interactive {
            let mut source = TerminalInput::new()?;
            self.run_interactive(&mut source).await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        for message in self.conversation_state.messages() {
            render_message(&mut self.output, message)?;
        }
        Ok(())
    }

    async fn run_interactive(&mut self, source: &mut dyn LineSource) -> Result<()> {
        loop {
            let prompt_text = generate_prompt(None);
            match source.read_line(&prompt_text) {
                Ok(mut line) => {
                    match line.trim() {
                        "/quit" => break,
                        "/help" => {
                            writeln!(self.output, "{}", HELP_TEXT)?;
                            continue;
                        }
                        _ => {}
                    }

                    if !line.trim().is_empty() {
                        source.add_history(&line);
                        self.erase_typed_input(&line)?;
                    }
                    let Some(turn) = self.begin_turn(&mut line)? else {
                        continue;
                    };

                    // Input stays disabled until the reply lands; whatever was typed meanwhile is dropped.
                    if let Err(e) = source.hold() {
                        warn!("Could not disable input while waiting: {}", e);
                    }
                    let reply = self.await_reply(turn.argument()).await;
                    if let Err(e) = source.release() {
                        warn!("Could not discard input typed while waiting: {}", e);
                    }
                    self.finish_turn(reply?)?;
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        Ok(())
    }

    /// One submit/complete cycle. Blank input or a pending turn makes this a no-op.
    async fn take_turn(&mut self, input: &mut String) -> Result<()> {
        let Some(turn) = self.begin_turn(input)? else {
            return Ok(());
        };
        let reply = self.await_reply(turn.argument()).await?;
        self.finish_turn(reply)
    }

    fn begin_turn(&mut self, input: &mut String) -> Result<Option<PendingTurn>> {
        let Some(turn) = self.conversation_state.submit(input) else {
            return Ok(None);
        };
        if let Some(message) = self.conversation_state.last_message() {
            render_message(&mut self.output, message)?;
        }
        Ok(Some(turn))
    }

    fn finish_turn(&mut self, reply: String) -> Result<()> {
        let message = self.conversation_state.complete(reply);
        debug!(id = ?message.id, "Reply appended");
        render_message(&mut self.output, message)?;
        Ok(())
    }

    /// Waits for the fetcher, animating the busy indicator in interactive mode.
    async fn await_reply(&mut self, argument: &str) -> Result<String> {
        let Self { output, fetcher, interactive, .. } = self;

        let fetch = fetcher.respond(argument);
        futures::pin_mut!(fetch);

        if !*interactive {
            return Ok(fetch.await);
        }

        let mut ticker = tokio::time::interval(BUSY_TICK);
        let mut frame = 0;
        let reply = loop {
            tokio::select! {
                reply = &mut fetch => break reply,
                _ = ticker.tick() => {
                    draw_busy_indicator(output, frame)?;
                    frame = (frame + 1) % BUSY_FRAMES.len();
                }
            }
        };

        queue!(output, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        output.flush()?;
        Ok(reply)
    }

    /// Replaces the echoed prompt line with the user's bubble.
    fn erase_typed_input(&mut self, line: &str) -> Result<()> {
        let lines = u16::try_from(line.split('\n').count()).unwrap_or(u16::MAX);
        queue!(self.output, MoveToPreviousLine(lines), Clear(ClearType::FromCursorDown))?;
        Ok(())
    }
}

fn render_message(output: &mut dyn Write, message: &Message) -> Result<()> {
    let time = message.sent_at.format("%H:%M");
    let line = match message.sender {
        Sender::User => cformat!("<dim>[{}]</dim> <bold><blue>you</blue></bold>: {}", time, message.text),
        Sender::Ai => cformat!("<dim>[{}]</dim> <bold><magenta>useless gpt</magenta></bold>: {}", time, message.text),
    };
    writeln!(output, "{}", line)?;
    output.flush()?;
    Ok(())
}

fn draw_busy_indicator(output: &mut Box<dyn Write>, frame: usize) -> Result<()> {
    queue!(
        output,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(cformat!("<dim>{}{}</dim>", BUSY_TEXT, BUSY_FRAMES[frame]))
    )?;
    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use reqwest::StatusCode;

    use std::collections::VecDeque;

    use super::conversation_state::SEED_GREETING;
    use super::fetcher::TRANSPORT_FAILURE_REPLY;
    use super::*;
    use crate::gemini_client::testing::{mock_client, mock_client_with_latency};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    enum Typed {
        Line(&'static str),
        /// Typed while a reply was pending.
        WhileBusy(&'static str),
    }

    /// Scripted keyboard that behaves like the terminal: `release` drops
    /// everything typed while input was held.
    struct ScriptedInput {
        script: VecDeque<Typed>,
        held: bool,
        holds: usize,
        releases: usize,
    }

    impl ScriptedInput {
        fn new(script: Vec<Typed>) -> Self {
            Self {
                script: script.into(),
                held: false,
                holds: 0,
                releases: 0,
            }
        }
    }

    impl LineSource for ScriptedInput {
        fn read_line(&mut self, _prompt: &str) -> rustyline::Result<String> {
            assert!(!self.held, "prompted while input is held");
            match self.script.pop_front() {
                Some(Typed::Line(line) | Typed::WhileBusy(line)) => Ok(line.to_string()),
                None => Err(ReadlineError::Eof),
            }
        }

        fn add_history(&mut self, _line: &str) {}

        fn hold(&mut self) -> io::Result<()> {
            self.held = true;
            self.holds += 1;
            Ok(())
        }

        fn release(&mut self) -> io::Result<()> {
            while matches!(self.script.front(), Some(Typed::WhileBusy(_))) {
                self.script.pop_front();
            }
            self.held = false;
            self.releases += 1;
            Ok(())
        }
    }

    fn transcript(chat: &ChatContext) -> Vec<(Sender, String)> {
        chat.conversation()
            .messages()
            .iter()
            .map(|m| (m.sender, m.text.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_single_turn_scenario() {
        let (mock, client) = mock_client();
        mock.queue_reply("nope");
        let output = SharedBuffer::default();
        let mut chat = ChatContext::new(
            Box::new(output.clone()),
            Some("cats are great".to_string()),
            false,
            Fetcher::new(client),
        );

        chat.run().await.unwrap();

        assert_eq!(
            transcript(&chat),
            vec![
                (Sender::Ai, SEED_GREETING.to_string()),
                (Sender::User, "cats are great".to_string()),
                (Sender::Ai, "nope".to_string()),
            ]
        );
        assert!(!chat.conversation().is_loading());

        let printed = output.contents();
        let user_at = printed.find("cats are great").unwrap();
        let reply_at = printed.find("nope").unwrap();
        assert!(user_at < reply_at);
        assert_eq!(mock.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_turn_still_completes() {
        let (mock, client) = mock_client();
        mock.queue_response(StatusCode::BAD_GATEWAY, "upstream down");
        let mut chat = ChatContext::new(Box::new(io::sink()), None, false, Fetcher::new(client));

        chat.take_turn(&mut "water is wet".to_string()).await.unwrap();

        assert_eq!(chat.conversation().messages().len(), 3);
        assert_eq!(
            chat.conversation().last_message().unwrap().text,
            TRANSPORT_FAILURE_REPLY
        );
        assert!(!chat.conversation().is_loading());
    }

    #[tokio::test]
    async fn test_blank_turn_makes_no_request() {
        let (mock, client) = mock_client();
        let output = SharedBuffer::default();
        let mut chat = ChatContext::new(
            Box::new(output.clone()),
            Some("   ".to_string()),
            false,
            Fetcher::new(client),
        );

        chat.run().await.unwrap();

        assert_eq!(chat.conversation().messages().len(), 1);
        assert!(mock.recorded_requests().is_empty());
        assert!(output.contents().is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_turns_each_send_one_request() {
        let (mock, client) = mock_client();
        mock.queue_reply("no");
        mock.queue_reply("also no");
        let mut chat = ChatContext::new(Box::new(io::sink()), None, false, Fetcher::new(client));

        chat.take_turn(&mut "one".to_string()).await.unwrap();
        chat.take_turn(&mut "two".to_string()).await.unwrap();

        let texts: Vec<String> = transcript(&chat).into_iter().map(|(_, text)| text).collect();
        assert_eq!(texts, vec![SEED_GREETING, "one", "no", "two", "also no"]);
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_input_typed_while_busy_is_dropped() {
        let (mock, client) = mock_client();
        mock.queue_reply("nope");
        mock.queue_reply("wrong again");
        let mut chat = ChatContext::new(Box::new(io::sink()), None, true, Fetcher::new(client));
        let mut source = ScriptedInput::new(vec![
            Typed::Line("cats are great"),
            Typed::WhileBusy("dogs rule"),
            Typed::WhileBusy("hello?"),
            Typed::Line("the sun is hot"),
            Typed::Line("/quit"),
        ]);

        chat.run_interactive(&mut source).await.unwrap();

        let texts: Vec<String> = transcript(&chat).into_iter().map(|(_, text)| text).collect();
        assert_eq!(
            texts,
            vec![SEED_GREETING, "cats are great", "nope", "the sun is hot", "wrong again"]
        );
        assert_eq!(mock.recorded_requests().len(), 2);
        assert_eq!((source.holds, source.releases), (2, 2));
        assert!(!chat.conversation().is_loading());
    }

    #[tokio::test]
    async fn test_blank_and_help_lines_do_not_hold_input() {
        let (mock, client) = mock_client();
        let output = SharedBuffer::default();
        let mut chat = ChatContext::new(Box::new(output.clone()), None, true, Fetcher::new(client));
        let mut source = ScriptedInput::new(vec![Typed::Line("   "), Typed::Line("/help")]);

        chat.run_interactive(&mut source).await.unwrap();

        assert_eq!(source.holds, 0);
        assert!(mock.recorded_requests().is_empty());
        assert_eq!(chat.conversation().messages().len(), 1);
        assert!(output.contents().contains("Alt+Enter starts a new line"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_indicator_shows_only_while_pending() {
        let (mock, client) = mock_client_with_latency(BUSY_TICK * 3 + Duration::from_millis(50));
        mock.queue_reply("nope");
        let output = SharedBuffer::default();
        let mut chat = ChatContext::new(Box::new(output.clone()), None, true, Fetcher::new(client));

        chat.take_turn(&mut "cats are great".to_string()).await.unwrap();

        let printed = output.contents();
        let user_at = printed.find("cats are great").unwrap();
        let first_frame = printed.find(BUSY_TEXT).unwrap();
        let last_frame = printed.rfind(BUSY_TEXT).unwrap();
        let reply_at = printed.find("nope").unwrap();

        assert!(user_at < first_frame);
        assert!(first_frame < last_frame, "indicator should animate across ticks");
        assert!(last_frame < reply_at);
        assert!(printed.matches(BUSY_TEXT).count() >= 3);

        let clear = "\x1b[1G\x1b[2K";
        let cleared_at = last_frame + printed[last_frame..].find(clear).unwrap();
        assert!(cleared_at < reply_at);
        assert!(!printed[reply_at..].contains(BUSY_TEXT));
    }
}
