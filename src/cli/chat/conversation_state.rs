use chrono::{DateTime, Local};
use tracing::{debug, warn};

pub const SEED_GREETING: &str = "Go on, tell me something. I'll probably get it wrong.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Ai,
}

/// Strictly increasing within a conversation, so ids double as display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    pub sent_at: DateTime<Local>,
}

/// The argument of an accepted submission, waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    argument: String,
}

impl PendingTurn {
    pub fn argument(&self) -> &str {
        &self.argument
    }
}

/// Append-only transcript plus the single in-flight request slot.
///
/// `submit` and `complete` are the only mutations. While a turn is pending,
/// `submit` is a no-op, which keeps at most one request in flight.
#[derive(Debug)]
pub struct ConversationState {
    messages: Vec<Message>,
    is_loading: bool,
    next_id: u64,
}

impl ConversationState {
    pub fn new() -> Self {
        let mut state = Self {
            messages: Vec::new(),
            is_loading: false,
            next_id: 0,
        };
        state.push(Sender::Ai, SEED_GREETING.to_string());
        state
    }

    /// Accepts the contents of `input` as the user's next argument.
    ///
    /// Returns `None` and leaves everything untouched when the input is blank
    /// or a turn is already pending. On success the input buffer is emptied
    /// and the stored message keeps the text exactly as typed.
    pub fn submit(&mut self, input: &mut String) -> Option<PendingTurn> {
        if input.trim().is_empty() {
            debug!("Ignoring blank submission");
            return None;
        }
        if self.is_loading {
            debug!("Ignoring submission while a reply is pending");
            return None;
        }

        let argument = std::mem::take(input);
        let id = self.push(Sender::User, argument.clone()).id;
        self.is_loading = true;
        debug!(id = ?id, "Submission accepted");
        Some(PendingTurn { argument })
    }

    /// Records the reply for the pending turn and makes the store ready again.
    pub fn complete(&mut self, reply: impl Into<String>) -> &Message {
        if !self.is_loading {
            warn!("Completing a turn with no request pending");
        }
        self.is_loading = false;
        self.push(Sender::Ai, reply.into())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    fn push(&mut self, sender: Sender, text: String) -> &Message {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.messages.push(Message {
            id,
            sender,
            text,
            sent_at: Local::now(),
        });
        &self.messages[self.messages.len() - 1]
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}
