use tracing::error;

use crate::gemini_client::GeminiClient;

pub const EMPTY_ARGUMENT_REPLY: &str = "I'm listening... I think.";
pub const PARSE_FAILURE_REPLY: &str = "I tried to think but all I got was this error message.";
pub const TRANSPORT_FAILURE_REPLY: &str = "Did you hear that? I think a wire just snapped.";

pub fn build_prompt(argument: &str) -> String {
    format!(
        "You are useless gpt. Your job is to give a short, funny, and simple argument. \
         Think of something similar to what the user said, then disagree with it in a silly way. \
         Use very simple words. Keep your answer to one or two sentences. \
         The user said: \"{}\"",
        argument
    )
}

/// Turns an argument into exactly one reply string. Failures become
/// in-character fallbacks and never reach the caller as errors.
pub struct Fetcher {
    client: GeminiClient,
}

impl Fetcher {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub async fn respond(&self, argument: &str) -> String {
        if argument.is_empty() {
            return EMPTY_ARGUMENT_REPLY.to_string();
        }

        match self.client.generate_content(&build_prompt(argument)).await {
            Ok(reply) => reply,
            Err(e) if e.is_parse_failure() => {
                error!("Unexpected API response structure: {}", e);
                PARSE_FAILURE_REPLY.to_string()
            }
            Err(e) => {
                error!("Error calling Gemini API: {}", e);
                TRANSPORT_FAILURE_REPLY.to_string()
            }
        }
    }
}
