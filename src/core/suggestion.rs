//! Follow-up prompt suggestion.
//!
//! The panel can show a one-tap "you could ask this next" chip under the
//! conversation. One cheap JSON completion produces it; an answer we
//! cannot parse yields an empty suggestion rather than an error, because
//! the chip is decoration.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::core::config::Settings;
use crate::core::error::Result;
use crate::core::llm::{
    ChatMessage, CompleteRequest, LlmProvider, ResponseFormat, SamplingParams,
};
use crate::core::store::usage::UsageLedger;

const SUGGESTION_SYSTEM_PROMPT: &str =
    "You complete the user's next message in a browser assistant chat.";

pub struct SuggestionAgent {
    ledger: Arc<UsageLedger>,
}

#[derive(Deserialize)]
struct SuggestionAnswer {
    #[serde(default)]
    after: String,
}

impl SuggestionAgent {
    pub fn new(ledger: Arc<UsageLedger>) -> Self {
        Self { ledger }
    }

    /// Suggests what the user might say next. Transport failures bubble;
    /// an unusable model answer comes back as an empty string.
    pub async fn suggest(
        &self,
        provider: &dyn LlmProvider,
        settings: &Settings,
        transcript: &str,
    ) -> Result<String> {
        let request = CompleteRequest {
            messages: vec![
                ChatMessage::system(SUGGESTION_SYSTEM_PROMPT),
                ChatMessage::user(suggestion_prompt(transcript)),
            ],
            params: SamplingParams {
                model: settings.llm.model.clone(),
                max_tokens: 2000,
                temperature: 0.6,
                top_p: 0.4,
            },
            response_format: ResponseFormat::Json,
            n: 1,
        };
        let completion = provider.complete(request).await?;
        if let Some(usage) = completion.usage {
            self.ledger
                .add_input_tokens(usage.prompt_tokens, &settings.llm.model)
                .await;
            self.ledger
                .add_output_tokens(usage.completion_tokens, &settings.llm.model)
                .await;
        }
        Ok(parse_suggestion(completion.choices.first().map(String::as_str)))
    }
}

fn suggestion_prompt(transcript: &str) -> String {
    format!(
        "Here is the conversation so far:\n{transcript}\n\n\
         Suggest one short message the user is likely to send next. \
         Answer with exactly one JSON object: {{\"after\": \"<the message>\"}}"
    )
}

fn parse_suggestion(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    let trimmed = strip_code_fences(raw);
    match serde_json::from_str::<SuggestionAnswer>(trimmed) {
        Ok(answer) => answer.after,
        Err(err) => {
            debug!("unusable suggestion answer: {err}");
            String::new()
        }
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
