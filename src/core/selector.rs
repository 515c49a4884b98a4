//! Automatic tool selection by majority vote.
//!
//! Before a user turn the selector may ask the model which tools the next
//! reply needs. One non-streaming request samples several independent JSON
//! verdicts; malformed ones are discarded and only tools named by a strict
//! majority of the valid verdicts get activated. A failed or timed-out
//! vote never blocks the turn: the previous activation survives and the
//! caller proceeds as if nothing happened.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::config::Settings;
use crate::core::error::AgentError;
use crate::core::llm::{
    ChatMessage, CompleteRequest, LlmProvider, ResponseFormat, SamplingParams,
};
use crate::core::store::activation::{ToolActivationStore, ToolFlag};
use crate::core::store::usage::UsageLedger;

/// Kept active after every committed selection so the model can always see
/// where the user is.
pub const BASELINE_TOOL: &str = "get_current_tab_info";

/// Whole-pass deadline, including the commit.
const SELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Independent verdicts sampled per vote.
const VOTE_COUNT: u32 = 3;

const SELECTOR_SYSTEM_PROMPT: &str = "You are a tool selector assistant.";

#[derive(Clone, Debug, PartialEq)]
pub enum SelectionOutcome {
    /// The vote reached a majority and the activation store was rewritten.
    Committed { activated: Vec<String> },
    /// No usable majority, vote failure, or timeout. Flags are as before.
    Unchanged,
}

pub struct ToolSelector {
    activation: Arc<ToolActivationStore>,
    ledger: Arc<UsageLedger>,
}

impl ToolSelector {
    pub fn new(activation: Arc<ToolActivationStore>, ledger: Arc<UsageLedger>) -> Self {
        Self { activation, ledger }
    }

    /// Runs one selection pass. Never fails: every problem collapses to
    /// [`SelectionOutcome::Unchanged`] after a log line.
    pub async fn run(
        &self,
        provider: &dyn LlmProvider,
        settings: &Settings,
        transcript: &str,
    ) -> SelectionOutcome {
        let snapshot = self.activation.snapshot();
        match tokio::time::timeout(
            SELECTION_TIMEOUT,
            self.select_and_commit(provider, settings, transcript),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!("tool selection failed: {err}");
                SelectionOutcome::Unchanged
            }
            Err(_) => {
                // The commit may have been cut off mid-write.
                warn!("tool selection timed out, keeping previous activation");
                self.activation.restore(snapshot).await;
                SelectionOutcome::Unchanged
            }
        }
    }

    async fn select_and_commit(
        &self,
        provider: &dyn LlmProvider,
        settings: &Settings,
        transcript: &str,
    ) -> Result<SelectionOutcome, AgentError> {
        let flags = self.activation.all();
        if flags.is_empty() {
            return Ok(SelectionOutcome::Unchanged);
        }
        let known: Vec<String> = flags.iter().map(|f| f.name.clone()).collect();

        let request = CompleteRequest {
            messages: vec![
                ChatMessage::system(SELECTOR_SYSTEM_PROMPT),
                ChatMessage::user(selection_prompt(&flags, transcript)),
            ],
            params: SamplingParams {
                model: settings.llm.model.clone(),
                max_tokens: 200,
                temperature: 0.3,
                top_p: 1.0,
            },
            response_format: ResponseFormat::Json,
            n: VOTE_COUNT,
        };
        let completion = provider
            .complete(request)
            .await
            .map_err(|err| AgentError::ToolSelection(format!("vote request failed: {err}")))?;
        if let Some(usage) = completion.usage {
            self.ledger
                .add_input_tokens(usage.prompt_tokens, &settings.llm.model)
                .await;
            self.ledger
                .add_output_tokens(usage.completion_tokens, &settings.llm.model)
                .await;
        }

        let verdicts = parse_verdicts(&completion.choices, &known);
        if verdicts.is_empty() {
            return Err(AgentError::ToolSelection(format!(
                "no valid verdicts in {} choices",
                completion.choices.len()
            )));
        }
        debug!(
            "selection vote: {} of {} verdicts valid",
            verdicts.len(),
            completion.choices.len()
        );
        let Some(winners) = tally_votes(&verdicts) else {
            return Ok(SelectionOutcome::Unchanged);
        };

        self.activation.deactivate_all().await;
        let mut activated = Vec::new();
        for name in winners {
            if self.activation.set_active(&name, true).await {
                activated.push(name);
            }
        }
        if !activated.iter().any(|n| n == BASELINE_TOOL)
            && self.activation.set_active(BASELINE_TOOL, true).await
        {
            activated.push(BASELINE_TOOL.to_string());
        }
        Ok(SelectionOutcome::Committed { activated })
    }
}

fn selection_prompt(flags: &[ToolFlag], transcript: &str) -> String {
    let mut catalog = String::new();
    for flag in flags {
        catalog.push_str("- ");
        catalog.push_str(&flag.name);
        catalog.push_str(": ");
        catalog.push_str(&flag.description);
        catalog.push('\n');
    }
    format!(
        "Decide which browser tools the assistant needs for its next reply.\n\
         Available tools:\n{catalog}\n\
         Recent conversation:\n{transcript}\n\n\
         Answer with exactly one JSON object:\n\
         {{\"isNeed\": <true if any tool should be active>, \
         \"activateTools\": [<names of needed tools>]}}"
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Verdict {
    #[serde(default)]
    is_need: bool,
    #[serde(default)]
    activate_tools: Vec<String>,
}

/// Parses each choice as one verdict. Malformed JSON drops the choice;
/// unknown tool names drop only the name.
fn parse_verdicts(choices: &[String], known: &[String]) -> Vec<Verdict> {
    choices
        .iter()
        .filter_map(|raw| serde_json::from_str::<Verdict>(strip_code_fences(raw)).ok())
        .map(|mut verdict| {
            verdict
                .activate_tools
                .retain(|name| known.iter().any(|k| k == name));
            verdict
        })
        .collect()
}

/// Some models wrap JSON answers in a markdown fence even when asked not to.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// `None` means no change: either the verdicts say tools are not needed, or
/// there are none. Otherwise returns the tools named by a strict majority.
fn tally_votes(verdicts: &[Verdict]) -> Option<Vec<String>> {
    if verdicts.is_empty() {
        return None;
    }
    let threshold = verdicts.len() / 2 + 1;
    if verdicts.iter().filter(|v| v.is_need).count() < threshold {
        return None;
    }
    let mut counts: Vec<(String, usize)> = Vec::new();
    for verdict in verdicts {
        let unique: HashSet<&String> = verdict.activate_tools.iter().collect();
        for name in unique {
            match counts.iter_mut().find(|(n, _)| n == name) {
                Some((_, count)) => *count += 1,
                None => counts.push((name.clone(), 1)),
            }
        }
    }
    Some(
        counts
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .map(|(name, _)| name)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Result;
    use crate::core::llm::{Completion, EventStream, StreamRequest, TokenUsage};
    use async_trait::async_trait;

    struct VotingProvider {
        choices: Vec<String>,
        usage: Option<TokenUsage>,
    }

    #[async_trait]
    impl LlmProvider for VotingProvider {
        async fn stream_with_tools(&self, _request: StreamRequest) -> Result<EventStream> {
            panic!("selector never streams")
        }
        async fn complete(&self, _request: CompleteRequest) -> Result<Completion> {
            Ok(Completion {
                choices: self.choices.clone(),
                usage: self.usage,
            })
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl LlmProvider for StalledProvider {
        async fn stream_with_tools(&self, _request: StreamRequest) -> Result<EventStream> {
            panic!("selector never streams")
        }
        async fn complete(&self, _request: CompleteRequest) -> Result<Completion> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Completion::default())
        }
    }

    fn flag(name: &str) -> ToolFlag {
        ToolFlag {
            name: name.into(),
            description: format!("{name} description"),
            category: "Test".into(),
            is_activated: false,
        }
    }

    async fn stores() -> (Arc<ToolActivationStore>, Arc<UsageLedger>) {
        let activation = Arc::new(ToolActivationStore::in_memory());
        activation
            .register(vec![
                flag(BASELINE_TOOL),
                flag("tab_group"),
                flag("search_web"),
            ])
            .await;
        (activation, Arc::new(UsageLedger::in_memory()))
    }

    #[tokio::test]
    async fn strict_majority_wins_and_baseline_rides_along() {
        let (activation, ledger) = stores().await;
        let provider = VotingProvider {
            choices: vec![
                r#"{"isNeed":true,"activateTools":["tab_group","search_web"]}"#.into(),
                r#"{"isNeed":true,"activateTools":["tab_group"]}"#.into(),
                "not json at all".into(),
            ],
            usage: Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 30,
            }),
        };
        let selector = ToolSelector::new(activation.clone(), ledger.clone());
        let outcome = selector
            .run(&provider, &Settings::default(), "user: group my tabs")
            .await;

        // 2 valid verdicts, threshold 2: tab_group is in, search_web is not.
        match outcome {
            SelectionOutcome::Committed { activated } => {
                assert!(activated.contains(&"tab_group".to_string()));
                assert!(activated.contains(&BASELINE_TOOL.to_string()));
                assert!(!activated.contains(&"search_web".to_string()));
            }
            SelectionOutcome::Unchanged => panic!("expected a commit"),
        }
        assert!(activation.is_active("tab_group"));
        assert!(activation.is_active(BASELINE_TOOL));
        assert!(!activation.is_active("search_web"));
        assert_eq!(ledger.get().request_count.total, 1);
    }

    #[tokio::test]
    async fn no_need_majority_keeps_flags() {
        let (activation, ledger) = stores().await;
        activation.set_active("search_web", true).await;
        let provider = VotingProvider {
            choices: vec![
                r#"{"isNeed":false,"activateTools":[]}"#.into(),
                r#"{"isNeed":false,"activateTools":[]}"#.into(),
                r#"{"isNeed":true,"activateTools":["tab_group"]}"#.into(),
            ],
            usage: None,
        };
        let selector = ToolSelector::new(activation.clone(), ledger);
        let outcome = selector
            .run(&provider, &Settings::default(), "user: hello")
            .await;
        assert_eq!(outcome, SelectionOutcome::Unchanged);
        assert!(activation.is_active("search_web"));
        assert!(!activation.is_active("tab_group"));
    }

    #[tokio::test]
    async fn unknown_tool_names_are_dropped_from_verdicts() {
        let (activation, ledger) = stores().await;
        let provider = VotingProvider {
            choices: vec![
                r#"{"isNeed":true,"activateTools":["ghost_tool","tab_group"]}"#.into(),
                r#"{"isNeed":true,"activateTools":["ghost_tool","tab_group"]}"#.into(),
                r#"{"isNeed":true,"activateTools":["ghost_tool"]}"#.into(),
            ],
            usage: None,
        };
        let selector = ToolSelector::new(activation.clone(), ledger);
        selector
            .run(&provider, &Settings::default(), "user: hi")
            .await;
        assert!(activation.is_active("tab_group"));
        assert!(!activation.all().iter().any(|f| f.name == "ghost_tool"));
    }

    #[tokio::test]
    async fn all_malformed_choices_leave_flags_alone() {
        let (activation, ledger) = stores().await;
        activation.set_active("tab_group", true).await;
        let provider = VotingProvider {
            choices: vec!["nope".into(), "{broken".into(), "".into()],
            usage: None,
        };
        let selector = ToolSelector::new(activation.clone(), ledger);
        let outcome = selector
            .run(&provider, &Settings::default(), "user: hi")
            .await;
        assert_eq!(outcome, SelectionOutcome::Unchanged);
        assert!(activation.is_active("tab_group"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_restores_previous_activation() {
        let (activation, ledger) = stores().await;
        activation.set_active("search_web", true).await;
        let selector = ToolSelector::new(activation.clone(), ledger);
        let outcome = selector
            .run(&StalledProvider, &Settings::default(), "user: hi")
            .await;
        assert_eq!(outcome, SelectionOutcome::Unchanged);
        assert_eq!(activation.activated_names(), vec!["search_web"]);
    }

    #[test]
    fn fenced_json_still_parses() {
        let verdicts = parse_verdicts(
            &["```json\n{\"isNeed\":true,\"activateTools\":[\"a\"]}\n```".to_string()],
            &["a".to_string()],
        );
        assert_eq!(verdicts.len(), 1);
        assert!(verdicts[0].is_need);
    }

    #[test]
    fn duplicate_names_in_one_verdict_count_once() {
        let verdicts = vec![
            Verdict {
                is_need: true,
                activate_tools: vec!["a".into(), "a".into()],
            },
            Verdict {
                is_need: true,
                activate_tools: vec![],
            },
            Verdict {
                is_need: true,
                activate_tools: vec!["b".into()],
            },
        ];
        // Threshold 2: "a" has one vote despite the repeat, nothing wins.
        assert_eq!(tally_votes(&verdicts), Some(vec![]));
    }
}
