//! Tools that read and adjust the LLM configuration.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, category, parse_args};
use crate::core::config::{Settings, SettingsStore};
use crate::tools::catalog::empty_object;

pub fn tools(settings: Arc<SettingsStore>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetLlmConfig {
            settings: settings.clone(),
        }),
        Arc::new(UpdateLlmConfig { settings }),
    ]
}

fn llm_summary(settings: &Settings) -> Value {
    json!({
        "provider": settings.llm.provider,
        "model": settings.llm.model,
        "economyModel": settings.llm.economy_model,
        "systemPrompt": settings.llm.system_prompt,
        "maxTokens": settings.llm.max_tokens,
        "temperature": settings.llm.temperature,
        "topP": settings.llm.top_p,
    })
}

struct GetLlmConfig {
    settings: Arc<SettingsStore>,
}

#[async_trait]
impl Tool for GetLlmConfig {
    fn name(&self) -> &'static str {
        "get_llm_config"
    }
    fn description(&self) -> &'static str {
        "Show the current model and sampling parameters."
    }
    fn category(&self) -> &'static str {
        category::CONFIG
    }
    fn parameters(&self) -> Value {
        empty_object()
    }
    async fn run(&self, _args: Value) -> anyhow::Result<Value> {
        Ok(llm_summary(&self.settings.get()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateLlmConfigArgs {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    economy_model: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
}

struct UpdateLlmConfig {
    settings: Arc<SettingsStore>,
}

#[async_trait]
impl Tool for UpdateLlmConfig {
    fn name(&self) -> &'static str {
        "update_llm_config"
    }
    fn description(&self) -> &'static str {
        "Change the model or sampling parameters. Only the fields given are touched."
    }
    fn category(&self) -> &'static str {
        category::CONFIG
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "model": { "type": "string" },
                "economyModel": { "type": "string" },
                "systemPrompt": { "type": "string" },
                "maxTokens": { "type": "integer" },
                "temperature": { "type": "number" },
                "topP": { "type": "number" },
            },
        })
    }
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let parsed: UpdateLlmConfigArgs = parse_args(self.name(), args)?;
        let updated = self
            .settings
            .update(move |mut settings| {
                let mut llm = settings.llm;
                if let Some(model) = parsed.model {
                    llm.model = model;
                }
                if let Some(economy) = parsed.economy_model {
                    llm.economy_model = economy;
                }
                if let Some(prompt) = parsed.system_prompt {
                    llm.system_prompt = prompt;
                }
                if let Some(max_tokens) = parsed.max_tokens {
                    llm.max_tokens = max_tokens;
                }
                if let Some(temperature) = parsed.temperature {
                    llm.temperature = temperature;
                }
                if let Some(top_p) = parsed.top_p {
                    llm.top_p = top_p;
                }
                settings.llm = llm.clamped();
                settings
            })
            .await;
        Ok(llm_summary(&updated))
    }
}
