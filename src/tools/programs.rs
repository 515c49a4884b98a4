//! Macro program lookup tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, category};
use crate::core::store::program::ProgramStore;
use crate::tools::catalog::empty_object;

pub fn tools(programs: Arc<ProgramStore>) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(GetMacroPrograms { programs })]
}

struct GetMacroPrograms {
    programs: Arc<ProgramStore>,
}

#[async_trait]
impl Tool for GetMacroPrograms {
    fn name(&self) -> &'static str {
        "get_macro_programs"
    }
    fn description(&self) -> &'static str {
        "List the saved macro programs with their steps."
    }
    fn category(&self) -> &'static str {
        category::PROGRAMS
    }
    fn parameters(&self) -> Value {
        empty_object()
    }
    async fn run(&self, _args: Value) -> anyhow::Result<Value> {
        let summary: Vec<Value> = self
            .programs
            .programs()
            .into_iter()
            .map(|program| {
                json!({
                    "id": program.id,
                    "name": program.name,
                    "isPinned": program.is_pinned,
                    "steps": program
                        .steps
                        .iter()
                        .map(|step| json!({
                            "whatToDo": step.what_to_do,
                            "tools": step.tools,
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        Ok(json!(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::program::ProgramStep;

    #[tokio::test]
    async fn lists_programs_without_run_records() {
        let store = Arc::new(ProgramStore::in_memory());
        store
            .create(
                "morning check",
                vec![ProgramStep::new(
                    "open the mail tab",
                    vec!["navigate_tab".into()],
                )],
            )
            .await;

        let tool = GetMacroPrograms { programs: store };
        let out = tool.run(json!({})).await.unwrap();
        let first = &out.as_array().unwrap()[0];
        assert_eq!(first["name"], "morning check");
        assert_eq!(first["steps"][0]["tools"][0], "navigate_tab");
        assert!(first.get("records").is_none());
    }
}
