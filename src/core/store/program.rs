//! Macro programs and their runners.
//!
//! A program is an ordered list of steps, each a natural-language
//! instruction plus the exact tool names that step may use. Runners track
//! which program is executing so two runs cannot overlap, and finished runs
//! leave a transcript on the program for replay and "was this useful"
//! feedback.

use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::chat::now_ms;
use crate::core::store::kv::KvCell;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramStep {
    pub id: String,
    /// Tool names this step runs with. Empty means no tools at all.
    #[serde(default)]
    pub tools: Vec<String>,
    pub what_to_do: String,
}

impl ProgramStep {
    pub fn new(what_to_do: impl Into<String>, tools: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tools,
            what_to_do: what_to_do.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEntry {
    pub step_id: String,
    pub prompt: String,
    pub response: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub created_at: u64,
    pub entries: Vec<RunEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_useful: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<ProgramStep>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub records: Vec<RunRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    Idle,
    Running,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runner {
    pub id: String,
    pub status: RunnerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_program_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProgramBook {
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub runners: Vec<Runner>,
}

pub struct ProgramStore {
    cell: KvCell<ProgramBook>,
}

impl ProgramStore {
    pub fn open(dir: &Path) -> Self {
        Self {
            cell: KvCell::open(dir, "programs", ProgramBook::default()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            cell: KvCell::in_memory("programs", ProgramBook::default()),
        }
    }

    pub fn programs(&self) -> Vec<Program> {
        self.cell.get().programs
    }

    pub fn get(&self, id: &str) -> Option<Program> {
        self.cell.get().programs.into_iter().find(|p| p.id == id)
    }

    pub fn runner(&self, id: &str) -> Option<Runner> {
        self.cell.get().runners.into_iter().find(|r| r.id == id)
    }

    pub async fn create(&self, name: impl Into<String>, steps: Vec<ProgramStep>) -> Program {
        let program = Program {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            steps,
            is_pinned: false,
            records: Vec::new(),
        };
        let stored = program.clone();
        self.cell
            .set(|mut book| {
                book.programs.push(stored);
                book
            })
            .await;
        program
    }

    /// Replaces the program with the same id, or appends it.
    pub async fn upsert(&self, program: Program) {
        self.cell
            .set(|mut book| {
                match book.programs.iter_mut().find(|p| p.id == program.id) {
                    Some(slot) => *slot = program,
                    None => book.programs.push(program),
                }
                book
            })
            .await;
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut removed = false;
        self.cell
            .set(|mut book| {
                let before = book.programs.len();
                book.programs.retain(|p| p.id != id);
                removed = book.programs.len() != before;
                book
            })
            .await;
        removed
    }

    pub async fn ensure_runner(&self, id: &str) {
        self.cell
            .set(|mut book| {
                if !book.runners.iter().any(|r| r.id == id) {
                    book.runners.push(Runner {
                        id: id.to_string(),
                        status: RunnerStatus::Idle,
                        running_program_id: None,
                    });
                }
                book
            })
            .await;
    }

    /// Marks the runner busy with a program. Errors when the runner or
    /// program is missing, or the runner is already mid-run.
    pub async fn call_program(&self, runner_id: &str, program_id: &str) -> Result<()> {
        let mut outcome = Ok(());
        self.cell
            .set(|mut book| {
                if !book.programs.iter().any(|p| p.id == program_id) {
                    outcome = Err(anyhow::anyhow!("program {program_id} not found"));
                    return book;
                }
                let Some(runner) = book.runners.iter_mut().find(|r| r.id == runner_id) else {
                    outcome = Err(anyhow::anyhow!("runner {runner_id} not found"));
                    return book;
                };
                if runner.status == RunnerStatus::Running {
                    outcome = Err(anyhow::anyhow!("runner {runner_id} is already running"));
                    return book;
                }
                runner.status = RunnerStatus::Running;
                runner.running_program_id = Some(program_id.to_string());
                book
            })
            .await;
        outcome
    }

    /// Releases the runner with a final status. Errors when the runner is
    /// missing.
    pub async fn finish_program(&self, runner_id: &str, status: RunnerStatus) -> Result<()> {
        let mut found = false;
        self.cell
            .set(|mut book| {
                if let Some(runner) = book.runners.iter_mut().find(|r| r.id == runner_id) {
                    runner.status = status;
                    runner.running_program_id = None;
                    found = true;
                }
                book
            })
            .await;
        if !found {
            bail!("runner {runner_id} not found");
        }
        Ok(())
    }

    pub async fn append_record(&self, program_id: &str, entries: Vec<RunEntry>) -> Result<()> {
        let mut found = false;
        self.cell
            .set(|mut book| {
                if let Some(program) = book.programs.iter_mut().find(|p| p.id == program_id) {
                    program.records.push(RunRecord {
                        created_at: now_ms(),
                        entries,
                        is_useful: None,
                    });
                    found = true;
                }
                book
            })
            .await;
        if !found {
            bail!("program {program_id} not found");
        }
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgramBook> {
        self.cell.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_program_marks_runner_busy() {
        let store = ProgramStore::in_memory();
        let program = store.create("daily check", vec![]).await;
        store.ensure_runner("main").await;

        store.call_program("main", &program.id).await.unwrap();
        let runner = store.runner("main").unwrap();
        assert_eq!(runner.status, RunnerStatus::Running);
        assert_eq!(runner.running_program_id.as_deref(), Some(program.id.as_str()));
    }

    #[tokio::test]
    async fn call_program_rejects_busy_runner() {
        let store = ProgramStore::in_memory();
        let a = store.create("a", vec![]).await;
        let b = store.create("b", vec![]).await;
        store.ensure_runner("main").await;

        store.call_program("main", &a.id).await.unwrap();
        assert!(store.call_program("main", &b.id).await.is_err());
    }

    #[tokio::test]
    async fn call_program_requires_existing_program_and_runner() {
        let store = ProgramStore::in_memory();
        store.ensure_runner("main").await;
        assert!(store.call_program("main", "ghost").await.is_err());

        let program = store.create("a", vec![]).await;
        assert!(store.call_program("other", &program.id).await.is_err());
    }

    #[tokio::test]
    async fn finish_program_releases_runner_with_status() {
        let store = ProgramStore::in_memory();
        let program = store.create("a", vec![]).await;
        store.ensure_runner("main").await;
        store.call_program("main", &program.id).await.unwrap();

        store
            .finish_program("main", RunnerStatus::Error)
            .await
            .unwrap();
        let runner = store.runner("main").unwrap();
        assert_eq!(runner.status, RunnerStatus::Error);
        assert!(runner.running_program_id.is_none());
    }

    #[tokio::test]
    async fn append_record_lands_on_program() {
        let store = ProgramStore::in_memory();
        let program = store
            .create("a", vec![ProgramStep::new("open mail", vec![])])
            .await;
        let step_id = program.steps[0].id.clone();
        store
            .append_record(
                &program.id,
                vec![RunEntry {
                    step_id,
                    prompt: "open mail".into(),
                    response: "done".into(),
                }],
            )
            .await
            .unwrap();
        let stored = store.get(&program.id).unwrap();
        assert_eq!(stored.records.len(), 1);
        assert_eq!(stored.records[0].entries[0].response, "done");
        assert!(store.append_record("ghost", vec![]).await.is_err());
    }
}
