//! Macro program execution.
//!
//! A program run walks the steps strictly in order. Each step becomes one
//! scripted turn offering exactly the step's declared tools, its reply is
//! collected into a transcript entry, and a screenshot requested mid-step
//! is taken before the next step starts so later steps can see it. The
//! transcript is written back to the program whether the run finishes or
//! dies on step three, and the runner is always released.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::chat::{DONE_MARKER, SAVE_MARKER};
use crate::core::orchestrator::Orchestrator;
use crate::core::store::conversation::ConversationStore;
use crate::core::store::program::{Program, ProgramStore, RunEntry, RunnerStatus};

/// The one runner the daemon creates at boot.
pub const MAIN_RUNNER: &str = "main";

pub struct ProgramRunner {
    orchestrator: Arc<Orchestrator>,
    conversation: Arc<ConversationStore>,
    programs: Arc<ProgramStore>,
}

impl ProgramRunner {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        conversation: Arc<ConversationStore>,
        programs: Arc<ProgramStore>,
    ) -> Self {
        Self {
            orchestrator,
            conversation,
            programs,
        }
    }

    /// Runs a program on the given runner and returns its transcript.
    /// Whatever happens after the runner is claimed, the partial transcript
    /// is persisted and the runner released.
    pub async fn run(&self, runner_id: &str, program_id: &str) -> Result<Vec<RunEntry>> {
        let program = self
            .programs
            .get(program_id)
            .with_context(|| format!("program {program_id} not found"))?;
        self.programs.call_program(runner_id, program_id).await?;
        info!("running program \"{}\" on {runner_id}", program.name);

        let mut entries = Vec::new();
        let outcome = self.run_steps(&program, &mut entries).await;

        if let Err(err) = self.programs.append_record(program_id, entries.clone()).await {
            warn!("run record for {program_id} was lost: {err}");
        }
        let status = match &outcome {
            Ok(()) => RunnerStatus::Idle,
            Err(err) => {
                warn!("program \"{}\" failed: {err}", program.name);
                RunnerStatus::Error
            }
        };
        if let Err(err) = self.programs.finish_program(runner_id, status).await {
            warn!("runner {runner_id} was not released: {err}");
        }
        outcome.map(|()| entries)
    }

    async fn run_steps(&self, program: &Program, entries: &mut Vec<RunEntry>) -> Result<()> {
        let total = program.steps.len();
        for (index, step) in program.steps.iter().enumerate() {
            info!(
                "program \"{}\": step {} of {total}",
                program.name,
                index + 1
            );
            let report = self
                .orchestrator
                .scripted_turn(&step.what_to_do, step.tools.clone())
                .await?;
            entries.push(RunEntry {
                step_id: step.id.clone(),
                prompt: step.what_to_do.clone(),
                response: report.text.clone(),
            });
            self.conversation
                .update_last_assistant_turn(|text| format!("{text}\n{DONE_MARKER}"))
                .await;

            if report.capture_requested {
                match self.orchestrator.capture_screen().await {
                    Ok(capture) => {
                        self.conversation.append_user_turn(capture).await;
                    }
                    Err(err) => warn!("mid-program capture failed: {err}"),
                }
            }
        }

        // Closing turn the panel can turn into a "save this run" offer.
        let id = self.conversation.start_assistant_turn().await;
        self.conversation
            .update_turn(
                id,
                format!(
                    "Finished \"{}\". {DONE_MARKER} {SAVE_MARKER}{}",
                    program.name, program.id
                ),
            )
            .await;
        Ok(())
    }
}
