//! Completion wizard.
//!
//! A finite-state machine over the steps of completing a schedule:
//!
//! ```text
//! Overview -> [Procedure] -> [Checklist] -> Summary
//! ```
//!
//! Procedure and Checklist are present only when the schedule's template has
//! entries. Moving forward off Checklist requires every item to be checked;
//! every other move is free. Nothing is persisted until
//! [`CompletionWizard::finalize`], which freezes the collected state into a
//! [`CompletionRequest`] and hands it to a [`CompletionCommitter`].

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{LifecycleCommitError, ValidationError};
use crate::identity::Actor;
use crate::lifecycle::{CompletionCommitter, CompletionReceipt, CompletionRequest};
use crate::model::{
    normalize_decimal, ChecklistResult, ChecklistTemplate, MaintenanceSchedule, ProcedureTemplate,
    Quantity, TemplateStore,
};
use crate::reconciler::PartsSelection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Overview,
    Procedure,
    Checklist,
    Summary,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Overview => "overview",
            Step::Procedure => "procedure",
            Step::Checklist => "checklist",
            Step::Summary => "summary",
        })
    }
}

/// Which optional steps this wizard has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    procedure: bool,
    checklist: bool,
}

impl Layout {
    fn successor(self, step: Step) -> Option<Step> {
        match (step, self.procedure, self.checklist) {
            (Step::Overview, true, _) => Some(Step::Procedure),
            (Step::Overview, false, true) => Some(Step::Checklist),
            (Step::Overview, false, false) => Some(Step::Summary),
            (Step::Procedure, _, true) => Some(Step::Checklist),
            (Step::Procedure, _, false) => Some(Step::Summary),
            (Step::Checklist, _, _) => Some(Step::Summary),
            (Step::Summary, _, _) => None,
        }
    }

    fn predecessor(self, step: Step) -> Option<Step> {
        match (step, self.procedure, self.checklist) {
            (Step::Overview, _, _) => None,
            (Step::Procedure, _, _) => Some(Step::Overview),
            (Step::Checklist, true, _) => Some(Step::Procedure),
            (Step::Checklist, false, _) => Some(Step::Overview),
            (Step::Summary, _, true) => Some(Step::Checklist),
            (Step::Summary, true, false) => Some(Step::Procedure),
            (Step::Summary, false, false) => Some(Step::Overview),
        }
    }
}

/// What became of a finalize call.
#[derive(Debug)]
pub enum FinalizeOutcome {
    Committed(CompletionReceipt),
    Failed(LifecycleCommitError),
}

impl FinalizeOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, FinalizeOutcome::Committed(_))
    }
}

#[derive(Debug)]
enum Phase {
    Editing,
    Submitted(CompletionRequest),
    Cancelled,
}

/// Collects one completion of one schedule.
#[derive(Debug)]
pub struct CompletionWizard {
    schedule_id: Uuid,
    actor: Actor,
    /// Fixed for the life of the wizard so every finalize of it is the same attempt.
    idempotency_key: Uuid,
    layout: Layout,
    step: Step,
    checklist: Option<ChecklistTemplate>,
    procedure: Option<ProcedureTemplate>,
    results: BTreeMap<String, ChecklistResult>,
    procedure_notes: String,
    duration_hours: Option<Decimal>,
    parts: PartsSelection,
    phase: Phase,
}

impl CompletionWizard {
    /// Start a wizard for `schedule`, resolving its templates from `templates`.
    ///
    /// A referenced template that cannot be found, or that has no entries,
    /// leaves its step out.
    pub fn begin(schedule: &MaintenanceSchedule, templates: &dyn TemplateStore, actor: Actor) -> Self {
        let checklist = schedule
            .checklist_template_id
            .and_then(|id| templates.checklist(id))
            .filter(|t| !t.is_empty());
        let procedure = schedule
            .procedure_template_id
            .and_then(|id| templates.procedure(id))
            .filter(|t| !t.is_empty());
        let results = checklist
            .iter()
            .flat_map(|t| t.entries())
            .map(|item| (item.id.clone(), ChecklistResult::default()))
            .collect();

        Self {
            schedule_id: schedule.id,
            actor,
            idempotency_key: Uuid::new_v4(),
            layout: Layout {
                procedure: procedure.is_some(),
                checklist: checklist.is_some(),
            },
            step: Step::Overview,
            checklist,
            procedure,
            results,
            procedure_notes: String::new(),
            duration_hours: None,
            parts: PartsSelection::new(),
            phase: Phase::Editing,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// The steps of this wizard in order.
    pub fn steps(&self) -> Vec<Step> {
        let mut steps = vec![Step::Overview];
        while let Some(next) = steps.last().and_then(|s| self.layout.successor(*s)) {
            steps.push(next);
        }
        steps
    }

    pub fn idempotency_key(&self) -> Uuid {
        self.idempotency_key
    }

    pub fn checklist(&self) -> Option<&ChecklistTemplate> {
        self.checklist.as_ref()
    }

    pub fn procedure(&self) -> Option<&ProcedureTemplate> {
        self.procedure.as_ref()
    }

    pub fn results(&self) -> &BTreeMap<String, ChecklistResult> {
        &self.results
    }

    pub fn unchecked_items(&self) -> usize {
        self.results.values().filter(|r| !r.checked).count()
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self.phase, Phase::Submitted(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.phase, Phase::Cancelled)
    }

    fn editable(&self) -> Result<(), ValidationError> {
        match self.phase {
            Phase::Editing => Ok(()),
            Phase::Submitted(_) => Err(ValidationError::AlreadySubmitted),
            Phase::Cancelled => Err(ValidationError::Cancelled),
        }
    }

    /// Move forward one step.
    ///
    /// # Errors
    ///
    /// `ChecklistIncomplete` when leaving Checklist with unchecked items.
    pub fn next(&mut self) -> Result<Step, ValidationError> {
        self.editable()?;
        let next = self.layout.successor(self.step).ok_or(ValidationError::AtLastStep)?;
        if self.step == Step::Checklist {
            let remaining = self.unchecked_items();
            if remaining > 0 {
                return Err(ValidationError::ChecklistIncomplete { remaining });
            }
        }
        log::debug!("completion wizard {} -> {next}", self.step);
        self.step = next;
        Ok(next)
    }

    pub fn back(&mut self) -> Result<Step, ValidationError> {
        self.editable()?;
        let previous = self
            .layout
            .predecessor(self.step)
            .ok_or(ValidationError::AtFirstStep)?;
        self.step = previous;
        Ok(previous)
    }

    pub fn check_item(&mut self, item_id: &str, checked: bool) -> Result<(), ValidationError> {
        self.editable()?;
        self.result_mut(item_id)?.checked = checked;
        Ok(())
    }

    /// Blank notes clear the item's notes.
    pub fn set_item_notes(&mut self, item_id: &str, notes: &str) -> Result<(), ValidationError> {
        self.editable()?;
        let notes = notes.trim();
        self.result_mut(item_id)?.notes = (!notes.is_empty()).then(|| notes.to_string());
        Ok(())
    }

    fn result_mut(&mut self, item_id: &str) -> Result<&mut ChecklistResult, ValidationError> {
        self.results
            .get_mut(item_id)
            .ok_or_else(|| ValidationError::UnknownChecklistItem(item_id.to_string()))
    }

    pub fn set_procedure_notes(&mut self, notes: &str) -> Result<(), ValidationError> {
        self.editable()?;
        self.procedure_notes = notes.to_string();
        Ok(())
    }

    /// Hours spent, as typed. Empty text clears it; `,` and `.` both work.
    pub fn set_duration(&mut self, text: &str) -> Result<Option<Decimal>, ValidationError> {
        self.editable()?;
        if text.trim().is_empty() {
            self.duration_hours = None;
            return Ok(None);
        }
        let hours = normalize_decimal(text)?;
        self.duration_hours = Some(hours);
        Ok(Some(hours))
    }

    pub fn select_part(&mut self, part_id: Uuid, quantity_text: &str) -> Result<Quantity, ValidationError> {
        self.editable()?;
        self.parts.select(part_id, quantity_text)
    }

    pub fn deselect_part(&mut self, part_id: Uuid) -> Result<bool, ValidationError> {
        self.editable()?;
        Ok(self.parts.deselect(part_id))
    }

    fn snapshot(&self) -> CompletionRequest {
        let notes = self.procedure_notes.trim();
        CompletionRequest {
            idempotency_key: self.idempotency_key,
            schedule_id: self.schedule_id,
            completed_by: self.actor.clone(),
            checklist_results: self.results.clone(),
            procedure_notes: (!notes.is_empty()).then(|| notes.to_string()),
            duration_hours: self.duration_hours,
            parts: self.parts.requests(),
        }
    }

    /// Submit the collected state. Only available on the Summary step.
    ///
    /// The first call freezes the state; later calls (after a failure, say)
    /// submit the same snapshot under the same idempotency key. The wizard
    /// itself never retries.
    ///
    /// # Errors
    ///
    /// A [`ValidationError`] means nothing was submitted. Commit failures are
    /// reported as [`FinalizeOutcome::Failed`].
    pub fn finalize(&mut self, committer: &dyn CompletionCommitter) -> Result<FinalizeOutcome, ValidationError> {
        let request = match &self.phase {
            Phase::Cancelled => return Err(ValidationError::Cancelled),
            Phase::Submitted(request) => request.clone(),
            Phase::Editing => {
                if self.step != Step::Summary {
                    return Err(ValidationError::NotOnSummary);
                }
                let remaining = self.unchecked_items();
                if remaining > 0 {
                    return Err(ValidationError::ChecklistIncomplete { remaining });
                }
                let request = self.snapshot();
                self.phase = Phase::Submitted(request.clone());
                request
            }
        };

        Ok(match committer.finalize(&request) {
            Ok(receipt) => FinalizeOutcome::Committed(receipt),
            Err(e) => FinalizeOutcome::Failed(e),
        })
    }

    /// Abandon the wizard. All collected state is dropped.
    pub fn cancel(&mut self) {
        self.results.clear();
        self.procedure_notes.clear();
        self.duration_hours = None;
        self.parts = PartsSelection::new();
        self.phase = Phase::Cancelled;
        log::debug!("completion wizard for schedule {} cancelled", self.schedule_id);
    }
}
