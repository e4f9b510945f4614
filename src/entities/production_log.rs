//! Production Log entity type - one recorded execution of a work instruction
//!
//! A log holds one [`ProductionLogStep`] per step node of its instruction.
//! Each log step keeps an append-only list of attempts; the newest attempt
//! is the operator's current answer for that step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::identity::{
    NodeId, ProductId, ProductionLogId, ProductionLogStepId, WorkInstructionId,
};

/// Progress of a single log step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// No attempts recorded
    #[default]
    NotStarted,
    /// Attempts exist but none carries a submit time
    InProgress,
    /// At least one attempt carries a submit time
    Completed,
}

impl StepState {
    pub fn from_attempts(attempts: &[ProductionLogStepAttempt]) -> Self {
        if attempts.is_empty() {
            StepState::NotStarted
        } else if attempts.iter().any(|a| a.submit_time.is_some()) {
            StepState::Completed
        } else {
            StepState::InProgress
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepState::NotStarted => write!(f, "not_started"),
            StepState::InProgress => write!(f, "in_progress"),
            StepState::Completed => write!(f, "completed"),
        }
    }
}

/// Progress of a whole log
pub type LogState = StepState;

/// One try at a log step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionLogStepAttempt {
    /// Database key, `None` until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Pass/fail, `None` when unselected
    #[serde(default)]
    pub success: Option<bool>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    /// When the attempt was submitted; unset after an unselect
    #[serde(default)]
    pub submit_time: Option<DateTime<Utc>>,
}

impl ProductionLogStepAttempt {
    /// New unsaved attempt stamped with the current time
    pub fn now(success: Option<bool>, notes: impl Into<String>) -> Self {
        Self {
            id: None,
            success,
            notes: notes.into(),
            submit_time: Some(Utc::now()),
        }
    }
}

/// A log's record of one step node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionLogStep {
    pub id: ProductionLogStepId,

    /// Step node of the work instruction this record belongs to
    pub work_instruction_step_id: NodeId,

    /// Attempts in submission order
    #[serde(default)]
    pub attempts: Vec<ProductionLogStepAttempt>,
}

impl ProductionLogStep {
    pub fn state(&self) -> StepState {
        StepState::from_attempts(&self.attempts)
    }

    /// Newest attempt, the operator's current answer
    pub fn latest_attempt(&self) -> Option<&ProductionLogStepAttempt> {
        self.attempts.last()
    }
}

/// A recorded execution of a work instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionLog {
    pub id: ProductionLogId,

    pub product_id: ProductId,

    pub work_instruction_id: WorkInstructionId,

    /// Operator who ran the instruction
    pub operator_id: String,

    /// Size of the batch this unit was built in
    pub from_batch_of: u32,

    #[serde(default)]
    pub log_steps: Vec<ProductionLogStep>,

    pub created_on: DateTime<Utc>,

    pub last_modified_on: DateTime<Utc>,
}

impl ProductionLog {
    pub fn step_for_node(&self, node: NodeId) -> Option<&ProductionLogStep> {
        self.log_steps
            .iter()
            .find(|s| s.work_instruction_step_id == node)
    }

    pub fn step_for_node_mut(&mut self, node: NodeId) -> Option<&mut ProductionLogStep> {
        self.log_steps
            .iter_mut()
            .find(|s| s.work_instruction_step_id == node)
    }

    /// Overall progress against the instruction's step nodes
    ///
    /// Complete iff every step node has an attempt with a submit time.
    pub fn state(&self, step_nodes: &[NodeId]) -> LogState {
        let states: Vec<StepState> = step_nodes
            .iter()
            .map(|node| {
                self.step_for_node(*node)
                    .map(ProductionLogStep::state)
                    .unwrap_or_default()
            })
            .collect();

        if states.iter().all(|s| *s == StepState::Completed) {
            LogState::Completed
        } else if states.iter().all(|s| *s == StepState::NotStarted) {
            LogState::NotStarted
        } else {
            LogState::InProgress
        }
    }
}

/// Input for creating an empty production log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProductionLog {
    pub product_id: ProductId,
    pub work_instruction_id: WorkInstructionId,
    pub operator_id: String,
    #[serde(default = "default_batch")]
    pub from_batch_of: u32,
}

fn default_batch() -> u32 {
    1
}

/// Attempt as entered in a draft
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftAttempt {
    #[serde(default)]
    pub success: Option<bool>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    /// Stamped at submission when unset and `success` is selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<DateTime<Utc>>,
}

/// Draft record of a step node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftStep {
    pub node_id: NodeId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub attempts: Vec<DraftAttempt>,
}

/// Draft entry for one installed part
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftPart {
    /// Part node this entry satisfies
    pub node_id: NodeId,

    /// Serial number for `serial_number` input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,

    /// Producing log for `production_log_id` input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_log: Option<ProductionLogId>,
}

/// What a draft entry identifies; serials and source logs never compare equal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LoggedPart {
    Serial(String),
    SourceLog(ProductionLogId),
}

impl DraftPart {
    /// Neither a serial nor a source log was entered
    pub fn is_blank(&self) -> bool {
        self.logged_key().is_none()
    }

    /// Identity used to count distinct logged parts
    fn logged_key(&self) -> Option<LoggedPart> {
        if let Some(log) = self.source_log {
            return Some(LoggedPart::SourceLog(log));
        }
        self.serial_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| LoggedPart::Serial(s.to_string()))
    }
}

/// Everything an operator entered for one run, submitted in one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionLogDraft {
    pub product_id: ProductId,
    pub work_instruction_id: WorkInstructionId,
    pub operator_id: String,

    #[serde(default = "default_batch")]
    pub from_batch_of: u32,

    #[serde(default)]
    pub steps: Vec<DraftStep>,

    #[serde(default)]
    pub parts: Vec<DraftPart>,

    /// Serial of the part this run produces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_serial: Option<String>,
}

impl ProductionLogDraft {
    /// Number of distinct parts the operator identified
    pub fn logged_part_count(&self) -> usize {
        self.parts
            .iter()
            .filter_map(DraftPart::logged_key)
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Result of the pre-submission part count check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionCheck {
    /// Enough parts logged
    Ready,
    /// Fewer parts logged than the part nodes require
    Shortfall { logged: usize, required: usize },
}

impl SubmissionCheck {
    pub fn evaluate(logged: usize, required: usize) -> Self {
        if logged < required {
            SubmissionCheck::Shortfall { logged, required }
        } else {
            SubmissionCheck::Ready
        }
    }

    pub fn needs_confirmation(&self) -> bool {
        matches!(self, SubmissionCheck::Shortfall { .. })
    }
}
