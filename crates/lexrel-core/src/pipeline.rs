use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::{compute_aggregate, PipelineAggregate};
use crate::error::EngineError;
use crate::normalize::{self, clamp_money};
use crate::score_math::clamp_score;

/// Case workflow stages, in display order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Inicial,
    Investigacion,
    EnCurso,
    Audiencias,
    Resolucion,
    Cobro,
}

impl PipelineStage {
    pub const ALL: [Self; 6] = [
        Self::Inicial,
        Self::Investigacion,
        Self::EnCurso,
        Self::Audiencias,
        Self::Resolucion,
        Self::Cobro,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            Self::Inicial => "inicial",
            Self::Investigacion => "investigacion",
            Self::EnCurso => "en_curso",
            Self::Audiencias => "audiencias",
            Self::Resolucion => "resolucion",
            Self::Cobro => "cobro",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Inicial => "Inicial",
            Self::Investigacion => "Investigación",
            Self::EnCurso => "En curso",
            Self::Audiencias => "Audiencias",
            Self::Resolucion => "Resolución",
            Self::Cobro => "Cobro",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for PipelineStage {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.key() == s)
            .ok_or_else(|| EngineError::InvalidStage(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    #[default]
    Active,
    OnHold,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "normalize::or_default")]
    pub pipeline_stage: PipelineStage,
    #[serde(
        default = "normalize::default_expected_value",
        deserialize_with = "normalize::expected_value"
    )]
    pub expected_value: f64,
    #[serde(
        default = "normalize::default_probability",
        deserialize_with = "normalize::probability"
    )]
    pub probability: f64,
    #[serde(
        default = "normalize::default_case_health",
        deserialize_with = "normalize::case_health"
    )]
    pub health_score: f64,
    #[serde(default, deserialize_with = "normalize::or_default")]
    pub priority: CasePriority,
    #[serde(default, deserialize_with = "normalize::or_default")]
    pub status: CaseStatus,
}

impl CaseRecord {
    pub fn new(id: impl Into<String>, client_id: impl Into<String>, stage: PipelineStage) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            title: String::new(),
            pipeline_stage: stage,
            expected_value: normalize::DEFAULT_EXPECTED_VALUE,
            probability: normalize::DEFAULT_PROBABILITY,
            health_score: normalize::DEFAULT_CASE_HEALTH,
            priority: CasePriority::Medium,
            status: CaseStatus::Active,
        }
    }

    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.expected_value = clamp_money(self.expected_value);
        self.probability = clamp_score(self.probability);
        self.health_score = clamp_score(self.health_score);
        self
    }

    pub fn is_open(&self) -> bool {
        self.status != CaseStatus::Closed
    }

    pub fn weighted_value(&self) -> f64 {
        self.expected_value * self.probability / 100.0
    }
}

/// What a transition changed, enough to undo it completely.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReceipt {
    pub case_id: String,
    pub from: PipelineStage,
    pub to: PipelineStage,
    previous: CaseRecord,
}

impl TransitionReceipt {
    pub const fn previous(&self) -> &CaseRecord {
        &self.previous
    }
}

/// A case snapshot with its stage aggregates kept in step.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineBoard {
    cases: Vec<CaseRecord>,
    aggregate: PipelineAggregate,
}

impl PipelineBoard {
    pub fn new(cases: Vec<CaseRecord>) -> Self {
        let cases: Vec<CaseRecord> = cases.into_iter().map(CaseRecord::normalized).collect();
        let aggregate = compute_aggregate(&cases);
        Self { cases, aggregate }
    }

    pub fn cases(&self) -> &[CaseRecord] {
        &self.cases
    }

    pub const fn aggregate(&self) -> &PipelineAggregate {
        &self.aggregate
    }

    pub fn case(&self, case_id: &str) -> Option<&CaseRecord> {
        self.cases.iter().find(|c| c.id == case_id)
    }

    pub fn cases_in(&self, stage: PipelineStage) -> impl Iterator<Item = &CaseRecord> + '_ {
        self.cases
            .iter()
            .filter(move |c| c.pipeline_stage == stage)
    }

    /// Inserts a case or replaces its details, then recomputes every stage.
    /// A replaced case stays in its current stage.
    pub fn upsert_case(&mut self, case: CaseRecord) {
        let mut case = case.normalized();
        match self.cases.iter_mut().find(|c| c.id == case.id) {
            Some(slot) => {
                case.pipeline_stage = slot.pipeline_stage;
                *slot = case;
            }
            None => self.cases.push(case),
        }
        self.aggregate = compute_aggregate(&self.cases);
    }

    /// Moves a case to `target`, given as a stage key.
    ///
    /// Unknown stages and unknown cases leave the board untouched.
    pub fn apply_transition(
        &mut self,
        case_id: &str,
        target: &str,
    ) -> Result<TransitionReceipt, EngineError> {
        let target = target.parse::<PipelineStage>().inspect_err(|_| {
            warn!(case_id, target, "rejected transition to unknown stage");
        })?;
        self.apply_stage(case_id, target)
    }

    pub fn apply_stage(
        &mut self,
        case_id: &str,
        target: PipelineStage,
    ) -> Result<TransitionReceipt, EngineError> {
        let case = self
            .cases
            .iter_mut()
            .find(|c| c.id == case_id)
            .ok_or_else(|| EngineError::UnknownCase(case_id.to_string()))?;

        let previous = case.clone();
        case.pipeline_stage = target;
        let from = previous.pipeline_stage;
        self.aggregate.refresh(&self.cases, &[from, target]);
        debug!(case_id, %from, to = %target, "case moved");

        Ok(TransitionReceipt {
            case_id: case_id.to_string(),
            from,
            to: target,
            previous,
        })
    }

    /// Restores the case exactly as it was before the receipt's transition.
    pub fn revert(&mut self, receipt: &TransitionReceipt) -> Result<(), EngineError> {
        let case = self
            .cases
            .iter_mut()
            .find(|c| c.id == receipt.case_id)
            .ok_or_else(|| EngineError::UnknownCase(receipt.case_id.clone()))?;

        let current = case.pipeline_stage;
        *case = receipt.previous.clone();
        self.aggregate
            .refresh(&self.cases, &[current, receipt.previous.pipeline_stage]);
        debug!(case_id = %receipt.case_id, from = %current, to = %receipt.from, "case reverted");
        Ok(())
    }

    /// Applies the transition locally, then hands the updated case to
    /// `persist`. A persistence failure reverts the board before returning.
    pub fn transition_with<F, E>(
        &mut self,
        case_id: &str,
        target: &str,
        persist: F,
    ) -> Result<TransitionReceipt, EngineError>
    where
        F: FnOnce(&CaseRecord) -> Result<(), E>,
        E: fmt::Display,
    {
        let receipt = self.apply_transition(case_id, target)?;
        let updated = self
            .case(case_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownCase(case_id.to_string()))?;

        if let Err(err) = persist(&updated) {
            warn!(case_id, error = %err, "persisting transition failed, reverting");
            self.revert(&receipt)?;
            return Err(EngineError::Persistence {
                case_id: case_id.to_string(),
                message: err.to_string(),
                retryable: true,
            });
        }
        Ok(receipt)
    }
}
