use serde::Serialize;

use crate::pipeline::{CaseRecord, CaseStatus, PipelineStage};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StageAggregate {
    pub stage: PipelineStage,
    pub count: usize,
    pub total_value: f64,
    pub weighted_value: f64,
}

impl StageAggregate {
    const fn empty(stage: PipelineStage) -> Self {
        Self {
            stage,
            count: 0,
            total_value: 0.0,
            weighted_value: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PortfolioTotals {
    pub count: usize,
    pub total_value: f64,
    pub weighted_value: f64,
}

/// Per-stage counts and values plus portfolio totals, in catalog order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineAggregate {
    pub stages: Vec<StageAggregate>,
    pub totals: PortfolioTotals,
}

/// Only active cases count towards pipeline value.
pub fn participates(case: &CaseRecord) -> bool {
    case.status == CaseStatus::Active
}

fn stage_aggregate(cases: &[CaseRecord], stage: PipelineStage) -> StageAggregate {
    cases
        .iter()
        .filter(|c| participates(c) && c.pipeline_stage == stage)
        .fold(StageAggregate::empty(stage), |mut acc, c| {
            acc.count += 1;
            acc.total_value += c.expected_value;
            acc.weighted_value += c.weighted_value();
            acc
        })
}

pub fn compute_aggregate(cases: &[CaseRecord]) -> PipelineAggregate {
    let mut out = PipelineAggregate {
        stages: PipelineStage::ALL
            .iter()
            .map(|&stage| stage_aggregate(cases, stage))
            .collect(),
        totals: PortfolioTotals::default(),
    };
    out.refresh_totals();
    out
}

impl PipelineAggregate {
    pub fn stage(&self, stage: PipelineStage) -> Option<&StageAggregate> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Recomputes only the listed stages, then the portfolio totals.
    pub fn refresh(&mut self, cases: &[CaseRecord], stages: &[PipelineStage]) {
        for slot in &mut self.stages {
            if stages.contains(&slot.stage) {
                *slot = stage_aggregate(cases, slot.stage);
            }
        }
        self.refresh_totals();
    }

    fn refresh_totals(&mut self) {
        self.totals = self
            .stages
            .iter()
            .fold(PortfolioTotals::default(), |mut acc, s| {
                acc.count += s.count;
                acc.total_value += s.total_value;
                acc.weighted_value += s.weighted_value;
                acc
            });
    }
}
