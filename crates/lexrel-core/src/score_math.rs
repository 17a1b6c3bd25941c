use chrono::{DateTime, Utc};
use serde::Serialize;

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// One named contribution to a score, negative for penalties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreAdjustment {
    pub factor: &'static str,
    pub delta: f64,
}

/// Accumulates weighted adjustments on top of a base value.
///
/// Zero-valued adjustments are dropped so the breakdown only lists factors
/// that actually moved the score.
#[derive(Debug, Clone)]
pub struct ScoreLedger {
    base: f64,
    adjustments: Vec<ScoreAdjustment>,
}

impl ScoreLedger {
    pub fn starting_at(base: f64) -> Self {
        Self {
            base,
            adjustments: Vec::new(),
        }
    }

    pub fn apply(&mut self, factor: &'static str, delta: f64) {
        if delta != 0.0 {
            self.adjustments.push(ScoreAdjustment { factor, delta });
        }
    }

    pub fn raw(&self) -> f64 {
        self.base + self.adjustments.iter().map(|a| a.delta).sum::<f64>()
    }

    pub fn score(&self) -> u8 {
        round_score(self.raw())
    }

    pub fn adjustments(&self) -> &[ScoreAdjustment] {
        &self.adjustments
    }

    pub fn into_breakdown(self) -> Vec<ScoreAdjustment> {
        self.adjustments
    }
}

pub fn clamp_score(v: f64) -> f64 {
    if v.is_nan() {
        return SCORE_MIN;
    }
    v.clamp(SCORE_MIN, SCORE_MAX)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn round_score(v: f64) -> u8 {
    clamp_score(v).round() as u8
}

/// Whole days elapsed since `from`, or `None` when there is no date.
///
/// Dates in the future count as zero days.
pub fn days_since(from: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    from.map(|at| (now - at).num_days().max(0))
}

#[allow(clippy::cast_precision_loss)]
pub fn hours_since(from: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - from).num_seconds().max(0);
    secs as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn ledger_clamps_and_rounds() {
        let mut ledger = ScoreLedger::starting_at(100.0);
        ledger.apply("recency", -25.0);
        ledger.apply("payment", -30.0);
        ledger.apply("engagement", -52.5);
        assert!(ledger.raw() < 0.0);
        assert_eq!(ledger.score(), 0);

        let mut ledger = ScoreLedger::starting_at(20.0);
        ledger.apply("origin", 30.0);
        ledger.apply("phone", 15.0);
        ledger.apply("message", 15.0);
        ledger.apply("recency", 20.0);
        assert_eq!(ledger.score(), 100);
    }

    #[test]
    fn ledger_skips_zero_adjustments() {
        let mut ledger = ScoreLedger::starting_at(100.0);
        ledger.apply("payment", 0.0);
        ledger.apply("engagement", -2.5);
        assert_eq!(ledger.adjustments().len(), 1);
        assert_eq!(ledger.score(), 98);
    }

    #[test]
    fn round_score_handles_halves_and_nan() {
        assert_eq!(round_score(72.5), 73);
        assert_eq!(round_score(72.49), 72);
        assert_eq!(round_score(f64::NAN), 0);
        assert_eq!(round_score(250.0), 100);
    }

    #[test]
    fn days_since_floors_and_ignores_future() {
        let now = Utc::now();
        assert_eq!(days_since(None, now), None);
        assert_eq!(
            days_since(Some(now - Duration::hours(47)), now),
            Some(1)
        );
        assert_eq!(days_since(Some(now + Duration::days(3)), now), Some(0));
        assert!((hours_since(now - Duration::minutes(90), now) - 1.5).abs() < f64::EPSILON);
    }
}
