use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize;
use crate::score_math::{clamp_score, days_since, ScoreAdjustment, ScoreLedger, SCORE_MAX};

pub const RECENCY_SEVERE_DAYS: i64 = 60;
pub const RECENCY_MODERATE_DAYS: i64 = 30;
pub const RECENCY_MILD_DAYS: i64 = 14;

pub const RECENCY_SEVERE_PENALTY: f64 = 25.0;
pub const RECENCY_MODERATE_PENALTY: f64 = 15.0;
pub const RECENCY_MILD_PENALTY: f64 = 5.0;

pub const PAYMENT_OVERDUE_PENALTY: f64 = 30.0;
pub const PAYMENT_PENDING_PENALTY: f64 = 15.0;

/// Engagement at or above this level carries no penalty.
pub const ENGAGEMENT_NEUTRAL: f64 = 50.0;
pub const ENGAGEMENT_PENALTY_PER_POINT: f64 = 0.5;

pub const RISK_HIGH_BELOW: u8 = 40;
pub const RISK_MEDIUM_BELOW: u8 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Current,
    Pending,
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    pub const fn from_score(score: u8) -> Self {
        if score < RISK_HIGH_BELOW {
            Self::High
        } else if score < RISK_MEDIUM_BELOW {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_contact_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "normalize::or_default")]
    pub payment_status: PaymentStatus,
    #[serde(
        default = "normalize::default_engagement",
        deserialize_with = "normalize::engagement"
    )]
    pub engagement_score: f64,
}

impl ClientRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            last_contact_date: None,
            payment_status: PaymentStatus::Current,
            engagement_score: normalize::DEFAULT_ENGAGEMENT_SCORE,
        }
    }

    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.engagement_score = clamp_score(self.engagement_score);
        self
    }

    pub fn days_since_contact(&self, now: DateTime<Utc>) -> Option<i64> {
        days_since(self.last_contact_date, now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientAssessment {
    pub client_id: String,
    pub health_score: u8,
    pub risk_level: RiskLevel,
    pub days_since_contact: Option<i64>,
    pub breakdown: Vec<ScoreAdjustment>,
}

/// Penalty for time without contact. A missing date is worse than any gap.
pub fn recency_penalty(days_since_contact: Option<i64>) -> f64 {
    match days_since_contact {
        None => RECENCY_SEVERE_PENALTY,
        Some(d) if d > RECENCY_SEVERE_DAYS => RECENCY_SEVERE_PENALTY,
        Some(d) if d > RECENCY_MODERATE_DAYS => RECENCY_MODERATE_PENALTY,
        Some(d) if d > RECENCY_MILD_DAYS => RECENCY_MILD_PENALTY,
        Some(_) => 0.0,
    }
}

pub const fn payment_penalty(status: PaymentStatus) -> f64 {
    match status {
        PaymentStatus::Overdue => PAYMENT_OVERDUE_PENALTY,
        PaymentStatus::Pending => PAYMENT_PENDING_PENALTY,
        PaymentStatus::Current => 0.0,
    }
}

pub fn engagement_penalty(engagement_score: f64) -> f64 {
    ((ENGAGEMENT_NEUTRAL - clamp_score(engagement_score)) * ENGAGEMENT_PENALTY_PER_POINT).max(0.0)
}

fn health_ledger(client: &ClientRecord, days: Option<i64>) -> ScoreLedger {
    let mut ledger = ScoreLedger::starting_at(SCORE_MAX);
    ledger.apply("recency", -recency_penalty(days));
    ledger.apply("payment", -payment_penalty(client.payment_status));
    ledger.apply("engagement", -engagement_penalty(client.engagement_score));
    ledger
}

pub fn health_score(client: &ClientRecord, now: DateTime<Utc>) -> u8 {
    health_ledger(client, client.days_since_contact(now)).score()
}

pub fn assess_client(client: &ClientRecord, now: DateTime<Utc>) -> ClientAssessment {
    let days = client.days_since_contact(now);
    let ledger = health_ledger(client, days);
    let health_score = ledger.score();
    ClientAssessment {
        client_id: client.id.clone(),
        health_score,
        risk_level: RiskLevel::from_score(health_score),
        days_since_contact: days,
        breakdown: ledger.into_breakdown(),
    }
}
