use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::normalize;
use crate::score_math::{hours_since, ScoreAdjustment, ScoreLedger};

pub const LEAD_BASE_SCORE: f64 = 20.0;

pub const ORIGIN_REFERRAL_BONUS: f64 = 30.0;
pub const ORIGIN_PUBLIC_PROFILE_BONUS: f64 = 20.0;
pub const ORIGIN_WEB_BONUS: f64 = 10.0;

pub const PHONE_BONUS: f64 = 15.0;

pub const MESSAGE_RICH_CHARS: usize = 200;
pub const MESSAGE_DETAILED_CHARS: usize = 100;
pub const MESSAGE_RICH_BONUS: f64 = 15.0;
pub const MESSAGE_DETAILED_BONUS: f64 = 10.0;

pub const FRESH_LEAD_HOURS: f64 = 24.0;
pub const RECENT_LEAD_HOURS: f64 = 72.0;
pub const FRESH_LEAD_BONUS: f64 = 20.0;
pub const RECENT_LEAD_BONUS: f64 = 10.0;

pub const HOT_FROM: u8 = 70;
pub const WARM_FROM: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeadOrigin {
    Referral,
    PublicProfile,
    Web,
    Unknown,
}

impl LeadOrigin {
    pub fn classify(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "referral" | "referido" | "recommendation" => Self::Referral,
            "public_profile" | "perfil_publico" | "directory" | "linkedin" => Self::PublicProfile,
            "web" | "website" | "web_form" | "landing" => Self::Web,
            _ => Self::Unknown,
        }
    }

    pub const fn bonus(self) -> f64 {
        match self {
            Self::Referral => ORIGIN_REFERRAL_BONUS,
            Self::PublicProfile => ORIGIN_PUBLIC_PROFILE_BONUS,
            Self::Web => ORIGIN_WEB_BONUS,
            Self::Unknown => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

impl LeadStatus {
    pub const ALL: [Self; 5] = [
        Self::New,
        Self::Contacted,
        Self::Qualified,
        Self::Converted,
        Self::Lost,
    ];

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Converted | Self::Lost)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Converted => "converted",
            Self::Lost => "lost",
        }
    }
}

/// Outreach sequence for a lead, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NurtureStage {
    #[default]
    New,
    FirstContact,
    FollowUp,
    MeetingScheduled,
    ProposalSent,
    Negotiation,
}

impl NurtureStage {
    pub const ALL: [Self; 6] = [
        Self::New,
        Self::FirstContact,
        Self::FollowUp,
        Self::MeetingScheduled,
        Self::ProposalSent,
        Self::Negotiation,
    ];

    /// The following stage; `Negotiation` stays put.
    pub const fn next(self) -> Self {
        match self {
            Self::New => Self::FirstContact,
            Self::FirstContact => Self::FollowUp,
            Self::FollowUp => Self::MeetingScheduled,
            Self::MeetingScheduled => Self::ProposalSent,
            Self::ProposalSent | Self::Negotiation => Self::Negotiation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    Hot,
    Warm,
    Cold,
}

impl Temperature {
    pub const ALL: [Self; 3] = [Self::Hot, Self::Warm, Self::Cold];

    pub const fn from_score(score: u8) -> Self {
        if score >= HOT_FROM {
            Self::Hot
        } else if score >= WARM_FROM {
            Self::Warm
        } else {
            Self::Cold
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "normalize::or_default")]
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "normalize::or_default")]
    pub status: LeadStatus,
    #[serde(default, deserialize_with = "normalize::or_default")]
    pub nurture_stage: NurtureStage,
    /// Last score written back by the host; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

impl LeadRecord {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            origin: String::new(),
            email: None,
            phone: None,
            message: String::new(),
            created_at,
            status: LeadStatus::New,
            nurture_stage: NurtureStage::New,
            score: None,
        }
    }

    pub fn has_phone(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    pub fn message_len(&self) -> usize {
        self.message.chars().count()
    }

    pub fn set_status(&mut self, status: LeadStatus) -> Result<(), EngineError> {
        if self.status.is_terminal() && status != self.status {
            return Err(EngineError::TerminalLead {
                lead_id: self.id.clone(),
                status: self.status.as_str().to_string(),
            });
        }
        self.status = status;
        Ok(())
    }

    pub fn advance_nurture(&mut self) -> NurtureStage {
        self.nurture_stage = self.nurture_stage.next();
        self.nurture_stage
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadAssessment {
    pub lead_id: String,
    pub score: u8,
    pub temperature: Temperature,
    pub breakdown: Vec<ScoreAdjustment>,
}

pub const fn message_bonus(chars: usize) -> f64 {
    if chars > MESSAGE_RICH_CHARS {
        MESSAGE_RICH_BONUS
    } else if chars > MESSAGE_DETAILED_CHARS {
        MESSAGE_DETAILED_BONUS
    } else {
        0.0
    }
}

pub fn recency_bonus(age_hours: f64) -> f64 {
    if age_hours < FRESH_LEAD_HOURS {
        FRESH_LEAD_BONUS
    } else if age_hours < RECENT_LEAD_HOURS {
        RECENT_LEAD_BONUS
    } else {
        0.0
    }
}

fn lead_ledger(lead: &LeadRecord, now: DateTime<Utc>) -> ScoreLedger {
    let mut ledger = ScoreLedger::starting_at(LEAD_BASE_SCORE);
    ledger.apply("origin", LeadOrigin::classify(&lead.origin).bonus());
    ledger.apply("phone", if lead.has_phone() { PHONE_BONUS } else { 0.0 });
    ledger.apply("message", message_bonus(lead.message_len()));
    ledger.apply("recency", recency_bonus(hours_since(lead.created_at, now)));
    ledger
}

pub fn lead_score(lead: &LeadRecord, now: DateTime<Utc>) -> u8 {
    lead_ledger(lead, now).score()
}

pub fn score_lead(lead: &LeadRecord, now: DateTime<Utc>) -> LeadAssessment {
    let ledger = lead_ledger(lead, now);
    let score = ledger.score();
    LeadAssessment {
        lead_id: lead.id.clone(),
        score,
        temperature: Temperature::from_score(score),
        breakdown: ledger.into_breakdown(),
    }
}
