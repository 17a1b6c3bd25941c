use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::{ClientRecord, PaymentStatus};
use crate::lead::{score_lead, LeadRecord, LeadStatus, NurtureStage, Temperature};
use crate::pipeline::CaseRecord;

pub const MAX_RECOMMENDATIONS: usize = 5;

pub const CALL_AFTER_DAYS: i64 = 30;
pub const URGENT_CALL_AFTER_DAYS: i64 = 60;
pub const LOW_ENGAGEMENT_BELOW: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Call,
    Email,
    Meeting,
    Payment,
}

/// Declaration order is sort order: `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RecommendationTarget {
    Client(String),
    Lead(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub priority: RecommendationPriority,
    pub target: RecommendationTarget,
    pub message: String,
    pub action: String,
}

fn display_name<'a>(name: &'a str, id: &'a str) -> &'a str {
    if name.trim().is_empty() {
        id
    } else {
        name
    }
}

fn client_rules(
    client: &ClientRecord,
    open_case_clients: &HashSet<&str>,
    now: DateTime<Utc>,
    out: &mut Vec<Recommendation>,
) {
    let name = display_name(&client.name, &client.id);
    let target = || RecommendationTarget::Client(client.id.clone());
    let days = client.days_since_contact(now);

    if days.is_none_or(|d| d > CALL_AFTER_DAYS) {
        let urgent = days.is_none_or(|d| d > URGENT_CALL_AFTER_DAYS);
        let message = days.map_or_else(
            || format!("{name} has no recorded contact"),
            |d| format!("{name} has not been contacted in {d} days"),
        );
        out.push(Recommendation {
            kind: RecommendationKind::Call,
            priority: if urgent {
                RecommendationPriority::High
            } else {
                RecommendationPriority::Medium
            },
            target: target(),
            message,
            action: format!("Call {name} to check in"),
        });
    }

    if client.payment_status == PaymentStatus::Overdue {
        out.push(Recommendation {
            kind: RecommendationKind::Payment,
            priority: RecommendationPriority::High,
            target: target(),
            message: format!("{name} has an overdue payment"),
            action: format!("Send a payment reminder to {name}"),
        });
    }

    if client.engagement_score < LOW_ENGAGEMENT_BELOW
        && open_case_clients.contains(client.id.as_str())
    {
        out.push(Recommendation {
            kind: RecommendationKind::Email,
            priority: RecommendationPriority::Medium,
            target: target(),
            message: format!("{name} shows low engagement on an open case"),
            action: format!("Email {name} a case status update"),
        });
    }
}

fn lead_rules(lead: &LeadRecord, now: DateTime<Utc>, out: &mut Vec<Recommendation>) {
    if lead.status.is_terminal() {
        return;
    }
    let name = display_name(&lead.name, &lead.id);
    let target = || RecommendationTarget::Lead(lead.id.clone());
    let temperature = score_lead(lead, now).temperature;

    match (lead.status, temperature) {
        (LeadStatus::New, Temperature::Hot) => out.push(Recommendation {
            kind: RecommendationKind::Call,
            priority: RecommendationPriority::High,
            target: target(),
            message: format!("{name} is a hot lead awaiting first contact"),
            action: format!("Call {name} today"),
        }),
        (LeadStatus::New, Temperature::Warm) => out.push(Recommendation {
            kind: RecommendationKind::Email,
            priority: RecommendationPriority::Medium,
            target: target(),
            message: format!("{name} is a warm lead awaiting first contact"),
            action: format!("Send {name} an introduction email"),
        }),
        (LeadStatus::Qualified, _) if lead.nurture_stage < NurtureStage::MeetingScheduled => {
            out.push(Recommendation {
                kind: RecommendationKind::Meeting,
                priority: RecommendationPriority::Medium,
                target: target(),
                message: format!("{name} is qualified but has no meeting yet"),
                action: format!("Schedule a consultation with {name}"),
            });
        }
        _ => {}
    }
}

/// Suggested next actions, most urgent first, at most [`MAX_RECOMMENDATIONS`].
///
/// Clients are evaluated before leads, each in the order given; equal
/// priorities keep that order.
pub fn recommend(
    clients: &[ClientRecord],
    leads: &[LeadRecord],
    cases: &[CaseRecord],
    now: DateTime<Utc>,
) -> Vec<Recommendation> {
    let open_case_clients: HashSet<&str> = cases
        .iter()
        .filter(|c| c.is_open())
        .map(|c| c.client_id.as_str())
        .collect();

    let mut out = Vec::new();
    for client in clients {
        client_rules(client, &open_case_clients, now, &mut out);
    }
    for lead in leads {
        lead_rules(lead, now, &mut out);
    }

    out.sort_by_key(|r| r.priority);
    out.truncate(MAX_RECOMMENDATIONS);
    out
}
