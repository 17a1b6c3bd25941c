use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::{assess_client, ClientRecord, RiskLevel};
use crate::lead::{score_lead, LeadRecord, LeadStatus, Temperature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RiskDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioHealth {
    pub clients: usize,
    pub average_health: f64,
    pub risk: RiskDistribution,
}

#[allow(clippy::cast_precision_loss)]
pub fn portfolio_health(clients: &[ClientRecord], now: DateTime<Utc>) -> PortfolioHealth {
    let mut risk = RiskDistribution::default();
    let mut total = 0_u64;
    for client in clients {
        let assessment = assess_client(client, now);
        total += u64::from(assessment.health_score);
        match assessment.risk_level {
            RiskLevel::Low => risk.low += 1,
            RiskLevel::Medium => risk.medium += 1,
            RiskLevel::High => risk.high += 1,
        }
    }
    let average_health = if clients.is_empty() {
        0.0
    } else {
        total as f64 / clients.len() as f64
    };
    PortfolioHealth {
        clients: clients.len(),
        average_health,
        risk,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TemperatureCounts {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusCounts {
    pub new: usize,
    pub contacted: usize,
    pub qualified: usize,
    pub converted: usize,
    pub lost: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadFunnel {
    pub leads: usize,
    pub temperature: TemperatureCounts,
    pub status: StatusCounts,
    /// Converted over closed (converted + lost); zero when nothing closed.
    pub conversion_rate: f64,
}

#[allow(clippy::cast_precision_loss)]
pub fn lead_funnel(leads: &[LeadRecord], now: DateTime<Utc>) -> LeadFunnel {
    let mut temperature = TemperatureCounts::default();
    let mut status = StatusCounts::default();
    for lead in leads {
        match score_lead(lead, now).temperature {
            Temperature::Hot => temperature.hot += 1,
            Temperature::Warm => temperature.warm += 1,
            Temperature::Cold => temperature.cold += 1,
        }
        match lead.status {
            LeadStatus::New => status.new += 1,
            LeadStatus::Contacted => status.contacted += 1,
            LeadStatus::Qualified => status.qualified += 1,
            LeadStatus::Converted => status.converted += 1,
            LeadStatus::Lost => status.lost += 1,
        }
    }
    let closed = status.converted + status.lost;
    let conversion_rate = if closed == 0 {
        0.0
    } else {
        status.converted as f64 / closed as f64
    };
    LeadFunnel {
        leads: leads.len(),
        temperature,
        status,
        conversion_rate,
    }
}
