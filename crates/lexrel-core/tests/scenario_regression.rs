use std::fs;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use lexrel_core::{assess_client, score_lead, ClientRecord, LeadRecord};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct ClientCase {
    name: String,
    days_since_contact: Option<i64>,
    record: Value,
    expected_health: u8,
    expected_risk: String,
}

#[derive(Debug, Deserialize)]
struct LeadCase {
    name: String,
    hours_old: i64,
    message_chars: usize,
    record: Value,
    expected_score: u8,
    expected_temperature: String,
}

fn fixture(file: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("data")
        .join("scenarios")
        .join(file);
    fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
}

fn label<T: serde::Serialize>(v: &T) -> String {
    serde_json::to_value(v)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[test]
fn client_health_cases_pass() {
    let now = Utc::now();
    let cases: Vec<ClientCase> =
        serde_json::from_str(&fixture("client_cases.json")).expect("parse client cases");

    for case in cases {
        let mut record = case.record;
        if let (Some(days), Some(obj)) = (case.days_since_contact, record.as_object_mut()) {
            obj.insert(
                "lastContactDate".to_string(),
                serde_json::to_value(now - Duration::days(days)).expect("timestamp"),
            );
        }
        let client: ClientRecord = serde_json::from_value(record)
            .unwrap_or_else(|e| panic!("case {} record: {e}", case.name));

        let out = assess_client(&client, now);
        assert_eq!(out.health_score, case.expected_health, "case {} health", case.name);
        assert_eq!(label(&out.risk_level), case.expected_risk, "case {} risk", case.name);
        assert_eq!(out, assess_client(&client, now), "case {} idempotence", case.name);
    }
}

#[test]
fn lead_score_cases_pass() {
    let now = Utc::now();
    let cases: Vec<LeadCase> =
        serde_json::from_str(&fixture("lead_cases.json")).expect("parse lead cases");

    for case in cases {
        let mut record = case.record;
        if let Some(obj) = record.as_object_mut() {
            obj.insert(
                "createdAt".to_string(),
                serde_json::to_value(now - Duration::hours(case.hours_old)).expect("timestamp"),
            );
            obj.insert("message".to_string(), Value::String("m".repeat(case.message_chars)));
        }
        let lead: LeadRecord = serde_json::from_value(record)
            .unwrap_or_else(|e| panic!("case {} record: {e}", case.name));

        let out = score_lead(&lead, now);
        assert_eq!(out.score, case.expected_score, "case {} score", case.name);
        assert_eq!(
            label(&out.temperature),
            case.expected_temperature,
            "case {} temperature",
            case.name
        );
    }
}
