use std::time::Instant;

use chrono::{Duration, Utc};
use lexrel_core::{
    compute_aggregate, recommend, CaseRecord, ClientRecord, PaymentStatus, PipelineBoard,
    PipelineStage,
};

fn make_cases(n: usize) -> Vec<CaseRecord> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let stage = PipelineStage::ALL[i % PipelineStage::ALL.len()];
        let mut case = CaseRecord::new(format!("case-{i}"), format!("client-{}", i % 5_000), stage);
        case.expected_value = 1_000.0 + (i % 97) as f64 * 250.0;
        case.probability = (i % 101) as f64;
        out.push(case);
    }
    out
}

fn make_clients(n: usize) -> Vec<ClientRecord> {
    let now = Utc::now();
    (0..n)
        .map(|i| {
            let mut c = ClientRecord::new(format!("client-{i}"));
            c.last_contact_date = Some(now - Duration::days((i % 90) as i64));
            c.payment_status = if i % 7 == 0 {
                PaymentStatus::Overdue
            } else {
                PaymentStatus::Current
            };
            c.engagement_score = (i % 100) as f64;
            c
        })
        .collect()
}

fn percentile(sorted_ms: &[f64], p: f64) -> f64 {
    let idx = ((sorted_ms.len().saturating_sub(1)) as f64 * p).round() as usize;
    sorted_ms[idx]
}

#[test]
#[ignore]
fn transition_p95_under_threshold_on_100k() {
    let mut board = PipelineBoard::new(make_cases(100_000));

    let mut samples_ms = Vec::new();
    for i in 0..120 {
        let case_id = format!("case-{}", i * 811);
        let target = PipelineStage::ALL[(i + 3) % PipelineStage::ALL.len()];

        let started = Instant::now();
        board
            .transition_with(&case_id, target.key(), |_| Ok::<(), String>(()))
            .expect("transition");
        samples_ms.push(started.elapsed().as_secs_f64() * 1000.0);
    }

    assert_eq!(board.aggregate(), &compute_aggregate(board.cases()));

    samples_ms.sort_by(|a, b| a.total_cmp(b));
    let p95 = percentile(&samples_ms, 0.95);
    eprintln!("transition p95(ms) on 100k cases: {:.3}", p95);

    assert!(p95 < 200.0, "p95 too high: {:.3}ms", p95);
}

#[test]
#[ignore]
fn recommendations_on_100k_cases_stay_capped() {
    let cases = make_cases(100_000);
    let clients = make_clients(5_000);

    let started = Instant::now();
    let recs = recommend(&clients, &[], &cases, Utc::now());
    let elapsed = started.elapsed().as_secs_f64() * 1000.0;
    eprintln!("recommendations(ms) over 5k clients / 100k cases: {:.3}", elapsed);

    assert_eq!(recs.len(), 5);
    assert!(elapsed < 1_000.0, "too slow: {:.3}ms", elapsed);
}
