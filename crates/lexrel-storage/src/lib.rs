use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lexrel_core::{
    CaseRecord, ClientRecord, EngineError, LeadRecord, LeadStatus, NurtureStage, PipelineStage,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Everything the engine reads, as one consistent copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub clients: Vec<ClientRecord>,
    #[serde(default)]
    pub leads: Vec<LeadRecord>,
    #[serde(default)]
    pub cases: Vec<CaseRecord>,
}

/// Field-level lead changes; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadUpdate {
    pub status: Option<LeadStatus>,
    pub nurture_stage: Option<NurtureStage>,
    pub score: Option<u8>,
}

pub trait RecordStore: Send {
    fn snapshot(&self) -> Snapshot;
    fn client(&self, id: &str) -> Option<ClientRecord>;
    fn lead(&self, id: &str) -> Option<LeadRecord>;
    fn case(&self, id: &str) -> Option<CaseRecord>;
    fn upsert_client(&mut self, client: ClientRecord) -> Result<ClientRecord, StorageError>;
    fn upsert_lead(&mut self, lead: LeadRecord) -> Result<LeadRecord, StorageError>;
    fn upsert_case(&mut self, case: CaseRecord) -> Result<CaseRecord, StorageError>;
    fn update_case_stage(
        &mut self,
        case_id: &str,
        stage: PipelineStage,
    ) -> Result<CaseRecord, StorageError>;
    fn record_interaction(
        &mut self,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ClientRecord, StorageError>;
    fn update_lead(&mut self, lead_id: &str, update: LeadUpdate)
        -> Result<LeadRecord, StorageError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Rejected(#[from] EngineError),
}

/// JSON-file store; the whole file is rewritten on every mutation.
pub struct PersistentRecordStore {
    path: PathBuf,
    data: Snapshot,
    next_id: u64,
}

impl PersistentRecordStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if !path.exists() {
            let bytes = serde_json::to_vec_pretty(&Snapshot::default())?;
            fs::write(&path, bytes)?;
        }

        let bytes = fs::read(&path)?;
        let data: Snapshot = serde_json::from_slice(&bytes)?;
        let next_id = data
            .clients
            .iter()
            .map(|c| c.id.as_str())
            .chain(data.leads.iter().map(|l| l.id.as_str()))
            .chain(data.cases.iter().map(|c| c.id.as_str()))
            .filter_map(|id| id.rsplit_once('-')?.1.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;

        info!(
            path = %path.display(),
            clients = data.clients.len(),
            leads = data.leads.len(),
            cases = data.cases.len(),
            "record store opened"
        );
        Ok(Self {
            path,
            data,
            next_id,
        })
    }

    fn assign_id(&mut self, id: &mut String, prefix: &str) {
        if id.trim().is_empty() {
            *id = format!("{prefix}-{}", self.next_id);
            self.next_id += 1;
        }
    }

    pub fn upsert_client(
        &mut self,
        mut client: ClientRecord,
    ) -> Result<ClientRecord, StorageError> {
        self.assign_id(&mut client.id, "client");
        let client = client.normalized();
        let mut next = self.data.clone();
        upsert_by_id(&mut next.clients, client.clone(), |c| &c.id);
        self.commit(next)?;
        Ok(client)
    }

    pub fn upsert_lead(&mut self, mut lead: LeadRecord) -> Result<LeadRecord, StorageError> {
        self.assign_id(&mut lead.id, "lead");
        let mut next = self.data.clone();
        upsert_by_id(&mut next.leads, lead.clone(), |l| &l.id);
        self.commit(next)?;
        Ok(lead)
    }

    /// Creates a case or replaces its details. The stage of an existing case
    /// is kept; stages only change through `update_case_stage`.
    pub fn upsert_case(&mut self, mut case: CaseRecord) -> Result<CaseRecord, StorageError> {
        if !self.data.clients.iter().any(|c| c.id == case.client_id) {
            return Err(StorageError::InvalidInput(format!(
                "case references unknown client {}",
                case.client_id
            )));
        }
        self.assign_id(&mut case.id, "case");
        let mut case = case.normalized();
        if let Some(existing) = self.data.cases.iter().find(|c| c.id == case.id) {
            if existing.pipeline_stage != case.pipeline_stage {
                debug!(
                    case_id = %case.id,
                    kept = %existing.pipeline_stage,
                    requested = %case.pipeline_stage,
                    "ignoring stage on case replace"
                );
            }
            case.pipeline_stage = existing.pipeline_stage;
        }
        let mut next = self.data.clone();
        upsert_by_id(&mut next.cases, case.clone(), |c| &c.id);
        self.commit(next)?;
        Ok(case)
    }

    pub fn update_case_stage(
        &mut self,
        case_id: &str,
        stage: PipelineStage,
    ) -> Result<CaseRecord, StorageError> {
        let mut next = self.data.clone();
        let case = next
            .cases
            .iter_mut()
            .find(|c| c.id == case_id)
            .ok_or_else(|| not_found("case", case_id))?;
        case.pipeline_stage = stage;
        let updated = case.clone();
        self.commit(next)?;
        debug!(case_id, %stage, "case stage persisted");
        Ok(updated)
    }

    /// Moves `lastContactDate` forward to `at`; older interactions are ignored.
    pub fn record_interaction(
        &mut self,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ClientRecord, StorageError> {
        let mut next = self.data.clone();
        let client = next
            .clients
            .iter_mut()
            .find(|c| c.id == client_id)
            .ok_or_else(|| not_found("client", client_id))?;
        if client.last_contact_date.is_none_or(|last| at > last) {
            client.last_contact_date = Some(at);
        }
        let updated = client.clone();
        self.commit(next)?;
        Ok(updated)
    }

    pub fn update_lead(
        &mut self,
        lead_id: &str,
        update: LeadUpdate,
    ) -> Result<LeadRecord, StorageError> {
        let mut next = self.data.clone();
        let lead = next
            .leads
            .iter_mut()
            .find(|l| l.id == lead_id)
            .ok_or_else(|| not_found("lead", lead_id))?;

        if let Some(status) = update.status {
            lead.set_status(status)?;
        }
        if let Some(stage) = update.nurture_stage {
            lead.nurture_stage = stage;
        }
        if let Some(score) = update.score {
            lead.score = Some(score.min(100));
        }
        let updated = lead.clone();
        self.commit(next)?;
        Ok(updated)
    }

    /// Writes `next` to disk and only then makes it the in-memory state, so a
    /// failed write leaves both untouched.
    fn commit(&mut self, next: Snapshot) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(&next)?;
        fs::write(&self.path, bytes).inspect_err(|err| {
            warn!(path = %self.path.display(), error = %err, "record store write failed");
        })?;
        self.data = next;
        Ok(())
    }
}

impl RecordStore for PersistentRecordStore {
    fn snapshot(&self) -> Snapshot {
        self.data.clone()
    }

    fn client(&self, id: &str) -> Option<ClientRecord> {
        self.data.clients.iter().find(|c| c.id == id).cloned()
    }

    fn lead(&self, id: &str) -> Option<LeadRecord> {
        self.data.leads.iter().find(|l| l.id == id).cloned()
    }

    fn case(&self, id: &str) -> Option<CaseRecord> {
        self.data.cases.iter().find(|c| c.id == id).cloned()
    }

    fn upsert_client(&mut self, client: ClientRecord) -> Result<ClientRecord, StorageError> {
        Self::upsert_client(self, client)
    }

    fn upsert_lead(&mut self, lead: LeadRecord) -> Result<LeadRecord, StorageError> {
        Self::upsert_lead(self, lead)
    }

    fn upsert_case(&mut self, case: CaseRecord) -> Result<CaseRecord, StorageError> {
        Self::upsert_case(self, case)
    }

    fn update_case_stage(
        &mut self,
        case_id: &str,
        stage: PipelineStage,
    ) -> Result<CaseRecord, StorageError> {
        Self::update_case_stage(self, case_id, stage)
    }

    fn record_interaction(
        &mut self,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ClientRecord, StorageError> {
        Self::record_interaction(self, client_id, at)
    }

    fn update_lead(
        &mut self,
        lead_id: &str,
        update: LeadUpdate,
    ) -> Result<LeadRecord, StorageError> {
        Self::update_lead(self, lead_id, update)
    }
}

fn not_found(kind: &'static str, id: &str) -> StorageError {
    StorageError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn upsert_by_id<T>(items: &mut Vec<T>, item: T, id_of: impl Fn(&T) -> &String) {
    match items.iter().position(|existing| id_of(existing) == id_of(&item)) {
        Some(idx) => {
            if let Some(slot) = items.get_mut(idx) {
                *slot = item;
            }
        }
        None => items.push(item),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use chrono::Duration;

    use super::*;

    static TEMP_SEQ: AtomicU64 = AtomicU64::new(1);

    fn temp_path() -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "lexrel-store-{}-{}-{seq}.json",
            std::process::id(),
            Utc::now().timestamp_millis()
        ))
    }

    #[test]
    fn intake_assigns_ids_and_survives_reopen() {
        let path = temp_path();
        let mut store = PersistentRecordStore::open(&path).expect("open store");

        let client = store
            .upsert_client(ClientRecord::new(""))
            .expect("client intake");
        assert_eq!(client.id, "client-1");
        let case = store
            .upsert_case(CaseRecord::new("", &client.id, PipelineStage::Inicial))
            .expect("case open");
        assert_eq!(case.id, "case-2");

        let reopened = PersistentRecordStore::open(&path).expect("reopen");
        assert_eq!(reopened.snapshot(), store.snapshot());
        assert_eq!(reopened.next_id, 3);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn case_for_unknown_client_is_rejected() {
        let path = temp_path();
        let mut store = PersistentRecordStore::open(&path).expect("open store");
        let err = store.upsert_case(CaseRecord::new("case-1", "ghost", PipelineStage::Cobro));
        assert!(matches!(err, Err(StorageError::InvalidInput(_))));
        assert!(store.snapshot().cases.is_empty());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn interactions_only_move_contact_forward() {
        let path = temp_path();
        let mut store = PersistentRecordStore::open(&path).expect("open store");
        store.upsert_client(ClientRecord::new("c-1")).expect("client");

        let now = Utc::now();
        let first = store.record_interaction("c-1", now).expect("interaction");
        assert_eq!(first.last_contact_date, Some(now));
        let older = store
            .record_interaction("c-1", now - Duration::days(3))
            .expect("older interaction");
        assert_eq!(older.last_contact_date, Some(now));

        let missing = store.record_interaction("c-404", now);
        assert!(matches!(missing, Err(StorageError::NotFound { kind: "client", .. })));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn terminal_leads_keep_their_status() {
        let path = temp_path();
        let mut store = PersistentRecordStore::open(&path).expect("open store");
        store
            .upsert_lead(LeadRecord::new("l-1", Utc::now()))
            .expect("lead");

        let converted = store
            .update_lead(
                "l-1",
                LeadUpdate {
                    status: Some(LeadStatus::Converted),
                    nurture_stage: Some(NurtureStage::Negotiation),
                    score: Some(88),
                },
            )
            .expect("convert");
        assert_eq!(converted.status, LeadStatus::Converted);
        assert_eq!(converted.score, Some(88));

        let err = store.update_lead(
            "l-1",
            LeadUpdate {
                status: Some(LeadStatus::New),
                ..LeadUpdate::default()
            },
        );
        assert!(matches!(err, Err(StorageError::Rejected(_))));
        assert_eq!(
            store.lead("l-1").map(|l| l.status),
            Some(LeadStatus::Converted)
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn stage_updates_are_written_through() {
        let path = temp_path();
        let mut store = PersistentRecordStore::open(&path).expect("open store");
        store.upsert_client(ClientRecord::new("c-1")).expect("client");
        store
            .upsert_case(CaseRecord::new("k-1", "c-1", PipelineStage::Inicial))
            .expect("case");
        store
            .update_case_stage("k-1", PipelineStage::Audiencias)
            .expect("stage");

        let reopened = PersistentRecordStore::open(&path).expect("reopen");
        assert_eq!(
            reopened.case("k-1").map(|c| c.pipeline_stage),
            Some(PipelineStage::Audiencias)
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn failed_write_leaves_memory_and_disk_unchanged() {
        let path = temp_path();
        let mut store = PersistentRecordStore::open(&path).expect("open store");
        store.upsert_client(ClientRecord::new("c-1")).expect("client");
        store
            .upsert_case(CaseRecord::new("k-1", "c-1", PipelineStage::Inicial))
            .expect("case");

        fs::remove_file(&path).expect("remove db file");
        fs::create_dir(&path).expect("block db path");
        let err = store.update_case_stage("k-1", PipelineStage::Cobro);
        assert!(matches!(err, Err(StorageError::Io(_))));
        assert_eq!(
            store.case("k-1").map(|c| c.pipeline_stage),
            Some(PipelineStage::Inicial)
        );
        assert!(store.record_interaction("c-1", Utc::now()).is_err());
        assert_eq!(store.client("c-1").and_then(|c| c.last_contact_date), None);

        fs::remove_dir(&path).expect("unblock db path");
        store
            .record_interaction("c-1", Utc::now())
            .expect("interaction after recovery");
        let reopened = PersistentRecordStore::open(&path).expect("reopen");
        assert_eq!(
            reopened.case("k-1").map(|c| c.pipeline_stage),
            Some(PipelineStage::Inicial)
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn replacing_a_case_keeps_its_stage() {
        let path = temp_path();
        let mut store = PersistentRecordStore::open(&path).expect("open store");
        store.upsert_client(ClientRecord::new("c-1")).expect("client");
        store
            .upsert_case(CaseRecord::new("k-1", "c-1", PipelineStage::EnCurso))
            .expect("case");

        let mut replacement = CaseRecord::new("k-1", "c-1", PipelineStage::Cobro);
        replacement.title = "Renamed".to_string();
        let stored = store.upsert_case(replacement).expect("replace");
        assert_eq!(stored.pipeline_stage, PipelineStage::EnCurso);
        assert_eq!(stored.title, "Renamed");
        assert_eq!(store.case("k-1"), Some(stored));
        let _ = fs::remove_file(path);
    }
}
