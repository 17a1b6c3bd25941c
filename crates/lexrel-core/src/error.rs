use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid pipeline stage: {0}")]
    InvalidStage(String),

    #[error("unknown case: {0}")]
    UnknownCase(String),

    #[error("lead {lead_id} is {status} and cannot change status")]
    TerminalLead { lead_id: String, status: String },

    #[error("persistence failed for case {case_id}: {message}")]
    Persistence {
        case_id: String,
        message: String,
        retryable: bool,
    },
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence { retryable: true, .. })
    }
}
