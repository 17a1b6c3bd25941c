use std::io;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lexrel_core::{
    assess_client, lead_funnel, portfolio_health, recommend, score_lead, CaseRecord,
    ClientRecord, EngineError, LeadRecord, LeadStatus, NurtureStage, PipelineBoard,
    PipelineStage, StageAggregate,
};
use lexrel_storage::{LeadUpdate, PersistentRecordStore, RecordStore, StorageError};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::stdio::{self, Incoming};
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, NOT_FOUND, PARSE_ERROR, PERSISTENCE_FAILED,
};

const DEFAULT_MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Hosts the engine over JSON-RPC against a record store.
///
/// The board is the server's optimistic view of the cases; it is locked
/// before the store whenever both are needed.
pub struct LexrelServer {
    store: Arc<Mutex<Box<dyn RecordStore>>>,
    board: Mutex<PipelineBoard>,
}

impl LexrelServer {
    pub fn from_config(config: &ServerConfig) -> Result<Self, StorageError> {
        Self::with_db_path(&config.db_path)
    }

    pub fn with_db_path(db_path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let store = PersistentRecordStore::open(db_path)?;
        Ok(Self::with_store(Box::new(store)))
    }

    pub fn with_store(store: Box<dyn RecordStore>) -> Self {
        let board = PipelineBoard::new(store.snapshot().cases);
        Self {
            store: Arc::new(Mutex::new(store)),
            board: Mutex::new(board),
        }
    }

    pub fn board_snapshot(&self) -> PipelineBoard {
        self.board.lock().clone()
    }

    pub fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "invalid jsonrpc version",
            ));
        }

        let is_notification = request.id.is_none();
        let id = request.id.clone().unwrap_or(Value::Null);

        if is_notification && request.method == "notifications/initialized" {
            return None;
        }

        let response = match request.method.as_str() {
            "initialize" => {
                let protocol_version = request
                    .params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_MCP_PROTOCOL_VERSION);
                JsonRpcResponse::success(
                    id,
                    json!({
                        "protocolVersion": protocol_version,
                        "serverInfo": {"name": "lexrel-mcp", "version": env!("CARGO_PKG_VERSION")},
                        "capabilities": {
                            "tools": {"listChanged": false}
                        }
                    }),
                )
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, tools_list_result()),
            "tools/call" => self.handle_tools_call(id, request.params),
            _ => JsonRpcResponse::error(id, METHOD_NOT_FOUND, "method not found"),
        };

        Some(response)
    }

    fn handle_tools_call(&self, id: Value, params: Value) -> JsonRpcResponse {
        let parsed: ToolsCallParams = match serde_json::from_value(params) {
            Ok(v) => v,
            Err(err) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("invalid params: {err}"));
            }
        };

        let start = Instant::now();
        let args = parsed.arguments;
        let response = match parsed.name.as_str() {
            "client_health" => self.exec_client_health(id, args),
            "portfolio_health" => self.exec_portfolio_health(id, args),
            "lead_score" => self.exec_lead_score(id, args),
            "lead_funnel" => self.exec_lead_funnel(id, args),
            "recommendations" => self.exec_recommendations(id, args),
            "pipeline_summary" => self.exec_pipeline_summary(id),
            "pipeline_transition" => self.exec_pipeline_transition(id, args),
            "record_interaction" => self.exec_record_interaction(id, args),
            "lead_update" => self.exec_lead_update(id, args),
            "client_intake" => self.exec_client_intake(id, args),
            "lead_capture" => self.exec_lead_capture(id, args),
            "case_open" => self.exec_case_open(id, args),
            _ => JsonRpcResponse::error(id, METHOD_NOT_FOUND, "unknown tool"),
        };
        debug!(
            tool = %parsed.name,
            latency_ms = start.elapsed().as_secs_f64() * 1000.0,
            is_error = response.error.is_some(),
            "tool call finished"
        );
        response
    }

    fn exec_client_health(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let args: ClientHealthInput = match parse_args_optional(arguments) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };
        let now = args.now.unwrap_or_else(Utc::now);

        let clients = match args.client_id {
            Some(client_id) => match self.store.lock().client(&client_id) {
                Some(c) => vec![c],
                None => {
                    return JsonRpcResponse::error(
                        id,
                        NOT_FOUND,
                        format!("client not found: {client_id}"),
                    )
                }
            },
            None => self.store.lock().snapshot().clients,
        };

        let assessments: Vec<_> = clients.iter().map(|c| assess_client(c, now)).collect();
        let text = assessments
            .iter()
            .map(|a| {
                format!(
                    "{}: health={} risk={}",
                    a.client_id,
                    a.health_score,
                    a.risk_level.as_str()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        JsonRpcResponse::tool_result(
            id,
            text,
            json!({"count": assessments.len(), "clients": assessments}),
        )
    }

    fn exec_portfolio_health(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let args: AtTimeInput = match parse_args_optional(arguments) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };
        let clients = self.store.lock().snapshot().clients;
        let out = portfolio_health(&clients, args.now.unwrap_or_else(Utc::now));
        JsonRpcResponse::tool_result(
            id,
            format!(
                "clients={}, average_health={:.1}, high_risk={}",
                out.clients, out.average_health, out.risk.high
            ),
            json!(out),
        )
    }

    fn exec_lead_score(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let args: LeadScoreInput = match parse_args(arguments) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };
        let now = args.now.unwrap_or_else(Utc::now);

        let mut store = self.store.lock();
        let Some(lead) = store.lead(&args.lead_id) else {
            return JsonRpcResponse::error(
                id,
                NOT_FOUND,
                format!("lead not found: {}", args.lead_id),
            );
        };
        let assessment = score_lead(&lead, now);

        if args.write_back {
            let update = LeadUpdate {
                score: Some(assessment.score),
                ..LeadUpdate::default()
            };
            if let Err(err) = store.update_lead(&lead.id, update) {
                return storage_error_response(id, &err);
            }
        }

        JsonRpcResponse::tool_result(
            id,
            format!(
                "{}: score={} temperature={}",
                assessment.lead_id,
                assessment.score,
                assessment.temperature.as_str()
            ),
            json!(assessment),
        )
    }

    fn exec_lead_funnel(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let args: AtTimeInput = match parse_args_optional(arguments) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };
        let leads = self.store.lock().snapshot().leads;
        let out = lead_funnel(&leads, args.now.unwrap_or_else(Utc::now));
        JsonRpcResponse::tool_result(
            id,
            format!(
                "leads={}, hot={}, conversion_rate={:.2}",
                out.leads, out.temperature.hot, out.conversion_rate
            ),
            json!(out),
        )
    }

    fn exec_recommendations(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let args: AtTimeInput = match parse_args_optional(arguments) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };
        let cases = self.board.lock().cases().to_vec();
        let snapshot = self.store.lock().snapshot();
        let recs = recommend(
            &snapshot.clients,
            &snapshot.leads,
            &cases,
            args.now.unwrap_or_else(Utc::now),
        );
        let text = recs
            .iter()
            .map(|r| r.action.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        JsonRpcResponse::tool_result(
            id,
            text,
            json!({"count": recs.len(), "recommendations": recs}),
        )
    }

    fn exec_pipeline_summary(&self, id: Value) -> JsonRpcResponse {
        let board = self.board.lock();
        let summary = pipeline_summary_json(&board);
        let totals = board.aggregate().totals;
        JsonRpcResponse::tool_result(
            id,
            format!(
                "active_cases={}, total_value={:.2}, weighted_value={:.2}",
                totals.count, totals.total_value, totals.weighted_value
            ),
            summary,
        )
    }

    fn exec_pipeline_transition(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let args: PipelineTransitionInput = match parse_args(arguments) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };

        let mut board = self.board.lock();
        let store = &self.store;
        let receipt = match board.transition_with(&args.case_id, &args.stage, |case| {
            store
                .lock()
                .update_case_stage(&case.id, case.pipeline_stage)
                .map(|_| ())
        }) {
            Ok(r) => r,
            Err(err) => return engine_error_response(id, &err),
        };
        info!(
            case_id = %receipt.case_id,
            from = %receipt.from,
            to = %receipt.to,
            "pipeline transition persisted"
        );

        let aggregate = board.aggregate();
        JsonRpcResponse::tool_result(
            id,
            format!("{}: {} -> {}", receipt.case_id, receipt.from, receipt.to),
            json!({
                "case_id": receipt.case_id,
                "from": receipt.from,
                "to": receipt.to,
                "from_stage": aggregate.stage(receipt.from).map(stage_json),
                "to_stage": aggregate.stage(receipt.to).map(stage_json),
                "totals": aggregate.totals
            }),
        )
    }

    fn exec_record_interaction(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let args: RecordInteractionInput = match parse_args(arguments) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };
        let at = args.at.unwrap_or_else(Utc::now);
        match self.store.lock().record_interaction(&args.client_id, at) {
            Ok(client) => {
                let assessment = assess_client(&client, Utc::now().max(at));
                JsonRpcResponse::tool_result(
                    id,
                    format!("{}: contact recorded", client.id),
                    json!({"client": client, "assessment": assessment}),
                )
            }
            Err(err) => storage_error_response(id, &err),
        }
    }

    fn exec_lead_update(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let args: LeadUpdateInput = match parse_args(arguments) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };
        if args.advance && args.nurture_stage.is_some() {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                "advance and nurture_stage are mutually exclusive",
            );
        }

        let mut store = self.store.lock();
        let nurture_stage = if args.advance {
            match store.lead(&args.lead_id) {
                Some(lead) => Some(lead.nurture_stage.next()),
                None => {
                    return JsonRpcResponse::error(
                        id,
                        NOT_FOUND,
                        format!("lead not found: {}", args.lead_id),
                    )
                }
            }
        } else {
            args.nurture_stage
        };

        let update = LeadUpdate {
            status: args.status,
            nurture_stage,
            score: None,
        };
        match store.update_lead(&args.lead_id, update) {
            Ok(lead) => JsonRpcResponse::tool_result(
                id,
                format!("{}: status={}", lead.id, lead.status.as_str()),
                json!(lead),
            ),
            Err(err) => storage_error_response(id, &err),
        }
    }

    fn exec_client_intake(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let client: ClientRecord = match parse_record(arguments, None) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };
        match self.store.lock().upsert_client(client) {
            Ok(stored) => JsonRpcResponse::tool_result(
                id,
                format!("client stored: {}", stored.id),
                json!(stored),
            ),
            Err(err) => storage_error_response(id, &err),
        }
    }

    fn exec_lead_capture(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let lead: LeadRecord = match parse_record(arguments, Some("createdAt")) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };
        match self.store.lock().upsert_lead(lead) {
            Ok(stored) => {
                let assessment = score_lead(&stored, Utc::now());
                JsonRpcResponse::tool_result(
                    id,
                    format!(
                        "lead stored: {} ({})",
                        stored.id,
                        assessment.temperature.as_str()
                    ),
                    json!({"lead": stored, "assessment": assessment}),
                )
            }
            Err(err) => storage_error_response(id, &err),
        }
    }

    fn exec_case_open(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let case: CaseRecord = match parse_record(arguments, None) {
            Ok(v) => v,
            Err(resp) => return with_id(resp, id),
        };

        let mut board = self.board.lock();
        let stored = match self.store.lock().upsert_case(case) {
            Ok(v) => v,
            Err(err) => return storage_error_response(id, &err),
        };
        board.upsert_case(stored.clone());
        JsonRpcResponse::tool_result(
            id,
            format!("case opened: {} in {}", stored.id, stored.pipeline_stage),
            json!(stored),
        )
    }

    pub fn serve_stdio(&self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut reader = stdin.lock();
        let mut stdout = io::stdout().lock();
        info!("serving on stdio");

        while let Some(incoming) = stdio::read_message(&mut reader)? {
            let (response, framing) = match incoming {
                Incoming::Message { body, framing } => (self.handle_payload(&body), framing),
                Incoming::Malformed { reason, framing } => {
                    warn!(%reason, "dropping malformed frame");
                    let response = JsonRpcResponse::error(
                        Value::Null,
                        PARSE_ERROR,
                        format!("invalid stdio frame: {reason}"),
                    );
                    (Some(response), framing)
                }
            };
            if let Some(response) = response {
                let body = serde_json::to_vec(&response)?;
                stdio::write_message(&mut stdout, &body, framing)?;
            }
        }

        info!("stdin closed, shutting down");
        Ok(())
    }

    /// Decodes one request body and dispatches it.
    pub fn handle_payload(&self, body: &[u8]) -> Option<JsonRpcResponse> {
        match serde_json::from_slice::<JsonRpcRequest>(body) {
            Ok(request) => self.handle_request(request),
            Err(err) => {
                warn!(error = %err, "unparseable request");
                Some(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("parse error: {err}"),
                ))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolsCallParams {
    name: String,
    arguments: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct AtTimeInput {
    now: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientHealthInput {
    client_id: Option<String>,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct LeadScoreInput {
    lead_id: String,
    now: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    write_back: bool,
}

#[derive(Debug, Deserialize)]
struct PipelineTransitionInput {
    case_id: String,
    stage: String,
}

#[derive(Debug, Deserialize)]
struct RecordInteractionInput {
    client_id: String,
    at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct LeadUpdateInput {
    lead_id: String,
    status: Option<LeadStatus>,
    nurture_stage: Option<NurtureStage>,
    #[serde(default)]
    advance: bool,
}

const fn default_true() -> bool {
    true
}

fn with_id(mut response: JsonRpcResponse, id: Value) -> JsonRpcResponse {
    response.id = id;
    response
}

fn engine_error_response(id: Value, err: &EngineError) -> JsonRpcResponse {
    match err {
        EngineError::InvalidStage(_) | EngineError::TerminalLead { .. } => {
            JsonRpcResponse::error(id, INVALID_PARAMS, err.to_string())
        }
        EngineError::UnknownCase(_) => JsonRpcResponse::error(id, NOT_FOUND, err.to_string()),
        EngineError::Persistence { retryable, .. } => JsonRpcResponse::error_with_data(
            id,
            PERSISTENCE_FAILED,
            err.to_string(),
            Some(json!({"retryable": retryable})),
        ),
    }
}

fn storage_error_response(id: Value, err: &StorageError) -> JsonRpcResponse {
    match err {
        StorageError::NotFound { .. } => JsonRpcResponse::error(id, NOT_FOUND, err.to_string()),
        StorageError::InvalidInput(_) => {
            JsonRpcResponse::error(id, INVALID_PARAMS, err.to_string())
        }
        StorageError::Rejected(inner) => engine_error_response(id, inner),
        StorageError::Io(_) | StorageError::Serde(_) => {
            warn!(error = %err, "store failure");
            JsonRpcResponse::error(id, INTERNAL_ERROR, err.to_string())
        }
    }
}

fn stage_json(stage: &StageAggregate) -> Value {
    json!({
        "stage": stage.stage,
        "label": stage.stage.label(),
        "count": stage.count,
        "total_value": stage.total_value,
        "weighted_value": stage.weighted_value
    })
}

fn pipeline_summary_json(board: &PipelineBoard) -> Value {
    let aggregate = board.aggregate();
    let stages: Vec<Value> = PipelineStage::ALL
        .iter()
        .filter_map(|&stage| {
            let mut entry = stage_json(aggregate.stage(stage)?);
            let case_ids: Vec<&str> = board.cases_in(stage).map(|c| c.id.as_str()).collect();
            if let Some(obj) = entry.as_object_mut() {
                obj.insert("case_ids".to_string(), json!(case_ids));
            }
            Some(entry)
        })
        .collect();
    json!({"stages": stages, "totals": aggregate.totals})
}

fn parse_args<T: for<'de> Deserialize<'de>>(
    arguments: Option<Value>,
) -> Result<T, JsonRpcResponse> {
    let Some(args) = arguments else {
        return Err(JsonRpcResponse::error(
            Value::Null,
            INVALID_PARAMS,
            "missing tool arguments",
        ));
    };

    serde_json::from_value(args).map_err(|err| {
        JsonRpcResponse::error(
            Value::Null,
            INVALID_PARAMS,
            format!("invalid tool arguments: {err}"),
        )
    })
}

fn parse_args_optional<T: for<'de> Deserialize<'de> + Default>(
    arguments: Option<Value>,
) -> Result<T, JsonRpcResponse> {
    match arguments {
        Some(v) => serde_json::from_value(v).map_err(|err| {
            JsonRpcResponse::error(
                Value::Null,
                INVALID_PARAMS,
                format!("invalid tool arguments: {err}"),
            )
        }),
        None => Ok(T::default()),
    }
}

/// Parses a record argument, leaving `id` blank for the store to assign and
/// stamping `timestamp_field` with the current time when it is absent.
fn parse_record<T: for<'de> Deserialize<'de>>(
    arguments: Option<Value>,
    timestamp_field: Option<&str>,
) -> Result<T, JsonRpcResponse> {
    let mut args = arguments.unwrap_or_else(|| json!({}));
    let Some(obj) = args.as_object_mut() else {
        return Err(JsonRpcResponse::error(
            Value::Null,
            INVALID_PARAMS,
            "record arguments must be an object",
        ));
    };
    obj.entry("id").or_insert_with(|| json!(""));
    if let Some(field) = timestamp_field {
        obj.entry(field).or_insert_with(|| json!(Utc::now()));
    }
    parse_args(Some(args))
}

fn tools_list_result() -> Value {
    let at = || json!({"type": "string", "format": "date-time"});
    let stage_keys: Vec<&str> = PipelineStage::ALL.iter().map(|s| s.key()).collect();
    let lead_statuses: Vec<&str> = LeadStatus::ALL.iter().map(|s| s.as_str()).collect();
    json!({
        "tools": [
            {
                "name": "client_health",
                "description": "Health score and risk level for one client, or for every client.",
                "inputSchema": {
                    "type": "object",
                    "properties": {"client_id": {"type": "string"}, "now": at()}
                }
            },
            {
                "name": "portfolio_health",
                "description": "Average client health and risk distribution.",
                "inputSchema": {"type": "object", "properties": {"now": at()}}
            },
            {
                "name": "lead_score",
                "description": "Score a lead and classify its temperature; writes the score back by default.",
                "inputSchema": {
                    "type": "object",
                    "required": ["lead_id"],
                    "properties": {
                        "lead_id": {"type": "string"},
                        "now": at(),
                        "write_back": {"type": "boolean"}
                    }
                }
            },
            {
                "name": "lead_funnel",
                "description": "Lead counts by temperature and status, with conversion rate.",
                "inputSchema": {"type": "object", "properties": {"now": at()}}
            },
            {
                "name": "recommendations",
                "description": "Up to five prioritised next actions across clients and leads.",
                "inputSchema": {"type": "object", "properties": {"now": at()}}
            },
            {
                "name": "pipeline_summary",
                "description": "Per-stage case counts, total and weighted value for active cases.",
                "inputSchema": {"type": "object", "properties": {}}
            },
            {
                "name": "pipeline_transition",
                "description": "Move a case to another pipeline stage; reverted if it cannot be persisted.",
                "inputSchema": {
                    "type": "object",
                    "required": ["case_id", "stage"],
                    "properties": {
                        "case_id": {"type": "string"},
                        "stage": {"type": "string", "enum": stage_keys}
                    }
                }
            },
            {
                "name": "record_interaction",
                "description": "Log a contact with a client, updating its last contact date.",
                "inputSchema": {
                    "type": "object",
                    "required": ["client_id"],
                    "properties": {"client_id": {"type": "string"}, "at": at()}
                }
            },
            {
                "name": "lead_update",
                "description": "Change a lead's status or nurture stage.",
                "inputSchema": {
                    "type": "object",
                    "required": ["lead_id"],
                    "properties": {
                        "lead_id": {"type": "string"},
                        "status": {"type": "string", "enum": lead_statuses},
                        "nurture_stage": {"type": "string"},
                        "advance": {"type": "boolean"}
                    }
                }
            },
            {
                "name": "client_intake",
                "description": "Create or replace a client record.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"},
                        "lastContactDate": at(),
                        "paymentStatus": {"type": "string", "enum": ["current", "pending", "overdue"]},
                        "engagementScore": {"type": "number"}
                    }
                }
            },
            {
                "name": "lead_capture",
                "description": "Record an inbound lead.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"},
                        "origin": {"type": "string"},
                        "email": {"type": "string"},
                        "phone": {"type": "string"},
                        "message": {"type": "string"},
                        "createdAt": at()
                    }
                }
            },
            {
                "name": "case_open",
                "description": "Open a case for an existing client in any pipeline stage; re-opening an existing case updates its details but keeps its stage.",
                "inputSchema": {
                    "type": "object",
                    "required": ["clientId"],
                    "properties": {
                        "id": {"type": "string"},
                        "clientId": {"type": "string"},
                        "title": {"type": "string"},
                        "pipelineStage": {"type": "string"},
                        "expectedValue": {"type": "number"},
                        "probability": {"type": "number"},
                        "priority": {"type": "string", "enum": ["low", "medium", "high"]},
                        "status": {"type": "string", "enum": ["active", "on_hold", "closed"]}
                    }
                }
            }
        ]
    })
}
