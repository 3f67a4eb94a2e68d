//! HTTP API handlers for FiberWatch.
//!
//! Every route is served under both its bare path and the `/api/...`
//! spelling the operator console uses.
//!
//! - **GET /incidents**: open alerts an operator can still act on
//! - **GET /detalhes/:id**: fresh snapshot plus affected subscribers
//! - **GET /historico**: past decisions with current fault status
//! - **POST /acao**: approve or deny notification for an incident

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::data_sources::{AuthenticatedClient, UpstreamApi, VendorClient};
use crate::dispatch::{NotificationDispatcher, Templates};
use crate::error::{ActionError, FeedError};
use crate::feed;
use crate::model::{
    ActionRequest, ActionResponse, AlertSummary, DetailsResponse, HistoryEntry, IncidentId,
};
use crate::resolver::DetailResolver;
use crate::storage::Storage;
use crate::workflow::Workflow;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub api: UpstreamApi,
    pub workflow: Workflow,
}

impl AppState {
    /// Wire up clients and the workflow from configuration.
    pub fn new(config: &Config, storage: Storage) -> Self {
        let session = AuthenticatedClient::new(config.credentials.clone(), config.api_token.clone());
        let api = UpstreamApi::new(session, &config.api_base_url);
        Self::from_parts(
            storage,
            api,
            VendorClient::new(config.vendor.clone()),
            config.templates,
        )
    }

    /// Build state from already-constructed clients.
    pub fn from_parts(
        storage: Storage,
        api: UpstreamApi,
        vendor: VendorClient,
        templates: Templates,
    ) -> Self {
        let workflow = Workflow::new(
            DetailResolver::new(api.clone()),
            NotificationDispatcher::new(vendor, templates),
            storage.clone(),
        );
        Self {
            storage,
            api,
            workflow,
        }
    }
}

/// Build the router with every route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/incidents", get(list_incidents))
        .route("/api/incidentes", get(list_incidents))
        .route("/detalhes/:id", get(get_details))
        .route("/api/detalhes/:id", get(get_details))
        .route("/historico", get(get_history))
        .route("/api/historico", get(get_history))
        .route("/acao", post(post_action))
        .route("/api/acao", post(post_action))
        .route("/health", get(health_check))
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// GET /incidents - List incidents awaiting a decision.
///
/// Returns the upstream alert records unchanged, minus those already
/// decided, of an untracked type, or cooling down.
///
/// Answers `502 Bad Gateway` if the alert API cannot be read.
#[instrument(skip(state))]
pub async fn list_incidents(
    State(state): State<AppState>,
) -> Result<Json<Vec<AlertSummary>>, Response> {
    match feed::list_open(&state.api, &state.storage, Utc::now()).await {
        Ok(open) => Ok(Json(open)),
        Err(FeedError::Upstream(e)) => {
            warn!(error = %e, "Failed to list open alerts");
            Err(error_body(StatusCode::BAD_GATEWAY, e.to_string()))
        }
        Err(FeedError::Storage(e)) => {
            warn!(error = %e, "Failed to read workflow state");
            Err(error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// GET /detalhes/:id - Resolve an incident and its affected subscribers.
///
/// # Response
///
/// ```json
/// {
///     "info": {"id": "10", "alert_type": "pon_loss", "causa_provavel": "Probable Fiber Cut", ...},
///     "clientes": [{"sn_onu": "ZTEG0001", "contact": "5511987654321", "lookup": {"outcome": "resolved"}, ...}]
/// }
/// ```
#[instrument(skip(state))]
pub async fn get_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DetailsResponse>, Response> {
    let id = IncidentId::new(id);

    match state.workflow.resolver().resolve(&id).await {
        Some(resolution) => Ok(Json(DetailsResponse {
            info: resolution.snapshot,
            clientes: resolution.clients,
        })),
        None => Err(error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("incident {id} could not be resolved"),
        )),
    }
}

/// GET /historico - Past decisions, newest first, with current fault status.
#[instrument(skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryEntry>>, Response> {
    match feed::history(&state.api, &state.storage, Utc::now()).await {
        Ok(entries) => {
            info!(entries = entries.len(), "History queried");
            Ok(Json(entries))
        }
        Err(e) => {
            warn!(error = %e, "Failed to read audit log");
            Err(error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// POST /acao - Approve or deny notification for an incident.
///
/// # Request Body
///
/// ```json
/// { "id": 10, "acao": "aprovar" }
/// ```
///
/// # Response
///
/// `{"success": true, "msg": "..."}` on success. Unresolvable incidents
/// answer `500`. Incidents already decided or being acted on, and approvals
/// of a fault notified less than 24h ago, answer `409`.
#[instrument(skip(state, request), fields(incident_id, verdict))]
pub async fn post_action(
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> (StatusCode, Json<ActionResponse>) {
    tracing::Span::current().record("incident_id", request.id.as_str());
    tracing::Span::current().record("verdict", tracing::field::debug(&request.verdict));

    match state
        .workflow
        .act(&request.id, request.verdict, Utc::now())
        .await
    {
        Ok(summary) => (
            StatusCode::OK,
            Json(ActionResponse {
                success: true,
                msg: summary.message(),
            }),
        ),
        Err(e) => {
            let status = match &e {
                ActionError::Unresolvable(_) | ActionError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                ActionError::AlreadyDecided(_)
                | ActionError::InFlight(_)
                | ActionError::Cooling { .. } => StatusCode::CONFLICT,
            };
            warn!(error = %e, status = status.as_u16(), "Action rejected");
            (
                status,
                Json(ActionResponse {
                    success: false,
                    msg: e.to_string(),
                }),
            )
        }
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
