//! In-process fakes of the alert API and the messaging vendor.

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::data_sources::upstream::{AuthenticatedClient, Credentials, UpstreamApi};
use crate::data_sources::vendor::{VendorClient, VendorConfig};
use crate::storage::Storage;

pub const INITIAL_TOKEN: &str = "initial-token";
pub const VENDOR_TOKEN: &str = "vendor-token";
pub const VENDOR_COOKIE: &str = "session=abc";

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

pub async fn memory_storage() -> Storage {
    Storage::new("sqlite::memory:").await.unwrap()
}

#[derive(Default)]
pub struct UpstreamState {
    accepted_token: Mutex<String>,
    issued_token: Mutex<Option<String>>,
    alerts: Mutex<Vec<Value>>,
    details: Mutex<HashMap<String, Value>>,
    clients: Mutex<HashMap<String, Value>>,
    pub auth_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub client_calls: AtomicUsize,
    client_lookups: Gauge,
}

/// Counts requests in flight and remembers the highest count seen.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl Gauge {
    /// Hold every tracked request for `delay` before answering.
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn track<T>(&self, work: impl FnOnce() -> T) -> T {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = work();
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl UpstreamState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.accepted_token.lock().unwrap());
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some(expected.as_str())
    }
}

/// Fake alert API. Accepts [`INITIAL_TOKEN`] until rotated.
#[derive(Clone)]
pub struct FakeUpstream {
    pub base_url: String,
    state: Arc<UpstreamState>,
}

impl Deref for FakeUpstream {
    type Target = UpstreamState;

    fn deref(&self) -> &UpstreamState {
        &self.state
    }
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let state = Arc::new(UpstreamState::default());
        *state.accepted_token.lock().unwrap() = INITIAL_TOKEN.to_string();
        *state.issued_token.lock().unwrap() = Some(INITIAL_TOKEN.to_string());

        let app = Router::new()
            .route("/auth", post(auth))
            .route("/api/v2/ftth/alert/list", get(list_alerts))
            .route("/api/v2/ftth/alert/:id", get(alert_detail))
            .route("/api/v2/client/:id", get(client_lookup))
            .with_state(state.clone());

        Self {
            base_url: serve(app).await,
            state,
        }
    }

    pub fn api(&self) -> UpstreamApi {
        let credentials = Credentials {
            auth_url: format!("{}/auth", self.base_url),
            username: "noc".to_string(),
            password: "secret".to_string(),
        };
        UpstreamApi::new(
            AuthenticatedClient::new(credentials, Some(INITIAL_TOKEN.to_string())),
            &self.base_url,
        )
    }

    /// Invalidate the current token; the auth endpoint now hands out `token`.
    pub fn rotate_token(&self, token: &str) {
        *self.state.accepted_token.lock().unwrap() = token.to_string();
        *self.state.issued_token.lock().unwrap() = Some(token.to_string());
    }

    /// Make the auth endpoint reject every login.
    pub fn fail_auth(&self) {
        *self.state.issued_token.lock().unwrap() = None;
    }

    pub fn set_alerts(&self, alerts: Vec<Value>) {
        *self.state.alerts.lock().unwrap() = alerts;
    }

    /// Register an alert detail; the `id` field is used as the route key.
    pub fn add_detail(&self, alert: Value) {
        let id = match &alert["id"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.state.details.lock().unwrap().insert(id, alert);
    }

    /// In-flight tracking for client lookups.
    pub fn client_lookups(&self) -> &Gauge {
        &self.state.client_lookups
    }

    /// Register the client records returned for `client_id`. Unregistered
    /// ids answer `500`.
    pub fn add_clients(&self, client_id: &str, clients: Value) {
        self.state
            .clients
            .lock()
            .unwrap()
            .insert(client_id.to_string(), clients);
    }
}

async fn auth(State(state): State<Arc<UpstreamState>>, Json(_body): Json<Value>) -> Response {
    state.auth_calls.fetch_add(1, Ordering::SeqCst);
    let issued = state.issued_token.lock().unwrap().clone();
    match issued {
        Some(token) => {
            *state.accepted_token.lock().unwrap() = token.clone();
            Json(json!({ "access": token })).into_response()
        }
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn list_alerts(State(state): State<Arc<UpstreamState>>, headers: HeaderMap) -> Response {
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let alerts = state.alerts.lock().unwrap().clone();
    Json(json!({ "results": alerts })).into_response()
}

async fn alert_detail(
    State(state): State<Arc<UpstreamState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.detail_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let detail = state.details.lock().unwrap().get(&id).cloned();
    match detail {
        Some(alert) => Json(json!({ "alert": alert })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn client_lookup(
    State(state): State<Arc<UpstreamState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.client_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state
        .client_lookups
        .track(|| {
            let clients = state.clients.lock().unwrap().get(&id).cloned();
            match clients {
                Some(clients) => Json(json!({ "clients": clients })).into_response(),
                None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        })
        .await
}

#[derive(Default)]
pub struct VendorState {
    requests: Mutex<Vec<Value>>,
    rejected_phones: Mutex<HashSet<String>>,
    sends: Gauge,
}

/// Fake messaging vendor. Answers `201` unless the phone was rejected.
#[derive(Clone)]
pub struct FakeVendor {
    pub base_url: String,
    state: Arc<VendorState>,
}

impl FakeVendor {
    pub async fn start() -> Self {
        let state = Arc::new(VendorState::default());
        let app = Router::new()
            .route("/send", post(vendor_send))
            .with_state(state.clone());

        Self {
            base_url: serve(app).await,
            state,
        }
    }

    pub fn client(&self) -> VendorClient {
        VendorClient::new(VendorConfig {
            url: format!("{}/send", self.base_url),
            token: VENDOR_TOKEN.to_string(),
            cookie: VENDOR_COOKIE.to_string(),
            account: 1,
        })
    }

    pub fn reject_phone(&self, phone: &str) {
        self.state
            .rejected_phones
            .lock()
            .unwrap()
            .insert(phone.to_string());
    }

    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }

    /// In-flight tracking for sends.
    pub fn sends(&self) -> &Gauge {
        &self.state.sends
    }
}

async fn vendor_send(
    State(state): State<Arc<VendorState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let authorized = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
        == Some(VENDOR_TOKEN)
        && headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) == Some(VENDOR_COOKIE);
    if !authorized {
        return StatusCode::FORBIDDEN.into_response();
    }

    let phone = body["contato"]["telefone"].as_str().unwrap_or_default().to_string();
    state.requests.lock().unwrap().push(body);

    state
        .sends
        .track(|| {
            if state.rejected_phones.lock().unwrap().contains(&phone) {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            } else {
                (StatusCode::CREATED, Json(json!({ "status": "queued" }))).into_response()
            }
        })
        .await
}
