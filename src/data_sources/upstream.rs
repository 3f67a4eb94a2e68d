//! Alert API client.
//!
//! The alert API (the network-management system the NOC already runs) lists
//! open FTTH alerts, describes the devices affected by each one, and resolves
//! subscriber contact records. Every call goes through an
//! [`AuthenticatedClient`], which owns the bearer token for the whole process.
//!
//! # Token refresh
//!
//! On a `401` the session posts the configured credentials to the auth
//! endpoint and re-issues the original `GET` exactly once. Refreshes are
//! single-flight: concurrent callers that all hit a `401` wait on one refresh
//! and reuse its token instead of each logging in again.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, UpstreamError};
use crate::model::{AlertSummary, AlertType, IncidentId, lenient_string};

/// Timeout for a token refresh.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for alert API reads.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials posted to the auth endpoint on refresh.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub auth_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    access: Option<String>,
}

/// Bearer token plus a counter bumped on every successful refresh.
struct TokenState {
    bearer: Option<String>,
    generation: u64,
}

struct Session {
    client: reqwest::Client,
    credentials: Credentials,
    token: RwLock<TokenState>,
    refresh_lock: Mutex<()>,
}

/// HTTP session that keeps a bearer token fresh.
///
/// Cloning is cheap and all clones share one token.
#[derive(Clone)]
pub struct AuthenticatedClient {
    session: Arc<Session>,
}

impl AuthenticatedClient {
    /// Create a session.
    ///
    /// # Arguments
    ///
    /// * `credentials` - Used to obtain a new token after a `401`
    /// * `initial_token` - Token to start with; if `None`, the first request
    ///   goes out unauthenticated and triggers a refresh
    pub fn new(credentials: Credentials, initial_token: Option<String>) -> Self {
        Self {
            session: Arc::new(Session {
                client: reqwest::Client::new(),
                credentials,
                token: RwLock::new(TokenState {
                    bearer: initial_token,
                    generation: 0,
                }),
                refresh_lock: Mutex::new(()),
            }),
        }
    }

    /// Issue a GET, refreshing the token and retrying once on `401`.
    ///
    /// Returns `None` on transport failure. `None` means the outcome is
    /// unknown, never that the resource is empty. If the refresh fails the
    /// original `401` response is returned unchanged.
    pub async fn get(&self, url: &str, timeout: Duration) -> Option<reqwest::Response> {
        let (response, generation) = match self.send_get(url, timeout).await {
            Ok(sent) => sent,
            Err(e) => {
                error!(url, error = %e, "GET request failed");
                return None;
            }
        };

        if response.status() != StatusCode::UNAUTHORIZED {
            return Some(response);
        }

        warn!(url, "Bearer token rejected (401), refreshing");
        if !self.refresh_after(generation).await {
            error!(url, "Could not refresh token, returning original 401");
            return Some(response);
        }

        match self.send_get(url, timeout).await {
            Ok((retried, _)) => Some(retried),
            Err(e) => {
                error!(url, error = %e, "GET retry after token refresh failed");
                None
            }
        }
    }

    async fn send_get(
        &self,
        url: &str,
        timeout: Duration,
    ) -> reqwest::Result<(reqwest::Response, u64)> {
        let (bearer, generation) = {
            let token = self.session.token.read().await;
            (token.bearer.clone(), token.generation)
        };

        let mut request = self.session.client.get(url).timeout(timeout);
        if let Some(bearer) = bearer {
            request = request.bearer_auth(bearer);
        }

        Ok((request.send().await?, generation))
    }

    /// Refresh unless someone already did since `seen_generation`.
    async fn refresh_after(&self, seen_generation: u64) -> bool {
        let _guard = self.session.refresh_lock.lock().await;

        if self.session.token.read().await.generation != seen_generation {
            debug!("Token already refreshed by a concurrent request");
            return true;
        }

        info!("Refreshing alert API token");
        match self.request_token().await {
            Ok(bearer) => {
                let mut token = self.session.token.write().await;
                token.bearer = Some(bearer);
                token.generation += 1;
                info!(generation = token.generation, "Token refreshed");
                true
            }
            Err(e) => {
                error!(error = %e, "Token refresh failed");
                false
            }
        }
    }

    async fn request_token(&self) -> Result<String, AuthError> {
        let credentials = &self.session.credentials;
        let response = self
            .session
            .client
            .post(&credentials.auth_url)
            .timeout(AUTH_TIMEOUT)
            .json(&LoginRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, body });
        }

        let login = response.json::<LoginResponse>().await?;
        login
            .access
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)
    }
}

/// Typed client for the alert API endpoints.
#[derive(Clone)]
pub struct UpstreamApi {
    session: AuthenticatedClient,
    base_url: String,
    timeout: Duration,
}

impl UpstreamApi {
    /// Create a client rooted at `base_url` (e.g. `https://nms.example.net`).
    pub fn new(session: AuthenticatedClient, base_url: &str) -> Self {
        Self {
            session,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// List all alerts that have not ended yet.
    pub async fn list_open_alerts(&self) -> Result<Vec<AlertSummary>, UpstreamError> {
        self.list_open_alerts_within(self.timeout).await
    }

    /// List open alerts with an explicit timeout.
    ///
    /// Entries that cannot be read (no `id`, a non-text `alert_type`, ...)
    /// are skipped one by one instead of failing the whole list.
    pub async fn list_open_alerts_within(
        &self,
        timeout: Duration,
    ) -> Result<Vec<AlertSummary>, UpstreamError> {
        let url = format!(
            "{}/api/v2/ftth/alert/list?end_date__isnull=true",
            self.base_url
        );
        let list: AlertListResponse = self.get_json(&url, timeout).await?;

        let total = list.results.len();
        let alerts: Vec<AlertSummary> = list
            .results
            .into_iter()
            .filter_map(|entry| match AlertSummary::deserialize(entry) {
                Ok(alert) => Some(alert),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable alert entry");
                    None
                }
            })
            .collect();

        if alerts.len() < total {
            warn!(skipped = total - alerts.len(), total, "Open alert list had unreadable entries");
        }
        Ok(alerts)
    }

    /// Fetch one alert with its affected devices.
    pub async fn get_alert(&self, id: &IncidentId) -> Result<AlertDetail, UpstreamError> {
        let url = format!(
            "{}/api/v2/ftth/alert/{}",
            self.base_url,
            urlencoding::encode(id.as_str())
        );
        let envelope: AlertDetailResponse = self.get_json(&url, self.timeout).await?;
        Ok(envelope.alert)
    }

    /// Fetch the client records registered under `client_id`.
    pub async fn lookup_client(&self, client_id: &str) -> Result<Vec<ClientRecord>, UpstreamError> {
        let url = format!(
            "{}/api/v2/client/{}",
            self.base_url,
            urlencoding::encode(client_id)
        );
        let lookup: ClientLookupResponse = self.get_json(&url, self.timeout).await?;
        Ok(lookup.clients)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T, UpstreamError> {
        let response = self
            .session
            .get(url, timeout)
            .await
            .ok_or(UpstreamError::Unreachable)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(UpstreamError::Status(status));
        }

        response.json::<T>().await.map_err(UpstreamError::Decode)
    }
}

// ============================================================================
// Response types
// ============================================================================

/// Response for the open-alert list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertListResponse {
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
}

/// Response wrapper for the alert detail endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertDetailResponse {
    #[serde(default)]
    pub alert: AlertDetail,
}

/// A single alert with the devices it affects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertDetail {
    #[serde(default)]
    pub id: Option<IncidentId>,

    #[serde(default)]
    pub alert_type: Option<AlertType>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub olt_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub slot_pon: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub initial_date: Option<String>,

    #[serde(default)]
    pub affected_devices: Vec<AffectedDevice>,
}

/// A device listed on an alert.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AffectedDevice {
    #[serde(default)]
    pub onu_device: OnuDevice,

    #[serde(default, deserialize_with = "lenient_string")]
    pub client_id: Option<String>,
}

impl AffectedDevice {
    /// Client id from the device entry, falling back to the ONU's.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id
            .as_deref()
            .or(self.onu_device.client_id.as_deref())
    }
}

/// The subscriber-side ONU of an affected device.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OnuDevice {
    #[serde(default, deserialize_with = "lenient_string")]
    pub sn_onu: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub client_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub client_id: Option<String>,
}

/// Response for the client lookup endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientLookupResponse {
    #[serde(default)]
    pub clients: Vec<ClientRecord>,
}

/// A subscriber record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub contact: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub phone_number: Option<String>,
}

impl ClientRecord {
    /// The raw number on file, preferring `contact` over `phone_number`.
    pub fn raw_contact(&self) -> Option<&str> {
        self.contact.as_deref().or(self.phone_number.as_deref())
    }
}
