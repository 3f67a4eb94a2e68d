//! Data models for FiberWatch.
//!
//! Field names on the wire follow the alert API and the operator console,
//! which speak Portuguese (`causa_provavel`, `status_envio`, ...). The Rust
//! names describe what the fields hold.

use std::fmt;

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How long an approved fault stays suppressed after a dispatch.
pub const COOLDOWN_HOURS: i64 = 24;

/// Placeholder substituted for a missing signature field.
pub const SIGNATURE_PLACEHOLDER: &str = "UNK";

/// Affected-device count above which a signal loss is treated as a fiber cut.
const DROP_CABLE_MAX_DEVICES: usize = 16;

/// Opaque upstream alert identifier.
///
/// The alert API hands out integers, but nothing here depends on that, so
/// both JSON numbers and strings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for IncidentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => IncidentId(n.to_string()),
            Raw::Text(s) => IncidentId(s),
        })
    }
}

/// Deserialize an optional field the upstream may send as a string, a
/// number, or null. Empty strings count as absent.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) if !s.trim().is_empty() => Some(s),
        Some(Raw::Text(_)) | None => None,
        Some(Raw::Integer(n)) => Some(n.to_string()),
        Some(Raw::Float(n)) => Some(n.to_string()),
    })
}

/// Category of an upstream alert.
///
/// Only [`AlertType::PowerLoss`] and [`AlertType::SignalLoss`] are tracked.
/// Any other category is carried verbatim so it can be reported and filtered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertType {
    /// The PON port lost power (`pon_no_power`).
    PowerLoss,
    /// The PON port lost optical signal (`pon_loss`).
    SignalLoss,
    /// Any category this system does not act on.
    Other(String),
}

impl AlertType {
    pub fn as_str(&self) -> &str {
        match self {
            AlertType::PowerLoss => "pon_no_power",
            AlertType::SignalLoss => "pon_loss",
            AlertType::Other(raw) => raw,
        }
    }

    /// Whether operators are asked to act on this category.
    pub fn is_tracked(&self) -> bool {
        !matches!(self, AlertType::Other(_))
    }
}

impl From<String> for AlertType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "pon_no_power" => AlertType::PowerLoss,
            "pon_loss" => AlertType::SignalLoss,
            _ => AlertType::Other(raw),
        }
    }
}

impl From<AlertType> for String {
    fn from(alert_type: AlertType) -> Self {
        match alert_type {
            AlertType::Other(raw) => raw,
            tracked => tracked.as_str().to_string(),
        }
    }
}

/// Cooldown key identifying one physical fault: `olt | slot_pon | alert_type`.
///
/// Two incidents with the same signature are the same fault even when their
/// ids differ. A missing field becomes [`SIGNATURE_PLACEHOLDER`], which means
/// unrelated incidents that are missing the same fields share a key; callers
/// can detect that case through [`IncidentSignature::has_placeholder`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IncidentSignature(String);

impl IncidentSignature {
    const DELIMITER: char = '|';

    pub fn derive(olt_name: Option<&str>, slot_pon: Option<&str>, alert_type: Option<&str>) -> Self {
        let part = |field: Option<&str>| field.unwrap_or(SIGNATURE_PLACEHOLDER).to_string();
        Self(format!(
            "{}{d}{}{d}{}",
            part(olt_name),
            part(slot_pon),
            part(alert_type),
            d = Self::DELIMITER
        ))
    }

    /// Rebuild a signature from its stored string form.
    pub fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if any component was substituted with the placeholder.
    pub fn has_placeholder(&self) -> bool {
        self.0
            .split(Self::DELIMITER)
            .any(|part| part == SIGNATURE_PLACEHOLDER)
    }
}

impl fmt::Display for IncidentSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Probable physical cause of a fault, derived from its category and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbableCause {
    #[serde(rename = "Probable Power Failure")]
    PowerFailure,
    #[serde(rename = "Probable Drop-Cable Fault")]
    DropCableFault,
    #[serde(rename = "Probable Fiber Cut")]
    FiberCut,
    #[serde(rename = "Needs Manual Review")]
    ManualReview,
}

impl ProbableCause {
    /// Classify a fault.
    ///
    /// # Thresholds
    ///
    /// - power loss: `PowerFailure`
    /// - signal loss with at most 16 devices: `DropCableFault`
    /// - signal loss with more than 16 devices: `FiberCut`
    /// - anything else: `ManualReview`
    pub fn classify(alert_type: Option<&AlertType>, affected_count: usize) -> Self {
        match alert_type {
            Some(AlertType::PowerLoss) => ProbableCause::PowerFailure,
            Some(AlertType::SignalLoss) if affected_count <= DROP_CABLE_MAX_DEVICES => {
                ProbableCause::DropCableFault
            }
            Some(AlertType::SignalLoss) => ProbableCause::FiberCut,
            _ => ProbableCause::ManualReview,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbableCause::PowerFailure => "Probable Power Failure",
            ProbableCause::DropCableFault => "Probable Drop-Cable Fault",
            ProbableCause::FiberCut => "Probable Fiber Cut",
            ProbableCause::ManualReview => "Needs Manual Review",
        }
    }
}

/// One entry of the open-alert list, as returned by the alert API.
///
/// Only the fields that drive filtering are parsed. Serializing yields the
/// upstream record exactly as it was received, so the console sees the
/// alert API's own shape.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertSummary {
    pub id: IncidentId,
    pub alert_type: Option<AlertType>,
    pub olt_name: Option<String>,
    pub slot_pon: Option<String>,
    raw: serde_json::Value,
}

impl<'de> Deserialize<'de> for AlertSummary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Fields {
            id: IncidentId,
            #[serde(default)]
            alert_type: Option<AlertType>,
            #[serde(default, deserialize_with = "lenient_string")]
            olt_name: Option<String>,
            #[serde(default, deserialize_with = "lenient_string")]
            slot_pon: Option<String>,
        }

        let raw = serde_json::Value::deserialize(deserializer)?;
        let fields = Fields::deserialize(&raw).map_err(serde::de::Error::custom)?;

        Ok(Self {
            id: fields.id,
            alert_type: fields.alert_type,
            olt_name: fields.olt_name,
            slot_pon: fields.slot_pon,
            raw,
        })
    }
}

impl Serialize for AlertSummary {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(s)
    }
}

impl AlertSummary {
    pub fn signature(&self) -> IncidentSignature {
        IncidentSignature::derive(
            self.olt_name.as_deref(),
            self.slot_pon.as_deref(),
            self.alert_type.as_ref().map(AlertType::as_str),
        )
    }

    pub fn is_tracked(&self) -> bool {
        self.alert_type.as_ref().is_some_and(AlertType::is_tracked)
    }
}

/// Snapshot of an incident taken at resolution time.
///
/// Never cached: every detail view and every decision fetches a fresh one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,

    pub alert_type: Option<AlertType>,

    pub olt_name: Option<String>,

    pub slot_pon: Option<String>,

    /// Number of subscriber devices listed on the alert.
    #[serde(rename = "total_devices_count")]
    pub affected_device_count: usize,

    pub initial_date: Option<String>,

    #[serde(rename = "causa_provavel")]
    pub probable_cause: ProbableCause,
}

impl Incident {
    pub fn signature(&self) -> IncidentSignature {
        IncidentSignature::derive(
            self.olt_name.as_deref(),
            self.slot_pon.as_deref(),
            self.alert_type.as_ref().map(AlertType::as_str),
        )
    }
}

/// How the contact number of one affected device was (or was not) found.
///
/// Keeps "nothing on file" distinguishable from "the lookup failed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContactLookup {
    /// A dispatchable number was found.
    Resolved,
    /// Neither the device nor its ONU carry a client id.
    NoClientId,
    /// The client lookup returned no client records.
    ClientNotFound,
    /// The client exists but has no phone number.
    NoContactOnFile,
    /// The number on file has fewer than ten digits.
    InvalidNumber,
    /// The lookup request failed or returned an unreadable response.
    LookupFailed { reason: String },
}

/// A subscriber device affected by an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedClient {
    pub client_id: Option<String>,

    #[serde(rename = "sn_onu")]
    pub device_serial: String,

    pub client_name: String,

    #[serde(rename = "status")]
    pub device_status: String,

    pub slot_pon: Option<String>,

    /// Normalized phone number, if one could be resolved.
    pub contact: Option<String>,

    pub lookup: ContactLookup,
}

/// Terminal operator decision for an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "APROVADO")]
    Approved,
    #[serde(rename = "NEGADO")]
    Denied,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "APROVADO",
            Decision::Denied => "NEGADO",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "APROVADO" => Some(Decision::Approved),
            "NEGADO" => Some(Decision::Denied),
            _ => None,
        }
    }
}

/// Verdict sent by the operator console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Verdict {
    #[serde(rename = "aprovar")]
    Approve,
    #[serde(rename = "negar")]
    Deny,
}

/// Recorded result of acting on a decision.
///
/// A denial is always a success. An approval is a success if at least one
/// notification was accepted by the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    #[serde(rename = "Sucesso")]
    Success,
    #[serde(rename = "Falha/Parcial")]
    FailureOrPartial,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Success => "Sucesso",
            DispatchOutcome::FailureOrPartial => "Falha/Parcial",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Sucesso" => Some(DispatchOutcome::Success),
            "Falha/Parcial" => Some(DispatchOutcome::FailureOrPartial),
            _ => None,
        }
    }
}

/// Format used when showing action times to operators.
const ACTION_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Format used for the cooldown expiry shown in the history view.
const RELEASE_TIME_FORMAT: &str = "%d/%m %H:%M";

fn serialize_action_time<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&time.with_timezone(&Local).format(ACTION_TIME_FORMAT))
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    #[serde(rename = "id")]
    pub incident_id: IncidentId,

    #[serde(rename = "data_acao", serialize_with = "serialize_action_time")]
    pub acted_at: DateTime<Utc>,

    #[serde(rename = "acao")]
    pub action: Decision,

    #[serde(rename = "status_envio")]
    pub outcome: DispatchOutcome,

    pub snapshot: Incident,
}

/// Last dispatch time recorded for a fault signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownEntry {
    pub signature: IncidentSignature,
    pub last_dispatch: DateTime<Utc>,
}

impl CooldownEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        cooldown_expiry(self.last_dispatch)
    }
}

pub fn cooldown_expiry(from: DateTime<Utc>) -> DateTime<Utc> {
    from + Duration::hours(COOLDOWN_HOURS)
}

pub fn within_cooldown(from: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - from < Duration::hours(COOLDOWN_HOURS)
}

/// Whether the fault behind a past action is still reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultStatus {
    #[serde(rename = "ATIVO")]
    Active,
    #[serde(rename = "NORMALIZADO")]
    Normalized,
    /// The open-alert list could not be fetched.
    #[serde(rename = "DESCONHECIDO")]
    Unknown,
}

/// When the fault behind a past action can be notified again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Denials never start a cooldown.
    Immediate,
    /// Cooling until the given time.
    Until(DateTime<Utc>),
    /// The cooldown has elapsed.
    AvailableNow,
}

impl Serialize for Availability {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Availability::Immediate => s.serialize_str("Imediata"),
            Availability::AvailableNow => s.serialize_str("Disponível"),
            Availability::Until(at) => {
                s.collect_str(&at.with_timezone(&Local).format(RELEASE_TIME_FORMAT))
            }
        }
    }
}

/// An audit entry annotated with the current state of its fault.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub entry: AuditEntry,

    #[serde(rename = "status_atual")]
    pub current_status: FaultStatus,

    #[serde(rename = "liberacao")]
    pub availability: Availability,
}

/// Request body for POST /acao.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub id: IncidentId,

    #[serde(rename = "acao")]
    pub verdict: Verdict,
}

/// Response body for POST /acao.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub msg: String,
}

/// Response body for GET /detalhes/:id.
#[derive(Debug, Clone, Serialize)]
pub struct DetailsResponse {
    pub info: Incident,
    pub clientes: Vec<AffectedClient>,
}
