//! Open-incident feed and the history projection.
//!
//! Both read upstream alerts and local state but never write anything.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::data_sources::upstream::UpstreamApi;
use crate::error::FeedError;
use crate::model::{
    AlertSummary, Availability, AuditEntry, Decision, FaultStatus, HistoryEntry, IncidentId,
    IncidentSignature, cooldown_expiry, within_cooldown,
};
use crate::storage::Storage;

/// Timeout for the open-alert refresh behind the history view.
const HISTORY_FEED_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// List open alerts an operator can still act on.
///
/// Excludes alerts that already have a decision, alerts of untracked types,
/// and alerts whose fault signature is cooling at `now`. An upstream failure
/// is an error, not an empty feed.
pub async fn list_open(
    api: &UpstreamApi,
    storage: &Storage,
    now: DateTime<Utc>,
) -> Result<Vec<AlertSummary>, FeedError> {
    let alerts = api.list_open_alerts().await?;
    let decided = storage.decided_ids().await?;
    let cooling = storage.active_cooldowns(now).await?;

    let total = alerts.len();
    let open = filter_open(alerts, &decided, &cooling);

    info!(upstream = total, candidates = open.len(), "Open incident feed built");
    Ok(open)
}

/// Apply the feed exclusions, in order: decided, untracked type, cooling.
pub fn filter_open(
    alerts: Vec<AlertSummary>,
    decided: &HashSet<IncidentId>,
    cooling: &HashSet<IncidentSignature>,
) -> Vec<AlertSummary> {
    alerts
        .into_iter()
        .filter(|alert| !decided.contains(&alert.id))
        .filter(AlertSummary::is_tracked)
        .filter(|alert| {
            let signature = alert.signature();
            let in_cooldown = cooling.contains(&signature);
            if in_cooldown && signature.has_placeholder() {
                warn!(
                    incident_id = %alert.id,
                    signature = %signature,
                    "Suppressed by a cooldown on an incomplete signature"
                );
            }
            !in_cooldown
        })
        .collect()
}

/// Build the annotated history, newest first.
///
/// If the open-alert list cannot be fetched every entry is marked
/// [`FaultStatus::Unknown`] rather than normalized.
pub async fn history(
    api: &UpstreamApi,
    storage: &Storage,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<HistoryEntry>> {
    let entries = storage.audit_log().await?;

    let fetched = api.list_open_alerts_within(HISTORY_FEED_TIMEOUT).await;
    let open_signatures: Option<HashSet<IncidentSignature>> = match fetched {
        Ok(alerts) => Some(alerts.iter().map(AlertSummary::signature).collect()),
        Err(e) => {
            warn!(error = %e, "Open alerts unavailable, fault status unknown");
            None
        }
    };

    Ok(annotate(entries, open_signatures.as_ref(), now))
}

/// Annotate audit entries with fault status and availability.
pub fn annotate(
    entries: Vec<AuditEntry>,
    open_signatures: Option<&HashSet<IncidentSignature>>,
    now: DateTime<Utc>,
) -> Vec<HistoryEntry> {
    entries
        .into_iter()
        .map(|entry| {
            let current_status = match open_signatures {
                Some(open) if open.contains(&entry.snapshot.signature()) => FaultStatus::Active,
                Some(_) => FaultStatus::Normalized,
                None => FaultStatus::Unknown,
            };
            let availability = availability(&entry, now);

            HistoryEntry {
                entry,
                current_status,
                availability,
            }
        })
        .collect()
}

fn availability(entry: &AuditEntry, now: DateTime<Utc>) -> Availability {
    match entry.action {
        Decision::Denied => Availability::Immediate,
        Decision::Approved if within_cooldown(entry.acted_at, now) => {
            Availability::Until(cooldown_expiry(entry.acted_at))
        }
        Decision::Approved => Availability::AvailableNow,
    }
}
