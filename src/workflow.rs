//! Operator decision workflow.
//!
//! Every incident starts `OPEN` and moves exactly once to `DENIED` or
//! `APPROVED`:
//!
//! - **deny**: records the decision and an audit entry. No cooldown is
//!   started, so a new alert for the same fault shows up right away.
//! - **approve**: re-resolves the incident, claims a 24h cooldown on the
//!   fault signature, notifies every reachable subscriber, then records the
//!   decision and an audit entry. A fault that is still cooling, possibly
//!   under a different alert id, is refused before anything is sent.
//!
//! Both paths resolve the incident again instead of trusting what the
//! operator was looking at.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::dispatch::{DispatchReport, NotificationDispatcher};
use crate::error::ActionError;
use crate::model::{AuditEntry, Decision, DispatchOutcome, IncidentId, Verdict, cooldown_expiry};
use crate::resolver::DetailResolver;
use crate::storage::Storage;

/// Result of a completed action.
#[derive(Debug, Clone)]
pub struct ActionSummary {
    pub decision: Decision,
    /// Present for approvals.
    pub report: Option<DispatchReport>,
}

impl ActionSummary {
    /// Message shown to the operator.
    pub fn message(&self) -> String {
        match &self.report {
            None => "Negado.".to_string(),
            Some(report) => format!(
                "Enviados: {} de {} ({} sem contato)",
                report.delivered, report.attempted, report.skipped_without_contact
            ),
        }
    }
}

#[derive(Clone)]
pub struct Workflow {
    resolver: DetailResolver,
    dispatcher: NotificationDispatcher,
    storage: Storage,
    in_flight: Arc<Mutex<HashSet<IncidentId>>>,
}

/// Releases an in-flight claim when dropped.
struct Claim {
    id: IncidentId,
    in_flight: Arc<Mutex<HashSet<IncidentId>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl Workflow {
    pub fn new(resolver: DetailResolver, dispatcher: NotificationDispatcher, storage: Storage) -> Self {
        Self {
            resolver,
            dispatcher,
            storage,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn resolver(&self) -> &DetailResolver {
        &self.resolver
    }

    /// Apply an operator verdict.
    pub async fn act(
        &self,
        id: &IncidentId,
        verdict: Verdict,
        now: DateTime<Utc>,
    ) -> Result<ActionSummary, ActionError> {
        match verdict {
            Verdict::Deny => self.deny(id, now).await,
            Verdict::Approve => self.approve(id, now).await,
        }
    }

    /// Deny notification for an incident.
    pub async fn deny(&self, id: &IncidentId, now: DateTime<Utc>) -> Result<ActionSummary, ActionError> {
        let _claim = self.claim(id).await?;

        let resolution = self
            .resolver
            .resolve(id)
            .await
            .ok_or_else(|| ActionError::Unresolvable(id.clone()))?;

        self.storage
            .record_decision(&AuditEntry {
                incident_id: id.clone(),
                acted_at: now,
                action: Decision::Denied,
                outcome: DispatchOutcome::Success,
                snapshot: resolution.snapshot,
            })
            .await?;

        info!(incident_id = %id, "Incident denied");
        Ok(ActionSummary {
            decision: Decision::Denied,
            report: None,
        })
    }

    /// Approve notification for an incident and dispatch it.
    pub async fn approve(&self, id: &IncidentId, now: DateTime<Utc>) -> Result<ActionSummary, ActionError> {
        let _claim = self.claim(id).await?;

        let resolution = self
            .resolver
            .resolve(id)
            .await
            .ok_or_else(|| ActionError::Unresolvable(id.clone()))?;

        let signature = resolution.snapshot.signature();
        if !self.storage.claim_cooldown(&signature, now).await? {
            let until = match self.storage.cooldown_for(&signature).await? {
                Some(entry) => entry.expires_at(),
                None => cooldown_expiry(now),
            };
            info!(incident_id = %id, signature = %signature, %until, "Fault still cooling, not notifying");
            return Err(ActionError::Cooling { signature, until });
        }
        if signature.has_placeholder() {
            warn!(
                incident_id = %id,
                signature = %signature,
                "Cooldown registered on an incomplete signature; unrelated incidents may share it"
            );
        }

        let report = self
            .dispatcher
            .dispatch_all(&resolution.snapshot, &resolution.clients)
            .await;

        let recorded = self
            .storage
            .record_decision(&AuditEntry {
                incident_id: id.clone(),
                acted_at: now,
                action: Decision::Approved,
                outcome: report.outcome(),
                snapshot: resolution.snapshot,
            })
            .await;
        if let Err(e) = recorded {
            // Messages are out and the cooldown holds; only the record is missing.
            error!(
                incident_id = %id,
                signature = %signature,
                delivered = report.delivered,
                attempted = report.attempted,
                error = %e,
                "Notifications sent but the approval could not be recorded"
            );
            return Err(e.into());
        }

        info!(
            incident_id = %id,
            delivered = report.delivered,
            attempted = report.attempted,
            "Incident approved"
        );
        Ok(ActionSummary {
            decision: Decision::Approved,
            report: Some(report),
        })
    }

    /// Reserve `id` for this action, rejecting decided or busy incidents.
    async fn claim(&self, id: &IncidentId) -> Result<Claim, ActionError> {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(id.clone()) {
                return Err(ActionError::InFlight(id.clone()));
            }
        }
        let claim = Claim {
            id: id.clone(),
            in_flight: self.in_flight.clone(),
        };

        if self.storage.decision_for(id).await?.is_some() {
            return Err(ActionError::AlreadyDecided(id.clone()));
        }

        Ok(claim)
    }
}
