//! Fan-out of customer notifications for an approved incident.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::data_sources::vendor::VendorClient;
use crate::model::{AffectedClient, AlertType, DispatchOutcome, Incident};
use crate::phone;

/// Maximum number of vendor requests in flight for one incident.
pub const DISPATCH_WIDTH: usize = 10;

/// Template ids registered with the vendor.
#[derive(Debug, Clone, Copy)]
pub struct Templates {
    /// Sent for power-loss incidents.
    pub power_loss: u32,
    /// Sent for everything else.
    pub signal_loss: u32,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            power_loss: 116,
            signal_loss: 114,
        }
    }
}

impl Templates {
    pub fn for_alert(&self, alert_type: Option<&AlertType>) -> u32 {
        match alert_type {
            Some(AlertType::PowerLoss) => self.power_loss,
            _ => self.signal_loss,
        }
    }
}

/// A send the vendor did not accept.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchFailure {
    pub client_name: String,
    pub reason: String,
}

/// Tally of one dispatch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// Clients a message was sent to.
    pub attempted: usize,
    /// Sends the vendor accepted.
    pub delivered: usize,
    /// Clients left out because no contact was resolved.
    pub skipped_without_contact: usize,
    pub failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    /// Success if at least one message was accepted.
    pub fn outcome(&self) -> DispatchOutcome {
        if self.delivered > 0 {
            DispatchOutcome::Success
        } else {
            DispatchOutcome::FailureOrPartial
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    vendor: VendorClient,
    templates: Templates,
}

impl NotificationDispatcher {
    pub fn new(vendor: VendorClient, templates: Templates) -> Self {
        Self { vendor, templates }
    }

    /// Send one template message to every client with a contact.
    ///
    /// Partial failure is a normal outcome: failed sends are collected in the
    /// report and never retried.
    pub async fn dispatch_all(&self, snapshot: &Incident, clients: &[AffectedClient]) -> DispatchReport {
        let template_id = self.templates.for_alert(snapshot.alert_type.as_ref());

        let recipients: Vec<(String, String)> = clients
            .iter()
            .filter_map(|c| c.contact.clone().map(|phone| (c.client_name.clone(), phone)))
            .collect();

        let mut report = DispatchReport {
            attempted: recipients.len(),
            skipped_without_contact: clients.len() - recipients.len(),
            ..Default::default()
        };

        let results = stream::iter(recipients)
            .map(|(name, phone)| async move {
                let result = self.vendor.send_template(template_id, &name, &phone).await;
                (name, phone, result)
            })
            .buffer_unordered(DISPATCH_WIDTH)
            .collect::<Vec<_>>()
            .await;

        for (name, phone, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        incident_id = %snapshot.id,
                        phone = %phone::mask(&phone),
                        error = %e,
                        "Notification not accepted"
                    );
                    report.failures.push(DispatchFailure {
                        client_name: name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            incident_id = %snapshot.id,
            template_id,
            attempted = report.attempted,
            delivered = report.delivered,
            skipped = report.skipped_without_contact,
            "Notifications dispatched"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContactLookup, IncidentId, ProbableCause};
    use crate::testing::FakeVendor;
    use std::time::Duration;

    fn incident(alert_type: AlertType) -> Incident {
        Incident {
            id: IncidentId::new("77"),
            alert_type: Some(alert_type),
            olt_name: Some("OLT-LESTE".to_string()),
            slot_pon: Some("0/7".to_string()),
            affected_device_count: 3,
            initial_date: None,
            probable_cause: ProbableCause::DropCableFault,
        }
    }

    fn client(name: &str, contact: Option<&str>) -> AffectedClient {
        AffectedClient {
            client_id: Some(name.to_lowercase()),
            device_serial: format!("SN-{name}"),
            client_name: name.to_string(),
            device_status: "LOS".to_string(),
            slot_pon: Some("0/7".to_string()),
            contact: contact.map(str::to_owned),
            lookup: if contact.is_some() {
                ContactLookup::Resolved
            } else {
                ContactLookup::NoContactOnFile
            },
        }
    }

    #[tokio::test]
    async fn test_partial_failure_counts_successes() {
        let vendor = FakeVendor::start().await;
        vendor.reject_phone("5511900000003");
        let dispatcher = NotificationDispatcher::new(vendor.client(), Templates::default());

        let clients = vec![
            client("Ana", Some("5511900000001")),
            client("Bruno", Some("5511900000002")),
            client("Carla", Some("5511900000003")),
            client("Davi", None),
        ];

        let report = dispatcher
            .dispatch_all(&incident(AlertType::SignalLoss), &clients)
            .await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped_without_contact, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].client_name, "Carla");
        assert_eq!(report.outcome(), DispatchOutcome::Success);

        let requests = vendor.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r["hsm"] == 114));
    }

    #[tokio::test]
    async fn test_sends_overlap_up_to_width() {
        let vendor = FakeVendor::start().await;
        vendor.sends().slow_down(Duration::from_millis(50));
        let dispatcher = NotificationDispatcher::new(vendor.client(), Templates::default());

        let clients: Vec<_> = (0..25)
            .map(|i| client(&format!("Client {i}"), Some(format!("55119000000{i:02}").as_str())))
            .collect();

        let report = dispatcher
            .dispatch_all(&incident(AlertType::SignalLoss), &clients)
            .await;

        assert_eq!(report.delivered, 25);
        let peak = vendor.sends().peak();
        assert!(peak > 1, "sends ran one at a time");
        assert!(peak <= DISPATCH_WIDTH, "{peak} sends in flight");
    }

    #[tokio::test]
    async fn test_power_loss_uses_power_template() {
        let vendor = FakeVendor::start().await;
        let dispatcher = NotificationDispatcher::new(vendor.client(), Templates::default());

        let report = dispatcher
            .dispatch_all(
                &incident(AlertType::PowerLoss),
                &[client("Ana", Some("5511900000001"))],
            )
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(vendor.requests()[0]["hsm"], 116);
    }

    #[tokio::test]
    async fn test_no_contacts_is_failure() {
        let vendor = FakeVendor::start().await;
        let dispatcher = NotificationDispatcher::new(vendor.client(), Templates::default());

        let report = dispatcher
            .dispatch_all(&incident(AlertType::SignalLoss), &[client("Davi", None)])
            .await;

        assert_eq!(report.attempted, 0);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.outcome(), DispatchOutcome::FailureOrPartial);
        assert!(vendor.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_vendor_counts_as_failed() {
        let dispatcher = NotificationDispatcher::new(
            VendorClient::new(crate::data_sources::vendor::VendorConfig {
                url: "http://127.0.0.1:9/send".to_string(),
                token: "t".to_string(),
                cookie: "c".to_string(),
                account: 1,
            }),
            Templates::default(),
        );

        let report = dispatcher
            .dispatch_all(
                &incident(AlertType::SignalLoss),
                &[client("Ana", Some("5511900000001"))],
            )
            .await;

        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failures.len(), 1);
    }
}
