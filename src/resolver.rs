//! Resolution of an alert into an incident snapshot plus the subscribers it
//! affects.
//!
//! Every device on the alert triggers its own client lookup. Lookups run
//! concurrently, at most [`RESOLUTION_WIDTH`] at a time, and a failed lookup
//! only degrades its own entry.

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::data_sources::upstream::{AffectedDevice, UpstreamApi};
use crate::model::{AffectedClient, ContactLookup, Incident, IncidentId, ProbableCause};
use crate::phone;

/// Maximum number of client lookups in flight for one resolution.
pub const RESOLUTION_WIDTH: usize = 20;

const UNKNOWN_SERIAL: &str = "N/A";
const UNKNOWN_CLIENT_NAME: &str = "Cliente";
const UNKNOWN_DEVICE_STATUS: &str = "Offline";

/// A freshly resolved incident.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub snapshot: Incident,
    /// One entry per affected device, in completion order.
    pub clients: Vec<AffectedClient>,
}

impl Resolution {
    pub fn contactable(&self) -> usize {
        self.clients.iter().filter(|c| c.contact.is_some()).count()
    }
}

#[derive(Clone)]
pub struct DetailResolver {
    api: UpstreamApi,
}

impl DetailResolver {
    pub fn new(api: UpstreamApi) -> Self {
        Self { api }
    }

    /// Fetch and resolve one incident.
    ///
    /// Returns `None` if the alert itself cannot be fetched.
    pub async fn resolve(&self, id: &IncidentId) -> Option<Resolution> {
        let alert = match self.api.get_alert(id).await {
            Ok(alert) => alert,
            Err(e) => {
                warn!(incident_id = %id, error = %e, "Failed to fetch alert details");
                return None;
            }
        };

        let affected_device_count = alert.affected_devices.len();
        let snapshot = Incident {
            id: alert.id.unwrap_or_else(|| id.clone()),
            probable_cause: ProbableCause::classify(alert.alert_type.as_ref(), affected_device_count),
            alert_type: alert.alert_type,
            olt_name: alert.olt_name,
            slot_pon: alert.slot_pon,
            affected_device_count,
            initial_date: alert.initial_date,
        };

        let slot_pon = snapshot.slot_pon.clone();
        let clients = stream::iter(alert.affected_devices)
            .map(|device| self.resolve_device(device, slot_pon.clone()))
            .buffer_unordered(RESOLUTION_WIDTH)
            .collect::<Vec<_>>()
            .await;

        let resolution = Resolution { snapshot, clients };
        info!(
            incident_id = %resolution.snapshot.id,
            devices = affected_device_count,
            contactable = resolution.contactable(),
            cause = resolution.snapshot.probable_cause.label(),
            "Incident resolved"
        );

        Some(resolution)
    }

    async fn resolve_device(&self, device: AffectedDevice, slot_pon: Option<String>) -> AffectedClient {
        let client_id = device.client_id().map(str::to_owned);
        let onu = device.onu_device;

        let mut client = AffectedClient {
            client_id: client_id.clone(),
            device_serial: onu.sn_onu.unwrap_or_else(|| UNKNOWN_SERIAL.to_string()),
            client_name: onu
                .client_name
                .unwrap_or_else(|| UNKNOWN_CLIENT_NAME.to_string()),
            device_status: onu
                .status
                .unwrap_or_else(|| UNKNOWN_DEVICE_STATUS.to_string()),
            slot_pon,
            contact: None,
            lookup: ContactLookup::NoClientId,
        };

        let Some(client_id) = client_id else {
            return client;
        };

        let record = match self.api.lookup_client(&client_id).await {
            Ok(records) => records.into_iter().next(),
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Client lookup failed");
                client.lookup = ContactLookup::LookupFailed {
                    reason: e.to_string(),
                };
                return client;
            }
        };

        let Some(record) = record else {
            client.lookup = ContactLookup::ClientNotFound;
            return client;
        };

        if let Some(name) = record.name.clone() {
            client.client_name = name;
        }

        client.lookup = match record.raw_contact().map(phone::normalize) {
            None => ContactLookup::NoContactOnFile,
            Some(None) => ContactLookup::InvalidNumber,
            Some(Some(phone)) => {
                client.contact = Some(phone);
                ContactLookup::Resolved
            }
        };

        client
    }
}
