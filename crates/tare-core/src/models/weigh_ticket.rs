//! Weigh ticket model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{new_record_id, opt_field, Collection, Entity};

/// One weighing of a vehicle: gross on the way in, tare on the way out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeighTicket {
    /// Unique identifier
    pub id: String,
    /// Human-facing ticket number (e.g. `T-000042`)
    pub number: String,
    /// Client the load belongs to
    pub client_id: String,
    /// Weighed material
    #[serde(default)]
    pub product_id: Option<String>,
    /// Haulier, if not the client
    #[serde(default)]
    pub carrier_id: Option<String>,
    /// Vehicle registration plate
    #[serde(default)]
    pub vehicle_plate: Option<String>,
    /// Loaded weight in kilograms
    pub gross_kg: i64,
    /// Empty weight in kilograms
    pub tare_kg: i64,
    /// Weighing time (Unix ms)
    pub weighed_at: i64,
    /// Identifier of the regulatory waste-tracking document, once generated
    #[serde(default)]
    pub waste_document_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Monotonic version counter
    #[serde(default)]
    pub version: i64,
    /// Fingerprint at last sync
    #[serde(default)]
    pub sync_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WeighTicket {
    /// Create a new ticket for a client
    #[must_use]
    pub fn new(
        number: impl Into<String>,
        client_id: impl Into<String>,
        gross_kg: i64,
        tare_kg: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            number: number.into(),
            client_id: client_id.into(),
            product_id: None,
            carrier_id: None,
            vehicle_plate: None,
            gross_kg,
            tare_kg,
            weighed_at: now,
            waste_document_id: None,
            notes: None,
            version: 1,
            sync_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Net weight, never negative
    #[must_use]
    pub const fn net_kg(&self) -> i64 {
        let net = self.gross_kg - self.tare_kg;
        if net < 0 {
            0
        } else {
            net
        }
    }
}

impl Entity for WeighTicket {
    const COLLECTION: Collection = Collection::WeighTickets;

    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_sync_meta(&mut self, version: i64, sync_hash: String) {
        self.version = version;
        self.sync_hash = Some(sync_hash);
    }

    fn fingerprint_fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("number", self.number.clone()),
            ("client_id", self.client_id.clone()),
            ("product_id", opt_field(self.product_id.as_deref())),
            ("carrier_id", opt_field(self.carrier_id.as_deref())),
            ("vehicle_plate", opt_field(self.vehicle_plate.as_deref())),
            ("gross_kg", self.gross_kg.to_string()),
            ("tare_kg", self.tare_kg.to_string()),
            ("weighed_at", self.weighed_at.to_string()),
            (
                "waste_document_id",
                opt_field(self.waste_document_id.as_deref()),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_weight() {
        let ticket = WeighTicket::new("T-1", "client", 32_400, 14_100);
        assert_eq!(ticket.net_kg(), 18_300);

        let inverted = WeighTicket::new("T-2", "client", 10_000, 12_000);
        assert_eq!(inverted.net_kg(), 0);
    }

    #[test]
    fn test_fingerprint_ignores_sync_metadata_and_notes() {
        let ticket = WeighTicket::new("T-1", "client", 32_400, 14_100);
        let mut touched = ticket.clone();
        touched.set_sync_meta(9, "abc".to_string());
        touched.notes = Some("front gate".to_string());
        assert_eq!(ticket.fingerprint(), touched.fingerprint());

        touched.gross_kg += 20;
        assert_ne!(ticket.fingerprint(), touched.fingerprint());
    }
}
