//! Client model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{new_record_id, opt_field, Collection, Entity};

/// A customer delivering or collecting material at the weighbridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Unique identifier
    pub id: String,
    /// Company or person name
    pub name: String,
    /// Company registration number
    #[serde(default)]
    pub registration_number: Option<String>,
    /// Postal address
    #[serde(default)]
    pub address: Option<String>,
    /// Contact email
    #[serde(default)]
    pub email: Option<String>,
    /// Contact phone
    #[serde(default)]
    pub phone: Option<String>,
    /// Monotonic version counter
    #[serde(default)]
    pub version: i64,
    /// Fingerprint at last sync
    #[serde(default)]
    pub sync_hash: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Client {
    /// Create a new client with the given name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            name: name.into(),
            registration_number: None,
            address: None,
            email: None,
            phone: None,
            version: 1,
            sync_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Client {
    const COLLECTION: Collection = Collection::Clients;

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
            ("name", self.name.clone()),
            (
                "registration_number",
                opt_field(self.registration_number.as_deref()),
            ),
            ("address", opt_field(self.address.as_deref())),
            ("email", opt_field(self.email.as_deref())),
            ("phone", opt_field(self.phone.as_deref())),
        ])
    }
}
