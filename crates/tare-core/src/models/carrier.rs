//! Carrier model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{new_record_id, opt_field, Collection, Entity};

/// Haulier moving the load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carrier {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub registration_number: Option<String>,
    /// Transport licence / receipt number required on waste documents
    #[serde(default)]
    pub licence_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub sync_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Carrier {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            name: name.into(),
            registration_number: None,
            licence_number: None,
            address: None,
            version: 1,
            sync_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Carrier {
    const COLLECTION: Collection = Collection::Carriers;

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
            ("licence_number", opt_field(self.licence_number.as_deref())),
            ("address", opt_field(self.address.as_deref())),
        ])
    }
}
