//! Product model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{new_record_id, opt_field, Collection, Entity};

/// Material sold or accepted at the weighbridge, priced per tonne
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Short internal code
    #[serde(default)]
    pub code: Option<String>,
    /// Price per tonne in cents
    #[serde(default)]
    pub unit_price_cents: i64,
    /// European waste catalogue code, when the material is regulated waste
    #[serde(default)]
    pub waste_code: Option<String>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub sync_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Product {
    /// Create a new product priced per tonne
    #[must_use]
    pub fn new(name: impl Into<String>, unit_price_cents: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            name: name.into(),
            code: None,
            unit_price_cents,
            waste_code: None,
            version: 1,
            sync_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether weigh tickets for this product need a waste-tracking document
    #[must_use]
    pub fn is_regulated_waste(&self) -> bool {
        self.waste_code
            .as_deref()
            .is_some_and(|code| !code.trim().is_empty())
    }
}

impl Entity for Product {
    const COLLECTION: Collection = Collection::Products;

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
            ("code", opt_field(self.code.as_deref())),
            ("unit_price_cents", self.unit_price_cents.to_string()),
            ("waste_code", opt_field(self.waste_code.as_deref())),
        ])
    }
}
