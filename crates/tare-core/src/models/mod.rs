//! Data models for Tare

mod carrier;
mod client;
mod conflict;
mod product;
mod queue;
mod settings;
mod template;
mod weigh_ticket;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use carrier::Carrier;
pub use client::Client;
pub use conflict::{ConflictRecord, Resolution};
pub use product::Product;
pub use queue::{QueueItem, SyncEvent, SyncEventKind, SyncEventStatus, SyncTask};
pub use settings::{Settings, WeightUnit};
pub use template::{Template, TemplateKind};
pub use weigh_ticket::WeighTicket;

/// Business-entity collections held in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Clients,
    Products,
    WeighTickets,
    Carriers,
    Templates,
}

impl Collection {
    /// Every collection, in backup order.
    pub const ALL: [Self; 5] = [
        Self::Clients,
        Self::Products,
        Self::WeighTickets,
        Self::Carriers,
        Self::Templates,
    ];

    /// Collections whose presence means the operator already has data.
    pub const CORE: [Self; 3] = [Self::Clients, Self::Products, Self::WeighTickets];

    /// Storage name of the collection.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::Products => "products",
            Self::WeighTickets => "weigh_tickets",
            Self::Carriers => "carriers",
            Self::Templates => "templates",
        }
    }
}

impl Collection {
    /// Check that a stored document deserializes into this collection's entity
    pub fn check_record(self, record: &serde_json::Value) -> serde_json::Result<()> {
        match self {
            Self::Clients => Client::deserialize(record).map(drop),
            Self::Products => Product::deserialize(record).map(drop),
            Self::WeighTickets => WeighTicket::deserialize(record).map(drop),
            Self::Carriers => Carrier::deserialize(record).map(drop),
            Self::Templates => Template::deserialize(record).map(drop),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str() == s)
            .ok_or_else(|| format!("unknown collection: {s}"))
    }
}

/// A record stored in one of the business collections.
///
/// Every entity carries a monotonic `version` counter and the fingerprint
/// recorded at its last sync. The fingerprint covers only the fields returned
/// by [`Entity::fingerprint_fields`].
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Collection this entity lives in
    const COLLECTION: Collection;

    /// Record identifier, unique within the collection
    fn id(&self) -> &str;

    /// Monotonic version counter
    fn version(&self) -> i64;

    /// Replace sync metadata. Never touches business fields.
    fn set_sync_meta(&mut self, version: i64, sync_hash: String);

    /// Business-significant fields covered by the fingerprint
    fn fingerprint_fields(&self) -> BTreeMap<&'static str, String>;

    /// Content fingerprint over [`Entity::fingerprint_fields`]
    fn fingerprint(&self) -> String {
        fingerprint(&self.fingerprint_fields())
    }
}

/// Hash `field=value` lines in key order.
///
/// `BTreeMap` iteration is sorted, so the result does not depend on the order
/// the fields were inserted in.
pub fn fingerprint(fields: &BTreeMap<&'static str, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in fields {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Generate a new time-sortable record identifier.
#[must_use]
pub fn new_record_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

pub(crate) fn opt_field(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}
