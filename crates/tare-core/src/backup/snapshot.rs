//! Backup artifact format.
//!
//! One human-readable JSON document: a format marker, schema version,
//! generation time, the settings object, one array per collection, and a
//! SHA-256 fingerprint over the content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::db::RawRecord;
use crate::models::{Collection, Settings};
use crate::services::DatabaseService;
use crate::util::now_ms;

use super::error::{BackupError, BackupResult};

pub const FORMAT_MARKER: &str = "tare-backup";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub format: String,
    pub schema_version: u32,
    /// Unix ms
    pub generated_at: i64,
    /// Reduced snapshot written by the emergency tier
    #[serde(default)]
    pub minimal: bool,
    pub settings: Settings,
    pub collections: BTreeMap<Collection, Vec<Value>>,
    pub fingerprint: String,
}

impl BackupSnapshot {
    pub fn new(collections: BTreeMap<Collection, Vec<Value>>, settings: Settings) -> BackupResult<Self> {
        let fingerprint = content_fingerprint(&collections, &settings)?;
        Ok(Self {
            format: FORMAT_MARKER.to_string(),
            schema_version: SCHEMA_VERSION,
            generated_at: now_ms(),
            minimal: false,
            settings,
            collections,
            fingerprint,
        })
    }

    /// Read the whole local dataset
    pub async fn capture(db: &DatabaseService) -> crate::Result<Self> {
        let (collections, settings) = db.export_all().await?;
        Ok(Self::new(collections, settings)?)
    }

    /// Parse and validate an artifact; anything unexpected is corruption
    pub fn parse(raw: &str) -> BackupResult<Self> {
        let snapshot: Self = serde_json::from_str(raw)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> BackupResult<String> {
        serde_json::to_string_pretty(self).map_err(|error| BackupError::other(error.to_string()))
    }

    pub fn validate(&self) -> BackupResult<()> {
        if self.format != FORMAT_MARKER {
            return Err(BackupError::corruption(format!(
                "unexpected format marker {:?}",
                self.format
            )));
        }
        if self.schema_version == 0 || self.schema_version > SCHEMA_VERSION {
            return Err(BackupError::corruption(format!(
                "unsupported schema version {}",
                self.schema_version
            )));
        }
        for (collection, records) in &self.collections {
            for record in records {
                RawRecord::from_value(record.clone()).map_err(|error| {
                    BackupError::corruption(format!("invalid record in {collection}: {error}"))
                })?;
                collection.check_record(record).map_err(|error| {
                    BackupError::corruption(format!("malformed record in {collection}: {error}"))
                })?;
            }
        }
        let expected = content_fingerprint(&self.collections, &self.settings)?;
        if expected != self.fingerprint {
            return Err(BackupError::corruption("content fingerprint mismatch"));
        }
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.collections.get(&collection).map_or(0, Vec::len)
    }

    /// Reference data plus the newest `ticket_limit` weigh tickets
    pub fn to_minimal(&self, ticket_limit: usize) -> BackupResult<Self> {
        let mut collections = BTreeMap::new();
        for collection in [Collection::Clients, Collection::Products, Collection::Carriers] {
            if let Some(records) = self.collections.get(&collection) {
                collections.insert(collection, records.clone());
            }
        }

        let mut tickets = self
            .collections
            .get(&Collection::WeighTickets)
            .cloned()
            .unwrap_or_default();
        tickets.sort_by_key(|ticket| {
            std::cmp::Reverse(ticket.get("created_at").and_then(Value::as_i64).unwrap_or(0))
        });
        tickets.truncate(ticket_limit);
        collections.insert(Collection::WeighTickets, tickets);

        let fingerprint = content_fingerprint(&collections, &self.settings)?;
        Ok(Self {
            format: FORMAT_MARKER.to_string(),
            schema_version: SCHEMA_VERSION,
            generated_at: self.generated_at,
            minimal: true,
            settings: self.settings.clone(),
            collections,
            fingerprint,
        })
    }
}

fn content_fingerprint(
    collections: &BTreeMap<Collection, Vec<Value>>,
    settings: &Settings,
) -> BackupResult<String> {
    let body = serde_json::to_vec(&(collections, settings))
        .map_err(|error| BackupError::other(error.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(&body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupErrorKind;
    use crate::models::{Client, Template, TemplateKind, WeighTicket};
    use pretty_assertions::assert_eq;

    fn sample() -> BackupSnapshot {
        let client = Client::new("Acme");
        let ticket = WeighTicket::new("T-1", client.id.clone(), 20_000, 9_000);
        let collections = BTreeMap::from([
            (Collection::Clients, vec![serde_json::to_value(&client).unwrap()]),
            (
                Collection::WeighTickets,
                vec![serde_json::to_value(&ticket).unwrap()],
            ),
        ]);
        BackupSnapshot::new(collections, Settings::default()).unwrap()
    }

    #[test]
    fn serialized_snapshot_parses_back() {
        let snapshot = sample();
        let parsed = BackupSnapshot::parse(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.record_count(), 2);
        assert!(snapshot.to_json().unwrap().contains("\"weigh_tickets\""));
    }

    #[test]
    fn garbage_is_corruption() {
        let error = BackupSnapshot::parse("definitely not a backup").unwrap_err();
        assert_eq!(error.kind, BackupErrorKind::Corruption);
    }

    #[test]
    fn foreign_json_is_corruption() {
        let error = BackupSnapshot::parse(r#"{"hello":"world"}"#).unwrap_err();
        assert_eq!(error.kind, BackupErrorKind::Corruption);
    }

    #[test]
    fn tampered_content_is_corruption() {
        let mut snapshot = sample();
        snapshot.settings.company_name = "Someone else".to_string();
        let error = BackupSnapshot::parse(&snapshot.to_json().unwrap()).unwrap_err();
        assert_eq!(error.kind, BackupErrorKind::Corruption);
    }

    #[test]
    fn record_missing_entity_fields_is_corruption() {
        let collections = BTreeMap::from([(
            Collection::Clients,
            vec![serde_json::json!({ "id": "c1" })],
        )]);
        // Fingerprint matches, so only the typed check can catch it
        let snapshot = BackupSnapshot::new(collections, Settings::default()).unwrap();

        let error = snapshot.validate().unwrap_err();
        assert_eq!(error.kind, BackupErrorKind::Corruption);
        assert!(error.message.contains("clients"));
        assert!(BackupSnapshot::parse(&snapshot.to_json().unwrap()).is_err());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut snapshot = sample();
        snapshot.schema_version = SCHEMA_VERSION + 1;
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn minimal_keeps_newest_tickets() {
        let mut tickets = Vec::new();
        for n in 0..5 {
            let mut ticket = WeighTicket::new(format!("T-{n}"), "client", 10_000, 5_000);
            ticket.created_at = n;
            tickets.push(serde_json::to_value(&ticket).unwrap());
        }
        let collections = BTreeMap::from([
            (Collection::WeighTickets, tickets),
            (
                Collection::Templates,
                vec![serde_json::to_value(Template::new("Ticket", TemplateKind::Ticket, "{{number}}"))
                    .unwrap()],
            ),
        ]);
        let snapshot = BackupSnapshot::new(collections, Settings::default()).unwrap();

        let minimal = snapshot.to_minimal(2).unwrap();
        assert!(minimal.minimal);
        assert_eq!(minimal.count(Collection::Templates), 0);
        let numbers: Vec<_> = minimal.collections[&Collection::WeighTickets]
            .iter()
            .map(|ticket| ticket["number"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(numbers, vec!["T-4", "T-3"]);
        minimal.validate().unwrap();
    }
}
