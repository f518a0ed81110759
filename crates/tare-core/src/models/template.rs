//! Printable document templates

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{new_record_id, Collection, Entity};

/// What a template renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    #[default]
    Ticket,
    Invoice,
}

/// A user-edited print template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: TemplateKind,
    pub body: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub sync_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Template {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TemplateKind, body: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            name: name.into(),
            kind,
            body: body.into(),
            version: 1,
            sync_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Template {
    const COLLECTION: Collection = Collection::Templates;

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
        let kind = match self.kind {
            TemplateKind::Ticket => "ticket",
            TemplateKind::Invoice => "invoice",
        };
        BTreeMap::from([
            ("name", self.name.clone()),
            ("kind", kind.to_string()),
            ("body", self.body.clone()),
        ])
    }
}
