//! Settings and local metadata repositories

use crate::error::Result;
use crate::models::{Settings, WeightUnit};
use libsql::Connection;

/// Trait for settings storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Load settings from the database
    async fn load(&self) -> Result<Settings>;

    /// Save settings to the database
    async fn save(&self, settings: &Settings) -> Result<()>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn load(&self) -> Result<Settings> {
        let mut settings = Settings::default();

        if let Some(value) = get_value(self.conn, "settings", "company_name").await? {
            settings.company_name = value;
        }

        if let Some(value) = get_value(self.conn, "settings", "company_address").await? {
            settings.company_address = value;
        }

        if let Some(value) = get_value(self.conn, "settings", "registration_number").await? {
            settings.registration_number = value;
        }

        if let Some(value) = get_value(self.conn, "settings", "ticket_prefix").await? {
            settings.ticket_prefix = value;
        }

        if let Some(value) = get_value(self.conn, "settings", "next_ticket_number").await? {
            if let Ok(number) = value.parse() {
                settings.next_ticket_number = number;
            }
        }

        if let Some(value) = get_value(self.conn, "settings", "weight_unit").await? {
            settings.weight_unit =
                serde_json::from_str::<WeightUnit>(&format!("\"{value}\"")).unwrap_or_default();
        }

        if let Some(value) = get_value(self.conn, "settings", "currency").await? {
            settings.currency = value;
        }

        Ok(settings)
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        let weight_unit = serde_json::to_string(&settings.weight_unit)?
            .trim_matches('"')
            .to_string();
        let pairs = [
            ("company_name", settings.company_name.clone()),
            ("company_address", settings.company_address.clone()),
            ("registration_number", settings.registration_number.clone()),
            ("ticket_prefix", settings.ticket_prefix.clone()),
            ("next_ticket_number", settings.next_ticket_number.to_string()),
            ("weight_unit", weight_unit),
            ("currency", settings.currency.clone()),
        ];

        for (key, value) in pairs {
            set_value(self.conn, "settings", key, &value).await?;
        }
        Ok(())
    }
}

/// Trait for local-only flags that are never backed up (async)
#[allow(async_fn_in_trait)]
pub trait MetaRepository {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// libSQL implementation of `MetaRepository`
pub struct LibSqlMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMetaRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MetaRepository for LibSqlMetaRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        get_value(self.conn, "app_meta", key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        set_value(self.conn, "app_meta", key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM app_meta WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}

// `table` is always one of the two literals above, never user input
async fn get_value(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
    let mut rows = conn
        .query(&format!("SELECT value FROM {table} WHERE key = ?"), [key])
        .await?;

    if let Some(row) = rows.next().await? {
        Ok(Some(row.get::<String>(0)?))
    } else {
        Ok(None)
    }
}

async fn set_value(conn: &Connection, table: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        &format!("INSERT OR REPLACE INTO {table} (key, value) VALUES (?, ?)"),
        [key, value],
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_default_settings() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        let settings = repo.load().await.unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_and_load_settings() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        let settings = Settings {
            company_name: "North Quarry".to_string(),
            next_ticket_number: 418,
            weight_unit: WeightUnit::Tonne,
            ..Settings::default()
        };

        repo.save(&settings).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_meta_set_get_remove() {
        let db = setup().await;
        let repo = LibSqlMetaRepository::new(db.connection());

        assert_eq!(repo.get("auto_restore.checked").await.unwrap(), None);
        repo.set("auto_restore.checked", "1").await.unwrap();
        assert_eq!(
            repo.get("auto_restore.checked").await.unwrap().as_deref(),
            Some("1")
        );
        repo.remove("auto_restore.checked").await.unwrap();
        assert_eq!(repo.get("auto_restore.checked").await.unwrap(), None);
    }
}
