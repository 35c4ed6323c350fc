//! Persisted settings layer
//!
//! The desktop application stores its preferences in a `settings(key, value)`
//! table. Control-plane keys carry an `mcp_` prefix.

use crate::error::ConfigError;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Row};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Read every `mcp_*` row from the settings table
///
/// A missing database file or a database without a `settings` table yields
/// an empty map. Rows whose key or value is not text are skipped.
pub async fn load_persisted(db_path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    if !db_path.is_file() {
        debug!(path = %db_path.display(), "No database file, persisted settings empty");
        return Ok(BTreeMap::new());
    }

    let mut conn = SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true)
        .connect()
        .await
        .map_err(|e| ConfigError::Settings(format!("Failed to open {}: {}", db_path.display(), e)))?;

    let rows = match sqlx::query("SELECT key, value FROM settings WHERE key LIKE 'mcp\\_%' ESCAPE '\\'")
        .fetch_all(&mut conn)
        .await
    {
        Ok(rows) => rows,
        Err(sqlx::Error::Database(db)) if db.message().contains("no such table") => {
            debug!("Database has no settings table, persisted settings empty");
            return Ok(BTreeMap::new());
        }
        Err(e) => return Err(ConfigError::Settings(e.to_string())),
    };

    let mut settings = BTreeMap::new();
    for row in rows {
        let decoded = row
            .try_get::<String, _>("key")
            .and_then(|key| Ok((key, row.try_get::<Option<String>, _>("value")?)));
        match decoded {
            Ok((key, Some(value))) => {
                settings.insert(key, value);
            }
            Ok((_, None)) => {}
            Err(e) => warn!(error = %e, "Skipping undecodable settings row"),
        }
    }

    debug!(count = settings.len(), "Loaded persisted settings");
    Ok(settings)
}

/// Translate stored keys into layer keys
///
/// `mcp_max_bytes` becomes `max_bytes`; the console secret is stored as
/// `mcp_web_token` and surfaces as `web_password`.
pub fn persisted_to_layer_keys(stored: BTreeMap<String, String>) -> BTreeMap<String, String> {
    stored
        .into_iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix("mcp_")?;
            let name = match name {
                "web_token" => "web_password",
                other => other,
            };
            Some((name.to_string(), value))
        })
        .collect()
}
