use anyhow::{Context, Result};
use clickhouse::Client;
use tracing::info;

/// Connection settings for the delivery-record store.
#[derive(Debug, Clone)]
pub struct ClickHouseSettings {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct ClickHouseClient {
    client: Client,
    database: String,
}

impl ClickHouseClient {
    pub fn new(settings: &ClickHouseSettings) -> Self {
        let client = Client::default()
            .with_url(&settings.url)
            .with_database(&settings.database)
            .with_user(&settings.username)
            .with_password(&settings.password)
            .with_compression(clickhouse::Compression::Lz4);

        Self {
            client,
            database: settings.database.clone(),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .with_context(|| format!("ClickHouse ping failed for database {}", self.database))?;
        info!(database = %self.database, "ClickHouse reachable");
        Ok(())
    }

    /// Runs a DDL statement such as `CREATE TABLE IF NOT EXISTS`.
    pub async fn execute(&self, statement: &str) -> Result<()> {
        self.client
            .query(statement)
            .execute()
            .await
            .context("ClickHouse statement failed")
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}
