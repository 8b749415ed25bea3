use crate::backend::ident;
use crate::config::{DatabaseConfig, RealtimeConfig};
use crate::error::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<String> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Schema script with the configured change channel substituted in.
pub fn schema_sql(realtime: &RealtimeConfig) -> Result<String> {
    let channel = ident(&realtime.changes_channel)?;
    Ok(SCHEMA_SQL.replace("__CHANGES_CHANNEL__", channel))
}

/// Create tables, views, the change trigger and remote procedures.
pub async fn apply_schema(pool: &PgPool, realtime: &RealtimeConfig) -> Result<()> {
    let sql = schema_sql(realtime)?;
    sqlx::raw_sql(&sql).execute(pool).await?;
    tracing::info!(channel = %realtime.changes_channel, "Schema applied");
    Ok(())
}
