//! Downstream store for groups and records
//!
//! Both writes are idempotent upserts: groups on their code, records on
//! `(set_code, collector_number, language)`. Repeating a write with a new
//! payload replaces the previous payload and never adds a row.

use crate::error::{IngestError, RemoteError, Result};
use crate::models::{GroupRow, SinkRow};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

/// Store the seed run writes into
#[async_trait]
pub trait Sink: Send + Sync {
    /// Create the group row, or update it when it already exists
    async fn upsert_group(&self, group: &GroupRow) -> std::result::Result<(), RemoteError>;

    /// Insert the record row, or replace the existing row with the same key
    async fn upsert_card(&self, row: &SinkRow) -> std::result::Result<(), RemoteError>;
}

/// Postgres-backed sink
#[derive(Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool and bring the schema up to date
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;

        info!(max_connections, "Database connection pool established");

        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Database migrations completed");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
}

#[async_trait]
impl Sink for PostgresSink {
    async fn upsert_group(&self, group: &GroupRow) -> std::result::Result<(), RemoteError> {
        sqlx::query(
            r#"
            INSERT INTO card_sets (code, name, release_date, set_type)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code) DO UPDATE SET
                name = EXCLUDED.name,
                release_date = EXCLUDED.release_date,
                set_type = EXCLUDED.set_type,
                updated_at = NOW()
            "#,
        )
        .bind(&group.code)
        .bind(&group.name)
        .bind(parse_date(group.release_date.as_deref()))
        .bind(&group.set_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_card(&self, row: &SinkRow) -> std::result::Result<(), RemoteError> {
        sqlx::query(
            r#"
            INSERT INTO cards (
                set_code, collector_number, language, external_id,
                name, rarity, attributes, image_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (set_code, collector_number, language) DO UPDATE SET
                external_id = EXCLUDED.external_id,
                name = EXCLUDED.name,
                rarity = EXCLUDED.rarity,
                attributes = EXCLUDED.attributes,
                image_url = EXCLUDED.image_url,
                updated_at = NOW()
            "#,
        )
        .bind(&row.set_code)
        .bind(&row.collector_number)
        .bind(&row.language)
        .bind(&row.external_id)
        .bind(&row.name)
        .bind(&row.rarity)
        .bind(sqlx::types::Json(&row.attributes))
        .bind(&row.image_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-process sink keyed the same way as the database
#[derive(Debug, Default)]
pub struct MemorySink {
    groups: Mutex<BTreeMap<String, GroupRow>>,
    cards: Mutex<BTreeMap<(String, String, String), SinkRow>>,
    card_writes: Mutex<u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> Vec<GroupRow> {
        lock(&self.groups).values().cloned().collect()
    }

    pub fn cards(&self) -> Vec<SinkRow> {
        lock(&self.cards).values().cloned().collect()
    }

    pub fn card(&self, set_code: &str, collector_number: &str, language: &str) -> Option<SinkRow> {
        lock(&self.cards)
            .get(&(
                set_code.to_string(),
                collector_number.to_string(),
                language.to_string(),
            ))
            .cloned()
    }

    /// Upsert calls received, including repeats
    pub fn card_writes(&self) -> u64 {
        *lock(&self.card_writes)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Sink for MemorySink {
    async fn upsert_group(&self, group: &GroupRow) -> std::result::Result<(), RemoteError> {
        lock(&self.groups).insert(group.code.clone(), group.clone());
        Ok(())
    }

    async fn upsert_card(&self, row: &SinkRow) -> std::result::Result<(), RemoteError> {
        lock(&self.cards).insert(row.key(), row.clone());
        *lock(&self.card_writes) += 1;
        Ok(())
    }
}

/// Reject a non-dry seed run without a database
pub fn require_database_url(url: Option<&str>) -> Result<&str> {
    url.ok_or_else(|| {
        IngestError::MissingPrerequisite("DATABASE_URL must be set for a seed run".to_string())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(attributes: serde_json::Value) -> SinkRow {
        SinkRow {
            set_code: "lea".into(),
            collector_number: "232".into(),
            language: "en".into(),
            external_id: "c1".into(),
            name: "Black Lotus".into(),
            rarity: Some("rare".into()),
            attributes,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_upsert_replaces_payload() {
        let sink = MemorySink::new();
        sink.upsert_card(&row(json!({"artist": "old"}))).await.unwrap();
        sink.upsert_card(&row(json!({"artist": "new"}))).await.unwrap();

        assert_eq!(sink.cards().len(), 1);
        assert_eq!(sink.card("lea", "232", "en").unwrap().attributes["artist"], "new");
        assert_eq!(sink.card_writes(), 2);
    }

    #[tokio::test]
    async fn test_memory_sink_group_upsert() {
        let sink = MemorySink::new();
        let mut group = GroupRow {
            code: "lea".into(),
            name: "Alpha".into(),
            release_date: None,
            set_type: None,
        };
        sink.upsert_group(&group).await.unwrap();
        group.name = "Limited Edition Alpha".into();
        sink.upsert_group(&group).await.unwrap();

        let groups = sink.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Limited Edition Alpha");
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date(Some("1993-08-05")),
            NaiveDate::from_ymd_opt(1993, 8, 5)
        );
        assert_eq!(parse_date(Some("soon")), None);
        assert_eq!(parse_date(None), None);
    }

    #[test]
    fn test_require_database_url() {
        assert!(matches!(
            require_database_url(None),
            Err(IngestError::MissingPrerequisite(_))
        ));
        assert_eq!(require_database_url(Some("postgres://x")).unwrap(), "postgres://x");
    }
}
