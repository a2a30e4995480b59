//! PostgreSQL partitions for charts and homepage items

use super::ChartStore;
use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use chartsync_common::types::{ChartType, HomeItem, SongRecord, Source};
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct PgChartStore {
    pool: PgPool,
}

impl PgChartStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;
        info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

/// Keep the first item of each (section, kind, item id) identity
fn dedupe_home(items: &[HomeItem]) -> Vec<&HomeItem> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert((item.section.as_str(), item.kind, item.item_id.as_str())))
        .collect()
}

#[async_trait]
impl ChartStore for PgChartStore {
    async fn load_chart(&self, source: Source, chart: ChartType, limit: i64) -> Result<Vec<SongRecord>> {
        let rows: Vec<(String, String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT title, artist, original_share_url, original_cover_url, hosted_cover_url
            FROM music_charts
            WHERE source = $1 AND type = $2
            ORDER BY position
            LIMIT $3
            "#,
        )
        .bind(source.as_str())
        .bind(chart.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(title, artist, canonical_url, cover_url, hosted_cover_url)| SongRecord {
                title,
                artist,
                canonical_url,
                cover_url,
                hosted_cover_url,
            })
            .collect())
    }

    async fn chart_hosted_covers(&self, source: Source, chart: ChartType) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT original_share_url, hosted_cover_url
            FROM music_charts
            WHERE source = $1 AND type = $2
              AND hosted_cover_url IS NOT NULL AND hosted_cover_url <> ''
            "#,
        )
        .bind(source.as_str())
        .bind(chart.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    #[instrument(skip(self, records), fields(rows = records.len()))]
    async fn replace_chart(&self, source: Source, chart: ChartType, records: &[SongRecord]) -> Result<u64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM music_charts WHERE source = $1 AND type = $2")
            .bind(source.as_str())
            .bind(chart.as_str())
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0;
        if !records.is_empty() {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO music_charts (source, type, position, title, artist, original_share_url, original_cover_url, hosted_cover_url, updated_at) ",
            );
            qb.push_values(records.iter().enumerate(), |mut b, (position, record)| {
                b.push_bind(source.as_str())
                    .push_bind(chart.as_str())
                    .push_bind(position as i32)
                    .push_bind(record.title.as_str())
                    .push_bind(record.artist.as_str())
                    .push_bind(record.canonical_url.as_str())
                    .push_bind(record.cover_url.as_str())
                    .push_bind(record.hosted_cover_url.as_deref())
                    .push_bind(now);
            });
            inserted = qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn load_home(&self, source: Source) -> Result<Vec<HomeItem>> {
        let rows = sqlx::query(
            r#"
            SELECT section, item_type, item_id, title, subtitle, metric,
                   original_share_url, original_cover_url, hosted_cover_url, extra_json
            FROM music_home_items
            WHERE source = $1
            ORDER BY section, position
            "#,
        )
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<HomeItem> {
                let kind: String = row.try_get("item_type")?;
                let payload: Option<Json<Value>> = row.try_get("extra_json")?;
                Ok(HomeItem {
                    source,
                    section: row.try_get("section")?,
                    kind: kind.parse()?,
                    item_id: row.try_get("item_id")?,
                    record: SongRecord {
                        title: row.try_get("title")?,
                        artist: row.try_get("subtitle")?,
                        canonical_url: row.try_get("original_share_url")?,
                        cover_url: row.try_get("original_cover_url")?,
                        hosted_cover_url: row.try_get("hosted_cover_url")?,
                    },
                    metric: row.try_get("metric")?,
                    payload: payload.map(|Json(value)| value).unwrap_or(Value::Null),
                })
            })
            .collect()
    }

    async fn home_hosted_covers(&self, source: Source) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT original_share_url, hosted_cover_url
            FROM music_home_items
            WHERE source = $1
              AND hosted_cover_url IS NOT NULL AND hosted_cover_url <> ''
            "#,
        )
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    #[instrument(skip(self, items), fields(rows = items.len()))]
    async fn replace_home(&self, source: Source, items: &[HomeItem]) -> Result<u64> {
        let now = Utc::now();
        let items = dedupe_home(items);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM music_home_items WHERE source = $1")
            .bind(source.as_str())
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0;
        if !items.is_empty() {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO music_home_items (source, section, item_type, item_id, position, title, subtitle, metric, original_share_url, original_cover_url, hosted_cover_url, extra_json, updated_at) ",
            );
            qb.push_values(items.iter().enumerate(), |mut b, (position, item)| {
                b.push_bind(source.as_str())
                    .push_bind(item.section.as_str())
                    .push_bind(item.kind.as_str())
                    .push_bind(item.item_id.as_str())
                    .push_bind(position as i32)
                    .push_bind(item.record.title.as_str())
                    .push_bind(item.record.artist.as_str())
                    .push_bind(item.metric)
                    .push_bind(item.record.canonical_url.as_str())
                    .push_bind(item.record.cover_url.as_str())
                    .push_bind(item.record.hosted_cover_url.as_deref())
                    .push_bind(Json(&item.payload))
                    .push_bind(now);
            });
            inserted = qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chartsync_common::types::ItemKind;

    fn item(section: &str, kind: ItemKind, id: &str, title: &str) -> HomeItem {
        HomeItem {
            source: Source::Qq,
            section: section.to_string(),
            kind,
            item_id: id.to_string(),
            record: SongRecord::new(title, "", format!("qq://x/{id}"), ""),
            metric: 0,
            payload: Value::Null,
        }
    }

    #[test]
    fn test_dedupe_home_keeps_first() {
        let items = vec![
            item("hotCategory", ItemKind::Tag, "1", "first"),
            item("hotCategory", ItemKind::Tag, "1", "second"),
            item("newLanList", ItemKind::Tag, "1", "other section"),
        ];
        let kept = dedupe_home(&items);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].record.title, "first");
    }
}
