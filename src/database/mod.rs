use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use std::path::Path;
use tracing::info;

use crate::models::{Money, SearchResponse};

/// A completed search as stored in the history log.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRecord {
    #[serde(skip_serializing)]
    pub requester: Option<String>,
    pub created_at: DateTime<Utc>,
    pub response: SearchResponse,
}

/// What one requester has saved across their recorded searches.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsTotal {
    pub searches: i64,
    pub candidates: i64,
    /// One amount per currency, never converted
    pub saved: Vec<Money>,
}

/// Search history backed by SQLite.
///
/// Searches without a requester are recorded but can never be read back.
#[derive(Clone)]
pub struct SearchHistory {
    pool: SqlitePool,
}

impl SearchHistory {
    pub async fn connect(db_url: &str) -> Result<Self> {
        if let Some(parent) = db_url
            .strip_prefix("sqlite:")
            .map(|path| path.trim_start_matches("//"))
            .filter(|path| !path.starts_with(":memory:"))
            .and_then(|path| Path::new(path.split('?').next().unwrap_or(path)).parent())
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database file");
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;

        // Run migrations
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Search history initialized successfully");
        Ok(Self { pool })
    }

    pub async fn record(&self, response: &SearchResponse, requester: Option<&str>) -> Result<()> {
        let body = serde_json::to_string(response)?;

        sqlx::query(
            r"
            INSERT INTO searches (id, requester, modality, query, candidate_count, savings_cents, savings_currency, response, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&response.id)
        .bind(requester)
        .bind(response.modality.to_string())
        .bind(&response.query)
        .bind(response.candidates.len() as i64)
        .bind(response.savings.amount.amount_cents)
        .bind(&response.savings.amount.currency)
        .bind(body)
        .bind(response.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// A search by id, only if `requester` made it.
    pub async fn find_for(&self, id: &str, requester: &str) -> Result<Option<SearchRecord>> {
        let row = sqlx::query(
            "SELECT requester, response, created_at FROM searches WHERE id = ? AND requester = ?",
        )
        .bind(id)
        .bind(requester)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::to_record(&row)).transpose()
    }

    /// Most recent searches of `requester` first.
    pub async fn recent_for(&self, requester: &str, limit: u32) -> Result<Vec<SearchRecord>> {
        let rows = sqlx::query(
            r"
            SELECT requester, response, created_at FROM searches
            WHERE requester = ?
            ORDER BY created_at DESC
            LIMIT ?
            ",
        )
        .bind(requester)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::to_record).collect()
    }

    pub async fn total_savings(&self, requester: &str) -> Result<SavingsTotal> {
        let rows = sqlx::query(
            r"
            SELECT savings_currency,
                   COUNT(*) AS searches,
                   COALESCE(SUM(candidate_count), 0) AS candidates,
                   COALESCE(SUM(savings_cents), 0) AS saved
            FROM searches
            WHERE requester = ?
            GROUP BY savings_currency
            ORDER BY savings_currency
            ",
        )
        .bind(requester)
        .fetch_all(&self.pool)
        .await?;

        let mut total = SavingsTotal {
            searches: 0,
            candidates: 0,
            saved: Vec::with_capacity(rows.len()),
        };
        for row in &rows {
            total.searches += row.try_get::<i64, _>("searches")?;
            total.candidates += row.try_get::<i64, _>("candidates")?;
            total.saved.push(Money::new(
                row.try_get::<i64, _>("saved")?,
                row.try_get::<String, _>("savings_currency")?,
            ));
        }
        Ok(total)
    }

    fn to_record(row: &sqlx::sqlite::SqliteRow) -> Result<SearchRecord> {
        let body: String = row.try_get("response")?;
        Ok(SearchRecord {
            requester: row.try_get("requester")?,
            created_at: row.try_get("created_at")?,
            response: serde_json::from_str(&body).context("Stored search is not valid JSON")?,
        })
    }
}
