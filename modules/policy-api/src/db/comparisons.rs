//! Comparison records in Postgres.
//!
//! No transactions and no version column: concurrent edits to the same record
//! resolve as last write wins.

use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use policy_common::{ComparisonKind, ComparisonRecord, FileRef, NewComparison};

const COLUMNS: &str = "id, kind, city, title, current_name, current_url, previous_name, \
    previous_url, raw_response, content_kind, content, best_effort, attempts, reviewed, \
    reviewed_by, reviewed_at, created_by, created_at, updated_at";

/// Hard cap on list queries.
pub const MAX_LIST_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct ComparisonStore {
    pool: PgPool,
}

impl ComparisonStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, new: NewComparison) -> Result<ComparisonRecord> {
        let row = sqlx::query_as::<_, ComparisonRow>(&format!(
            r#"
            INSERT INTO comparisons (
                id, kind, city, title, current_name, current_url, previous_name, previous_url,
                raw_response, content_kind, content, best_effort, attempts, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.kind.as_str())
        .bind(&new.city)
        .bind(&new.title)
        .bind(&new.current_file.name)
        .bind(&new.current_file.url)
        .bind(&new.previous_file.name)
        .bind(&new.previous_file.url)
        .bind(&new.raw_response)
        .bind(&new.content_kind)
        .bind(&new.content)
        .bind(new.best_effort)
        .bind(new.attempts)
        .bind(&new.created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<ComparisonRecord>> {
        let row = sqlx::query_as::<_, ComparisonRow>(&format!(
            "SELECT {COLUMNS} FROM comparisons WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    /// Newest first, optionally filtered by city and kind.
    pub async fn list(
        &self,
        city: Option<&str>,
        kind: Option<ComparisonKind>,
        limit: u32,
    ) -> Result<Vec<ComparisonRecord>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT) as i64;

        let rows = sqlx::query_as::<_, ComparisonRow>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM comparisons
            WHERE ($1::text IS NULL OR city = $1)
              AND ($2::text IS NULL OR kind = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        ))
        .bind(city)
        .bind(kind.map(ComparisonKind::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Replace the editable projection. `None` if the record does not exist.
    pub async fn update_content(
        &self,
        id: Uuid,
        content_kind: &str,
        content: &serde_json::Value,
    ) -> Result<Option<ComparisonRecord>> {
        let row = sqlx::query_as::<_, ComparisonRow>(&format!(
            r#"
            UPDATE comparisons
            SET content = $2, content_kind = $3, updated_at = now()
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(content)
        .bind(content_kind)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    /// Set or clear the review sign-off. Clearing also drops reviewer and time.
    pub async fn set_reviewed(
        &self,
        id: Uuid,
        reviewed: bool,
        reviewer: &str,
    ) -> Result<Option<ComparisonRecord>> {
        let row = sqlx::query_as::<_, ComparisonRow>(&format!(
            r#"
            UPDATE comparisons
            SET reviewed = $2,
                reviewed_by = CASE WHEN $2 THEN $3 ELSE NULL END,
                reviewed_at = CASE WHEN $2 THEN now() ELSE NULL END,
                updated_at = now()
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(reviewed)
        .bind(reviewer)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    /// Returns false when nothing was deleted.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM comparisons WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct ComparisonRow(ComparisonRecord);

impl<'r> sqlx::FromRow<'r, PgRow> for ComparisonRow {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let kind_str: String = row.try_get("kind")?;
        let kind = ComparisonKind::parse(&kind_str).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "kind".to_string(),
            source: format!("unknown comparison kind '{kind_str}'").into(),
        })?;

        Ok(ComparisonRow(ComparisonRecord {
            id: row.try_get("id")?,
            kind,
            city: row.try_get("city")?,
            title: row.try_get("title")?,
            current_file: FileRef {
                name: row.try_get("current_name")?,
                url: row.try_get("current_url")?,
            },
            previous_file: FileRef {
                name: row.try_get("previous_name")?,
                url: row.try_get("previous_url")?,
            },
            raw_response: row.try_get("raw_response")?,
            content_kind: row.try_get("content_kind")?,
            content: row.try_get("content")?,
            best_effort: row.try_get("best_effort")?,
            attempts: row.try_get("attempts")?,
            reviewed: row.try_get("reviewed")?,
            reviewed_by: row.try_get("reviewed_by")?,
            reviewed_at: row.try_get("reviewed_at")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

// ---------------------------------------------------------------------------
// Integration tests. Require a Postgres instance; skipped unless
// DATABASE_TEST_URL is set.
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_store() -> Option<ComparisonStore> {
        let url = std::env::var("DATABASE_TEST_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        crate::db::ensure_schema(&pool).await.ok()?;
        Some(ComparisonStore::new(pool))
    }

    fn sample(city: &str, kind: ComparisonKind) -> NewComparison {
        NewComparison {
            kind,
            city: city.to_string(),
            title: "2025 vs 2024".to_string(),
            current_file: FileRef {
                name: "2025.pdf".to_string(),
                url: "https://cdn.example/2025.pdf".to_string(),
            },
            previous_file: FileRef {
                name: "2024.pdf".to_string(),
                url: "https://cdn.example/2024.pdf".to_string(),
            },
            raw_response: json!({ "code": 0, "data": "{\"summary\":\"s\"}" }),
            content_kind: "structured".to_string(),
            content: json!({ "summary": "s" }),
            best_effort: false,
            attempts: 1,
            created_by: "tester".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_find_update_delete() {
        let Some(store) = test_store().await else {
            return;
        };
        let city = format!("test-{}", Uuid::new_v4());

        let created = store.insert(sample(&city, ComparisonKind::Policy)).await.unwrap();
        assert_eq!(created.city, city);
        assert!(!created.reviewed);

        let found = store.find(created.id).await.unwrap().unwrap();
        assert_eq!(found.content, json!({ "summary": "s" }));
        assert_eq!(found.kind, ComparisonKind::Policy);

        let edited = store
            .update_content(created.id, "structured", &json!({ "summary": "edited" }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edited.content, json!({ "summary": "edited" }));
        assert!(edited.updated_at >= created.updated_at);

        let reviewed = store.set_reviewed(created.id, true, "auditor").await.unwrap().unwrap();
        assert!(reviewed.reviewed);
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("auditor"));
        assert!(reviewed.reviewed_at.is_some());

        let cleared = store.set_reviewed(created.id, false, "auditor").await.unwrap().unwrap();
        assert!(!cleared.reviewed);
        assert_eq!(cleared.reviewed_by, None);

        assert!(store.delete(created.id).await.unwrap());
        assert!(!store.delete(created.id).await.unwrap());
        assert!(store.find(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_city_and_kind() {
        let Some(store) = test_store().await else {
            return;
        };
        let city = format!("test-{}", Uuid::new_v4());
        store.insert(sample(&city, ComparisonKind::Policy)).await.unwrap();
        store.insert(sample(&city, ComparisonKind::Standard)).await.unwrap();
        store.insert(sample("elsewhere", ComparisonKind::Policy)).await.unwrap();

        let all = store.list(Some(&city), None, 50).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].created_at >= all[1].created_at);

        let standard = store
            .list(Some(&city), Some(ComparisonKind::Standard), 50)
            .await
            .unwrap();
        assert_eq!(standard.len(), 1);
        assert_eq!(standard[0].kind, ComparisonKind::Standard);
    }

    #[tokio::test]
    async fn missing_records_are_none() {
        let Some(store) = test_store().await else {
            return;
        };
        let id = Uuid::new_v4();
        assert!(store.find(id).await.unwrap().is_none());
        assert!(store
            .update_content(id, "free_text", &json!("x"))
            .await
            .unwrap()
            .is_none());
        assert!(store.set_reviewed(id, true, "a").await.unwrap().is_none());
    }
}
