pub mod comparisons;

pub use comparisons::ComparisonStore;

use anyhow::Result;
use sqlx::PgPool;

/// Create the tables this service needs if they are missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comparisons (
            id            UUID         PRIMARY KEY,
            kind          TEXT         NOT NULL,
            city          TEXT         NOT NULL,
            title         TEXT         NOT NULL,
            current_name  TEXT         NOT NULL,
            current_url   TEXT         NOT NULL,
            previous_name TEXT         NOT NULL,
            previous_url  TEXT         NOT NULL,
            raw_response  JSONB        NOT NULL,
            content_kind  TEXT         NOT NULL,
            content       JSONB        NOT NULL,
            best_effort   BOOLEAN      NOT NULL DEFAULT false,
            attempts      INTEGER      NOT NULL DEFAULT 1,
            reviewed      BOOLEAN      NOT NULL DEFAULT false,
            reviewed_by   TEXT,
            reviewed_at   TIMESTAMPTZ,
            created_by    TEXT         NOT NULL,
            created_at    TIMESTAMPTZ  NOT NULL DEFAULT now(),
            updated_at    TIMESTAMPTZ  NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS comparisons_city_created_idx ON comparisons (city, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
