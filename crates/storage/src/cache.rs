use crate::models::CacheRow;
use sqlx::SqlitePool;
use tracing::debug;

pub async fn get(pool: &SqlitePool, path: &str) -> anyhow::Result<Option<CacheRow>> {
    let row = sqlx::query_as::<_, CacheRow>(
        "SELECT path, size, mtime_ns, content_hash, probe_json, probed_at FROM probe_cache WHERE path = ?1",
    )
    .bind(path)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Inserts or replaces the row for `row.path` in a single statement.
pub async fn upsert(pool: &SqlitePool, row: &CacheRow) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO probe_cache (path, size, mtime_ns, content_hash, probe_json, probed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(path) DO UPDATE SET
            size = excluded.size,
            mtime_ns = excluded.mtime_ns,
            content_hash = excluded.content_hash,
            probe_json = excluded.probe_json,
            probed_at = excluded.probed_at
        "#,
    )
    .bind(&row.path)
    .bind(row.size)
    .bind(row.mtime_ns)
    .bind(&row.content_hash)
    .bind(&row.probe_json)
    .bind(&row.probed_at)
    .execute(pool)
    .await?;
    debug!(path = %row.path, "cache row stored");
    Ok(())
}

pub async fn count(pool: &SqlitePool) -> anyhow::Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM probe_cache")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect, migrate};

    fn row(path: &str, size: i64) -> CacheRow {
        CacheRow {
            path: path.to_string(),
            size,
            mtime_ns: 42,
            content_hash: None,
            probe_json: "{}".to_string(),
            probed_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("cache.db");
        let pool = connect(&db.to_string_lossy()).await.unwrap();
        migrate(&pool).await.unwrap();

        upsert(&pool, &row("/in/a.mkv", 1)).await.unwrap();
        upsert(&pool, &row("/in/a.mkv", 2)).await.unwrap();
        upsert(&pool, &row("/in/b.mkv", 3)).await.unwrap();

        assert_eq!(count(&pool).await.unwrap(), 2);
        let got = get(&pool, "/in/a.mkv").await.unwrap().unwrap();
        assert_eq!(got.size, 2);
        assert!(get(&pool, "/in/missing.mkv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cache.db");
        let pool = connect(&db.to_string_lossy()).await.unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
        assert_eq!(count(&pool).await.unwrap(), 0);
    }
}
