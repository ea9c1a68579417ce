use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Files table: file_hash is the dedup identity, file_path the watch-folder
    // bookkeeping key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            file_path TEXT NOT NULL,
            file_hash TEXT NOT NULL UNIQUE,
            file_type TEXT NOT NULL DEFAULT '',
            page_count INTEGER NOT NULL DEFAULT 0,
            file_size INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            analyzed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            ocr_text TEXT NOT NULL,
            ocr_confidence REAL NOT NULL,
            ocr_mode TEXT NOT NULL,
            UNIQUE(file_id, page_number),
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            tag_number INTEGER NOT NULL,
            tag_text TEXT NOT NULL,
            confidence REAL NOT NULL,
            model_used TEXT NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS descriptions (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            description_text TEXT NOT NULL,
            confidence REAL NOT NULL,
            model_used TEXT NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let pages_fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='pages_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !pages_fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE pages_fts USING fts5(
                page_id UNINDEXED,
                file_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    let class_fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='classifications_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !class_fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE classifications_fts USING fts5(
                classification_id UNINDEXED,
                file_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_file_id ON pages(file_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classifications_file_id ON classifications(file_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_descriptions_file_id ON descriptions(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_file_path ON files(file_path)")
        .execute(pool)
        .await?;

    Ok(())
}
