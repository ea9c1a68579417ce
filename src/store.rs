//! Persisted analysis results.
//!
//! [`ResultStore`] owns the SQLite schema: files, per-page OCR text,
//! classifications, and descriptions, plus FTS5 indexes over page and
//! classification text. It is the single authority for the "is this
//! fingerprint already analyzed?" question, and the pipeline is its sole
//! writer.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use crate::db;
use crate::migrate;
use crate::models::{Analysis, SearchHit};

#[derive(Debug, Clone)]
pub struct ResultStore {
    pool: SqlitePool,
}

/// Row counts for the status command.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCounts {
    pub files: i64,
    pub analyzed: i64,
    pub pages: i64,
    pub classifications: i64,
    pub descriptions: i64,
}

impl ResultStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Single authority for the analyzed predicate: true iff at least one
    /// classification or description exists for the file with this
    /// fingerprint.
    pub async fn is_analyzed(&self, fingerprint: &str) -> Result<bool> {
        let analyzed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM files f
                WHERE f.file_hash = ?
                  AND (EXISTS(SELECT 1 FROM classifications c WHERE c.file_id = f.id)
                    OR EXISTS(SELECT 1 FROM descriptions d WHERE d.file_id = f.id))
            )
            "#,
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;

        Ok(analyzed)
    }

    /// Persist one file's analysis in a single transaction.
    ///
    /// `file_hash` is unique: a second persist with the same fingerprint
    /// upserts onto the existing file identity (moved or renamed files do
    /// not fork history) and replaces its children rather than appending.
    pub async fn persist(&self, analysis: &Analysis) -> Result<String> {
        let mut tx = self.pool.begin().await?;

        let existing_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM files WHERE file_hash = ?")
                .bind(&analysis.fingerprint)
                .fetch_optional(&mut *tx)
                .await?;

        let file_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO files (id, file_path, file_hash, file_type, page_count, file_size, created_at, modified_at, analyzed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_hash) DO UPDATE SET
                file_path = excluded.file_path,
                file_type = excluded.file_type,
                page_count = excluded.page_count,
                file_size = excluded.file_size,
                modified_at = excluded.modified_at,
                analyzed_at = excluded.analyzed_at
            "#,
        )
        .bind(&file_id)
        .bind(analysis.path.to_string_lossy().as_ref())
        .bind(&analysis.fingerprint)
        .bind(&analysis.file_type)
        .bind(analysis.pages.len() as i64)
        .bind(analysis.file_size as i64)
        .bind(now)
        .bind(analysis.modified_at.timestamp())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // Reprocessing replaces children, never appends
        sqlx::query("DELETE FROM pages_fts WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM classifications_fts WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pages WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM classifications WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM descriptions WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;

        for page in &analysis.pages {
            let page_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO pages (id, file_id, page_number, ocr_text, ocr_confidence, ocr_mode) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&page_id)
            .bind(&file_id)
            .bind(page.page_number)
            .bind(&page.text)
            .bind(page.confidence)
            .bind(&analysis.ocr_mode)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO pages_fts (page_id, file_id, text) VALUES (?, ?, ?)")
                .bind(&page_id)
                .bind(&file_id)
                .bind(&page.text)
                .execute(&mut *tx)
                .await?;
        }

        for tag in &analysis.tags {
            let class_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO classifications (id, file_id, tag_number, tag_text, confidence, model_used) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&class_id)
            .bind(&file_id)
            .bind(tag.number)
            .bind(&tag.label)
            .bind(analysis.confidence)
            .bind(&analysis.model)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO classifications_fts (classification_id, file_id, text) VALUES (?, ?, ?)",
            )
            .bind(&class_id)
            .bind(&file_id)
            .bind(&tag.label)
            .execute(&mut *tx)
            .await?;
        }

        if !analysis.description.trim().is_empty() {
            sqlx::query(
                "INSERT INTO descriptions (id, file_id, description_text, confidence, model_used) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&file_id)
            .bind(&analysis.description)
            .bind(analysis.confidence)
            .bind(&analysis.model)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(file_id)
    }

    /// Full-text search over OCR page text and classification text.
    ///
    /// Results are ordered best-first across both indexes (FTS5 bm25 rank,
    /// negated so higher = better), deterministically tie-broken by file id.
    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();

        let page_rows = sqlx::query(
            r#"
            SELECT f.id AS file_id, f.file_path, f.file_hash, rank,
                   snippet(pages_fts, 2, '>>>', '<<<', '...', 48) AS snippet
            FROM pages_fts
            JOIN files f ON f.id = pages_fts.file_id
            WHERE pages_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        for row in &page_rows {
            let rank: f64 = row.get("rank");
            hits.push(SearchHit {
                file_id: row.get("file_id"),
                file_path: row.get("file_path"),
                fingerprint: row.get("file_hash"),
                snippet: row.get("snippet"),
                rank: -rank, // negate so higher = better
                matched_in: "page".to_string(),
            });
        }

        let class_rows = sqlx::query(
            r#"
            SELECT f.id AS file_id, f.file_path, f.file_hash, rank,
                   snippet(classifications_fts, 2, '>>>', '<<<', '...', 48) AS snippet
            FROM classifications_fts
            JOIN files f ON f.id = classifications_fts.file_id
            WHERE classifications_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        for row in &class_rows {
            let rank: f64 = row.get("rank");
            hits.push(SearchHit {
                file_id: row.get("file_id"),
                file_path: row.get("file_path"),
                fingerprint: row.get("file_hash"),
                snippet: row.get("snippet"),
                rank: -rank,
                matched_in: "classification".to_string(),
            });
        }

        hits.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.file_id.cmp(&b.file_id))
        });
        hits.truncate(limit as usize);

        Ok(hits)
    }

    /// Explicit purge of one file identity and all its children.
    ///
    /// Returns false if no file with this fingerprint exists. Children go
    /// via FK cascade; FTS rows have no FK and are removed by hand.
    pub async fn purge(&self, fingerprint: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let file_id: Option<String> = sqlx::query_scalar("SELECT id FROM files WHERE file_hash = ?")
            .bind(fingerprint)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(file_id) = file_id else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM pages_fts WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM classifications_fts WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        let analyzed: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM files f
            WHERE EXISTS(SELECT 1 FROM classifications c WHERE c.file_id = f.id)
               OR EXISTS(SELECT 1 FROM descriptions d WHERE d.file_id = f.id)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.pool)
            .await?;
        let classifications: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classifications")
            .fetch_one(&self.pool)
            .await?;
        let descriptions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM descriptions")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreCounts {
            files,
            analyzed,
            pages,
            classifications,
            descriptions,
        })
    }
}
