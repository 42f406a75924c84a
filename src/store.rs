//! SQLite-backed document store.
//!
//! Persists documents (standalone, chunk parents, and chunks) and chat
//! turns. Vector similarity runs in Rust over the stored embedding BLOBs;
//! the per-tenant corpus is small enough that a full scan of candidate
//! rows is the simplest correct approximate-nearest-neighbor strategy.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::Result;
use crate::models::{Assignee, ChatTurn, Document};

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        DocumentStore { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fetch a tenant's documents, optionally including chunks.
    pub async fn list_documents(
        &self,
        tenant_id: &str,
        include_chunks: bool,
    ) -> Result<Vec<Document>> {
        let sql = if include_chunks {
            "SELECT * FROM documents WHERE tenant_id = ? ORDER BY created_at ASC"
        } else {
            "SELECT * FROM documents WHERE tenant_id = ? AND is_chunk = 0 ORDER BY created_at ASC"
        };

        let rows = sqlx::query(sql).bind(tenant_id).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    /// Insert or update a document by id. Updates bump the version and
    /// preserve the original creation time.
    pub async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, tenant_id, title, content, tags_json, assigned_json,
                                   version, created_at, updated_at, embedding,
                                   is_chunk, parent_id, chunk_index, chunk_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                tags_json = excluded.tags_json,
                assigned_json = excluded.assigned_json,
                version = documents.version + 1,
                updated_at = excluded.updated_at,
                embedding = excluded.embedding,
                is_chunk = excluded.is_chunk,
                parent_id = excluded.parent_id,
                chunk_index = excluded.chunk_index,
                chunk_count = excluded.chunk_count
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.tenant_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(serde_json::to_string(&doc.tags).unwrap_or_else(|_| "[]".to_string()))
        .bind(serde_json::to_string(&doc.assigned_to).unwrap_or_else(|_| "[]".to_string()))
        .bind(doc.version)
        .bind(doc.created_at.timestamp())
        .bind(doc.updated_at.timestamp())
        .bind(doc.embedding.as_ref().map(|v| vec_to_blob(v)))
        .bind(doc.is_chunk as i64)
        .bind(&doc.parent_id)
        .bind(doc.chunk_index)
        .bind(doc.chunk_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a chunk document. Chunks are never upserted; stale ones are
    /// deleted before reindexing a parent.
    pub async fn insert_chunk(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, tenant_id, title, content, tags_json, assigned_json,
                                   version, created_at, updated_at, embedding,
                                   is_chunk, parent_id, chunk_index, chunk_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, NULL)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.tenant_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(serde_json::to_string(&doc.tags).unwrap_or_else(|_| "[]".to_string()))
        .bind(serde_json::to_string(&doc.assigned_to).unwrap_or_else(|_| "[]".to_string()))
        .bind(doc.version)
        .bind(doc.created_at.timestamp())
        .bind(doc.updated_at.timestamp())
        .bind(doc.embedding.as_ref().map(|v| vec_to_blob(v)))
        .bind(&doc.parent_id)
        .bind(doc.chunk_index)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete all chunks belonging to a parent document.
    pub async fn delete_chunks(&self, parent_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE parent_id = ? AND is_chunk = 1")
            .bind(parent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_document(&self, id: &str) -> Result<u64> {
        self.delete_chunks(id).await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Score a tenant's embedded documents against a query vector and
    /// return the best `candidate_count` by cosine similarity, descending.
    /// Callers apply role filtering before taking their final limit.
    pub async fn vector_search(
        &self,
        tenant_id: &str,
        query_vector: &[f32],
        include_chunks: bool,
        candidate_count: usize,
    ) -> Result<Vec<(Document, f64)>> {
        let sql = if include_chunks {
            "SELECT * FROM documents WHERE tenant_id = ? AND embedding IS NOT NULL"
        } else {
            "SELECT * FROM documents WHERE tenant_id = ? AND embedding IS NOT NULL AND is_chunk = 0"
        };

        let rows = sqlx::query(sql).bind(tenant_id).fetch_all(&self.pool).await?;

        let mut scored: Vec<(Document, f64)> = rows
            .iter()
            .map(row_to_document)
            .filter_map(|doc| {
                let similarity = doc
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(query_vector, e) as f64)?;
                Some((doc, similarity))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(candidate_count);
        Ok(scored)
    }

    /// Persist conversation turns (user and assistant messages).
    pub async fn record_chat_turns(&self, turns: &[ChatTurn]) -> Result<()> {
        let now = Utc::now().timestamp();
        for turn in turns {
            sqlx::query(
                r#"
                INSERT INTO chats (id, tenant_id, user_id, kind, message, sources_json,
                                   guided_mode, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&turn.tenant_id)
            .bind(&turn.user_id)
            .bind(turn.kind.as_str())
            .bind(&turn.message)
            .bind(serde_json::to_string(&turn.sources).unwrap_or_else(|_| "[]".to_string()))
            .bind(turn.guided_mode as i64)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    let tags_json: String = row.get("tags_json");
    let assigned_json: String = row.get("assigned_json");
    let embedding: Option<Vec<u8>> = row.get("embedding");
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");
    let is_chunk: i64 = row.get("is_chunk");

    Document {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        title: row.get("title"),
        content: row.get("content"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        assigned_to: serde_json::from_str::<Vec<Assignee>>(&assigned_json).unwrap_or_default(),
        version: row.get("version"),
        created_at: ts_to_datetime(created_at),
        updated_at: ts_to_datetime(updated_at),
        embedding: embedding.as_deref().map(blob_to_vec),
        is_chunk: is_chunk != 0,
        parent_id: row.get("parent_id"),
        chunk_index: row.get("chunk_index"),
        chunk_count: row.get("chunk_count"),
    }
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::UNIX_EPOCH)
}
