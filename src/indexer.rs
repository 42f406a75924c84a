//! Document indexing pipeline.
//!
//! Persists a document together with its embedding(s), transparently
//! chunking oversized content: strip markup, chunk at a fixed threshold,
//! then either upsert a single embedded document or replace the parent's
//! chunk set. The delete/upsert/insert sequence is not atomic — embedding
//! calls interleave with the writes, so a crash mid-update can leave stale
//! or missing chunks for the parent.

use chrono::Utc;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::markup::strip_markup;
use crate::models::{Document, NewDocument};
use crate::store::DocumentStore;

/// Index a document, returning the persisted parent (or standalone)
/// document with its assigned id.
pub async fn index_document(
    store: &DocumentStore,
    embedder: &Embedder,
    config: &ChunkingConfig,
    input: NewDocument,
) -> Result<Document> {
    let plain = strip_markup(&input.content);
    let chunks = chunk_text(&plain, config.max_chunk_size, config.min_fragment_len);

    let is_update = input.id.is_some();
    let doc_id = input
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = Utc::now();

    if chunks.len() <= 1 {
        // Small document: embed the full original content and store it
        // directly as a standalone embeddable unit.
        let embedding = embedder.embed(&input.content).await?;

        // An update may shrink a previously chunked document below the
        // threshold; its old chunks must not linger.
        if is_update {
            store.delete_chunks(&doc_id).await?;
        }

        let doc = Document {
            id: doc_id,
            tenant_id: input.tenant_id,
            title: input.title,
            content: input.content,
            tags: input.tags,
            assigned_to: input.assigned_to,
            version: 1,
            created_at: now,
            updated_at: now,
            embedding: Some(embedding),
            is_chunk: false,
            parent_id: None,
            chunk_index: None,
            chunk_count: None,
        };
        store.upsert_document(&doc).await?;
        tracing::debug!(id = %doc.id, title = %doc.title, "indexed single document");
        return Ok(doc);
    }

    tracing::info!(
        title = %input.title,
        parts = chunks.len(),
        "chunking document"
    );

    store.delete_chunks(&doc_id).await?;

    // Parent carries metadata only; its searchable text lives in the chunks.
    let parent = Document {
        id: doc_id.clone(),
        tenant_id: input.tenant_id.clone(),
        title: input.title.clone(),
        content: input.content.clone(),
        tags: input.tags.clone(),
        assigned_to: input.assigned_to.clone(),
        version: 1,
        created_at: now,
        updated_at: now,
        embedding: None,
        is_chunk: false,
        parent_id: None,
        chunk_index: None,
        chunk_count: Some(chunks.len() as i64),
    };
    store.upsert_document(&parent).await?;

    let total = chunks.len();
    for (i, chunk) in chunks.into_iter().enumerate() {
        let embedding = embedder.embed(&chunk).await?;
        let chunk_doc = Document {
            id: Uuid::new_v4().to_string(),
            tenant_id: parent.tenant_id.clone(),
            title: format!("{} (Part {}/{})", parent.title, i + 1, total),
            content: chunk,
            tags: parent.tags.clone(),
            assigned_to: parent.assigned_to.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
            embedding: Some(embedding),
            is_chunk: true,
            parent_id: Some(doc_id.clone()),
            chunk_index: Some(i as i64),
            chunk_count: None,
        };
        store.insert_chunk(&chunk_doc).await?;
    }

    Ok(parent)
}
