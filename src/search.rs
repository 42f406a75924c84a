//! Hybrid multi-tier retrieval engine.
//!
//! Ranks a tenant's documents against a query with three escalating
//! strategies, each running only while the result budget is unfilled:
//!
//! 1. **Exact-title** — case-insensitive match of the full query or any
//!    query keyword against the title. Fixed score 1.0.
//! 2. **Tag** — tags intersecting the query keywords. Fixed score 0.8.
//! 3. **Vector** — cosine similarity between the query embedding and
//!    non-chunk document embeddings, scaled by 0.6 to keep semantic
//!    matches subordinate to literal ones.
//!
//! Literal matches are cheap and high-precision; the vector tier recovers
//! semantic matches the literal tiers miss but is noisier, hence the
//! discount. A tier that fails (store or provider) is skipped with a
//! warning rather than failing the whole search.
//!
//! Post-processing deduplicates by normalized title, drops results that
//! share no keyword with the query, sorts by score, and truncates.

use chrono::{DateTime, Utc};

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{AdvancedSearchOptions, Document, SearchResult, SearchTier};
use crate::store::DocumentStore;

const EXACT_TITLE_SCORE: f64 = 1.0;
const TAG_SCORE: f64 = 0.8;
const VECTOR_SCALE: f64 = 0.6;
const VECTOR_CANDIDATE_MULTIPLIER: usize = 3;

/// Keywords used for literal matching: lowercased words longer than two
/// characters.
pub fn query_keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

fn role_allows(doc: &Document, user_id: &str, role: &str) -> bool {
    role == "admin" || doc.assigned_to.iter().any(|a| a.email == user_id)
}

fn to_result(doc: &Document, score: f64, tier: SearchTier) -> SearchResult {
    SearchResult {
        id: doc.id.clone(),
        title: doc.title.clone(),
        content: doc.content.clone(),
        tags: doc.tags.clone(),
        relevance_score: score,
        tier,
        created_at: doc.created_at,
    }
}

/// Run the tiered search for a tenant, scoped to what `user_id`/`role`
/// may see, returning at most `limit` post-processed results.
pub async fn search_documents(
    store: &DocumentStore,
    embedder: &Embedder,
    query: &str,
    tenant_id: &str,
    user_id: &str,
    role: &str,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Err(Error::validation("query must not be empty"));
    }
    if tenant_id.trim().is_empty() {
        return Err(Error::validation("tenant id must not be empty"));
    }

    let keywords = query_keywords(query);
    let mut results: Vec<SearchResult> = Vec::new();

    match exact_title_tier(store, query, &keywords, tenant_id, user_id, role, limit).await {
        Ok(mut tier) => results.append(&mut tier),
        Err(e) => tracing::warn!(error = %e, "exact-title tier failed, skipping"),
    }

    if results.len() < limit {
        let remaining = limit - results.len();
        match tag_tier(store, &keywords, tenant_id, user_id, role, remaining).await {
            Ok(mut tier) => results.append(&mut tier),
            Err(e) => tracing::warn!(error = %e, "tag tier failed, skipping"),
        }
    }

    if results.len() < limit {
        let remaining = limit - results.len();
        match vector_tier(store, embedder, query, tenant_id, user_id, role, limit, remaining).await
        {
            Ok(mut tier) => results.append(&mut tier),
            Err(e) => tracing::warn!(error = %e, "vector tier failed, skipping"),
        }
    }

    let final_results = postprocess(results, &keywords, limit);
    tracing::debug!(
        query,
        tenant = tenant_id,
        count = final_results.len(),
        "search complete"
    );
    Ok(final_results)
}

async fn exact_title_tier(
    store: &DocumentStore,
    query: &str,
    keywords: &[String],
    tenant_id: &str,
    user_id: &str,
    role: &str,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let full_query = query.to_lowercase();
    let docs = store.list_documents(tenant_id, false).await?;

    Ok(docs
        .iter()
        .filter(|d| role_allows(d, user_id, role))
        .filter(|d| {
            let title = d.title.to_lowercase();
            title.contains(&full_query) || keywords.iter().any(|w| title.contains(w))
        })
        .take(limit)
        .map(|d| to_result(d, EXACT_TITLE_SCORE, SearchTier::ExactTitle))
        .collect())
}

async fn tag_tier(
    store: &DocumentStore,
    keywords: &[String],
    tenant_id: &str,
    user_id: &str,
    role: &str,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let docs = store.list_documents(tenant_id, false).await?;

    Ok(docs
        .iter()
        .filter(|d| role_allows(d, user_id, role))
        .filter(|d| {
            d.tags
                .iter()
                .any(|t| keywords.contains(&t.to_lowercase()))
        })
        .take(limit)
        .map(|d| to_result(d, TAG_SCORE, SearchTier::TagMatch))
        .collect())
}

#[allow(clippy::too_many_arguments)]
async fn vector_tier(
    store: &DocumentStore,
    embedder: &Embedder,
    query: &str,
    tenant_id: &str,
    user_id: &str,
    role: &str,
    limit: usize,
    remaining: usize,
) -> Result<Vec<SearchResult>> {
    let query_vector = embedder.embed(query).await?;
    let candidates = store
        .vector_search(
            tenant_id,
            &query_vector,
            false,
            limit * VECTOR_CANDIDATE_MULTIPLIER,
        )
        .await?;

    Ok(candidates
        .iter()
        .filter(|(d, _)| role_allows(d, user_id, role))
        .take(remaining)
        .map(|(d, similarity)| to_result(d, similarity * VECTOR_SCALE, SearchTier::Vector))
        .collect())
}

/// Deduplicate by normalized title (first occurrence wins, so the highest
/// priority tier is kept), apply the keyword relevance gate, sort by score
/// descending, and truncate.
fn postprocess(
    results: Vec<SearchResult>,
    keywords: &[String],
    limit: usize,
) -> Vec<SearchResult> {
    let mut seen_titles = std::collections::HashSet::new();
    let mut unique: Vec<SearchResult> = Vec::new();

    for result in results {
        let normalized = result.title.to_lowercase().trim().to_string();
        if seen_titles.insert(normalized) {
            unique.push(result);
        }
    }

    let mut filtered: Vec<SearchResult> = unique
        .into_iter()
        .filter(|r| {
            let title = r.title.to_lowercase();
            let content = r.content.to_lowercase();
            let has_keyword = keywords
                .iter()
                .any(|w| title.contains(w) || content.contains(w));
            let has_title_match = keywords.iter().any(|w| title.contains(w));
            has_keyword && (has_title_match || r.relevance_score > 0.5)
        })
        .collect();

    filtered.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    filtered.truncate(limit);
    filtered
}

/// Broader literal fallback used when the tiered search returns nothing:
/// match the first query word against titles and content, or any keyword
/// against tags.
pub async fn fallback_literal_search(
    store: &DocumentStore,
    query: &str,
    tenant_id: &str,
    limit: usize,
) -> Result<Vec<Document>> {
    let first_word = match query.split_whitespace().next() {
        Some(w) => w.to_lowercase(),
        None => return Ok(Vec::new()),
    };
    let keywords = query_keywords(query);

    let docs = store.list_documents(tenant_id, false).await?;
    Ok(docs
        .into_iter()
        .filter(|d| {
            d.title.to_lowercase().contains(&first_word)
                || d.content.to_lowercase().contains(&first_word)
                || d.tags.iter().any(|t| keywords.contains(&t.to_lowercase()))
        })
        .take(limit)
        .collect())
}

// ============ Advanced search ============

/// Vector search with caller-supplied filters and composite re-ranking.
/// Unlike the tiered search this can surface chunks (`include_chunks`)
/// and enforces a minimum raw similarity.
pub async fn advanced_search(
    store: &DocumentStore,
    embedder: &Embedder,
    query: &str,
    tenant_id: &str,
    user_id: &str,
    role: &str,
    options: &AdvancedSearchOptions,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Err(Error::validation("query must not be empty"));
    }
    if tenant_id.trim().is_empty() {
        return Err(Error::validation("tenant id must not be empty"));
    }

    let keywords = query_keywords(query);
    let query_vector = embedder.embed(query).await?;
    let now = Utc::now();

    let candidates = store
        .vector_search(
            tenant_id,
            &query_vector,
            options.include_chunks,
            options.limit * VECTOR_CANDIDATE_MULTIPLIER,
        )
        .await?;

    let mut scored: Vec<(SearchResult, f64)> = candidates
        .into_iter()
        .filter(|(d, score)| *score >= options.min_score && role_allows(d, user_id, role))
        .filter(|(d, _)| {
            options.tags.is_empty() || d.tags.iter().any(|t| options.tags.contains(t))
        })
        .filter(|(d, _)| match &options.date_range {
            Some(range) => d.created_at >= range.start && d.created_at <= range.end,
            None => true,
        })
        .map(|(d, score)| {
            let composite = composite_score(&d, &keywords, score, now);
            let mut result = to_result(&d, score, SearchTier::Vector);
            result.title = strip_part_suffix(&result.title);
            (result, composite)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(options.limit);
    Ok(scored.into_iter().map(|(r, _)| r).collect())
}

/// Boost the raw similarity with literal signals: +15% per query keyword
/// found in the title, +10% per matching tag, +10% for documents created
/// within the last 30 days.
fn composite_score(
    doc: &Document,
    keywords: &[String],
    raw_score: f64,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = raw_score;

    let title = doc.title.to_lowercase();
    let title_words: Vec<&str> = title.split_whitespace().collect();
    let title_matches = keywords
        .iter()
        .filter(|w| title_words.iter().any(|tw| tw.contains(w.as_str())))
        .count();
    if title_matches > 0 {
        score *= 1.0 + title_matches as f64 * 0.15;
    }

    let tag_matches = doc
        .tags
        .iter()
        .filter(|t| {
            let tag = t.to_lowercase();
            keywords.iter().any(|w| tag.contains(w.as_str()))
        })
        .count();
    if tag_matches > 0 {
        score *= 1.0 + tag_matches as f64 * 0.1;
    }

    let age_days = (now - doc.created_at).num_days();
    if (0..30).contains(&age_days) {
        score *= 1.1;
    }

    score
}

/// Remove the ` (Part i/N)` suffix chunk titles carry.
fn strip_part_suffix(title: &str) -> String {
    static PART_SUFFIX: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r" \(Part \d+/\d+\)$").expect("part suffix pattern")
    });
    PART_SUFFIX.replace(title, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Assignee;

    fn make_result(id: &str, title: &str, content: &str, score: f64, tier: SearchTier) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            tags: Vec::new(),
            relevance_score: score,
            tier,
            created_at: Utc::now(),
        }
    }

    fn make_doc(title: &str, tags: &[&str]) -> Document {
        Document {
            id: "d1".to_string(),
            tenant_id: "t1".to_string(),
            title: title.to_string(),
            content: "body".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            assigned_to: Vec::new(),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            embedding: None,
            is_chunk: false,
            parent_id: None,
            chunk_index: None,
            chunk_count: None,
        }
    }

    #[test]
    fn test_query_keywords_drops_short_words() {
        let words = query_keywords("How do I do an onboarding");
        assert_eq!(words, vec!["how", "onboarding"]);
    }

    #[test]
    fn test_postprocess_dedup_keeps_first() {
        let results = vec![
            make_result("a", "Onboarding Guide", "x", 1.0, SearchTier::ExactTitle),
            make_result("b", "onboarding guide", "x", 0.6, SearchTier::Vector),
        ];
        let out = postprocess(results, &["onboarding".to_string()], 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "a");
        assert_eq!(out[0].tier, SearchTier::ExactTitle);
    }

    #[test]
    fn test_postprocess_drops_keywordless_results() {
        // A vector candidate that shares no keyword with the query must
        // not survive, whatever its similarity.
        let results = vec![make_result(
            "a",
            "Quarterly Budget",
            "spreadsheet territory",
            0.59,
            SearchTier::Vector,
        )];
        let out = postprocess(results, &["onboarding".to_string()], 5);
        assert!(out.is_empty());
    }

    #[test]
    fn test_postprocess_requires_title_match_or_high_score() {
        // Keyword only in the content, score at the 0.5 boundary: dropped.
        let low = vec![make_result(
            "a",
            "Misc Notes",
            "mentions onboarding in passing",
            0.5,
            SearchTier::Vector,
        )];
        assert!(postprocess(low, &["onboarding".to_string()], 5).is_empty());

        // Same result above the boundary: kept.
        let high = vec![make_result(
            "a",
            "Misc Notes",
            "mentions onboarding in passing",
            0.51,
            SearchTier::Vector,
        )];
        assert_eq!(postprocess(high, &["onboarding".to_string()], 5).len(), 1);
    }

    #[test]
    fn test_postprocess_sorts_and_truncates() {
        let results = vec![
            make_result("a", "Tagged onboarding doc", "x", 0.8, SearchTier::TagMatch),
            make_result("b", "Onboarding Process", "x", 1.0, SearchTier::ExactTitle),
            make_result("c", "Another onboarding note", "x", 0.55, SearchTier::Vector),
        ];
        let out = postprocess(results, &["onboarding".to_string()], 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "b");
        assert_eq!(out[1].id, "a");
    }

    #[test]
    fn test_role_allows_admin_sees_everything() {
        let doc = make_doc("Payroll", &[]);
        assert!(role_allows(&doc, "nobody@example.com", "admin"));
        assert!(!role_allows(&doc, "nobody@example.com", "viewer"));
    }

    #[test]
    fn test_role_allows_assigned_user() {
        let mut doc = make_doc("Payroll", &[]);
        doc.assigned_to.push(Assignee {
            email: "ana@example.com".to_string(),
            role: "editor".to_string(),
        });
        assert!(role_allows(&doc, "ana@example.com", "editor"));
        assert!(!role_allows(&doc, "bob@example.com", "editor"));
    }

    #[test]
    fn test_composite_score_title_and_tag_bonus() {
        let now = Utc::now();
        let doc = make_doc("Customer Onboarding Process", &["onboarding"]);
        let keywords = vec!["onboarding".to_string()];
        let score = composite_score(&doc, &keywords, 1.0, now);
        // One title match (+15%), one tag match (+10%), recent (+10%).
        assert!((score - 1.0 * 1.15 * 1.1 * 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_composite_score_old_document_no_recency_bonus() {
        let now = Utc::now();
        let mut doc = make_doc("Customer Onboarding Process", &[]);
        doc.created_at = now - chrono::Duration::days(90);
        let keywords: Vec<String> = Vec::new();
        let score = composite_score(&doc, &keywords, 0.9, now);
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_strip_part_suffix() {
        assert_eq!(
            strip_part_suffix("Employee Handbook (Part 3/7)"),
            "Employee Handbook"
        );
        assert_eq!(strip_part_suffix("Employee Handbook"), "Employee Handbook");
    }
}
