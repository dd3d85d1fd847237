//! Result Cache & Metrics
//!
//! Finished analyses keyed by a fingerprint of (question, document, sheet),
//! plus process-wide query metrics. Expiry is lazy: stale entries are
//! dropped when looked up, when `put` runs, or on an explicit
//! [`ResultCache::purge_expired`].

use crate::config::ResultCacheConfig;
use crate::executor::ResultValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

/// Analytical verbs tracked in the pattern histogram
pub const PATTERN_VOCABULARY: &[&str] = &[
    "average",
    "mean",
    "sum",
    "total",
    "count",
    "group",
    "filter",
    "top",
    "bottom",
    "max",
    "maximum",
    "min",
    "minimum",
    "unique",
    "distinct",
    "sort",
    "trend",
    "compare",
    "percentage",
    "median",
    "correlation",
];

const TOP_PATTERNS: usize = 10;

/// Cached answer to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    pub question: String,
    pub document_id: String,
    pub sheet_name: Option<String>,
    pub code: String,
    pub explanation: String,
    pub result: ResultValue,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    payload: CachedAnalysis,
    created_at: Instant,
    hit_count: u64,
    seq: u64,
}

/// Near-duplicate of a question that is already cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarQuery {
    pub fingerprint: String,
    pub question: String,
    pub similarity: f64,
    pub hit_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_execution_time_ms: f64,
    pub query_patterns: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub metrics: QueryMetrics,
    pub hit_rate_pct: f64,
    pub cache_entries: usize,
    pub cache_capacity: usize,
    pub top_patterns: Vec<(String, u64)>,
}

/// Stable key for a (question, document, sheet) triple.
///
/// The question is trimmed and lower-cased, then the three fields are
/// serialized with sorted keys and hashed with SHA-256.
pub fn fingerprint(question: &str, document_id: &str, sheet_name: Option<&str>) -> String {
    let mut canonical = BTreeMap::new();
    canonical.insert("document_id", serde_json::Value::from(document_id));
    canonical.insert(
        "question",
        serde_json::Value::from(question.trim().to_lowercase()),
    );
    canonical.insert(
        "sheet_name",
        sheet_name.map_or(serde_json::Value::Null, serde_json::Value::from),
    );
    // BTreeMap<&str, Value> always serializes
    let encoded = serde_json::to_string(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

/// Lower-cased word set used for similarity and pattern extraction
pub fn word_set(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Vocabulary words found in a question, sorted and joined with `_`
pub fn query_pattern(question: &str) -> Option<String> {
    let matched: Vec<String> = word_set(question)
        .into_iter()
        .filter(|w| PATTERN_VOCABULARY.contains(&w.as_str()))
        .collect();
    if matched.is_empty() {
        return None;
    }
    Some(matched.join("_"))
}

/// Intersection over union; two empty sets are not similar
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[derive(Debug)]
pub struct ResultCache {
    config: ResultCacheConfig,
    entries: HashMap<String, Entry>,
    metrics: QueryMetrics,
    next_seq: u64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(ResultCacheConfig::default())
    }
}

impl ResultCache {
    pub fn new(config: ResultCacheConfig) -> Self {
        tracing::info!(
            "[RESULT_CACHE] Initialized (ttl {}s, capacity {})",
            config.ttl.as_secs(),
            config.max_entries
        );
        Self {
            config,
            entries: HashMap::new(),
            metrics: QueryMetrics::default(),
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &ResultCacheConfig {
        &self.config
    }

    pub fn fingerprint(&self, question: &str, document_id: &str, sheet_name: Option<&str>) -> String {
        fingerprint(question, document_id, sheet_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.duration_since(entry.created_at) > self.config.ttl
    }

    /// Look up a cached analysis, counting the hit or miss
    pub fn get(&mut self, key: &str) -> Option<CachedAnalysis> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            None => {
                self.metrics.cache_misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            self.entries.remove(key);
            self.metrics.cache_misses += 1;
            tracing::debug!("[RESULT_CACHE] Entry {} expired", short(key));
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.hit_count += 1;
        self.metrics.cache_hits += 1;
        tracing::debug!(
            "[RESULT_CACHE] Hit {} ({} hits)",
            short(key),
            entry.hit_count
        );
        Some(entry.payload.clone())
    }

    /// Store an analysis, evicting the least used entry when full
    pub fn put(&mut self, key: &str, payload: CachedAnalysis) {
        if self.config.max_entries == 0 {
            return;
        }
        self.purge_expired();
        if !self.entries.contains_key(key) && self.entries.len() >= self.config.max_entries {
            self.evict_one();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.to_string(),
            Entry {
                payload,
                created_at: Instant::now(),
                hit_count: 0,
                seq,
            },
        );
        tracing::debug!(
            "[RESULT_CACHE] Stored {} ({} entries)",
            short(key),
            self.entries.len()
        );
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.hit_count, e.seq))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            tracing::info!("[RESULT_CACHE] Evicted {}", short(&key));
        }
    }

    /// Drop every expired entry
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.duration_since(e.created_at) <= ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!("[RESULT_CACHE] Purged {} expired entries", removed);
        }
        removed
    }

    /// Cached questions on the same document and sheet that resemble `question`
    pub fn similar(
        &self,
        question: &str,
        document_id: &str,
        sheet_name: Option<&str>,
        threshold: f64,
    ) -> Vec<SimilarQuery> {
        let now = Instant::now();
        let words = word_set(question);
        let mut found: Vec<SimilarQuery> = self
            .entries
            .iter()
            .filter(|(_, e)| !self.is_expired(e, now))
            .filter(|(_, e)| {
                e.payload.document_id == document_id
                    && e.payload.sheet_name.as_deref() == sheet_name
            })
            .filter_map(|(key, e)| {
                let similarity = jaccard(&words, &word_set(&e.payload.question));
                (similarity >= threshold).then(|| SimilarQuery {
                    fingerprint: key.clone(),
                    question: e.payload.question.clone(),
                    similarity,
                    hit_count: e.hit_count,
                })
            })
            .collect();
        found.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(b.hit_count.cmp(&a.hit_count))
                .then_with(|| a.question.cmp(&b.question))
        });
        found.truncate(self.config.similar_top_n);
        found
    }

    /// Account for a finished execution, whether or not it came from the cache
    pub fn record_execution(&mut self, question: &str, time_ms: u64, success: bool) {
        let m = &mut self.metrics;
        m.total_queries += 1;
        let n = m.total_queries as f64;
        m.avg_execution_time_ms = (m.avg_execution_time_ms * (n - 1.0) + time_ms as f64) / n;
        if success {
            if let Some(pattern) = query_pattern(question) {
                *m.query_patterns.entry(pattern).or_insert(0) += 1;
            }
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let m = &self.metrics;
        let lookups = m.cache_hits + m.cache_misses;
        let hit_rate_pct = if lookups == 0 {
            0.0
        } else {
            m.cache_hits as f64 * 100.0 / lookups as f64
        };
        let mut top_patterns: Vec<(String, u64)> = m
            .query_patterns
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        top_patterns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_patterns.truncate(TOP_PATTERNS);
        MetricsSnapshot {
            metrics: m.clone(),
            hit_rate_pct,
            cache_entries: self.entries.len(),
            cache_capacity: self.config.max_entries,
            top_patterns,
        }
    }

    /// Remove every entry computed from `document_id`
    pub fn invalidate(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.payload.document_id != document_id);
        let removed = before - self.entries.len();
        tracing::info!(
            "[RESULT_CACHE] Invalidated {} entries for document {}",
            removed,
            document_id
        );
        removed
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        tracing::info!("[RESULT_CACHE] Cleared {} entries", removed);
        removed
    }
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn analysis(question: &str, document_id: &str) -> CachedAnalysis {
        CachedAnalysis {
            question: question.to_string(),
            document_id: document_id.to_string(),
            sheet_name: Some("Sheet1".to_string()),
            code: "result = 1".to_string(),
            explanation: String::new(),
            result: ResultValue::Null,
            execution_time_ms: 3,
        }
    }

    fn cache_with(max_entries: usize, ttl: Duration) -> ResultCache {
        ResultCache::new(ResultCacheConfig {
            ttl,
            max_entries,
            ..ResultCacheConfig::default()
        })
    }

    fn store(cache: &mut ResultCache, question: &str, document_id: &str) -> String {
        let key = fingerprint(question, document_id, Some("Sheet1"));
        cache.put(&key, analysis(question, document_id));
        key
    }

    #[test]
    fn test_fingerprint_normalizes_question() {
        let a = fingerprint("What is the total?", "doc", Some("Sheet1"));
        let b = fingerprint("  what IS the TOTAL?\n", "doc", Some("Sheet1"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, fingerprint("What is the total?", "doc2", Some("Sheet1")));
        assert_ne!(a, fingerprint("What is the total?", "doc", None));
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let mut cache = ResultCache::default();
        assert!(cache.get("missing").is_none());
        let key = store(&mut cache, "total sales", "doc");
        assert_eq!(cache.get(&key).unwrap().question, "total sales");
        cache.get(&key);
        let snapshot = cache.metrics();
        assert_eq!(snapshot.metrics.cache_hits, 2);
        assert_eq!(snapshot.metrics.cache_misses, 1);
        assert!((snapshot.hit_rate_pct - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_expired_entries_are_dropped_on_lookup() {
        let mut cache = cache_with(10, Duration::from_millis(20));
        let key = store(&mut cache, "total sales", "doc");
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_purges_expired_before_evicting() {
        let mut cache = cache_with(2, Duration::from_millis(20));
        store(&mut cache, "a", "doc");
        store(&mut cache, "b", "doc");
        std::thread::sleep(Duration::from_millis(40));
        store(&mut cache, "c", "doc");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_eviction_prefers_lowest_hits_then_oldest() {
        let mut cache = cache_with(3, Duration::from_secs(60));
        let first = store(&mut cache, "first", "doc");
        let second = store(&mut cache, "second", "doc");
        let third = store(&mut cache, "third", "doc");
        cache.get(&first);

        let fourth = store(&mut cache, "fourth", "doc");
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&second).is_none());
        assert!(cache.get(&first).is_some());
        assert!(cache.get(&third).is_some());
        assert!(cache.get(&fourth).is_some());
    }

    #[test]
    fn test_replacing_a_key_does_not_evict() {
        let mut cache = cache_with(2, Duration::from_secs(60));
        let a = store(&mut cache, "a", "doc");
        store(&mut cache, "b", "doc");
        store(&mut cache, "a", "doc");
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_some());
    }

    #[test]
    fn test_similar_ranks_by_jaccard() {
        let mut cache = ResultCache::default();
        store(&mut cache, "total sales by region", "doc");
        store(&mut cache, "total sales by product", "doc");
        store(&mut cache, "average price", "doc");
        store(&mut cache, "total sales by region", "other");

        let found = cache.similar("Total sales by region?", "doc", Some("Sheet1"), 0.5);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].question, "total sales by region");
        assert_eq!(found[0].similarity, 1.0);
        assert!((found[1].similarity - 0.6).abs() < 1e-9);

        assert!(cache.similar("total sales", "doc", Some("Other"), 0.0).is_empty());
    }

    #[test]
    fn test_similar_threshold_is_inclusive() {
        let mut cache = ResultCache::default();
        store(&mut cache, "max sales", "doc");
        let found = cache.similar("max price", "doc", Some("Sheet1"), 1.0 / 3.0);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_query_pattern_joins_sorted_vocabulary() {
        assert_eq!(query_pattern("Total sales by GROUP").as_deref(), Some("group_total"));
        assert_eq!(query_pattern("average sales by group").as_deref(), Some("average_group"));
        assert_eq!(query_pattern("show me the rows"), None);
    }

    #[test]
    fn test_record_execution_updates_mean_and_patterns() {
        let mut cache = ResultCache::default();
        cache.record_execution("What is the average sales by group?", 10, true);
        cache.record_execution("Sum of the total", 20, true);
        cache.record_execution("average failure", 60, false);
        cache.record_execution("hello there", 30, true);

        let snapshot = cache.metrics();
        assert_eq!(snapshot.metrics.total_queries, 4);
        assert!((snapshot.metrics.avg_execution_time_ms - 30.0).abs() < 1e-9);
        assert_eq!(snapshot.metrics.query_patterns["average_group"], 1);
        assert_eq!(snapshot.metrics.query_patterns["sum_total"], 1);
        assert_eq!(snapshot.metrics.query_patterns.len(), 2);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache = ResultCache::default();
        store(&mut cache, "a", "doc1");
        store(&mut cache, "b", "doc1");
        store(&mut cache, "c", "doc2");
        assert_eq!(cache.invalidate("doc1"), 2);
        assert_eq!(cache.invalidate("doc1"), 0);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let cache = ResultCache::default();
        let json = serde_json::to_value(cache.metrics()).unwrap();
        assert_eq!(json["total_queries"], 0);
        assert_eq!(json["cache_capacity"], 1000);
    }
}
