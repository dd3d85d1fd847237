use crate::errors::Result;
use crate::policy::SafetyPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default name of the variable analysis code must assign
pub const DEFAULT_OUTPUT_VARIABLE: &str = "result";

/// Prefix for environment overrides (`SHEETSAFE_MAX_LINES`, ...)
pub const ENV_PREFIX: &str = "SHEETSAFE_";

/// Static analyzer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Maximum number of non-blank lines accepted
    pub max_lines: usize,
    /// Variable the code must assign its answer to
    pub output_variable: String,
    /// Deny-lists and builtin allow-list
    pub policy: SafetyPolicy,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_lines: 50,
            output_variable: DEFAULT_OUTPUT_VARIABLE.to_string(),
            policy: SafetyPolicy::default(),
        }
    }
}

/// Sandbox executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum rows kept when serializing tabular output
    pub max_rows: usize,
    /// Name the dataset is bound to in the namespace
    pub dataset_variable: String,
    /// Upper bound on loop and comprehension iterations
    pub max_loop_iterations: u64,
    /// Upper bound on materialized list/string/range lengths
    pub max_collection_len: usize,
    /// Maximum lambda nesting depth
    pub max_call_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            dataset_variable: "df".to_string(),
            max_loop_iterations: 1_000_000,
            max_collection_len: 1_000_000,
            max_call_depth: 200,
        }
    }
}

/// Result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultCacheConfig {
    /// Entry time-to-live
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Maximum number of cached analyses
    pub max_entries: usize,
    /// Default Jaccard threshold for similarity search
    pub similarity_threshold: f64,
    /// Maximum similar questions returned
    pub similar_top_n: usize,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 1000,
            similarity_threshold: 0.8,
            similar_top_n: 5,
        }
    }
}

/// Sheet cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetCacheConfig {
    /// Entry time-to-live
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Total byte budget in megabytes
    pub max_size_mb: f64,
}

impl Default for SheetCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(1800),
            max_size_mb: 512.0,
        }
    }
}

impl SheetCacheConfig {
    /// Byte budget
    pub fn max_size_bytes(&self) -> usize {
        (self.max_size_mb * 1024.0 * 1024.0) as usize
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analyzer: AnalyzerConfig,
    pub executor: ExecutorConfig,
    pub result_cache: ResultCacheConfig,
    pub sheet_cache: SheetCacheConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply `SHEETSAFE_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from an arbitrary lookup (keys without prefix)
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var::<usize, _>(&lookup, "MAX_LINES") {
            self.analyzer.max_lines = v;
        }
        if let Some(v) = lookup("OUTPUT_VARIABLE").filter(|v| !v.trim().is_empty()) {
            self.analyzer.output_variable = v.trim().to_string();
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "MAX_ROWS") {
            self.executor.max_rows = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "MAX_LOOP_ITERATIONS") {
            self.executor.max_loop_iterations = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "RESULT_CACHE_TTL_SECS") {
            self.result_cache.ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "RESULT_CACHE_MAX_ENTRIES") {
            self.result_cache.max_entries = v;
        }
        if let Some(v) = parse_var::<f64, _>(&lookup, "SIMILARITY_THRESHOLD") {
            self.result_cache.similarity_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "SHEET_CACHE_TTL_SECS") {
            self.sheet_cache.ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<f64, _>(&lookup, "SHEET_CACHE_MAX_MB") {
            self.sheet_cache.max_size_mb = v.max(0.0);
        }
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}{}: {:?}", ENV_PREFIX, key, raw);
            None
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.analyzer.max_lines, 50);
        assert_eq!(config.analyzer.output_variable, "result");
        assert_eq!(config.executor.max_rows, 10_000);
        assert_eq!(config.result_cache.similar_top_n, 5);
        assert_eq!(config.sheet_cache.max_size_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"analyzer": {"max_lines": 10}, "result_cache": {"ttl": 2.5}}"#,
        )
        .unwrap();
        assert_eq!(config.analyzer.max_lines, 10);
        assert_eq!(config.analyzer.output_variable, "result");
        assert_eq!(config.result_cache.ttl, Duration::from_millis(2500));
        assert_eq!(config.result_cache.max_entries, 1000);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let parsed = serde_json::from_str::<EngineConfig>(r#"{"sheet_cache": {"ttl": -1}}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MAX_LINES", "20"),
            ("OUTPUT_VARIABLE", "answer"),
            ("RESULT_CACHE_TTL_SECS", "60"),
            ("SIMILARITY_THRESHOLD", "1.7"),
            ("SHEET_CACHE_MAX_MB", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config =
            EngineConfig::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.analyzer.max_lines, 20);
        assert_eq!(config.analyzer.output_variable, "answer");
        assert_eq!(config.result_cache.ttl, Duration::from_secs(60));
        assert_eq!(config.result_cache.similarity_threshold, 1.0);
        assert_eq!(config.sheet_cache.max_size_mb, 512.0);
    }
}
