//! Analysis engine
//!
//! Answers a question about one sheet: load the sheet through the
//! [`SheetCache`], look for a cached answer, ask a [`CodeGenerator`] for a
//! snippet, validate and run it with the [`SandboxExecutor`], then store
//! successful answers in the [`ResultCache`]. Failures at any stage come
//! back inside the response rather than as an `Err`.

use crate::analyzer::{SafetyAnalyzer, SafetyReport};
use crate::config::EngineConfig;
use crate::errors::Result;
use crate::executor::{ExecutionOutcome, SandboxExecutor};
use crate::result_cache::{CachedAnalysis, MetricsSnapshot, ResultCache, SimilarQuery};
use crate::sheet_cache::{SheetCache, SheetLoader, WorkbookLoader};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A question about one sheet of one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub question: String,
    pub document_id: String,
    pub file_path: String,
    #[serde(default)]
    pub sheet_name: Option<String>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

fn default_true() -> bool {
    true
}

/// What a code generator is told about the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub question: String,
    pub columns: Vec<String>,
    pub dtypes: IndexMap<String, String>,
    pub row_count: usize,
    pub output_variable: String,
    pub dataset_variable: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub code: String,
    #[serde(default)]
    pub explanation: String,
}

/// Produces candidate analysis code for a question
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCode>;
}

/// Generator that returns code the caller already has
#[derive(Debug, Clone)]
pub struct SuppliedCode {
    pub code: String,
    pub explanation: String,
}

impl SuppliedCode {
    pub fn new(code: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            explanation: explanation.into(),
        }
    }
}

#[async_trait]
impl CodeGenerator for SuppliedCode {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedCode> {
        Ok(GeneratedCode {
            code: self.code.clone(),
            explanation: self.explanation.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub fingerprint: String,
    pub from_cache: bool,
    pub code: String,
    pub explanation: String,
    pub outcome: ExecutionOutcome,
}

/// Ties the analyzer, executor and both caches together
#[derive(Debug)]
pub struct AnalysisEngine {
    config: EngineConfig,
    analyzer: SafetyAnalyzer,
    executor: SandboxExecutor,
    result_cache: ResultCache,
    sheet_cache: SheetCache,
}

impl Default for AnalysisEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default(), Box::new(WorkbookLoader))
    }
}

impl AnalysisEngine {
    pub fn new(config: EngineConfig, loader: Box<dyn SheetLoader>) -> Self {
        tracing::info!(
            "[ENGINE] Starting (max {} lines, output variable '{}')",
            config.analyzer.max_lines,
            config.analyzer.output_variable
        );
        Self {
            analyzer: SafetyAnalyzer::new(config.analyzer.clone()),
            executor: SandboxExecutor::new(config.analyzer.clone(), config.executor.clone()),
            result_cache: ResultCache::new(config.result_cache.clone()),
            sheet_cache: SheetCache::new(config.sheet_cache.clone(), loader),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &SafetyAnalyzer {
        &self.analyzer
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.result_cache
    }

    pub fn result_cache_mut(&mut self) -> &mut ResultCache {
        &mut self.result_cache
    }

    pub fn sheet_cache(&self) -> &SheetCache {
        &self.sheet_cache
    }

    pub fn sheet_cache_mut(&mut self) -> &mut SheetCache {
        &mut self.sheet_cache
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.result_cache.metrics()
    }

    pub fn validate(&self, code: &str) -> SafetyReport {
        self.analyzer.safety_report(code)
    }

    pub fn similar(
        &self,
        question: &str,
        document_id: &str,
        sheet_name: Option<&str>,
        threshold: Option<f64>,
    ) -> Vec<SimilarQuery> {
        let threshold = threshold.unwrap_or(self.config.result_cache.similarity_threshold);
        self.result_cache
            .similar(question, document_id, sheet_name, threshold)
    }

    /// Run code directly against a sheet, bypassing the result cache
    pub fn run_code(&mut self, code: &str, file_path: &str, sheet_name: Option<&str>) -> ExecutionOutcome {
        let started = Instant::now();
        match self.sheet_cache.load(file_path, sheet_name.unwrap_or(""), true) {
            Ok(dataset) => self.executor.execute(code, &dataset, true),
            Err(err) => {
                tracing::warn!("[ENGINE] Could not load {}: {}", file_path, err);
                ExecutionOutcome::failure(err.to_string(), started.elapsed().as_millis() as u64)
            }
        }
    }

    /// Answer a question: cached result, or generate, validate and execute
    pub async fn answer(
        &mut self,
        request: &AnalysisRequest,
        generator: &dyn CodeGenerator,
    ) -> AnalysisResponse {
        let started = Instant::now();
        let sheet_name = request.sheet_name.as_deref();
        let fingerprint =
            self.result_cache
                .fingerprint(&request.question, &request.document_id, sheet_name);

        if request.use_cache {
            if let Some(cached) = self.result_cache.get(&fingerprint) {
                tracing::info!("[ENGINE] Served '{}' from cache", request.question);
                self.result_cache
                    .record_execution(&request.question, cached.execution_time_ms, true);
                return AnalysisResponse {
                    fingerprint,
                    from_cache: true,
                    code: cached.code,
                    explanation: cached.explanation,
                    outcome: ExecutionOutcome {
                        success: true,
                        result: cached.result,
                        error: None,
                        execution_time_ms: cached.execution_time_ms,
                        stdout: String::new(),
                        stderr: String::new(),
                    },
                };
            }
        }

        let failed = |fingerprint: String, error: String| AnalysisResponse {
            fingerprint,
            from_cache: false,
            code: String::new(),
            explanation: String::new(),
            outcome: ExecutionOutcome::failure(error, started.elapsed().as_millis() as u64),
        };

        let dataset = match self
            .sheet_cache
            .load(&request.file_path, sheet_name.unwrap_or(""), request.use_cache)
        {
            Ok(dataset) => dataset,
            Err(err) => {
                tracing::warn!("[ENGINE] Could not load {}: {}", request.file_path, err);
                let response = failed(fingerprint, err.to_string());
                self.result_cache.record_execution(
                    &request.question,
                    response.outcome.execution_time_ms,
                    false,
                );
                return response;
            }
        };

        let generation = GenerationRequest {
            question: request.question.clone(),
            columns: dataset.column_names(),
            dtypes: dataset
                .dtypes()
                .into_iter()
                .map(|(name, dtype)| (name, dtype.to_string()))
                .collect(),
            row_count: dataset.n_rows(),
            output_variable: self.analyzer.output_variable().to_string(),
            dataset_variable: self.executor.config().dataset_variable.clone(),
        };
        let generated = match generator.generate(&generation).await {
            Ok(generated) => generated,
            Err(err) => {
                tracing::error!("[ENGINE] Code generation failed: {}", err);
                let response = failed(fingerprint, err.to_string());
                self.result_cache.record_execution(
                    &request.question,
                    response.outcome.execution_time_ms,
                    false,
                );
                return response;
            }
        };

        let outcome = self.executor.execute(&generated.code, &dataset, true);
        self.result_cache.record_execution(
            &request.question,
            outcome.execution_time_ms,
            outcome.success,
        );
        if outcome.success && request.use_cache {
            self.result_cache.put(
                &fingerprint,
                CachedAnalysis {
                    question: request.question.clone(),
                    document_id: request.document_id.clone(),
                    sheet_name: request.sheet_name.clone(),
                    code: generated.code.clone(),
                    explanation: generated.explanation.clone(),
                    result: outcome.result.clone(),
                    execution_time_ms: outcome.execution_time_ms,
                },
            );
        }
        AnalysisResponse {
            fingerprint,
            from_cache: false,
            code: generated.code,
            explanation: generated.explanation,
            outcome,
        }
    }

    /// Forget cached results for a document and, if given, its parsed sheets
    pub fn invalidate_document(&mut self, document_id: &str, file_path: Option<&str>) -> usize {
        let removed = self.result_cache.invalidate(document_id);
        if let Some(path) = file_path {
            self.sheet_cache.invalidate_file(path);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SandboxError;
    use crate::executor::ResultValue;
    use crate::frame::{Cell, DataFrame};
    use std::path::Path;

    struct StaticLoader;

    impl SheetLoader for StaticLoader {
        fn load_sheet(&self, path: &Path, _sheet_name: &str) -> Result<DataFrame> {
            if path.to_str() == Some("missing.csv") {
                return Err(SandboxError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "missing.csv",
                )));
            }
            Ok(DataFrame::new(vec![
                ("Region".to_string(), vec!["West".into(), "East".into()]),
                ("Sales".to_string(), vec![Cell::Int(10), Cell::Int(32)]),
            ])
            .unwrap())
        }
    }

    struct Unavailable;

    #[async_trait]
    impl CodeGenerator for Unavailable {
        async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedCode> {
            Err(SandboxError::Generation("model offline".to_string()))
        }
    }

    fn engine() -> AnalysisEngine {
        AnalysisEngine::new(EngineConfig::default(), Box::new(StaticLoader))
    }

    fn request(question: &str) -> AnalysisRequest {
        AnalysisRequest {
            question: question.to_string(),
            document_id: "doc".to_string(),
            file_path: "sales.csv".to_string(),
            sheet_name: None,
            use_cache: true,
        }
    }

    #[test]
    fn test_answer_then_cache_hit() {
        let mut engine = engine();
        let generator = SuppliedCode::new("result = df['Sales'].sum()", "total");

        let first = tokio_test::block_on(engine.answer(&request("Total sales?"), &generator));
        assert!(!first.from_cache);
        assert!(first.outcome.success);
        assert_eq!(
            first.outcome.result,
            ResultValue::Scalar {
                value: serde_json::json!(42),
                dtype: "int64".to_string()
            }
        );

        let second = tokio_test::block_on(engine.answer(&request("  total SALES? "), &generator));
        assert!(second.from_cache);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(second.outcome.result, first.outcome.result);

        let metrics = engine.metrics();
        assert_eq!(metrics.metrics.total_queries, 2);
        assert_eq!(metrics.metrics.cache_hits, 1);
        assert_eq!(metrics.metrics.cache_misses, 1);
        assert_eq!(metrics.metrics.query_patterns["total"], 2);
    }

    #[test]
    fn test_unsafe_code_is_not_cached() {
        let mut engine = engine();
        let generator = SuppliedCode::new("import os\nresult = 1", "");
        let response = tokio_test::block_on(engine.answer(&request("q"), &generator));
        assert!(!response.outcome.success);
        assert!(engine.result_cache().is_empty());
    }

    #[test]
    fn test_generator_failure_becomes_outcome() {
        let mut engine = engine();
        let response = tokio_test::block_on(engine.answer(&request("q"), &Unavailable));
        assert!(!response.outcome.success);
        assert_eq!(
            response.outcome.error.as_deref(),
            Some("Code generation failed: model offline")
        );
    }

    #[test]
    fn test_load_failure_becomes_outcome() {
        let mut engine = engine();
        let outcome = engine.run_code("result = 1", "missing.csv", None);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("missing.csv"));
    }

    #[test]
    fn test_run_code_reuses_loaded_sheet() {
        let mut engine = engine();
        assert!(engine.run_code("result = len(df)", "sales.csv", None).success);
        assert!(engine.run_code("result = df.shape", "sales.csv", None).success);
        assert_eq!(engine.sheet_cache().stats().hits, 1);
    }

    #[test]
    fn test_invalidate_document() {
        let mut engine = engine();
        let generator = SuppliedCode::new("result = 1", "");
        tokio_test::block_on(engine.answer(&request("a"), &generator));
        tokio_test::block_on(engine.answer(&request("b"), &generator));
        assert_eq!(engine.invalidate_document("doc", Some("sales.csv")), 2);
        assert!(engine.sheet_cache().is_empty());
    }
}
