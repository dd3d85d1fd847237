//! Safe execution of generated spreadsheet analysis code.
//!
//! Candidate code is checked by the [`SafetyAnalyzer`], run by the
//! [`SandboxExecutor`] inside an allow-list interpreter over a polars-backed
//! [`DataFrame`], and its answers are kept in a [`ResultCache`]. Parsed
//! sheets are kept in a [`SheetCache`]. [`AnalysisEngine`] ties these
//! together.
//!
//! ```no_run
//! use sheetsafe::{SafetyAnalyzer, SandboxExecutor, DataFrame, Cell};
//!
//! let analyzer = SafetyAnalyzer::default();
//! assert!(analyzer.validate("result = df['Sales'].mean()").is_safe);
//!
//! let df = DataFrame::new(vec![("Sales".to_string(), vec![Cell::Int(1), Cell::Int(3)])]).unwrap();
//! let outcome = SandboxExecutor::default().execute("result = df['Sales'].mean()", &df, true);
//! assert!(outcome.success);
//! ```

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod frame;
pub mod interpreter;
pub mod policy;
pub mod result_cache;
pub mod sheet_cache;
pub mod syntax;

pub use analyzer::{SafetyAnalyzer, SafetyReport, Validation};
pub use config::{
    AnalyzerConfig, EngineConfig, ExecutorConfig, ResultCacheConfig, SheetCacheConfig,
};
pub use engine::{
    AnalysisEngine, AnalysisRequest, AnalysisResponse, CodeGenerator, GeneratedCode,
    GenerationRequest, SuppliedCode,
};
pub use errors::{Result, SandboxError};
pub use executor::{ExecutionOutcome, ResultValue, SandboxExecutor};
pub use frame::{Cell, DType, DataFrame, Series};
pub use policy::SafetyPolicy;
pub use result_cache::{
    CachedAnalysis, MetricsSnapshot, QueryMetrics, ResultCache, SimilarQuery,
};
pub use sheet_cache::{SheetCache, SheetCacheStats, SheetLoader, WorkbookLoader};
