//! Sandbox Executor
//!
//! Runs approved snippets against a private copy of the dataset. The
//! namespace holds the dataset, the `pd` / `np` handles, the allow-listed
//! builtins and the output variable set to `None`; nothing else is
//! reachable. Runtime failures come back as a failed [`ExecutionOutcome`],
//! never as an `Err` or a panic.

use crate::analyzer::SafetyAnalyzer;
use crate::config::{AnalyzerConfig, ExecutorConfig};
use crate::errors::SandboxError;
use crate::frame::{Cell, DType, DataFrame, Series};
use crate::interpreter::{Interpreter, Limits, ModuleKind, Value};
use crate::syntax;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::rc::Rc;
use std::time::Instant;
use uuid::Uuid;

/// Interpreter threads get a large stack so deep expressions fail on the
/// depth budget instead of overflowing.
const INTERPRETER_STACK_BYTES: usize = 32 * 1024 * 1024;

/// Nesting depth kept when converting containers to JSON
const MAX_JSON_DEPTH: usize = 32;

/// JSON-safe rendering of the output variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultValue {
    Scalar {
        value: Json,
        dtype: String,
    },
    Text {
        value: String,
    },
    List {
        value: Vec<Json>,
    },
    Mapping {
        value: Map<String, Json>,
    },
    DataFrame {
        shape: (usize, usize),
        columns: Vec<String>,
        dtypes: IndexMap<String, String>,
        data: Vec<Json>,
        truncated: bool,
    },
    Series {
        name: Option<String>,
        length: usize,
        dtype: String,
        index: Vec<Json>,
        values: Vec<Json>,
        truncated: bool,
    },
    Null,
    Unknown {
        value: String,
    },
}

impl ResultValue {
    /// Convert an interpreter value, keeping at most `max_rows` rows of tabular data
    pub fn from_value(value: &Value, max_rows: usize) -> Result<Self, String> {
        let mut active = Vec::new();
        Ok(match value {
            Value::None => ResultValue::Null,
            Value::Bool(b) => ResultValue::Scalar {
                value: Json::Bool(*b),
                dtype: DType::Bool.to_string(),
            },
            Value::Int(i) => ResultValue::Scalar {
                value: Json::from(*i),
                dtype: DType::Int64.to_string(),
            },
            Value::Float(x) => ResultValue::Scalar {
                value: float_json(*x),
                dtype: DType::Float64.to_string(),
            },
            Value::Str(s) => ResultValue::Text { value: s.clone() },
            Value::List(_) | Value::Tuple(_) | Value::Set(_) | Value::Index(_) => {
                match to_json(value, &mut active, 0)? {
                    Json::Array(value) => ResultValue::List { value },
                    other => ResultValue::List { value: vec![other] },
                }
            }
            Value::Dict(_) => match to_json(value, &mut active, 0)? {
                Json::Object(value) => ResultValue::Mapping { value },
                other => ResultValue::Unknown {
                    value: other.to_string(),
                },
            },
            Value::Frame(df) => frame_result(&df.borrow(), max_rows),
            Value::Series(s) => series_result(s, max_rows),
            other => ResultValue::Unknown {
                value: other.str_of(),
            },
        })
    }
}

fn float_json(x: f64) -> Json {
    serde_json::Number::from_f64(x)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

fn circular() -> String {
    "ValueError: Circular reference detected".to_string()
}

/// JSON for a nested value; `active` holds the containers being converted
fn to_json(value: &Value, active: &mut Vec<*const ()>, depth: usize) -> Result<Json, String> {
    if depth > MAX_JSON_DEPTH {
        return Ok(Json::String("...".to_string()));
    }
    let ptr = match value {
        Value::List(items) => Some(Rc::as_ptr(items) as *const ()),
        Value::Dict(map) => Some(Rc::as_ptr(map) as *const ()),
        _ => None,
    };
    if let Some(ptr) = ptr {
        if active.contains(&ptr) {
            return Err(circular());
        }
        active.push(ptr);
    }
    let json = match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(x) => float_json(*x),
        Value::Str(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(
            items
                .borrow()
                .iter()
                .map(|v| to_json(v, active, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Tuple(items) => Json::Array(
            items
                .iter()
                .map(|v| to_json(v, active, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Set(items) => Json::Array(
            items
                .borrow()
                .iter()
                .map(|k| to_json(k.value(), active, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Dict(map) => Json::Object(
            map.borrow()
                .iter()
                .map(|(k, v)| Ok((k.value().str_of(), to_json(v, active, depth + 1)?)))
                .collect::<Result<_, String>>()?,
        ),
        Value::Series(s) => Json::Array(s.values().iter().map(Cell::to_json).collect()),
        Value::Frame(df) => Json::Array(df.borrow().to_records()),
        Value::Index(labels) => Json::Array(labels.iter().map(Cell::to_json).collect()),
        other => Json::String(other.str_of()),
    };
    if ptr.is_some() {
        active.pop();
    }
    Ok(json)
}

fn frame_result(df: &DataFrame, max_rows: usize) -> ResultValue {
    let shown = df.n_rows().min(max_rows);
    let dtypes = df.dtypes();
    let columns = df.head(shown as i64).columns();
    let data = (0..shown)
        .map(|i| {
            let row: Map<String, Json> = columns
                .iter()
                .map(|(name, values)| (name.clone(), values[i].to_json()))
                .collect();
            Json::Object(row)
        })
        .collect();
    ResultValue::DataFrame {
        shape: df.shape(),
        columns: df.column_names(),
        dtypes: dtypes
            .iter()
            .map(|(name, dtype)| (name.clone(), dtype.to_string()))
            .collect(),
        data,
        truncated: shown < df.n_rows(),
    }
}

fn series_result(s: &Series, max_rows: usize) -> ResultValue {
    let shown = s.len().min(max_rows);
    ResultValue::Series {
        name: s.name.clone(),
        length: s.len(),
        dtype: s.dtype().to_string(),
        index: (0..shown).map(|i| s.index.label_json(i)).collect(),
        values: s.head(shown as i64).values().iter().map(Cell::to_json).collect(),
        truncated: shown < s.len(),
    }
}

/// Result of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub result: ResultValue,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionOutcome {
    pub fn failure(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            result: ResultValue::Null,
            error: Some(error.into()),
            execution_time_ms,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Captured state of a finished interpreter run
struct Run {
    result: Result<ResultValue, String>,
    stdout: String,
    stderr: String,
}

/// Executes validated snippets in an isolated namespace
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    analyzer: SafetyAnalyzer,
    config: ExecutorConfig,
}

impl SandboxExecutor {
    pub fn new(analyzer: AnalyzerConfig, config: ExecutorConfig) -> Self {
        Self {
            analyzer: SafetyAnalyzer::new(analyzer),
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn limits(&self) -> Limits {
        Limits {
            max_loop_iterations: self.config.max_loop_iterations,
            max_collection_len: self.config.max_collection_len,
            max_call_depth: self.config.max_call_depth,
        }
    }

    /// Validate (optionally) and run `code` against a private copy of `dataset`
    pub fn execute(&self, code: &str, dataset: &DataFrame, validate: bool) -> ExecutionOutcome {
        let started = Instant::now();
        let execution_id = Uuid::new_v4();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        if validate {
            let validation = self.analyzer.validate(code);
            if !validation.is_safe {
                let reason = validation
                    .reason
                    .unwrap_or_else(|| "Code failed validation".to_string());
                tracing::warn!("[EXECUTOR] {} rejected before execution: {}", execution_id, reason);
                return ExecutionOutcome::failure(reason, elapsed(started));
            }
        }

        tracing::info!(
            "[EXECUTOR] {} running snippet ({} rows x {} columns)",
            execution_id,
            dataset.n_rows(),
            dataset.n_cols()
        );

        let source = code.to_string();
        let frame = dataset.clone();
        let policy = self.analyzer.config().policy.clone();
        let output_variable = self.analyzer.output_variable().to_string();
        let dataset_variable = self.config.dataset_variable.clone();
        let limits = self.limits();
        let max_rows = self.config.max_rows;

        let spawned = std::thread::Builder::new()
            .name(format!("sheetsafe-exec-{}", execution_id.simple()))
            .stack_size(INTERPRETER_STACK_BYTES)
            .spawn(move || {
                let program = match syntax::parse(&source) {
                    Ok(program) => program,
                    Err(err) => {
                        return Run {
                            result: Err(format!("SyntaxError: {}", err)),
                            stdout: String::new(),
                            stderr: String::new(),
                        }
                    }
                };
                let mut interp = Interpreter::new(policy, limits, &output_variable);
                interp.bind(&dataset_variable, Value::frame(frame));
                interp.bind("pd", Value::Module(ModuleKind::Pandas));
                interp.bind("np", Value::Module(ModuleKind::Numpy));
                interp.bind(&output_variable, Value::None);

                let result = match interp.run(&program) {
                    Err(err) => {
                        tracing::error!(
                            "[EXECUTOR] {} failed at line {:?}: {}\n--- code ---\n{}",
                            execution_id,
                            err.line,
                            err,
                            source
                        );
                        Err(err.to_string())
                    }
                    Ok(()) if !interp.output_assigned() => {
                        Err(SandboxError::MissingOutput(output_variable.clone()).to_string())
                    }
                    Ok(()) => {
                        let value = interp.get(&output_variable).cloned().unwrap_or(Value::None);
                        ResultValue::from_value(&value, max_rows)
                    }
                };
                Run {
                    result,
                    stdout: interp.stdout().to_string(),
                    stderr: interp.stderr(),
                }
            });

        let run = match spawned.map(|handle| handle.join()) {
            Ok(Ok(run)) => run,
            Ok(Err(_)) => {
                tracing::error!("[EXECUTOR] {} interpreter thread panicked", execution_id);
                return ExecutionOutcome::failure(
                    "Internal error: the interpreter stopped unexpectedly",
                    elapsed(started),
                );
            }
            Err(err) => {
                tracing::error!("[EXECUTOR] {} could not start interpreter: {}", execution_id, err);
                return ExecutionOutcome::failure(
                    format!("Internal error: {}", err),
                    elapsed(started),
                );
            }
        };

        let execution_time_ms = elapsed(started);
        match run.result {
            Ok(result) => {
                tracing::info!(
                    "[EXECUTOR] {} finished in {}ms",
                    execution_id,
                    execution_time_ms
                );
                ExecutionOutcome {
                    success: true,
                    result,
                    error: None,
                    execution_time_ms,
                    stdout: run.stdout,
                    stderr: run.stderr,
                }
            }
            Err(error) => ExecutionOutcome {
                success: false,
                result: ResultValue::Null,
                error: Some(error),
                execution_time_ms,
                stdout: run.stdout,
                stderr: run.stderr,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales() -> DataFrame {
        DataFrame::new(vec![
            (
                "Region".to_string(),
                vec!["West".into(), "East".into(), "West".into()],
            ),
            (
                "Sales".to_string(),
                vec![Cell::Int(100), Cell::Int(250), Cell::Float(50.5)],
            ),
        ])
        .unwrap()
    }

    fn run(code: &str) -> ExecutionOutcome {
        SandboxExecutor::default().execute(code, &sales(), true)
    }

    #[test]
    fn test_scalar_result() {
        let outcome = run("result = 2 + 2");
        assert!(outcome.success);
        assert_eq!(
            serde_json::to_value(&outcome.result).unwrap(),
            json!({"type": "scalar", "value": 4, "dtype": "int64"})
        );
    }

    #[test]
    fn test_rejected_code_never_runs() {
        let outcome = run("import os\nresult = 1");
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Import"));
        assert_eq!(outcome.result, ResultValue::Null);
    }

    #[test]
    fn test_missing_output() {
        let outcome = SandboxExecutor::default().execute("x = 1", &sales(), false);
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("No output produced: 'result' was never assigned")
        );
    }

    #[test]
    fn test_runtime_error_is_reported() {
        let outcome = run("result = df['Missing'].sum()");
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("KeyError"));
        let outcome = run("result = 1 / 0");
        assert!(outcome.error.unwrap().starts_with("ZeroDivisionError"));
    }

    #[test]
    fn test_syntax_error_without_validation() {
        let outcome = SandboxExecutor::default().execute("result = (", &sales(), false);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("SyntaxError"));
    }

    #[test]
    fn test_dataset_is_a_private_copy() {
        let dataset = sales();
        let outcome =
            SandboxExecutor::default().execute("df['Sales'] = 0\nresult = df['Sales'].sum()", &dataset, true);
        assert!(outcome.success);
        assert_eq!(dataset.column_values("Sales").unwrap()[0], Cell::Float(100.0));
    }

    #[test]
    fn test_frame_result_truncates() {
        let config = ExecutorConfig {
            max_rows: 2,
            ..ExecutorConfig::default()
        };
        let executor = SandboxExecutor::new(AnalyzerConfig::default(), config);
        let outcome = executor.execute("result = df", &sales(), true);
        match outcome.result {
            ResultValue::DataFrame {
                shape,
                columns,
                dtypes,
                data,
                truncated,
            } => {
                assert_eq!(shape, (3, 2));
                assert_eq!(columns, vec!["Region", "Sales"]);
                assert_eq!(dtypes["Sales"], "float64");
                assert_eq!(data.len(), 2);
                assert_eq!(data[0], json!({"Region": "West", "Sales": 100.0}));
                assert!(truncated);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_series_and_containers() {
        let outcome = run("result = df.groupby('Region')['Sales'].sum()");
        match outcome.result {
            ResultValue::Series {
                length, index, values, ..
            } => {
                assert_eq!(length, 2);
                assert_eq!(index, vec![json!("East"), json!("West")]);
                assert_eq!(values, vec![json!(250.0), json!(150.5)]);
            }
            other => panic!("unexpected result {:?}", other),
        }
        let outcome = run("result = {'a': (1, 2), 'b': None}");
        assert_eq!(
            serde_json::to_value(&outcome.result).unwrap(),
            json!({"type": "mapping", "value": {"a": [1, 2], "b": null}})
        );
        let outcome = run("result = float('nan')");
        assert_eq!(
            serde_json::to_value(&outcome.result).unwrap(),
            json!({"type": "scalar", "value": null, "dtype": "float64"})
        );
        let outcome = run("result = df.groupby('Region')");
        assert!(matches!(outcome.result, ResultValue::Unknown { .. }));
    }

    #[test]
    fn test_stdout_and_warnings_are_captured() {
        let outcome = run("print('rows', len(df))\nresult = np.mean([])");
        assert!(outcome.success);
        assert_eq!(outcome.stdout, "rows 3\n");
        assert!(outcome.stderr.contains("Mean of empty slice"));
    }

    #[test]
    fn test_cyclic_containers() {
        let outcome = run("x = {}\nx['a'] = x\nresult = x == x");
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(
            serde_json::to_value(&outcome.result).unwrap(),
            json!({"type": "scalar", "value": true, "dtype": "bool"})
        );
        let outcome = run("x = {}\nx['a'] = x\nresult = x");
        assert_eq!(outcome.error.as_deref(), Some("ValueError: Circular reference detected"));
        let outcome = run("a = []\nb = []\na.append(b)\nb.append(a)\nresult = a == b");
        assert!(outcome.error.unwrap().starts_with("RecursionError"));
        let outcome = run("x = [1]\nresult = [x, x]");
        assert_eq!(
            serde_json::to_value(&outcome.result).unwrap(),
            json!({"type": "list", "value": [[1], [1]]})
        );
    }

    #[test]
    fn test_huge_format_width_is_refused() {
        let outcome = run("result = f'{1:>999999999}'");
        assert!(outcome.error.unwrap().starts_with("ResourceLimitError"));
        let outcome = run("result = '{:.999999999f}'.format(1.5)");
        assert!(outcome.error.unwrap().starts_with("ResourceLimitError"));
    }

    #[test]
    fn test_integer_division_overflow() {
        let outcome = run("result = (-9223372036854775807 - 1) // -1");
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(
            serde_json::to_value(&outcome.result).unwrap(),
            json!({"type": "scalar", "value": 9.223372036854776e18, "dtype": "float64"})
        );
    }

    #[test]
    fn test_scalar_round_trips() {
        let cases = [
            ("result = -42", json!({"type": "scalar", "value": -42, "dtype": "int64"})),
            (
                "result = 2 ** 62",
                json!({"type": "scalar", "value": 4611686018427387904i64, "dtype": "int64"}),
            ),
            ("result = -0.125", json!({"type": "scalar", "value": -0.125, "dtype": "float64"})),
            ("result = 1e300 * 10", json!({"type": "scalar", "value": 1e301, "dtype": "float64"})),
            ("result = 3 > 2", json!({"type": "scalar", "value": true, "dtype": "bool"})),
            ("result = 'x' * 3", json!({"type": "text", "value": "xxx"})),
        ];
        for (code, expected) in cases {
            let outcome = run(code);
            assert!(outcome.success, "{}: {:?}", code, outcome.error);
            assert_eq!(serde_json::to_value(&outcome.result).unwrap(), expected, "{}", code);
        }
    }

    #[test]
    fn test_loop_budget() {
        let config = ExecutorConfig {
            max_loop_iterations: 100,
            ..ExecutorConfig::default()
        };
        let executor = SandboxExecutor::new(AnalyzerConfig::default(), config);
        let outcome = executor.execute("result = 0\nwhile True:\n    result += 1", &sales(), true);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("ResourceLimitError"));
    }
}
