use serde::Serialize;
use serde_json::{json, Value};
use sheetsafe::{AnalysisEngine, AnalysisRequest, EngineConfig, SuppliedCode, WorkbookLoader};
use std::path::PathBuf;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

type RpcResult = std::result::Result<Value, Value>;

#[derive(Debug, Clone, Default)]
struct WorkerConfig {
    config_path: Option<PathBuf>,
}

impl WorkerConfig {
    fn from_env_and_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config_path = std::env::var("SHEETSAFE_CONFIG").ok().map(PathBuf::from);

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if let Some(v) = args.get(i + 1) {
                        config_path = Some(PathBuf::from(v));
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }

        Self { config_path }
    }

    fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let base = match &self.config_path {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        Ok(base.with_env_overrides())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "sheetsafe_worker=info,sheetsafe=info".to_string()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = WorkerConfig::from_env_and_args();
    tracing::info!(
        "sheetsafe-worker starting (config={:?})",
        cfg.config_path
    );
    let mut engine = AnalysisEngine::new(cfg.engine_config()?, Box::new(WorkbookLoader));

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("invalid json-rpc line: {} | err={}", line, e);
                continue;
            }
        };

        let (response, stop) = handle_message(&mut engine, parsed).await;
        if let Some(resp) = response {
            let s = serde_json::to_string(&resp)?;
            stdout.write_all(s.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        if stop {
            break;
        }
    }

    tracing::info!("sheetsafe-worker stopping");
    Ok(())
}

/// Returns the response (if any) and whether the worker should stop
async fn handle_message(engine: &mut AnalysisEngine, msg: Value) -> (Option<Value>, bool) {
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    // Notifications have no id: ignore them, except "exit".
    if id.is_none() {
        return (None, method == "exit");
    }

    let mut stop = false;
    let result = match method {
        "initialize" => Ok(json!({
            "serverInfo": {
                "name": "sheetsafe-worker",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "methods": [
                    "analysis/validate",
                    "analysis/execute",
                    "analysis/run",
                    "analysis/similar",
                    "cache/stats",
                    "cache/invalidate",
                    "cache/clear",
                    "shutdown"
                ]
            },
            "config": engine.config(),
        })),
        "analysis/validate" => validate(engine, &params),
        "analysis/execute" => execute(engine, &params),
        "analysis/run" => run(engine, &params).await,
        "analysis/similar" => similar(engine, &params),
        "cache/stats" => Ok(json!({
            "results": engine.metrics(),
            "sheets": engine.sheet_cache().stats(),
        })),
        "cache/invalidate" => invalidate(engine, &params),
        "cache/clear" => Ok(json!({
            "results_removed": engine.result_cache_mut().clear(),
            "sheets_removed": engine.sheet_cache_mut().clear(),
        })),
        "shutdown" => {
            stop = true;
            Ok(Value::Null)
        }
        _ => Err(json!({
            "code": -32601,
            "message": format!("Method not found: {}", method)
        })),
    };

    let response = match result {
        Ok(v) => json!({ "jsonrpc": "2.0", "result": v, "id": id }),
        Err(err_obj) => json!({ "jsonrpc": "2.0", "error": err_obj, "id": id }),
    };
    (Some(response), stop)
}

fn required_str<'a>(params: &'a Value, key: &str) -> std::result::Result<&'a str, Value> {
    params.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        json!({
            "code": -32602,
            "message": format!("Missing required argument: {}", key)
        })
    })
}

fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

fn to_result<T: Serialize>(value: &T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| {
        json!({
            "code": -32603,
            "message": format!("Internal error: {}", e)
        })
    })
}

fn validate(engine: &AnalysisEngine, params: &Value) -> RpcResult {
    let code = required_str(params, "code")?;
    to_result(&engine.validate(code))
}

fn execute(engine: &mut AnalysisEngine, params: &Value) -> RpcResult {
    let code = required_str(params, "code")?;
    let file_path = required_str(params, "file_path")?;
    let sheet_name = optional_str(params, "sheet_name");
    let validate = params
        .get("validate")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let outcome = if validate {
        engine.run_code(code, file_path, sheet_name)
    } else {
        match engine
            .sheet_cache_mut()
            .load(file_path, sheet_name.unwrap_or(""), true)
        {
            Ok(dataset) => engine.executor().execute(code, &dataset, false),
            Err(e) => sheetsafe::ExecutionOutcome::failure(e.to_string(), 0),
        }
    };
    to_result(&outcome)
}

async fn run(engine: &mut AnalysisEngine, params: &Value) -> RpcResult {
    let request = AnalysisRequest {
        question: required_str(params, "question")?.to_string(),
        document_id: required_str(params, "document_id")?.to_string(),
        file_path: required_str(params, "file_path")?.to_string(),
        sheet_name: optional_str(params, "sheet_name").map(str::to_string),
        use_cache: params
            .get("use_cache")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    };
    let generator = SuppliedCode::new(
        required_str(params, "code")?,
        optional_str(params, "explanation").unwrap_or(""),
    );
    let response = engine.answer(&request, &generator).await;
    to_result(&response)
}

fn similar(engine: &AnalysisEngine, params: &Value) -> RpcResult {
    let question = required_str(params, "question")?;
    let document_id = required_str(params, "document_id")?;
    let threshold = params.get("threshold").and_then(|v| v.as_f64());
    let found = engine.similar(
        question,
        document_id,
        optional_str(params, "sheet_name"),
        threshold,
    );
    to_result(&found)
}

fn invalidate(engine: &mut AnalysisEngine, params: &Value) -> RpcResult {
    let document_id = required_str(params, "document_id")?;
    let file_path = optional_str(params, "file_path");
    let removed = engine.invalidate_document(document_id, file_path);
    Ok(json!({ "removed": removed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn engine() -> AnalysisEngine {
        AnalysisEngine::new(EngineConfig::default(), Box::new(WorkbookLoader))
    }

    fn call(engine: &mut AnalysisEngine, msg: Value) -> (Value, bool) {
        let (response, stop) = tokio_test::block_on(handle_message(engine, msg));
        (response.expect("requests with an id get a response"), stop)
    }

    fn sales_csv() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Region,Sales").unwrap();
        writeln!(file, "West,10").unwrap();
        writeln!(file, "East,32").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_unknown_method() {
        let mut engine = engine();
        let (resp, stop) = call(&mut engine, json!({"jsonrpc": "2.0", "id": 1, "method": "nope"}));
        assert!(!stop);
        assert_eq!(resp["error"]["code"], -32601);
        assert_eq!(resp["id"], 1);
    }

    #[test]
    fn test_missing_argument() {
        let mut engine = engine();
        let (resp, _) = call(
            &mut engine,
            json!({"jsonrpc": "2.0", "id": 2, "method": "analysis/execute", "params": {"code": "result = 1"}}),
        );
        assert_eq!(resp["error"]["code"], -32602);
        assert_eq!(resp["error"]["message"], "Missing required argument: file_path");
    }

    #[test]
    fn test_execute_without_validation() {
        let file = sales_csv();
        let path = file.path().to_str().unwrap();
        let mut engine = engine();
        let (resp, _) = call(
            &mut engine,
            json!({"jsonrpc": "2.0", "id": 3, "method": "analysis/execute", "params": {
                "code": "result = df['Sales'].sum()", "file_path": path, "validate": false
            }}),
        );
        assert_eq!(resp["result"]["success"], true);
        assert_eq!(resp["result"]["result"], json!({"type": "scalar", "value": 42, "dtype": "int64"}));

        // the interpreter still refuses what the analyzer would have rejected
        let (resp, _) = call(
            &mut engine,
            json!({"jsonrpc": "2.0", "id": 4, "method": "analysis/execute", "params": {
                "code": "import os\nresult = 1", "file_path": path, "validate": false
            }}),
        );
        assert_eq!(resp["result"]["success"], false);
        let error = resp["result"]["error"].as_str().unwrap();
        assert!(error.starts_with("NotImplementedError"), "{}", error);
    }

    #[test]
    fn test_validate_reports_reason() {
        let mut engine = engine();
        let (resp, _) = call(
            &mut engine,
            json!({"jsonrpc": "2.0", "id": 5, "method": "analysis/validate", "params": {"code": "import os"}}),
        );
        assert_eq!(resp["result"]["is_safe"], false);
        assert!(resp["result"]["issues"][0].as_str().unwrap().contains("Import"));
    }

    #[test]
    fn test_shutdown_and_notifications() {
        let mut engine = engine();
        let (resp, stop) = call(&mut engine, json!({"jsonrpc": "2.0", "id": 6, "method": "shutdown"}));
        assert!(stop);
        assert_eq!(resp["result"], Value::Null);

        let (resp, stop) = tokio_test::block_on(handle_message(
            &mut engine,
            json!({"jsonrpc": "2.0", "method": "initialized"}),
        ));
        assert!(resp.is_none());
        assert!(!stop);
        let (_, stop) = tokio_test::block_on(handle_message(&mut engine, json!({"jsonrpc": "2.0", "method": "exit"})));
        assert!(stop);
    }
}
