use serde_json::json;
use sheetsafe::{
    AnalysisEngine, AnalysisRequest, EngineConfig, ResultValue, SafetyAnalyzer, SuppliedCode,
    WorkbookLoader,
};
use std::io::Write;
use tempfile::NamedTempFile;

fn sales_csv() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "Region,Product,Sales,Units").unwrap();
    writeln!(file, "West,Widget,100.5,3").unwrap();
    writeln!(file, "East,Widget,250,5").unwrap();
    writeln!(file, "West,Gadget,50,1").unwrap();
    writeln!(file, "East,Gadget,,2").unwrap();
    file.flush().unwrap();
    file
}

fn engine() -> AnalysisEngine {
    AnalysisEngine::new(EngineConfig::default(), Box::new(WorkbookLoader))
}

fn request(file: &NamedTempFile, question: &str) -> AnalysisRequest {
    AnalysisRequest {
        question: question.to_string(),
        document_id: "sales-2024".to_string(),
        file_path: file.path().to_string_lossy().to_string(),
        sheet_name: None,
        use_cache: true,
    }
}

#[test]
fn test_groupby_question_end_to_end() {
    let file = sales_csv();
    let mut engine = engine();
    let code = "totals = df.groupby('Region')['Sales'].sum()\nresult = totals.to_dict()";
    let generator = SuppliedCode::new(code, "Sum of sales per region");

    let response = tokio_test::block_on(engine.answer(
        &request(&file, "What is the total sales by region?"),
        &generator,
    ));
    assert!(response.outcome.success, "{:?}", response.outcome.error);
    assert_eq!(
        serde_json::to_value(&response.outcome.result).unwrap(),
        json!({"type": "mapping", "value": {"East": 250.0, "West": 150.5}})
    );

    let again = tokio_test::block_on(engine.answer(
        &request(&file, "what is the total sales by region?"),
        &generator,
    ));
    assert!(again.from_cache);

    let similar = engine.similar("total sales by region", "sales-2024", None, Some(0.5));
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].hit_count, 1);
}

#[test]
fn test_rejected_code_reports_reason() {
    let file = sales_csv();
    let mut engine = engine();
    let generator = SuppliedCode::new("open('/etc/passwd')\nresult = 1", "");
    let response = tokio_test::block_on(engine.answer(&request(&file, "read a file"), &generator));
    assert!(!response.outcome.success);
    assert!(response.outcome.error.unwrap().contains("'open'"));
    assert_eq!(engine.metrics().metrics.total_queries, 1);
    assert!(engine.result_cache().is_empty());
}

#[test]
fn test_filtered_frame_result() {
    let file = sales_csv();
    let mut engine = engine();
    let code = "high = df[df['Units'] >= 3]\nresult = high[['Region', 'Units']]";
    let outcome = engine.run_code(code, &file.path().to_string_lossy(), None);
    assert!(outcome.success, "{:?}", outcome.error);
    match outcome.result {
        ResultValue::DataFrame {
            shape,
            columns,
            data,
            truncated,
            ..
        } => {
            assert_eq!(shape, (2, 2));
            assert_eq!(columns, vec!["Region", "Units"]);
            assert_eq!(data[1], json!({"Region": "East", "Units": 5}));
            assert!(!truncated);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_missing_sheet_file() {
    let mut engine = engine();
    let outcome = engine.run_code("result = 1", "/nonexistent/sales.csv", None);
    assert!(!outcome.success);
    assert!(outcome.error.is_some());
}

#[test]
fn test_validation_report() {
    let analyzer = SafetyAnalyzer::default();
    let report = analyzer.safety_report("import os\nx = eval('1')");
    assert!(!report.is_safe);
    assert!(!report.has_output_assignment);
    assert_eq!(report.line_count, 2);
    assert!(report.issues.len() >= 3);
}
