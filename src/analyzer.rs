//! Static Safety Analyzer
//!
//! Decides whether a snippet may run at all by inspecting its syntax tree.
//! Nothing is executed here. Rules are applied in a fixed order:
//!
//! 1. empty input
//! 2. non-blank line count above `max_lines`
//! 3. parse failure
//! 4. forbidden statements (imports, definitions, `del`, `global`,
//!    `nonlocal`, `with`, `raise`, `try`)
//! 5. deny-listed or dunder names and dunder attributes
//! 6. calls to persistence methods (`to_csv`, `read_excel`, ...)
//! 7. no assignment to the output variable
//!
//! [`SafetyAnalyzer::validate`] stops at the first failing rule;
//! [`SafetyAnalyzer::safety_report`] collects every issue plus non-blocking
//! warnings.

use crate::config::AnalyzerConfig;
use crate::policy::SafetyPolicy;
use crate::syntax::{self, LineIndex};
use rustpython_parser::ast::{self, Expr, Stmt};
use serde::{Deserialize, Serialize};

/// Outcome of [`SafetyAnalyzer::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub is_safe: bool,
    /// First blocking reason when unsafe
    pub reason: Option<String>,
}

impl Validation {
    fn safe() -> Self {
        Self {
            is_safe: true,
            reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            is_safe: false,
            reason: Some(reason),
        }
    }
}

/// Full diagnostic report for a snippet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub is_safe: bool,
    /// Blocking issues in rule order
    pub issues: Vec<String>,
    /// Non-blocking observations
    pub warnings: Vec<String>,
    pub has_output_assignment: bool,
    pub line_count: usize,
}

/// `return`, `break` and `continue` in places the compiler would refuse
fn misplaced(body: &[Stmt], lines: &LineIndex, in_loop: bool) -> Option<String> {
    for stmt in body {
        let line = lines.line_at(stmt);
        let found = match stmt {
            Stmt::Return(_) => Some(format!("'return' outside function (line {})", line)),
            Stmt::Break(_) if !in_loop => Some(format!("'break' outside loop (line {})", line)),
            Stmt::Continue(_) if !in_loop => {
                Some(format!("'continue' not properly in loop (line {})", line))
            }
            Stmt::For(s) => misplaced(&s.body, lines, true).or_else(|| misplaced(&s.orelse, lines, in_loop)),
            Stmt::While(s) => misplaced(&s.body, lines, true).or_else(|| misplaced(&s.orelse, lines, in_loop)),
            Stmt::If(s) => misplaced(&s.body, lines, in_loop).or_else(|| misplaced(&s.orelse, lines, in_loop)),
            Stmt::With(s) => misplaced(&s.body, lines, in_loop),
            Stmt::Try(s) => misplaced(&s.body, lines, in_loop)
                .or_else(|| misplaced(&s.orelse, lines, in_loop))
                .or_else(|| misplaced(&s.finalbody, lines, in_loop)),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Collects findings while walking the tree
struct Scan<'a> {
    policy: &'a SafetyPolicy,
    output_variable: &'a str,
    lines: &'a LineIndex,
    statements: Vec<String>,
    names: Vec<String>,
    methods: Vec<String>,
    warnings: Vec<String>,
    assigns_output: bool,
}

impl<'a> Scan<'a> {
    fn new(policy: &'a SafetyPolicy, output_variable: &'a str, lines: &'a LineIndex) -> Self {
        Self {
            policy,
            output_variable,
            lines,
            statements: Vec::new(),
            names: Vec::new(),
            methods: Vec::new(),
            warnings: Vec::new(),
            assigns_output: false,
        }
    }

    fn warn(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    fn targets_output(&self, target: &Expr) -> bool {
        match target {
            Expr::Name(n) => n.id.as_str() == self.output_variable,
            Expr::Tuple(t) => t.elts.iter().any(|item| self.targets_output(item)),
            Expr::List(l) => l.elts.iter().any(|item| self.targets_output(item)),
            Expr::Starred(s) => self.targets_output(&s.value),
            _ => false,
        }
    }

    /// Reason a statement kind is rejected, if it is
    fn forbidden(stmt: &Stmt) -> Option<String> {
        let reason = match stmt {
            Stmt::Import(s) => {
                let modules: Vec<&str> = s.names.iter().map(|a| a.name.as_str()).collect();
                format!("Import statements are not allowed (import {})", modules.join(", "))
            }
            Stmt::ImportFrom(s) => {
                let module = s.module.as_ref().map(|m| m.as_str()).unwrap_or(".");
                format!("Import statements are not allowed (from {} import ...)", module)
            }
            Stmt::FunctionDef(s) => format!("Function definitions are not allowed ('{}')", s.name.as_str()),
            Stmt::AsyncFunctionDef(s) => {
                format!("Async function definitions are not allowed ('{}')", s.name.as_str())
            }
            Stmt::ClassDef(s) => format!("Class definitions are not allowed ('{}')", s.name.as_str()),
            Stmt::Delete(_) => "Delete statements are not allowed".to_string(),
            Stmt::Global(_) => "Global declarations are not allowed".to_string(),
            Stmt::Nonlocal(_) => "Nonlocal declarations are not allowed".to_string(),
            Stmt::With(_) | Stmt::AsyncWith(_) => {
                "Context managers ('with') are not allowed; they may perform I/O".to_string()
            }
            Stmt::AsyncFor(_) => "Async loops are not allowed".to_string(),
            Stmt::Raise(_) => "Raising exceptions is not allowed".to_string(),
            Stmt::Try(_) | Stmt::TryStar(_) => "Try/except blocks are not allowed".to_string(),
            _ => return None,
        };
        Some(reason)
    }

    fn body(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn exprs<'e>(&mut self, exprs: impl IntoIterator<Item = &'e Expr>) {
        for expr in exprs {
            self.expr(expr);
        }
    }

    fn arguments(&mut self, args: &ast::Arguments) {
        let all = args.posonlyargs.iter().chain(&args.args).chain(&args.kwonlyargs);
        for arg in all {
            if let Some(default) = &arg.default {
                self.expr(default);
            }
        }
    }

    fn comprehensions(&mut self, generators: &[ast::Comprehension]) {
        for generator in generators {
            self.expr(&generator.target);
            self.expr(&generator.iter);
            self.exprs(&generator.ifs);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let line = self.lines.line_at(stmt);
        if let Some(reason) = Self::forbidden(stmt) {
            self.statements.push(format!("{} (line {})", reason, line));
        }
        match stmt {
            Stmt::Assign(s) => {
                if s.targets.iter().any(|t| self.targets_output(t)) {
                    self.assigns_output = true;
                }
                self.exprs(&s.targets);
                self.expr(&s.value);
            }
            Stmt::AugAssign(s) => {
                if self.targets_output(&s.target) {
                    self.assigns_output = true;
                }
                self.expr(&s.target);
                self.expr(&s.value);
            }
            Stmt::AnnAssign(s) => {
                if s.value.is_some() && self.targets_output(&s.target) {
                    self.assigns_output = true;
                }
                self.expr(&s.target);
                self.expr(&s.annotation);
                if let Some(value) = &s.value {
                    self.expr(value);
                }
            }
            Stmt::For(s) => {
                self.expr(&s.target);
                self.expr(&s.iter);
                self.body(&s.body);
                self.body(&s.orelse);
            }
            Stmt::AsyncFor(s) => {
                self.expr(&s.target);
                self.expr(&s.iter);
                self.body(&s.body);
                self.body(&s.orelse);
            }
            Stmt::While(s) => {
                self.warn(format!("Uses a while loop (line {})", line));
                self.expr(&s.test);
                self.body(&s.body);
                self.body(&s.orelse);
            }
            Stmt::If(s) => {
                self.expr(&s.test);
                self.body(&s.body);
                self.body(&s.orelse);
            }
            Stmt::With(s) => {
                for item in &s.items {
                    self.expr(&item.context_expr);
                }
                self.body(&s.body);
            }
            Stmt::AsyncWith(s) => {
                for item in &s.items {
                    self.expr(&item.context_expr);
                }
                self.body(&s.body);
            }
            Stmt::Try(s) => {
                self.body(&s.body);
                for handler in &s.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    if let Some(kind) = &h.type_ {
                        self.expr(kind);
                    }
                    self.body(&h.body);
                }
                self.body(&s.orelse);
                self.body(&s.finalbody);
            }
            Stmt::FunctionDef(s) => {
                self.exprs(&s.decorator_list);
                self.arguments(&s.args);
                self.body(&s.body);
            }
            Stmt::AsyncFunctionDef(s) => {
                self.exprs(&s.decorator_list);
                self.arguments(&s.args);
                self.body(&s.body);
            }
            Stmt::ClassDef(s) => {
                self.exprs(&s.decorator_list);
                self.exprs(&s.bases);
                self.body(&s.body);
            }
            Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    self.expr(value);
                }
            }
            Stmt::Delete(s) => self.exprs(&s.targets),
            Stmt::Raise(s) => {
                if let Some(exc) = &s.exc {
                    self.expr(exc);
                }
            }
            Stmt::Assert(s) => {
                self.expr(&s.test);
                if let Some(msg) = &s.msg {
                    self.expr(msg);
                }
            }
            Stmt::Match(s) => {
                self.expr(&s.subject);
                for case in &s.cases {
                    if let Some(guard) = &case.guard {
                        self.expr(guard);
                    }
                    self.body(&case.body);
                }
            }
            Stmt::Expr(s) => self.expr(&s.value),
            _ => {}
        }
    }

    fn expr(&mut self, expr: &Expr) {
        let line = self.lines.line_at(expr);
        match expr {
            Expr::Name(n) => {
                if self.policy.is_blocked_name(n.id.as_str()) {
                    self.names
                        .push(format!("Use of '{}' is not allowed (line {})", n.id.as_str(), line));
                }
            }
            Expr::Attribute(a) => {
                if SafetyPolicy::is_dunder(a.attr.as_str()) {
                    self.names.push(format!(
                        "Access to dunder attribute '{}' is not allowed (line {})",
                        a.attr.as_str(),
                        line
                    ));
                }
                self.expr(&a.value);
            }
            Expr::Call(c) => {
                if let Expr::Attribute(a) = c.func.as_ref() {
                    if self.policy.is_blocked_method(a.attr.as_str()) {
                        self.methods.push(format!(
                            "Call to I/O method '{}' is not allowed (line {})",
                            a.attr.as_str(),
                            line
                        ));
                    }
                }
                self.expr(&c.func);
                self.exprs(&c.args);
                for keyword in &c.keywords {
                    self.expr(&keyword.value);
                }
            }
            Expr::Lambda(l) => {
                self.warn(format!("Uses a lambda function (line {})", line));
                self.arguments(&l.args);
                self.expr(&l.body);
            }
            Expr::ListComp(c) => {
                self.warn(format!("Uses a list comprehension (line {})", line));
                self.expr(&c.elt);
                self.comprehensions(&c.generators);
            }
            Expr::SetComp(c) => {
                self.warn(format!("Uses a set comprehension (line {})", line));
                self.expr(&c.elt);
                self.comprehensions(&c.generators);
            }
            Expr::DictComp(c) => {
                self.warn(format!("Uses a dict comprehension (line {})", line));
                self.expr(&c.key);
                self.expr(&c.value);
                self.comprehensions(&c.generators);
            }
            Expr::GeneratorExp(c) => {
                self.warn(format!("Uses a generator expression (line {})", line));
                self.expr(&c.elt);
                self.comprehensions(&c.generators);
            }
            Expr::BoolOp(b) => self.exprs(&b.values),
            Expr::NamedExpr(n) => {
                self.expr(&n.target);
                self.expr(&n.value);
            }
            Expr::BinOp(b) => {
                self.expr(&b.left);
                self.expr(&b.right);
            }
            Expr::UnaryOp(u) => self.expr(&u.operand),
            Expr::IfExp(i) => {
                self.expr(&i.test);
                self.expr(&i.body);
                self.expr(&i.orelse);
            }
            Expr::Dict(d) => {
                self.exprs(d.keys.iter().flatten());
                self.exprs(&d.values);
            }
            Expr::Set(s) => self.exprs(&s.elts),
            Expr::List(l) => self.exprs(&l.elts),
            Expr::Tuple(t) => self.exprs(&t.elts),
            Expr::Await(a) => self.expr(&a.value),
            Expr::Yield(y) => {
                if let Some(value) = &y.value {
                    self.expr(value);
                }
            }
            Expr::YieldFrom(y) => self.expr(&y.value),
            Expr::Compare(c) => {
                self.expr(&c.left);
                self.exprs(&c.comparators);
            }
            Expr::FormattedValue(f) => {
                self.expr(&f.value);
                if let Some(spec) = &f.format_spec {
                    self.expr(spec);
                }
            }
            Expr::JoinedStr(j) => self.exprs(&j.values),
            Expr::Subscript(s) => {
                self.expr(&s.value);
                self.expr(&s.slice);
            }
            Expr::Starred(s) => self.expr(&s.value),
            Expr::Slice(s) => {
                for part in [&s.lower, &s.upper, &s.step].into_iter().flatten() {
                    self.expr(part);
                }
            }
            Expr::Constant(_) => {}
        }
    }
}

/// Non-blank lines in `code`
pub fn count_lines(code: &str) -> usize {
    code.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Validates candidate code against the configured policy
#[derive(Debug, Clone, Default)]
pub struct SafetyAnalyzer {
    config: AnalyzerConfig,
}

impl SafetyAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn output_variable(&self) -> &str {
        &self.config.output_variable
    }

    /// First blocking reason, or safe
    pub fn validate(&self, code: &str) -> Validation {
        let report = self.inspect(code, true);
        match report.issues.into_iter().next() {
            Some(reason) => {
                tracing::warn!("[ANALYZER] Rejected code: {}", reason);
                Validation::rejected(reason)
            }
            None => {
                tracing::debug!("[ANALYZER] Code accepted ({} lines)", report.line_count);
                Validation::safe()
            }
        }
    }

    /// Every issue and warning
    pub fn safety_report(&self, code: &str) -> SafetyReport {
        let report = self.inspect(code, false);
        tracing::debug!(
            "[ANALYZER] Report: safe={} issues={} warnings={}",
            report.is_safe,
            report.issues.len(),
            report.warnings.len()
        );
        report
    }

    fn inspect(&self, code: &str, first_only: bool) -> SafetyReport {
        let line_count = count_lines(code);
        let mut report = SafetyReport {
            is_safe: false,
            issues: Vec::new(),
            warnings: Vec::new(),
            has_output_assignment: false,
            line_count,
        };

        if code.trim().is_empty() {
            report.issues.push("Code is empty".to_string());
            return report;
        }
        if line_count > self.config.max_lines {
            report.issues.push(format!(
                "Code has {} lines; the maximum is {}",
                line_count, self.config.max_lines
            ));
            if first_only {
                return report;
            }
        }

        let program = match syntax::parse(code) {
            Ok(program) => program,
            Err(err) => {
                report.issues.push(format!("Syntax error: {}", err));
                return report;
            }
        };
        if let Some(err) = misplaced(&program.body, &program.lines, false) {
            report.issues.push(format!("Syntax error: {}", err));
            return report;
        }

        let mut scan = Scan::new(&self.config.policy, &self.config.output_variable, &program.lines);
        scan.body(&program.body);

        report.issues.extend(scan.statements);
        report.issues.extend(scan.names);
        report.issues.extend(scan.methods);
        report.has_output_assignment = scan.assigns_output;
        if !scan.assigns_output {
            report.issues.push(format!(
                "Code must assign its answer to the output variable '{}'",
                self.config.output_variable
            ));
        }
        report.warnings = scan.warnings;
        report.is_safe = report.issues.is_empty();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> SafetyAnalyzer {
        SafetyAnalyzer::default()
    }

    fn reason(code: &str) -> String {
        let v = analyzer().validate(code);
        assert!(!v.is_safe, "expected rejection for {:?}", code);
        v.reason.unwrap()
    }

    #[test]
    fn test_accepts_simple_analysis() {
        let v = analyzer().validate("result = df['Sales'].mean()");
        assert!(v.is_safe);
        assert_eq!(v.reason, None);
    }

    #[test]
    fn test_rejects_empty_and_long_code() {
        assert_eq!(reason("   \n\n"), "Code is empty");
        let long = "x = 1\n".repeat(51) + "result = x";
        assert!(reason(&long).contains("maximum is 50"));
        let blank_padded = "\n\n\n".repeat(40) + "result = 1";
        assert!(analyzer().validate(&blank_padded).is_safe);
    }

    #[test]
    fn test_rejects_imports_and_definitions() {
        assert!(reason("import os\nresult = 1").contains("Import"));
        assert!(reason("from os import path\nresult = 1").contains("Import"));
        assert!(reason("def f():\n    return 1\nresult = f()").contains("Function definitions"));
        assert!(reason("class A:\n    pass\nresult = 1").contains("Class definitions"));
        assert!(reason("with x as y:\n    pass\nresult = 1").contains("Context managers"));
        assert!(reason("try:\n    result = 1\nexcept Exception:\n    result = 2").contains("Try/except"));
        assert!(reason("result = 1\ndel result").contains("Delete"));
        assert!(reason("raise ValueError('x')\nresult = 1").contains("Raising"));
    }

    #[test]
    fn test_rejects_blocked_names_and_methods() {
        assert!(reason("result = eval('1')").contains("'eval'"));
        assert!(reason("result = open('f').read()").contains("'open'"));
        assert!(reason("result = df.__class__").contains("dunder"));
        assert!(reason("df.to_csv('out.csv')\nresult = 1").contains("to_csv"));
        assert!(reason("result = pd.read_excel('x.xlsx')").contains("read_excel"));
    }

    #[test]
    fn test_requires_output_assignment() {
        assert!(reason("x = 1").contains("'result'"));
        assert!(analyzer().validate("a, result = 1, 2").is_safe);
        assert!(analyzer().validate("result = 0\nresult += 1").is_safe);
        assert!(analyzer().validate("for i in range(3):\n    result = i").is_safe);
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let r = reason("result = (1 +\n");
        assert!(r.starts_with("Syntax error:"), "{}", r);
        assert!(r.contains("line"));
    }

    #[test]
    fn test_misplaced_control_flow_is_a_syntax_error() {
        let r = reason("result = 1\nreturn result");
        assert_eq!(r, "Syntax error: 'return' outside function (line 2)");
        assert!(reason("result = 1\nbreak").contains("'break' outside loop"));
        assert!(reason("if True:\n    continue\nresult = 1").contains("'continue'"));
        assert!(analyzer()
            .validate("result = 0\nfor i in range(3):\n    if i == 1:\n        continue\n    result += i")
            .is_safe);
    }

    #[test]
    fn test_nested_constructs_are_scanned() {
        assert!(reason("result = [eval(x) for x in ['1']]").contains("'eval'"));
        assert!(reason("result = f\"{open('x')}\"").contains("'open'"));
        assert!(reason("result = {'k': df.__dict__}").contains("dunder"));
        assert!(reason("if True:\n    df.to_excel('x.xlsx')\nresult = 1").contains("to_excel"));
    }

    #[test]
    fn test_rule_order_and_accumulation() {
        let code = "import os\nx = eval('1')";
        assert!(reason(code).contains("Import"));
        let report = analyzer().safety_report(code);
        assert!(!report.is_safe);
        assert_eq!(report.issues.len(), 3);
        assert!(report.issues[1].contains("eval"));
        assert!(report.issues[2].contains("output variable"));
        assert!(!report.has_output_assignment);
        assert_eq!(report.line_count, 2);
    }

    #[test]
    fn test_warnings_do_not_block() {
        let report = analyzer().safety_report(
            "vals = [x * 2 for x in range(3)]\nf = lambda v: v + 1\ni = 0\nwhile i < 2:\n    i += 1\nresult = f(vals[0])",
        );
        assert!(report.is_safe, "{:?}", report.issues);
        assert_eq!(report.warnings.len(), 3);
        assert!(report.warnings[0].contains("list comprehension"));
    }

    #[test]
    fn test_custom_output_variable() {
        let config = AnalyzerConfig {
            output_variable: "answer".to_string(),
            ..AnalyzerConfig::default()
        };
        let analyzer = SafetyAnalyzer::new(config);
        assert!(analyzer.validate("answer = 1").is_safe);
        assert!(!analyzer.validate("result = 1").is_safe);
    }
}
