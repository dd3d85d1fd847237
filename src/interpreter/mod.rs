//! Allow-list interpreter
//!
//! Runs the statement subset analysis snippets need (assignment, `if`,
//! `for`, `while`, comprehensions and lambdas) against a namespace holding
//! only the dataset, the `pd` / `np` library handles and the allowed
//! builtins. There is no import machinery, no attribute access beyond the
//! known method tables and no way to reach the host.
//!
//! Every loop and comprehension iteration consumes one tick of
//! [`Limits::max_loop_iterations`]; every materialized list, string or range
//! is checked against [`Limits::max_collection_len`].

mod args;
mod builtins;
pub mod error;
mod format;
mod frame_methods;
mod library;
mod methods;
mod series_methods;
mod tabular;
pub mod value;

pub use args::Args;
pub use error::{ErrorKind, EvalError, EvalResult};
pub use value::{Callable, Key, ModuleKind, Value};

use crate::frame::{arith_cells, slice_indices, ArithOp};
use crate::policy::SafetyPolicy;
use crate::syntax::{BinOp, CmpOp, LineIndex, Program, UnaryOp};
use indexmap::{IndexMap, IndexSet};
use rustpython_parser::ast::{self, Constant, ConversionFlag, Expr, Stmt};
use std::collections::HashMap;
use std::rc::Rc;
use value::{py_cmp, py_eq, range_count, range_item, range_len, Lambda};

const MAX_STDOUT_BYTES: usize = 1 << 20;

/// Execution budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_loop_iterations: u64,
    pub max_collection_len: usize,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_loop_iterations: 1_000_000,
            max_collection_len: 1_000_000,
            max_call_depth: 200,
        }
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
}

#[derive(Clone, Copy)]
enum CompKind {
    List,
    Set,
    Dict,
}

#[derive(Debug)]
struct Scope {
    vars: HashMap<String, Value>,
    /// Lambda bodies do not see their caller's locals
    barrier: bool,
}

#[derive(Debug)]
pub struct Interpreter {
    policy: SafetyPolicy,
    limits: Limits,
    globals: HashMap<String, Value>,
    scopes: Vec<Scope>,
    output_variable: String,
    output_assigned: bool,
    stdout: String,
    stdout_truncated: bool,
    warnings: Vec<String>,
    ticks: u64,
    depth: usize,
    lines: LineIndex,
}

impl Interpreter {
    pub fn new(policy: SafetyPolicy, limits: Limits, output_variable: &str) -> Self {
        Self {
            policy,
            limits,
            globals: HashMap::new(),
            scopes: Vec::new(),
            output_variable: output_variable.to_string(),
            output_assigned: false,
            stdout: String::new(),
            stdout_truncated: false,
            warnings: Vec::new(),
            ticks: 0,
            depth: 0,
            lines: LineIndex::default(),
        }
    }

    /// Bind a global without counting as an assignment by the snippet
    pub fn bind(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Whether the snippet itself assigned the output variable
    pub fn output_assigned(&self) -> bool {
        self.output_assigned
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Runtime warnings, one per line, deduplicated
    pub fn stderr(&self) -> String {
        self.warnings.join("\n")
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn run(&mut self, program: &Program) -> EvalResult<()> {
        self.lines = program.lines.clone();
        self.exec_block(&program.body).map(|_| ())
    }

    fn exec_block(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        for stmt in body {
            let flow = self.exec_stmt(stmt);
            match flow.map_err(|e| e.at_line(self.lines.line_at(stmt)))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        match stmt {
            Stmt::Expr(s) => {
                self.eval(&s.value)?;
            }
            Stmt::Assign(s) => {
                let value = self.eval(&s.value)?;
                for target in &s.targets {
                    self.assign(target, value.clone())?;
                }
            }
            Stmt::AugAssign(s) => self.aug_assign(&s.target, BinOp::from(&s.op), &s.value)?,
            Stmt::AnnAssign(s) => {
                if let Some(value) = &s.value {
                    let value = self.eval(value)?;
                    self.assign(&s.target, value)?;
                }
            }
            Stmt::Pass(_) => {}
            Stmt::Break(_) => return Ok(Flow::Break),
            Stmt::Continue(_) => return Ok(Flow::Continue),
            Stmt::If(s) => {
                return if self.eval(&s.test)?.truthy()? {
                    self.exec_block(&s.body)
                } else {
                    self.exec_block(&s.orelse)
                };
            }
            Stmt::For(s) => return self.exec_for(&s.target, &s.iter, &s.body, &s.orelse),
            Stmt::While(s) => return self.exec_while(&s.test, &s.body, &s.orelse),
            Stmt::Assert(s) => {
                if !self.eval(&s.test)?.truthy()? {
                    let message = match &s.msg {
                        Some(msg) => self.eval(msg)?.str_of(),
                        None => String::new(),
                    };
                    return Err(EvalError::new(ErrorKind::AssertionError, message));
                }
            }
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.delete(target)?;
                }
            }
            Stmt::Return(_) => return Err(EvalError::unsupported("return")),
            Stmt::Import(_) | Stmt::ImportFrom(_) => return Err(EvalError::unsupported("import")),
            Stmt::FunctionDef(_) | Stmt::AsyncFunctionDef(_) => {
                return Err(EvalError::unsupported("function definition"))
            }
            Stmt::ClassDef(_) => return Err(EvalError::unsupported("class definition")),
            Stmt::Global(_) | Stmt::Nonlocal(_) => {
                return Err(EvalError::unsupported("global/nonlocal declaration"))
            }
            Stmt::With(_) | Stmt::AsyncWith(_) => {
                return Err(EvalError::unsupported("with statement"))
            }
            Stmt::AsyncFor(_) => return Err(EvalError::unsupported("async for")),
            Stmt::Raise(_) => return Err(EvalError::unsupported("raise")),
            Stmt::Try(_) | Stmt::TryStar(_) => return Err(EvalError::unsupported("try statement")),
            Stmt::Match(_) => return Err(EvalError::unsupported("match statement")),
            _ => return Err(EvalError::unsupported("this statement")),
        }
        Ok(Flow::Normal)
    }

    fn exec_for(
        &mut self,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> EvalResult<Flow> {
        let iterable = self.eval(iter)?;
        let items: Box<dyn Iterator<Item = Value>> = match &iterable {
            Value::Range { start, step, .. } => {
                let (start, step) = (*start, *step);
                let n = range_len(&iterable)?;
                Box::new((0..n).map(move |i| Value::Int(range_item(start, step, i))))
            }
            other => Box::new(self.iterate(other)?.into_iter()),
        };
        for item in items {
            self.tick()?;
            self.assign(target, item)?;
            if let Flow::Break = self.exec_block(body)? {
                return Ok(Flow::Normal);
            }
        }
        self.exec_block(orelse)
    }

    fn exec_while(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> EvalResult<Flow> {
        loop {
            if !self.eval(test)?.truthy()? {
                return self.exec_block(orelse);
            }
            self.tick()?;
            if let Flow::Break = self.exec_block(body)? {
                return Ok(Flow::Normal);
            }
        }
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> EvalResult<()> {
        match target {
            Expr::Name(name) => {
                let current = self.lookup(name.id.as_str())?;
                let rhs = self.eval(value)?;
                let updated = self.inplace(current, op, rhs)?;
                self.store(name.id.as_str(), updated);
                Ok(())
            }
            Expr::Subscript(sub) => {
                let container = self.eval(&sub.value)?;
                let index = self.eval_index(&sub.slice)?;
                let current = self.get_item(&container, &index)?;
                let rhs = self.eval(value)?;
                let updated = self.inplace(current, op, rhs)?;
                self.set_item(&container, index, updated)
            }
            Expr::Attribute(_) => Err(EvalError::unsupported("attribute assignment")),
            _ => Err(EvalError::new(
                ErrorKind::SyntaxError,
                "illegal expression for augmented assignment",
            )),
        }
    }

    /// `+=` extends lists in place; everything else rebinds
    fn inplace(&mut self, current: Value, op: BinOp, rhs: Value) -> EvalResult<Value> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let extra = self.iterate(&rhs)?;
            self.check_len(list.borrow().len() + extra.len())?;
            list.borrow_mut().extend(extra);
            return Ok(current);
        }
        self.binary(current, op, rhs)
    }

    fn assign(&mut self, target: &Expr, value: Value) -> EvalResult<()> {
        match target {
            Expr::Name(name) => {
                self.store(name.id.as_str(), value);
                Ok(())
            }
            Expr::Tuple(t) => self.unpack(&t.elts, value),
            Expr::List(l) => self.unpack(&l.elts, value),
            Expr::Subscript(sub) => {
                let container = self.eval(&sub.value)?;
                let index = self.eval_index(&sub.slice)?;
                self.set_item(&container, index, value)
            }
            Expr::Attribute(_) => Err(EvalError::unsupported("attribute assignment")),
            Expr::Starred(_) => Err(EvalError::new(
                ErrorKind::SyntaxError,
                "starred assignment target must be in a list or tuple",
            )),
            _ => Err(EvalError::new(
                ErrorKind::SyntaxError,
                "cannot assign to expression",
            )),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value) -> EvalResult<()> {
        let items = self.iterate(&value)?;
        let star = targets
            .iter()
            .position(|t| matches!(t, Expr::Starred(_)));
        let fixed = targets.len() - star.map_or(0, |_| 1);
        if items.len() < fixed {
            return Err(EvalError::value_error(format!(
                "not enough values to unpack (expected {}{}, got {})",
                if star.is_some() { "at least " } else { "" },
                fixed,
                items.len()
            )));
        }
        let Some(star) = star else {
            if items.len() > targets.len() {
                return Err(EvalError::value_error(format!(
                    "too many values to unpack (expected {})",
                    targets.len()
                )));
            }
            for (target, item) in targets.iter().zip(items) {
                self.assign(target, item)?;
            }
            return Ok(());
        };
        let after = targets.len() - star - 1;
        let rest_end = items.len() - after;
        let mut items = items.into_iter();
        for target in &targets[..star] {
            let item = items.next().unwrap_or(Value::None);
            self.assign(target, item)?;
        }
        let middle: Vec<Value> = items.by_ref().take(rest_end - star).collect();
        if let Expr::Starred(inner) = &targets[star] {
            self.assign(&inner.value, Value::list(middle))?;
        }
        for target in &targets[star + 1..] {
            let item = items.next().unwrap_or(Value::None);
            self.assign(target, item)?;
        }
        Ok(())
    }

    fn delete(&mut self, target: &Expr) -> EvalResult<()> {
        match target {
            Expr::Name(name) => {
                let name = name.id.as_str();
                let removed = match self.scopes.last_mut() {
                    Some(scope) => scope.vars.remove(name),
                    None => self.globals.remove(name),
                };
                removed.map(|_| ()).ok_or_else(|| name_error(name))
            }
            Expr::Subscript(sub) => {
                let container = self.eval(&sub.value)?;
                let index = self.eval(&sub.slice)?;
                match &container {
                    Value::Dict(d) => {
                        let key = Key::new(index.clone())?;
                        d.borrow_mut()
                            .shift_remove(&key)
                            .map(|_| ())
                            .ok_or_else(|| EvalError::new(ErrorKind::KeyError, index.repr()))
                    }
                    Value::List(l) => {
                        let len = l.borrow().len();
                        let pos = normalize_index(index.as_int()?, len, "list")?;
                        l.borrow_mut().remove(pos);
                        Ok(())
                    }
                    Value::Frame(df) => {
                        let names = args::labels_of(&index)?;
                        let dropped = df.borrow().drop_columns(&names)?;
                        *df.borrow_mut() = dropped;
                        Ok(())
                    }
                    other => Err(EvalError::type_error(format!(
                        "'{}' object doesn't support item deletion",
                        other.type_name()
                    ))),
                }
            }
            _ => Err(EvalError::unsupported("this form of del")),
        }
    }

    fn store(&mut self, name: &str, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.vars.insert(name.to_string(), value);
            }
            None => {
                if name == self.output_variable {
                    self.output_assigned = true;
                }
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn lookup(&self, name: &str) -> EvalResult<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.vars.get(name) {
                return Ok(v.clone());
            }
            if scope.barrier {
                break;
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if self.policy.allows_builtin(name) {
            if let Some(v) = builtins::resolve(name) {
                return Ok(v);
            }
        }
        Err(name_error(name))
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Name(e) => self.lookup(e.id.as_str()),
            Expr::Constant(e) => constant(&e.value),
            Expr::JoinedStr(e) => self.eval_fstring(&e.values),
            Expr::FormattedValue(_) => self.eval_fstring(std::slice::from_ref(expr)),
            Expr::List(e) => Ok(Value::list(self.eval_elements(&e.elts)?)),
            Expr::Tuple(e) => Ok(Value::tuple(self.eval_elements(&e.elts)?)),
            Expr::Set(e) => {
                let items = self.eval_elements(&e.elts)?;
                let set = items
                    .into_iter()
                    .map(Key::new)
                    .collect::<EvalResult<IndexSet<Key>>>()?;
                Ok(Value::set(set))
            }
            Expr::Dict(e) => self.eval_dict(&e.keys, &e.values),
            Expr::Attribute(e) => {
                let v = self.eval(&e.value)?;
                self.get_attr(&v, e.attr.as_str())
            }
            Expr::Subscript(e) => {
                let v = self.eval(&e.value)?;
                let index = self.eval_index(&e.slice)?;
                self.get_item(&v, &index)
            }
            Expr::Slice(_) => self.eval_index(expr),
            Expr::Call(e) => self.eval_call(&e.func, &e.args, &e.keywords),
            Expr::BinOp(e) => {
                let left = self.eval(&e.left)?;
                let right = self.eval(&e.right)?;
                self.binary(left, BinOp::from(&e.op), right)
            }
            Expr::UnaryOp(e) => {
                let v = self.eval(&e.operand)?;
                self.unary(UnaryOp::from(&e.op), v)
            }
            Expr::BoolOp(e) => {
                let and = matches!(e.op, ast::BoolOp::And);
                let mut last = Value::None;
                for value in &e.values {
                    last = self.eval(value)?;
                    if last.truthy()? != and {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            Expr::Compare(e) => {
                let mut lhs = self.eval(&e.left)?;
                let mut result = Value::Bool(true);
                for (op, comparator) in e.ops.iter().zip(&e.comparators) {
                    let rhs = self.eval(comparator)?;
                    result = self.compare(&lhs, CmpOp::from(op), &rhs)?;
                    if e.ops.len() > 1 && !result.truthy()? {
                        return Ok(result);
                    }
                    lhs = rhs;
                }
                Ok(result)
            }
            Expr::IfExp(e) => {
                if self.eval(&e.test)?.truthy()? {
                    self.eval(&e.body)
                } else {
                    self.eval(&e.orelse)
                }
            }
            Expr::Lambda(e) => self.make_lambda(&e.args, &e.body),
            Expr::ListComp(e) => self.eval_comprehension(CompKind::List, &e.elt, None, &e.generators),
            Expr::GeneratorExp(e) => {
                self.eval_comprehension(CompKind::List, &e.elt, None, &e.generators)
            }
            Expr::SetComp(e) => self.eval_comprehension(CompKind::Set, &e.elt, None, &e.generators),
            Expr::DictComp(e) => {
                self.eval_comprehension(CompKind::Dict, &e.key, Some(e.value.as_ref()), &e.generators)
            }
            Expr::NamedExpr(e) => {
                let Expr::Name(target) = e.target.as_ref() else {
                    return Err(EvalError::new(
                        ErrorKind::SyntaxError,
                        "cannot use assignment expressions with this target",
                    ));
                };
                let v = self.eval(&e.value)?;
                self.store(target.id.as_str(), v.clone());
                Ok(v)
            }
            Expr::Starred(_) => Err(EvalError::new(
                ErrorKind::SyntaxError,
                "can't use starred expression here",
            )),
            Expr::Await(_) => Err(EvalError::unsupported("await")),
            Expr::Yield(_) | Expr::YieldFrom(_) => Err(EvalError::unsupported("yield")),
        }
    }

    fn eval_fstring(&mut self, parts: &[Expr]) -> EvalResult<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                Expr::Constant(c) => {
                    if let Constant::Str(text) = &c.value {
                        out.push_str(text);
                    }
                }
                Expr::FormattedValue(field) => {
                    let v = self.eval(&field.value)?;
                    let spec = match &field.format_spec {
                        Some(spec) => self.eval(spec)?.str_of(),
                        None => String::new(),
                    };
                    let conversion = match &field.conversion {
                        ConversionFlag::None => None,
                        ConversionFlag::Str => Some('s'),
                        ConversionFlag::Repr => Some('r'),
                        ConversionFlag::Ascii => Some('a'),
                    };
                    let limit = self.limits.max_collection_len;
                    out.push_str(&format::convert_and_format(&v, conversion, &spec, limit)?);
                }
                other => {
                    let v = self.eval(other)?;
                    out.push_str(&v.str_of());
                }
            }
            self.check_len(out.len())?;
        }
        Ok(Value::Str(out))
    }

    fn eval_dict(&mut self, keys: &[Option<Expr>], values: &[Expr]) -> EvalResult<Value> {
        let mut map = IndexMap::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            match key {
                Some(key) => {
                    let key = Key::new(self.eval(key)?)?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                None => {
                    let merged = self.eval(value)?;
                    let Value::Dict(d) = &merged else {
                        return Err(EvalError::type_error(format!(
                            "'{}' object is not a mapping",
                            merged.type_name()
                        )));
                    };
                    for (k, v) in d.borrow().iter() {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        self.check_len(map.len())?;
        Ok(Value::dict(map))
    }

    fn eval_index(&mut self, expr: &Expr) -> EvalResult<Value> {
        if let Expr::Slice(slice) = expr {
            let mut part = |e: &Option<Box<Expr>>| match e {
                Some(e) => self.eval(e),
                None => Ok(Value::None),
            };
            let parts = [part(&slice.lower)?, part(&slice.upper)?, part(&slice.step)?];
            return Ok(Value::Slice(Rc::new(parts)));
        }
        self.eval(expr)
    }

    fn eval_elements(&mut self, elts: &[Expr]) -> EvalResult<Vec<Value>> {
        let mut out = Vec::with_capacity(elts.len());
        for elt in elts {
            if let Expr::Starred(inner) = elt {
                let v = self.eval(&inner.value)?;
                out.extend(self.iterate(&v)?);
            } else {
                out.push(self.eval(elt)?);
            }
        }
        self.check_len(out.len())?;
        Ok(out)
    }

    fn eval_args(&mut self, args: &[Expr], keywords: &[ast::Keyword]) -> EvalResult<Args> {
        let positional = self.eval_elements(args)?;
        let mut named = Vec::with_capacity(keywords.len());
        for kw in keywords {
            let value = self.eval(&kw.value)?;
            match &kw.arg {
                Some(name) => named.push((name.as_str().to_string(), value)),
                None => {
                    let Value::Dict(d) = &value else {
                        return Err(EvalError::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            value.type_name()
                        )));
                    };
                    for (k, v) in d.borrow().iter() {
                        let Value::Str(name) = k.value() else {
                            return Err(EvalError::type_error("keywords must be strings"));
                        };
                        named.push((name.clone(), v.clone()));
                    }
                }
            }
        }
        Ok(Args::new(positional, named))
    }

    fn eval_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[ast::Keyword],
    ) -> EvalResult<Value> {
        if let Expr::Attribute(attr) = func {
            let receiver = self.eval(&attr.value)?;
            let args = self.eval_args(args, keywords)?;
            return self.call_method(&receiver, attr.attr.as_str(), args);
        }
        let callee = self.eval(func)?;
        let args = self.eval_args(args, keywords)?;
        self.call_value(&callee, args)
    }

    pub(crate) fn call_value(&mut self, callee: &Value, args: Args) -> EvalResult<Value> {
        match callee {
            Value::Callable(Callable::Builtin(name)) | Value::Type(name) => {
                builtins::call(self, name, args)
            }
            Value::Callable(Callable::Library(module, name)) => {
                library::call(self, *module, name, args)
            }
            Value::Callable(Callable::Method { receiver, name }) => {
                self.call_method(receiver, name, args)
            }
            Value::Callable(Callable::Lambda(lambda)) => self.call_lambda(lambda, args),
            other => Err(EvalError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn call_method(&mut self, receiver: &Value, name: &str, args: Args) -> EvalResult<Value> {
        if SafetyPolicy::is_dunder(name) || self.policy.is_blocked_method(name) {
            return Err(EvalError::new(
                ErrorKind::AttributeError,
                format!("'{}' is not available in the sandbox", name),
            ));
        }
        match receiver {
            Value::Module(module) => library::call(self, *module, name, args),
            v if tabular::is_tabular(v) => tabular::call_method(self, receiver, name, args),
            _ => methods::call(self, receiver, name, args),
        }
    }

    /// Call a one-argument function; used by `apply`, `map` and sort keys
    pub(crate) fn call1(&mut self, callee: &Value, arg: Value) -> EvalResult<Value> {
        self.call_value(callee, Args::positional(vec![arg]))
    }

    fn make_lambda(&mut self, params: &ast::Arguments, body: &Expr) -> EvalResult<Value> {
        if params.vararg.is_some() || params.kwarg.is_some() || !params.kwonlyargs.is_empty() {
            return Err(EvalError::unsupported("lambda with *args or keyword-only parameters"));
        }
        let mut captured = HashMap::new();
        for scope in self.scopes.iter().rev() {
            for (k, v) in &scope.vars {
                captured.entry(k.clone()).or_insert_with(|| v.clone());
            }
            if scope.barrier {
                break;
            }
        }
        let mut bound = Vec::with_capacity(params.args.len());
        for param in params.posonlyargs.iter().chain(&params.args) {
            let default = match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            };
            bound.push((param.def.arg.as_str().to_string(), default));
        }
        Ok(Value::Callable(Callable::Lambda(Rc::new(Lambda {
            params: bound,
            body: Rc::new(body.clone()),
            captured,
        }))))
    }

    fn call_lambda(&mut self, lambda: &Lambda, args: Args) -> EvalResult<Value> {
        if self.depth >= self.limits.max_call_depth {
            return Err(EvalError::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        if args.positional.len() > lambda.params.len() {
            return Err(EvalError::type_error(format!(
                "<lambda>() takes {} positional arguments but {} were given",
                lambda.params.len(),
                args.positional.len()
            )));
        }
        if let Some((name, _)) = args
            .keywords
            .iter()
            .find(|(k, _)| !lambda.params.iter().any(|(p, _)| p == k))
        {
            return Err(EvalError::type_error(format!(
                "<lambda>() got an unexpected keyword argument '{}'",
                name
            )));
        }
        let mut vars = lambda.captured.clone();
        for (i, (name, default)) in lambda.params.iter().enumerate() {
            let value = args
                .positional
                .get(i)
                .or_else(|| args.kw(name))
                .or(default.as_ref())
                .cloned()
                .ok_or_else(|| {
                    EvalError::type_error(format!(
                        "<lambda>() missing 1 required positional argument: '{}'",
                        name
                    ))
                })?;
            vars.insert(name.clone(), value);
        }
        self.depth += 1;
        self.scopes.push(Scope {
            vars,
            barrier: true,
        });
        let out = self.eval(&lambda.body);
        self.scopes.pop();
        self.depth -= 1;
        out
    }

    fn eval_comprehension(
        &mut self,
        kind: CompKind,
        element: &Expr,
        value: Option<&Expr>,
        generators: &[ast::Comprehension],
    ) -> EvalResult<Value> {
        let mut items = Vec::new();
        let mut pairs = Vec::new();
        self.scopes.push(Scope {
            vars: HashMap::new(),
            barrier: false,
        });
        let outcome = self.comprehension_level(generators, element, value, &mut items, &mut pairs);
        self.scopes.pop();
        outcome?;
        Ok(match kind {
            CompKind::List => Value::list(items),
            CompKind::Set => Value::set(
                items
                    .into_iter()
                    .map(Key::new)
                    .collect::<EvalResult<IndexSet<Key>>>()?,
            ),
            CompKind::Dict => Value::dict(pairs.into_iter().collect()),
        })
    }

    fn comprehension_level(
        &mut self,
        generators: &[ast::Comprehension],
        element: &Expr,
        value: Option<&Expr>,
        items: &mut Vec<Value>,
        pairs: &mut Vec<(Key, Value)>,
    ) -> EvalResult<()> {
        let Some((generator, rest)) = generators.split_first() else {
            match value {
                Some(value) => {
                    let key = Key::new(self.eval(element)?)?;
                    let value = self.eval(value)?;
                    pairs.push((key, value));
                }
                None => {
                    let item = self.eval(element)?;
                    items.push(item);
                }
            }
            return self.check_len(items.len() + pairs.len());
        };
        if generator.is_async {
            return Err(EvalError::unsupported("async comprehension"));
        }
        let iterable = self.eval(&generator.iter)?;
        'items: for item in self.iterate(&iterable)? {
            self.tick()?;
            self.assign(&generator.target, item)?;
            for cond in &generator.ifs {
                if !self.eval(cond)?.truthy()? {
                    continue 'items;
                }
            }
            self.comprehension_level(rest, element, value, items, pairs)?;
        }
        Ok(())
    }

    /// Materialize an iterable
    pub(crate) fn iterate(&mut self, value: &Value) -> EvalResult<Vec<Value>> {
        let items = match value {
            Value::List(l) => l.borrow().clone(),
            Value::Tuple(t) => t.to_vec(),
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            Value::Dict(d) => d.borrow().keys().map(|k| k.value().clone()).collect(),
            Value::Set(s) => s.borrow().iter().map(|k| k.value().clone()).collect(),
            Value::Range { start, step, .. } => {
                let n = range_len(value)?;
                self.check_len(n)?;
                (0..n).map(|i| Value::Int(range_item(*start, *step, i))).collect()
            }
            Value::Frame(df) => df
                .borrow()
                .column_names()
                .into_iter()
                .map(Value::Str)
                .collect(),
            Value::Series(s) => s.values().iter().map(Value::from_cell).collect(),
            Value::Index(labels) => labels.iter().map(Value::from_cell).collect(),
            Value::GroupBy(g) => tabular::group_items(g)?,
            other => {
                return Err(EvalError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        };
        Ok(items)
    }

    pub(crate) fn tick(&mut self) -> EvalResult<()> {
        self.ticks += 1;
        if self.ticks > self.limits.max_loop_iterations {
            return Err(EvalError::new(
                ErrorKind::ResourceLimitError,
                format!(
                    "iteration budget of {} exceeded",
                    self.limits.max_loop_iterations
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn check_len(&self, len: usize) -> EvalResult<()> {
        if len > self.limits.max_collection_len {
            return Err(EvalError::new(
                ErrorKind::ResourceLimitError,
                format!(
                    "collection of {} items exceeds the limit of {}",
                    len, self.limits.max_collection_len
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    pub(crate) fn warn_all(&mut self, messages: Vec<String>) {
        for message in messages {
            self.warn(message);
        }
    }

    pub(crate) fn print(&mut self, text: &str) {
        if self.stdout_truncated {
            return;
        }
        if self.stdout.len() + text.len() > MAX_STDOUT_BYTES {
            self.stdout.push_str("\n... output truncated ...\n");
            self.stdout_truncated = true;
            return;
        }
        self.stdout.push_str(text);
    }

    pub(crate) fn binary(&mut self, left: Value, op: BinOp, right: Value) -> EvalResult<Value> {
        if tabular::is_vector(&left) || tabular::is_vector(&right) {
            return tabular::binary(self, &left, op, &right);
        }
        match (op, &left, &right) {
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                self.check_len(items.len())?;
                Ok(Value::list(items))
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                let mut items = a.to_vec();
                items.extend(b.iter().cloned());
                self.check_len(items.len())?;
                Ok(Value::tuple(items))
            }
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                self.check_len(a.len() + b.len())?;
                Ok(Value::Str(format!("{}{}", a, b)))
            }
            (BinOp::Mult, seq, Value::Int(_) | Value::Bool(_))
                if matches!(seq, Value::List(_) | Value::Tuple(_) | Value::Str(_)) =>
            {
                self.repeat(seq, right.as_int()?)
            }
            (BinOp::Mult, Value::Int(_) | Value::Bool(_), seq)
                if matches!(seq, Value::List(_) | Value::Tuple(_) | Value::Str(_)) =>
            {
                self.repeat(seq, left.as_int()?)
            }
            (BinOp::Mod, Value::Str(template), _) => {
                let out = format::percent_format(template, &right, self.limits.max_collection_len)?;
                self.check_len(out.len())?;
                Ok(Value::Str(out))
            }
            (BinOp::BitOr | BinOp::BitAnd | BinOp::BitXor | BinOp::Sub, Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                let out: IndexSet<Key> = match op {
                    BinOp::BitOr => a.union(&b).cloned().collect(),
                    BinOp::BitAnd => a.intersection(&b).cloned().collect(),
                    BinOp::BitXor => a.symmetric_difference(&b).cloned().collect(),
                    _ => a.difference(&b).cloned().collect(),
                };
                Ok(Value::set(out))
            }
            (BinOp::BitOr | BinOp::BitAnd | BinOp::BitXor, Value::Bool(a), Value::Bool(b)) => {
                Ok(Value::Bool(match op {
                    BinOp::BitOr => a | b,
                    BinOp::BitAnd => a & b,
                    _ => a ^ b,
                }))
            }
            (
                BinOp::BitOr | BinOp::BitAnd | BinOp::BitXor | BinOp::LShift | BinOp::RShift,
                Value::Int(_) | Value::Bool(_),
                Value::Int(_) | Value::Bool(_),
            ) => int_bitwise(left.as_int()?, op, right.as_int()?),
            (BinOp::MatMult, _, _) => Err(EvalError::unsupported("matrix multiplication")),
            _ if left.is_number() && right.is_number() => {
                let Some(arith) = arith_op(op) else {
                    return Err(unsupported_operands(op, &left, &right));
                };
                let cell = arith_cells(&left.to_cell()?, arith, &right.to_cell()?, None)?;
                Ok(Value::from_cell(&cell))
            }
            _ => Err(unsupported_operands(op, &left, &right)),
        }
    }

    fn repeat(&mut self, seq: &Value, times: i64) -> EvalResult<Value> {
        let times = times.max(0) as usize;
        match seq {
            Value::Str(s) => {
                self.check_len(s.len().saturating_mul(times))?;
                Ok(Value::Str(s.repeat(times)))
            }
            Value::List(l) => {
                let items = l.borrow();
                self.check_len(items.len().saturating_mul(times))?;
                Ok(Value::list(repeat_items(&items, times)))
            }
            Value::Tuple(t) => {
                self.check_len(t.len().saturating_mul(times))?;
                Ok(Value::tuple(repeat_items(t, times)))
            }
            other => Err(EvalError::type_error(format!(
                "can't multiply sequence of type '{}'",
                other.type_name()
            ))),
        }
    }

    fn unary(&mut self, op: UnaryOp, value: Value) -> EvalResult<Value> {
        if op != UnaryOp::Not && tabular::is_vector(&value) {
            return tabular::unary(op, &value);
        }
        match (op, &value) {
            (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy()?)),
            (UnaryOp::Neg, Value::Int(i)) => Ok(i
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Float(-(*i as f64)))),
            (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-(*b as i64))),
            (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
            (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
            (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(value.clone()),
            (UnaryOp::Invert, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(!value.as_int()?)),
            (op, v) => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Pos => "+",
                    _ => "~",
                };
                Err(EvalError::type_error(format!(
                    "bad operand type for unary {}: '{}'",
                    symbol,
                    v.type_name()
                )))
            }
        }
    }

    pub(crate) fn compare(&mut self, left: &Value, op: CmpOp, right: &Value) -> EvalResult<Value> {
        let result = match op {
            CmpOp::In => self.contains(right, left)?,
            CmpOp::NotIn => !self.contains(right, left)?,
            CmpOp::Is => identical(left, right),
            CmpOp::IsNot => !identical(left, right),
            _ if tabular::is_vector(left) || tabular::is_vector(right) => {
                return tabular::compare(left, op, right)
            }
            CmpOp::Eq => py_eq(left, right)?,
            CmpOp::NotEq => !py_eq(left, right)?,
            _ => {
                let is_nan = |v: &Value| matches!(v, Value::Float(x) if x.is_nan());
                if left.is_number() && right.is_number() && (is_nan(left) || is_nan(right)) {
                    false
                } else {
                    let ord = py_cmp(left, right).map_err(|_| {
                        EvalError::type_error(format!(
                            "'{}' not supported between instances of '{}' and '{}'",
                            op,
                            left.type_name(),
                            right.type_name()
                        ))
                    })?;
                    match op {
                        CmpOp::Lt => ord.is_lt(),
                        CmpOp::LtE => ord.is_le(),
                        CmpOp::Gt => ord.is_gt(),
                        _ => ord.is_ge(),
                    }
                }
            }
        };
        Ok(Value::Bool(result))
    }

    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> EvalResult<bool> {
        match container {
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.contains(needle.as_str())),
                other => Err(EvalError::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(l) => any_equal(&l.borrow(), item),
            Value::Tuple(t) => any_equal(t, item),
            Value::Dict(d) => Ok(d.borrow().contains_key(&Key::new(item.clone())?)),
            Value::Set(s) => Ok(s.borrow().contains(&Key::new(item.clone())?)),
            Value::Range { start, stop, step } => {
                let Ok(n) = item.as_int() else {
                    return Ok(false);
                };
                let len = range_count(*start, *stop, *step);
                let (offset, step) = (n as i128 - *start as i128, *step as i128);
                Ok(offset % step == 0 && (0..len).contains(&(offset / step)))
            }
            Value::Frame(df) => Ok(match item {
                Value::Str(name) => df.borrow().has_column(name),
                _ => false,
            }),
            Value::Series(s) => Ok(s.index.position(&item.to_cell()?).is_some()),
            Value::Index(labels) => {
                let cell = item.to_cell()?;
                Ok(labels.iter().any(|l| l.loose_eq(&cell)))
            }
            other => Err(EvalError::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn get_attr(&mut self, value: &Value, attr: &str) -> EvalResult<Value> {
        if SafetyPolicy::is_dunder(attr) {
            return Err(EvalError::attribute(value.type_name(), attr));
        }
        match value {
            Value::Module(module) => library::attr(*module, attr),
            v if tabular::is_tabular(v) => tabular::attr(self, value, attr),
            v if methods::has_method(v, attr) => Ok(Value::Callable(Callable::Method {
                receiver: Box::new(value.clone()),
                name: attr.to_string(),
            })),
            _ => Err(EvalError::attribute(value.type_name(), attr)),
        }
    }

    pub(crate) fn get_item(&mut self, container: &Value, index: &Value) -> EvalResult<Value> {
        match container {
            Value::List(l) => {
                let items = l.borrow();
                match index {
                    Value::Slice(parts) => Ok(Value::list(take_slice(&items, parts)?)),
                    _ => {
                        let pos = normalize_index(seq_index(index, "list")?, items.len(), "list")?;
                        Ok(items[pos].clone())
                    }
                }
            }
            Value::Tuple(items) => match index {
                Value::Slice(parts) => Ok(Value::tuple(take_slice(items, parts)?)),
                _ => {
                    let pos = normalize_index(seq_index(index, "tuple")?, items.len(), "tuple")?;
                    Ok(items[pos].clone())
                }
            },
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                match index {
                    Value::Slice(parts) => {
                        let (start, stop, step) = slice_bounds(parts)?;
                        let picked = slice_indices(chars.len(), start, stop, step)?;
                        Ok(Value::Str(picked.into_iter().map(|i| chars[i]).collect()))
                    }
                    _ => {
                        let pos = normalize_index(seq_index(index, "string")?, chars.len(), "string")?;
                        Ok(Value::Str(chars[pos].to_string()))
                    }
                }
            }
            Value::Dict(d) => {
                let key = Key::new(index.clone())?;
                d.borrow()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| EvalError::new(ErrorKind::KeyError, index.repr()))
            }
            Value::Range { start, step, .. } => {
                let len = range_len(container)?;
                match index {
                    Value::Slice(parts) => {
                        let (lo, hi, st) = slice_bounds(parts)?;
                        let picked = slice_indices(len, lo, hi, st)?;
                        self.check_len(picked.len())?;
                        Ok(Value::list(
                            picked
                                .into_iter()
                                .map(|i| Value::Int(range_item(*start, *step, i)))
                                .collect(),
                        ))
                    }
                    _ => {
                        let pos = normalize_index(seq_index(index, "range")?, len, "range object")?;
                        Ok(Value::Int(range_item(*start, *step, pos)))
                    }
                }
            }
            v if tabular::is_tabular(v) => tabular::get_item(self, container, index),
            other => Err(EvalError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn set_item(&mut self, container: &Value, index: Value, value: Value) -> EvalResult<()> {
        match container {
            Value::List(l) => match &index {
                Value::Slice(parts) => {
                    let (start, stop, step) = slice_bounds(parts)?;
                    if step.unwrap_or(1) != 1 {
                        return Err(EvalError::unsupported("extended slice assignment"));
                    }
                    let replacement = self.iterate(&value)?;
                    let mut items = l.borrow_mut();
                    let picked = slice_indices(items.len(), start, stop, None)?;
                    let lo = picked.first().copied().unwrap_or_else(|| {
                        start
                            .map(|s| if s < 0 { (s + items.len() as i64).max(0) } else { s })
                            .unwrap_or(0)
                            .min(items.len() as i64) as usize
                    });
                    let hi = picked.last().map(|p| p + 1).unwrap_or(lo);
                    if items.len() - (hi - lo) + replacement.len() > self.limits.max_collection_len {
                        return Err(EvalError::new(
                            ErrorKind::ResourceLimitError,
                            "list assignment exceeds the collection limit",
                        ));
                    }
                    items.splice(lo..hi, replacement);
                    Ok(())
                }
                _ => {
                    let mut items = l.borrow_mut();
                    let pos = normalize_index(seq_index(&index, "list")?, items.len(), "list assignment")?;
                    items[pos] = value;
                    Ok(())
                }
            },
            Value::Dict(d) => {
                let key = Key::new(index)?;
                let len = d.borrow().len();
                self.check_len(len + 1)?;
                d.borrow_mut().insert(key, value);
                Ok(())
            }
            v if tabular::is_tabular(v) => tabular::set_item(self, container, index, value),
            other => Err(EvalError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }
}

fn constant(c: &Constant) -> EvalResult<Value> {
    Ok(match c {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(i.to_string().parse().map_err(|_| {
            EvalError::new(
                ErrorKind::OverflowError,
                format!("integer literal {} does not fit in 64 bits", i),
            )
        })?),
        Constant::Float(x) => Value::Float(*x),
        Constant::Str(s) => Value::Str(s.clone()),
        Constant::Tuple(items) => Value::tuple(items.iter().map(constant).collect::<EvalResult<_>>()?),
        Constant::Bytes(_) => return Err(EvalError::unsupported("bytes literal")),
        Constant::Complex { .. } => return Err(EvalError::unsupported("complex literal")),
        Constant::Ellipsis => return Err(EvalError::unsupported("Ellipsis")),
    })
}

fn any_equal(items: &[Value], item: &Value) -> EvalResult<bool> {
    for v in items {
        if py_eq(v, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn name_error(name: &str) -> EvalError {
    EvalError::new(
        ErrorKind::NameError,
        format!("name '{}' is not defined", name),
    )
}

fn unsupported_operands(op: BinOp, left: &Value, right: &Value) -> EvalError {
    EvalError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

pub(crate) fn arith_op(op: BinOp) -> Option<ArithOp> {
    Some(match op {
        BinOp::Add => ArithOp::Add,
        BinOp::Sub => ArithOp::Sub,
        BinOp::Mult => ArithOp::Mul,
        BinOp::Div => ArithOp::Div,
        BinOp::FloorDiv => ArithOp::FloorDiv,
        BinOp::Mod => ArithOp::Mod,
        BinOp::Pow => ArithOp::Pow,
        _ => return None,
    })
}

fn int_bitwise(a: i64, op: BinOp, b: i64) -> EvalResult<Value> {
    let overflow = || EvalError::value_error("integer overflow in shift");
    Ok(Value::Int(match op {
        BinOp::BitOr => a | b,
        BinOp::BitAnd => a & b,
        BinOp::BitXor => a ^ b,
        BinOp::LShift | BinOp::RShift if b < 0 => {
            return Err(EvalError::value_error("negative shift count"))
        }
        BinOp::LShift => {
            if b >= 64 && a != 0 {
                return Err(overflow());
            }
            i64::try_from((a as i128) << b.min(63)).map_err(|_| overflow())?
        }
        _ => a >> b.min(63),
    }))
}

fn repeat_items(items: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend(items.iter().cloned());
    }
    out
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Frame(x), Value::Frame(y)) => Rc::ptr_eq(x, y),
        (Value::Series(x), Value::Series(y)) => Rc::ptr_eq(x, y),
        (Value::Type(x), Value::Type(y)) => x == y,
        (Value::Module(x), Value::Module(y)) => x == y,
        _ => false,
    }
}

fn seq_index(index: &Value, what: &str) -> EvalResult<i64> {
    match index {
        Value::Int(_) | Value::Bool(_) => index.as_int(),
        other => Err(EvalError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            what,
            other.type_name()
        ))),
    }
}

pub(crate) fn normalize_index(index: i64, len: usize, what: &str) -> EvalResult<usize> {
    let n = len as i64;
    let pos = if index < 0 { index + n } else { index };
    if pos < 0 || pos >= n {
        return Err(EvalError::new(
            ErrorKind::IndexError,
            format!("{} index out of range", what),
        ));
    }
    Ok(pos as usize)
}

pub(crate) fn slice_bounds(parts: &[Value; 3]) -> EvalResult<(Option<i64>, Option<i64>, Option<i64>)> {
    let bound = |v: &Value| match v {
        Value::None => Ok(None),
        Value::Int(_) | Value::Bool(_) => v.as_int().map(Some),
        other => Err(EvalError::type_error(format!(
            "slice indices must be integers or None, not {}",
            other.type_name()
        ))),
    };
    Ok((bound(&parts[0])?, bound(&parts[1])?, bound(&parts[2])?))
}

fn take_slice(items: &[Value], parts: &[Value; 3]) -> EvalResult<Vec<Value>> {
    let (start, stop, step) = slice_bounds(parts)?;
    Ok(slice_indices(items.len(), start, stop, step)?
        .into_iter()
        .map(|i| items[i].clone())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Cell, DataFrame};
    use crate::syntax::parse;

    fn run_with(code: &str, limits: Limits) -> EvalResult<Interpreter> {
        let program = parse(code).expect("parses");
        let mut interp = Interpreter::new(SafetyPolicy::standard(), limits, "result");
        interp.bind("result", Value::None);
        let df = DataFrame::new(vec![
            (
                "Region".to_string(),
                vec!["West".into(), "East".into(), "West".into()],
            ),
            (
                "Sales".to_string(),
                vec![Cell::Int(100), Cell::Int(250), Cell::Int(50)],
            ),
        ])
        .expect("frame");
        interp.bind("df", Value::frame(df));
        interp.bind("pd", Value::Module(ModuleKind::Pandas));
        interp.bind("np", Value::Module(ModuleKind::Numpy));
        interp.run(&program)?;
        Ok(interp)
    }

    fn run(code: &str) -> EvalResult<Interpreter> {
        run_with(code, Limits::default())
    }

    fn result_of(code: &str) -> Value {
        run(code).unwrap().get("result").cloned().unwrap()
    }

    #[test]
    fn test_arithmetic_and_output_tracking() {
        let interp = run("x = 2 + 3 * 4\nresult = x ** 2 // 7").unwrap();
        assert!(interp.output_assigned());
        assert!(matches!(interp.get("result"), Some(Value::Int(28))));
        assert!(!run("x = 1").unwrap().output_assigned());
    }

    #[test]
    fn test_control_flow() {
        let code = "total = 0\nfor i in range(10):\n    if i % 2:\n        continue\n    if i > 6:\n        break\n    total += i\nelse:\n    total = -1\nresult = total";
        assert!(matches!(result_of(code), Value::Int(12)));
        let code = "n = 0\nwhile n < 5:\n    n += 1\nelse:\n    n *= 10\nresult = n";
        assert!(matches!(result_of(code), Value::Int(50)));
    }

    #[test]
    fn test_comprehensions_and_lambdas() {
        let v = result_of("result = sorted([x * x for x in range(5) if x != 2], key=lambda v: -v)");
        assert_eq!(v.repr(), "[16, 9, 1, 0]");
        let v = result_of("pairs = {k: len(k) for k in ['a', 'bbb']}\nresult = pairs['bbb']");
        assert!(matches!(v, Value::Int(3)));
        let v = result_of("scale = 3\nf = lambda x, k=2: x * k * scale\nresult = (f(1), f(1, k=5))");
        assert_eq!(v.repr(), "(6, 15)");
    }

    #[test]
    fn test_comprehension_variables_do_not_leak() {
        let err = run("ys = [x for x in range(3)]\nresult = x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NameError);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_unpacking() {
        let v = result_of("a, *rest, b = [1, 2, 3, 4]\nresult = (a, rest, b)");
        assert_eq!(v.repr(), "(1, [2, 3], 4)");
        let err = run("a, b = [1, 2, 3]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
    }

    #[test]
    fn test_strings_and_formatting() {
        let v = result_of("name = 'West'\nresult = f\"{name!r}: {1234.5:,.1f}\" + ' ' + 'x' * 3");
        assert_eq!(v.str_of(), "'West': 1,234.5 xxx");
        let v = result_of("result = '%s has %d rows' % ('df', 3)");
        assert_eq!(v.str_of(), "df has 3 rows");
    }

    #[test]
    fn test_runtime_errors_carry_kind_and_line() {
        let err = run("x = 1\ny = x / 0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivisionError);
        assert_eq!(err.line, Some(2));
        assert_eq!(run("result = [1][5]").unwrap_err().kind, ErrorKind::IndexError);
        assert_eq!(run("result = {'a': 1}['b']").unwrap_err().kind, ErrorKind::KeyError);
        assert_eq!(run("result = 'a' + 1").unwrap_err().kind, ErrorKind::TypeError);
        assert_eq!(run("result = 'x'.nope()").unwrap_err().kind, ErrorKind::AttributeError);
    }

    #[test]
    fn test_budgets() {
        let limits = Limits {
            max_loop_iterations: 100,
            ..Limits::default()
        };
        let err = run_with("while True:\n    pass", limits).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimitError);
        let limits = Limits {
            max_collection_len: 10,
            ..Limits::default()
        };
        let err = run_with("result = [0] * 11", limits).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimitError);
        let limits = Limits {
            max_call_depth: 20,
            ..Limits::default()
        };
        let err = run_with("f = lambda n: f(n + 1)\nresult = f(0)", limits).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
    }

    #[test]
    fn test_forbidden_statements_when_unvalidated() {
        let err = run("import os").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotImplementedError);
        let err = run("result = open('x')").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NameError);
        let err = run("result = df.to_csv('out.csv')").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttributeError);
    }

    #[test]
    fn test_print_goes_to_stdout() {
        let interp = run("print('a', 1, sep='-')\nprint([1, 2])\nresult = None").unwrap();
        assert_eq!(interp.stdout(), "a-1\n[1, 2]\n");
    }

    #[test]
    fn test_list_mutation_and_aliasing() {
        let v = result_of("a = [3, 1]\nb = a\nb += [2]\na.sort()\nresult = b");
        assert_eq!(v.repr(), "[1, 2, 3]");
        let v = result_of("d = {}\nd['x'] = 1\nd['x'] += 4\nresult = d");
        assert_eq!(v.repr(), "{'x': 5}");
    }

    #[test]
    fn test_membership_and_identity() {
        let v = result_of("result = (3 in range(0, 10, 3), 'Sales' in df, None is None, 'b' not in 'abc')");
        assert_eq!(v.repr(), "(True, True, True, False)");
    }

    #[test]
    fn test_cyclic_containers_compare_and_print() {
        let v = result_of("x = {}\nx['a'] = x\nresult = (x == x, repr(x))");
        assert_eq!(v.repr(), "(True, \"{'a': {...}}\")");
        let err = run("a = [1]\na.append(a)\nb = [1]\nb.append(b)\nresult = a == b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
    }

    #[test]
    fn test_large_ranges() {
        let v = result_of("result = range(10**18) == range(10**18)");
        assert!(matches!(v, Value::Bool(true)));
        let v = result_of("r = range(0, 10**18, 7)\nresult = (r[-1], 14 in r, bool(r))");
        assert_eq!(v.repr(), "(999999999999999999, True, True)");
        let err = run("result = len(range(-9223372036854775807, 9223372036854775807))").unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
    }

    #[test]
    fn test_integer_edge_cases() {
        let v = result_of("result = (-9223372036854775807 - 1) // -1");
        assert!(matches!(v, Value::Float(x) if x == 9.223372036854776e18));
        let v = result_of("result = (-9223372036854775807 - 1) % -1");
        assert!(matches!(v, Value::Int(0)));
        let err = run("result = 99999999999999999999").unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
    }

    #[test]
    fn test_format_widths_are_bounded() {
        let err = run("result = f'{1:>100000000000}'").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimitError);
        let err = run("result = f'{3.14159:.1000000000f}'").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimitError);
        let v = result_of("w = 6\nresult = f'{42:>{w}}|{{x}}'");
        assert_eq!(v.str_of(), "    42|{x}");
    }

    #[test]
    fn test_dict_unpacking_and_walrus() {
        let v = result_of("a = {'x': 1}\nb = {**a, 'y': 2}\nresult = (b, (n := 3) + n)");
        assert_eq!(v.repr(), "({'x': 1, 'y': 2}, 6)");
    }
}
