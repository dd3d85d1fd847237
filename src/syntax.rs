//! Snippet parsing.
//!
//! Snippets are parsed with `rustpython-parser` into its Python AST. The
//! analyzer and the interpreter both walk that tree; this module adds the
//! byte-offset to line mapping they report errors with, and small operator
//! enums the evaluator dispatches on.

use rustpython_parser::ast::{self, Ranged};
use rustpython_parser::Parse;
use std::fmt;

/// A parsed snippet
#[derive(Debug, Clone)]
pub struct Program {
    pub body: ast::Suite,
    pub lines: LineIndex,
}

/// A snippet that failed to parse
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxIssue {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

impl std::error::Error for SyntaxIssue {}

pub fn parse(source: &str) -> Result<Program, SyntaxIssue> {
    let lines = LineIndex::new(source);
    match ast::Suite::parse(source, "<snippet>") {
        Ok(body) => Ok(Program { body, lines }),
        Err(err) => Err(SyntaxIssue {
            message: err.error.to_string(),
            line: lines.line_of(usize::from(err.offset)),
        }),
    }
}

/// Start offsets of every line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// 1-based line holding a byte offset
    pub fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i.max(1),
        }
    }

    pub fn line_at<T: Ranged>(&self, node: &T) -> usize {
        self.line_of(usize::from(node.range().start()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mult => "*",
            BinOp::MatMult => "@",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }
}

impl From<&ast::Operator> for BinOp {
    fn from(op: &ast::Operator) -> Self {
        match op {
            ast::Operator::Add => BinOp::Add,
            ast::Operator::Sub => BinOp::Sub,
            ast::Operator::Mult => BinOp::Mult,
            ast::Operator::MatMult => BinOp::MatMult,
            ast::Operator::Div => BinOp::Div,
            ast::Operator::Mod => BinOp::Mod,
            ast::Operator::Pow => BinOp::Pow,
            ast::Operator::LShift => BinOp::LShift,
            ast::Operator::RShift => BinOp::RShift,
            ast::Operator::BitOr => BinOp::BitOr,
            ast::Operator::BitXor => BinOp::BitXor,
            ast::Operator::BitAnd => BinOp::BitAnd,
            ast::Operator::FloorDiv => BinOp::FloorDiv,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

impl From<&ast::UnaryOp> for UnaryOp {
    fn from(op: &ast::UnaryOp) -> Self {
        match op {
            ast::UnaryOp::Not => UnaryOp::Not,
            ast::UnaryOp::USub => UnaryOp::Neg,
            ast::UnaryOp::UAdd => UnaryOp::Pos,
            ast::UnaryOp::Invert => UnaryOp::Invert,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl From<&ast::CmpOp> for CmpOp {
    fn from(op: &ast::CmpOp) -> Self {
        match op {
            ast::CmpOp::Eq => CmpOp::Eq,
            ast::CmpOp::NotEq => CmpOp::NotEq,
            ast::CmpOp::Lt => CmpOp::Lt,
            ast::CmpOp::LtE => CmpOp::LtE,
            ast::CmpOp::Gt => CmpOp::Gt,
            ast::CmpOp::GtE => CmpOp::GtE,
            ast::CmpOp::Is => CmpOp::Is,
            ast::CmpOp::IsNot => CmpOp::IsNot,
            ast::CmpOp::In => CmpOp::In,
            ast::CmpOp::NotIn => CmpOp::NotIn,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reports_lines() {
        let program = parse("x = 1\n\ny = x + 2\n").unwrap();
        assert_eq!(program.body.len(), 2);
        assert_eq!(program.lines.line_at(&program.body[1]), 3);
        let err = parse("x = 1\ny = (\n").unwrap_err();
        assert!(err.line >= 2);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_line_index() {
        let lines = LineIndex::new("ab\ncd\n");
        assert_eq!(lines.line_of(0), 1);
        assert_eq!(lines.line_of(2), 1);
        assert_eq!(lines.line_of(3), 2);
        assert_eq!(lines.line_of(6), 3);
    }

    #[test]
    fn test_operators_lower() {
        assert_eq!(BinOp::from(&ast::Operator::FloorDiv).symbol(), "//");
        assert_eq!(CmpOp::from(&ast::CmpOp::NotIn).to_string(), "not in");
        assert_eq!(UnaryOp::from(&ast::UnaryOp::USub), UnaryOp::Neg);
    }
}
