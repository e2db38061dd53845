//! Boolean expression DSL evaluated against observation fields.
//!
//! Grammar (precedence low -> high):
//!
//! ```text
//! expr     := or_expr
//! or_expr  := and_expr (OR and_expr)*
//! and_expr := not_expr (AND not_expr)*
//! not_expr := NOT not_expr | cmp
//! cmp      := operand (op operand)? | '(' expr ')' | macro
//! op       := = != > >= < <= IN | NOT IN | CONTAINS | STARTS_WITH
//!           | ENDS_WITH | EXISTS | NOT EXISTS
//! operand  := field.path | "string" | number | [list, literal]
//! ```
//!
//! Expression failures are never fatal to filtering: a parse error bypasses
//! the expression stage entirely and an evaluation error falls through to
//! the list-based rules.

mod eval;
mod lexer;
mod parser;

pub use eval::evaluate;
pub use parser::parse;

/// Literal values and resolved field values inside an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<ExprValue>),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    Exists,
    NotExists,
}

impl CmpOp {
    /// Operators that take no right-hand operand.
    pub fn is_unary(self) -> bool {
        matches!(self, CmpOp::Exists | CmpOp::NotExists)
    }
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::In => "IN",
            CmpOp::NotIn => "NOT IN",
            CmpOp::Contains => "CONTAINS",
            CmpOp::StartsWith => "STARTS_WITH",
            CmpOp::EndsWith => "ENDS_WITH",
            CmpOp::Exists => "EXISTS",
            CmpOp::NotExists => "NOT EXISTS",
        };
        write!(f, "{}", s)
    }
}

/// Macros with fixed semantics over the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroName {
    /// severity = CRITICAL
    IsCritical,
    /// severity >= HIGH
    IsHigh,
    /// category = "security"
    IsSecurity,
    /// category = "compliance"
    IsCompliance,
}

impl MacroName {
    pub fn parse(name: &str) -> Option<MacroName> {
        match name {
            "is_critical" => Some(MacroName::IsCritical),
            "is_high" => Some(MacroName::IsHigh),
            "is_security" => Some(MacroName::IsSecurity),
            "is_compliance" => Some(MacroName::IsCompliance),
            _ => None,
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(ExprValue),
    /// Dotted field path resolved against the observation's JSON view.
    Field(String),
    Comparison {
        op: CmpOp,
        left: Box<Expr>,
        /// `None` for the unary EXISTS / NOT EXISTS forms.
        right: Option<Box<Expr>>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Macro(MacroName),
}

/// Errors from parsing or evaluating an expression.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ExpressionError {
    #[error("lex error at byte {0}: {1}")]
    Lex(usize, String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("nil operand for operator {0}")]
    NilOperand(CmpOp),

    #[error("operator {0} requires a list operand")]
    ListRequired(CmpOp),

    #[error("cannot compare {0} values with {1}")]
    Incomparable(&'static str, CmpOp),
}
