//! Recursive-descent parser for the filter expression DSL.
//!
//! Kept hand-written to preserve exact operator precedence and the
//! two-token lookahead for `NOT IN` / `NOT EXISTS`, which must win over the
//! single-word forms.

use super::lexer::{tokenize, Token};
use super::{CmpOp, Expr, ExprValue, ExpressionError, MacroName};

/// Parse an expression string into an AST.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(ExpressionError::Parse(format!(
            "unexpected trailing token {:?}",
            tok
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(ref tok) if tok == expected => Ok(()),
            other => Err(ExpressionError::Parse(format!(
                "expected {:?} {} but found {:?}",
                expected, context, other
            ))),
        }
    }

    /// or_expr := and_expr (OR and_expr)*
    fn or_expr(&mut self) -> Result<Expr, ExpressionError> {
        let first = self.and_expr()?;
        let mut operands = vec![first];
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            operands.push(self.and_expr()?);
        }
        if operands.len() == 1 {
            Ok(operands.remove(0))
        } else {
            Ok(Expr::Or(operands))
        }
    }

    /// and_expr := not_expr (AND not_expr)*
    fn and_expr(&mut self) -> Result<Expr, ExpressionError> {
        let first = self.not_expr()?;
        let mut operands = vec![first];
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            operands.push(self.not_expr()?);
        }
        if operands.len() == 1 {
            Ok(operands.remove(0))
        } else {
            Ok(Expr::And(operands))
        }
    }

    /// not_expr := NOT not_expr | cmp
    fn not_expr(&mut self) -> Result<Expr, ExpressionError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.not_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.cmp()
    }

    /// cmp := '(' expr ')' | macro | operand (op operand)?
    fn cmp(&mut self) -> Result<Expr, ExpressionError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let inner = self.or_expr()?;
            self.expect(&Token::RParen, "to close group")?;
            return Ok(inner);
        }

        // Macros are bare identifiers with reserved names.
        if let Some(Token::Ident(name)) = self.peek() {
            if let Some(mac) = MacroName::parse(name) {
                self.advance();
                return Ok(Expr::Macro(mac));
            }
        }

        let left = self.operand()?;

        let op = match self.comparison_op() {
            Some(op) => op,
            None => return Ok(left), // bare operand, evaluated for truthiness
        };

        if op.is_unary() {
            return Ok(Expr::Comparison {
                op,
                left: Box::new(left),
                right: None,
            });
        }

        let right = self.operand()?;
        Ok(Expr::Comparison {
            op,
            left: Box::new(left),
            right: Some(Box::new(right)),
        })
    }

    /// Match a comparison operator at the current position, consuming it.
    ///
    /// `NOT IN` / `NOT EXISTS` are matched first via two-token lookahead so
    /// the leading NOT is not mistaken for a logical negation.
    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match (self.peek(), self.peek2()) {
            (Some(Token::Not), Some(Token::In)) => {
                self.advance();
                self.advance();
                return Some(CmpOp::NotIn);
            }
            (Some(Token::Not), Some(Token::Exists)) => {
                self.advance();
                self.advance();
                return Some(CmpOp::NotExists);
            }
            (Some(Token::Eq), _) => CmpOp::Eq,
            (Some(Token::Ne), _) => CmpOp::Ne,
            (Some(Token::Gt), _) => CmpOp::Gt,
            (Some(Token::Ge), _) => CmpOp::Ge,
            (Some(Token::Lt), _) => CmpOp::Lt,
            (Some(Token::Le), _) => CmpOp::Le,
            (Some(Token::In), _) => CmpOp::In,
            (Some(Token::Contains), _) => CmpOp::Contains,
            (Some(Token::StartsWith), _) => CmpOp::StartsWith,
            (Some(Token::EndsWith), _) => CmpOp::EndsWith,
            (Some(Token::Exists), _) => CmpOp::Exists,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    /// operand := field path | string | number | '[' literals ']'
    fn operand(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Ident(path)) => Ok(Expr::Field(path)),
            Some(Token::Str(s)) => Ok(Expr::Literal(ExprValue::Str(s))),
            Some(Token::Number(n)) => Ok(Expr::Literal(ExprValue::Number(n))),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                loop {
                    match self.peek() {
                        Some(Token::RBracket) => {
                            self.advance();
                            break;
                        }
                        _ => {
                            let item = match self.advance() {
                                Some(Token::Str(s)) => ExprValue::Str(s),
                                Some(Token::Number(n)) => ExprValue::Number(n),
                                other => {
                                    return Err(ExpressionError::Parse(format!(
                                        "expected list literal element, found {:?}",
                                        other
                                    )));
                                }
                            };
                            items.push(item);
                            if matches!(self.peek(), Some(Token::Comma)) {
                                self.advance();
                            }
                        }
                    }
                }
                Ok(Expr::Literal(ExprValue::List(items)))
            }
            other => Err(ExpressionError::Parse(format!(
                "expected operand, found {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_comparison() {
        let ast = parse("spec.severity >= \"HIGH\"").unwrap();
        match ast {
            Expr::Comparison { op, left, right } => {
                assert_eq!(op, CmpOp::Ge);
                assert_eq!(*left, Expr::Field("spec.severity".to_string()));
                assert_eq!(
                    right.as_deref(),
                    Some(&Expr::Literal(ExprValue::Str("HIGH".to_string())))
                );
            }
            other => panic!("unexpected AST: {:?}", other),
        }
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        // a = 1 OR b = 2 AND c = 3  ==  a=1 OR (b=2 AND c=3)
        let ast = parse("a = 1 OR b = 2 AND c = 3").unwrap();
        match ast {
            Expr::Or(operands) => {
                assert_eq!(operands.len(), 2);
                assert!(matches!(operands[1], Expr::And(_)));
            }
            other => panic!("expected OR at root, got {:?}", other),
        }
    }

    #[test]
    fn not_in_is_one_operator() {
        let ast = parse("namespace NOT IN [\"kube-system\"]").unwrap();
        match ast {
            Expr::Comparison { op, .. } => assert_eq!(op, CmpOp::NotIn),
            other => panic!("expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn not_exists_is_one_operator() {
        let ast = parse("details.rule NOT EXISTS").unwrap();
        match ast {
            Expr::Comparison { op, right, .. } => {
                assert_eq!(op, CmpOp::NotExists);
                assert!(right.is_none());
            }
            other => panic!("expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn leading_not_is_logical_negation() {
        let ast = parse("NOT namespace IN [\"dev\"]").unwrap();
        match ast {
            Expr::Not(inner) => match *inner {
                Expr::Comparison { op, .. } => assert_eq!(op, CmpOp::In),
                other => panic!("expected IN comparison, got {:?}", other),
            },
            other => panic!("expected NOT, got {:?}", other),
        }
    }

    #[test]
    fn grouping_overrides_precedence() {
        let ast = parse("(a = 1 OR b = 2) AND c = 3").unwrap();
        match ast {
            Expr::And(operands) => {
                assert!(matches!(operands[0], Expr::Or(_)));
            }
            other => panic!("expected AND at root, got {:?}", other),
        }
    }

    #[test]
    fn macros_parse_as_macros() {
        assert_eq!(parse("is_critical").unwrap(), Expr::Macro(MacroName::IsCritical));
        let ast = parse("is_high AND is_security").unwrap();
        assert!(matches!(ast, Expr::And(_)));
    }

    #[test]
    fn bare_field_is_truthiness_operand() {
        assert_eq!(
            parse("details.enabled").unwrap(),
            Expr::Field("details.enabled".to_string())
        );
    }

    #[test]
    fn trailing_tokens_are_an_error() {
        assert!(parse("a = 1 b").is_err());
    }

    #[test]
    fn dangling_operator_is_an_error() {
        assert!(parse("a >=").is_err());
    }
}
