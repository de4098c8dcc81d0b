//! Recursive-descent parser for binding expressions.
//!
//! Precedence, lowest first: sequence (`;`, trigger code only), arrow,
//! conditional, `|| ??`, `&&`, equality, relational, additive,
//! multiplicative, `**` (right-associative), unary, postfix.

use serde_json::{Number, Value};

use super::ast::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
use super::lexer::{tokenize, Span, Token, TokenKind};
use super::SyntaxError;

/// Parses a single data expression.
pub fn parse_expression(src: &str, base: usize) -> Result<Expr, SyntaxError> {
    let mut parser = Parser::new(src, base)?;
    if parser.at(&TokenKind::Eof) {
        return Err(SyntaxError {
            message: "empty expression".to_string(),
            span: parser.peek().span,
        });
    }
    let expr = parser.expression()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Parses trigger code: one or more expressions separated by `;`.
pub fn parse_program(src: &str, base: usize) -> Result<Expr, SyntaxError> {
    let mut parser = Parser::new(src, base)?;
    let start = parser.peek().span;
    let mut items = Vec::new();
    loop {
        while parser.eat(&TokenKind::Semicolon) {}
        if parser.at(&TokenKind::Eof) {
            break;
        }
        items.push(parser.expression()?);
        if !parser.eat(&TokenKind::Semicolon) {
            parser.expect_eof()?;
            break;
        }
    }
    let span = items
        .iter()
        .fold(start, |span, item| span.to(item.span));
    Ok(match items.len() {
        0 => Expr::new(ExprKind::Literal(Value::Null), span),
        1 => items.remove(0),
        _ => Expr::new(ExprKind::Sequence(items), span),
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(src: &str, base: usize) -> Result<Self, SyntaxError> {
        Ok(Parser {
            tokens: tokenize(src, base)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, SyntaxError> {
        if self.at(&kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_eof(&self) -> Result<(), SyntaxError> {
        if self.at(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("end of expression"))
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let token = self.peek();
        SyntaxError {
            message: format!("expected {expected}, found {}", token.kind.describe()),
            span: token.span,
        }
    }

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        if let Some(params) = self.arrow_params() {
            let start = self.peek().span;
            // Consume the parameter list and the arrow.
            if self.at(&TokenKind::LParen) {
                while !self.eat(&TokenKind::RParen) {
                    self.advance();
                }
            } else {
                self.advance();
            }
            self.expect(TokenKind::Arrow, "'=>'")?;
            if self.at(&TokenKind::LBrace) && self.looks_like_block() {
                return Err(SyntaxError {
                    message: "arrow function bodies must be a single expression".to_string(),
                    span: self.peek().span,
                });
            }
            let body = self.expression()?;
            let span = start.to(body.span);
            return Ok(Expr::new(
                ExprKind::Arrow {
                    params,
                    body: Box::new(body),
                },
                span,
            ));
        }
        self.conditional()
    }

    /// Recognizes `x =>`, `() =>` and `(a, b) =>` without consuming.
    fn arrow_params(&self) -> Option<Vec<String>> {
        match self.peek_at(0) {
            TokenKind::Ident(name) if self.peek_at(1) == &TokenKind::Arrow => Some(vec![name.clone()]),
            TokenKind::LParen => {
                let mut params = Vec::new();
                let mut offset = 1;
                if self.peek_at(offset) == &TokenKind::RParen {
                    return (self.peek_at(offset + 1) == &TokenKind::Arrow).then_some(params);
                }
                loop {
                    match self.peek_at(offset) {
                        TokenKind::Ident(name) => params.push(name.clone()),
                        _ => return None,
                    }
                    offset += 1;
                    match self.peek_at(offset) {
                        TokenKind::Comma => offset += 1,
                        TokenKind::RParen => {
                            return (self.peek_at(offset + 1) == &TokenKind::Arrow).then_some(params);
                        }
                        _ => return None,
                    }
                }
            }
            _ => None,
        }
    }

    /// `{ return ... }` or `{ stmt; }` rather than an object literal.
    fn looks_like_block(&self) -> bool {
        match self.peek_at(1) {
            TokenKind::RBrace => false,
            TokenKind::Ident(_) | TokenKind::Str(_) | TokenKind::Number(_) => {
                !matches!(self.peek_at(2), TokenKind::Colon | TokenKind::Comma | TokenKind::RBrace)
            }
            _ => true,
        }
    }

    fn conditional(&mut self) -> Result<Expr, SyntaxError> {
        let test = self.logical_or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(TokenKind::Colon, "':' in conditional expression")?;
        let alternate = self.expression()?;
        let span = test.span.to(alternate.span);
        Ok(Expr::new(
            ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            span,
        ))
    }

    fn logical_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.logical_and()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::OrOr => LogicalOp::Or,
                TokenKind::QuestionQuestion => LogicalOp::Coalesce,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.logical_and()?;
            lhs = logical(op, lhs, rhs);
        }
    }

    fn logical_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let rhs = self.equality()?;
            lhs = logical(LogicalOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::EqEqEq => BinaryOp::StrictEq,
                TokenKind::NotEqEq => BinaryOp::StrictNotEq,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.relational()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn relational(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.exponent()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.exponent()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn exponent(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.unary()?;
        if self.eat(&TokenKind::StarStar) {
            let power = self.exponent()?;
            return Ok(binary(BinaryOp::Pow, base, power));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek().kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Typeof => UnaryOp::Typeof,
            _ => return self.postfix(),
        };
        let start = self.advance().span;
        let operand = self.unary()?;
        let span = start.to(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let (property, span) = self.property_name()?;
                    expr = member(expr, property, span, false);
                }
                TokenKind::QuestionDot => {
                    self.advance();
                    if self.eat(&TokenKind::LBracket) {
                        let index = self.expression()?;
                        let close = self.expect(TokenKind::RBracket, "']'")?;
                        expr = indexed(expr, index, close.span, true);
                    } else {
                        let (property, span) = self.property_name()?;
                        expr = member(expr, property, span, true);
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    let close = self.expect(TokenKind::RBracket, "']'")?;
                    expr = indexed(expr, index, close.span, false);
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.list(TokenKind::RParen, Self::expression)?;
                    let close = self.expect(TokenKind::RParen, "')'")?;
                    let span = expr.span.to(close.span);
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn property_name(&mut self) -> Result<(String, Span), SyntaxError> {
        let token = self.peek().clone();
        let name = match &token.kind {
            TokenKind::Ident(name) => name.clone(),
            TokenKind::True => "true".to_string(),
            TokenKind::False => "false".to_string(),
            TokenKind::Null => "null".to_string(),
            TokenKind::Undefined => "undefined".to_string(),
            TokenKind::Typeof => "typeof".to_string(),
            _ => return Err(self.unexpected("property name")),
        };
        self.advance();
        Ok((name, token.span))
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.peek().clone();
        let kind = match token.kind {
            TokenKind::Number(n) => ExprKind::Literal(number_value(n)),
            TokenKind::Str(s) => ExprKind::Literal(Value::String(s)),
            TokenKind::True => ExprKind::Literal(Value::Bool(true)),
            TokenKind::False => ExprKind::Literal(Value::Bool(false)),
            TokenKind::Null | TokenKind::Undefined => ExprKind::Literal(Value::Null),
            TokenKind::Ident(name) => ExprKind::Ident(name),
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                let close = self.expect(TokenKind::RParen, "')'")?;
                return Ok(Expr::new(inner.kind, token.span.to(close.span)));
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.list(TokenKind::RBracket, Self::expression)?;
                let close = self.expect(TokenKind::RBracket, "']'")?;
                return Ok(Expr::new(ExprKind::Array(items), token.span.to(close.span)));
            }
            TokenKind::LBrace => {
                self.advance();
                let fields = self.list(TokenKind::RBrace, Self::object_field)?;
                let close = self.expect(TokenKind::RBrace, "'}'")?;
                return Ok(Expr::new(ExprKind::Object(fields), token.span.to(close.span)));
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.advance();
        Ok(Expr::new(kind, token.span))
    }

    fn object_field(&mut self) -> Result<(String, Expr), SyntaxError> {
        let token = self.advance();
        let key = match token.kind {
            TokenKind::Ident(name) => {
                if !self.at(&TokenKind::Colon) {
                    // Shorthand `{ a }`.
                    let value = Expr::new(ExprKind::Ident(name.clone()), token.span);
                    return Ok((name, value));
                }
                name
            }
            TokenKind::Str(s) => s,
            TokenKind::Number(n) => number_key(n),
            _ => {
                return Err(SyntaxError {
                    message: format!("expected object key, found {}", token.kind.describe()),
                    span: token.span,
                })
            }
        };
        self.expect(TokenKind::Colon, "':' after object key")?;
        Ok((key, self.expression()?))
    }

    /// Comma-separated items up to (not including) `close`; trailing comma
    /// allowed.
    fn list<T>(
        &mut self,
        close: TokenKind,
        mut item: impl FnMut(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<Vec<T>, SyntaxError> {
        let mut items = Vec::new();
        while !self.at(&close) {
            items.push(item(self)?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span.to(rhs.span);
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

fn logical(op: LogicalOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span.to(rhs.span);
    Expr::new(
        ExprKind::Logical {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

fn member(object: Expr, property: String, end: Span, optional: bool) -> Expr {
    let span = object.span.to(end);
    Expr::new(
        ExprKind::Member {
            object: Box::new(object),
            property,
            optional,
        },
        span,
    )
}

fn indexed(object: Expr, index: Expr, end: Span, optional: bool) -> Expr {
    let span = object.span.to(end);
    Expr::new(
        ExprKind::Index {
            object: Box::new(object),
            index: Box::new(index),
            optional,
        },
        span,
    )
}

/// Integral numbers become JSON integers so `5 + 1` renders as `6`.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn number_key(n: f64) -> String {
    match number_value(n) {
        Value::Number(num) => num.to_string(),
        _ => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(src: &str) -> Expr {
        parse_expression(src, 0).unwrap()
    }

    #[test]
    fn precedence_of_arithmetic() {
        let expr = parse("1 + 2 * 3");
        let ExprKind::Binary { op, rhs, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn exponent_is_right_associative() {
        let expr = parse("2 ** 3 ** 2");
        let ExprKind::Binary { rhs, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn member_index_and_call_chain() {
        let expr = parse("Table1.data[0].name.toUpperCase()");
        assert!(matches!(expr.kind, ExprKind::Call { .. }));
        assert_eq!(expr.span, Span::new(0, 33));
    }

    #[test]
    fn arrow_functions_as_arguments() {
        let expr = parse("items.map((a, b) => a + b)");
        let ExprKind::Call { args, .. } = expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(&args[0].kind, ExprKind::Arrow { params, .. } if params == &["a", "b"]));

        let expr = parse("items.filter(x => x.ok)");
        let ExprKind::Call { args, .. } = expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(&args[0].kind, ExprKind::Arrow { params, .. } if params == &["x"]));
    }

    #[test]
    fn parenthesized_expression_is_not_arrow() {
        assert!(matches!(parse("(a + b) * 2").kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn object_and_array_literals() {
        let expr = parse("{ a: 1, 'b c': [true, null], d, }");
        let ExprKind::Object(fields) = expr.kind else {
            panic!("expected object");
        };
        let keys: Vec<_> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b c", "d"]);
    }

    #[test]
    fn conditional_and_coalesce() {
        assert!(matches!(parse("a ? b : c ?? d").kind, ExprKind::Conditional { .. }));
        assert!(matches!(
            parse("a ?? b").kind,
            ExprKind::Logical { op: LogicalOp::Coalesce, .. }
        ));
    }

    #[test]
    fn integral_literals_become_integers() {
        assert_eq!(number_value(6.0), json!(6));
        assert_eq!(number_value(1.5), json!(1.5));
        assert_eq!(parse("undefined").kind, ExprKind::Literal(Value::Null));
    }

    #[test]
    fn syntax_errors_carry_spans() {
        let err = parse_expression("A.x +", 2).unwrap_err();
        assert!(err.message.contains("expected an expression"));
        assert_eq!(err.span, Span::new(7, 7));

        let err = parse_expression("a b", 0).unwrap_err();
        assert!(err.message.contains("end of expression"));

        assert!(parse_expression("", 0).is_err());
        assert!(parse_expression("x => { return x }", 0).is_err());
    }

    #[test]
    fn program_allows_sequences() {
        let expr = parse_program("Api1.run(); storeValue('k', 1);", 0).unwrap();
        let ExprKind::Sequence(items) = expr.kind else {
            panic!("expected sequence");
        };
        assert_eq!(items.len(), 2);
        assert!(parse_expression("a; b", 0).is_err());
        assert_eq!(parse_program("  ", 0).unwrap().kind, ExprKind::Literal(Value::Null));
    }
}
