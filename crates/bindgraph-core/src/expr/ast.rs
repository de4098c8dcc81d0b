//! Expression syntax tree.

use serde_json::Value;

use super::lexer::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// `undefined` parses to `Null`.
    Literal(Value),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Arrow {
        params: Vec<String>,
        body: Box<Expr>,
    },
    /// `a; b; c` in trigger code. Evaluates to the last element.
    Sequence(Vec<Expr>),
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }

    /// Visits every node in pre-order, tracking arrow parameters in scope.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr, &[&'a str])) {
        let mut scope = Vec::new();
        self.walk_scoped(&mut scope, visit);
    }

    fn walk_scoped<'a>(
        &'a self,
        scope: &mut Vec<&'a str>,
        visit: &mut dyn FnMut(&'a Expr, &[&'a str]),
    ) {
        visit(self, scope.as_slice());
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) => {}
            ExprKind::Array(items) | ExprKind::Sequence(items) => {
                for item in items {
                    item.walk_scoped(scope, visit);
                }
            }
            ExprKind::Object(fields) => {
                for (_, value) in fields {
                    value.walk_scoped(scope, visit);
                }
            }
            ExprKind::Member { object, .. } => object.walk_scoped(scope, visit),
            ExprKind::Index { object, index, .. } => {
                object.walk_scoped(scope, visit);
                index.walk_scoped(scope, visit);
            }
            ExprKind::Call { callee, args } => {
                callee.walk_scoped(scope, visit);
                for arg in args {
                    arg.walk_scoped(scope, visit);
                }
            }
            ExprKind::Unary { operand, .. } => operand.walk_scoped(scope, visit),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                lhs.walk_scoped(scope, visit);
                rhs.walk_scoped(scope, visit);
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                test.walk_scoped(scope, visit);
                consequent.walk_scoped(scope, visit);
                alternate.walk_scoped(scope, visit);
            }
            ExprKind::Arrow { params, body } => {
                let depth = scope.len();
                scope.extend(params.iter().map(String::as_str));
                body.walk_scoped(scope, visit);
                scope.truncate(depth);
            }
        }
    }
}
