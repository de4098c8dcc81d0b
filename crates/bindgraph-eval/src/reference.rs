//! Static reference chains inside expressions.
//!
//! A chain is an identifier followed by member accesses whose keys are known
//! without running anything: `Table1.data[0].name` or `Form1["email"]`. The
//! extractor turns chains into graph edges and the interpreter resolves them
//! against the path layer instead of materializing whole entities.

use serde_json::Value;
use smallvec::SmallVec;

use bindgraph_core::expr::{Expr, ExprKind};
use bindgraph_core::{Segment, Span};

/// `root.seg.seg[n]` with every segment statically known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference<'a> {
    pub root: &'a str,
    pub segments: SmallVec<[Segment; 4]>,
    pub span: Span,
}

/// Returns the chain if `expr` is entirely static.
pub fn static_chain(expr: &Expr) -> Option<Reference<'_>> {
    match &expr.kind {
        ExprKind::Ident(name) => Some(Reference {
            root: name,
            segments: SmallVec::new(),
            span: expr.span,
        }),
        ExprKind::Member {
            object, property, ..
        } => {
            let mut chain = static_chain(object)?;
            chain.segments.push(Segment::Key(property.clone()));
            chain.span = expr.span;
            Some(chain)
        }
        ExprKind::Index { object, index, .. } => {
            let segment = static_segment(index)?;
            let mut chain = static_chain(object)?;
            chain.segments.push(segment);
            chain.span = expr.span;
            Some(chain)
        }
        _ => None,
    }
}

fn static_segment(index: &Expr) -> Option<Segment> {
    match &index.kind {
        ExprKind::Literal(Value::String(key)) => Some(Segment::Key(key.clone())),
        ExprKind::Literal(Value::Number(n)) => n.as_u64().map(|i| Segment::Index(i as usize)),
        _ => None,
    }
}

/// Every maximal static chain in `expr` whose root is not an arrow
/// parameter, in source order.
///
/// Dynamic index expressions end a chain; the index itself is searched for
/// further chains.
pub fn references(expr: &Expr) -> Vec<Reference<'_>> {
    let mut out = Vec::new();
    let mut scope = Vec::new();
    collect(expr, &mut scope, &mut out);
    out
}

fn collect<'a>(expr: &'a Expr, scope: &mut Vec<&'a str>, out: &mut Vec<Reference<'a>>) {
    if let Some(chain) = static_chain(expr) {
        if !scope.contains(&chain.root) {
            out.push(chain);
        }
        return;
    }
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Ident(_) => {}
        ExprKind::Array(items) | ExprKind::Sequence(items) => {
            for item in items {
                collect(item, scope, out);
            }
        }
        ExprKind::Object(fields) => {
            for (_, value) in fields {
                collect(value, scope, out);
            }
        }
        ExprKind::Member { object, .. } => collect(object, scope, out),
        ExprKind::Index { object, index, .. } => {
            collect(object, scope, out);
            collect(index, scope, out);
        }
        ExprKind::Call { callee, args } => {
            collect(callee, scope, out);
            for arg in args {
                collect(arg, scope, out);
            }
        }
        ExprKind::Unary { operand, .. } => collect(operand, scope, out),
        ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
            collect(lhs, scope, out);
            collect(rhs, scope, out);
        }
        ExprKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            collect(test, scope, out);
            collect(consequent, scope, out);
            collect(alternate, scope, out);
        }
        ExprKind::Arrow { params, body } => {
            let depth = scope.len();
            scope.extend(params.iter().map(String::as_str));
            collect(body, scope, out);
            scope.truncate(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindgraph_core::expr::parse_expression;

    fn roots(src: &str) -> Vec<String> {
        let expr = parse_expression(src, 0).unwrap();
        references(&expr)
            .into_iter()
            .map(|r| {
                let mut s = r.root.to_string();
                for seg in &r.segments {
                    s.push_str(&seg.to_string());
                }
                s
            })
            .collect()
    }

    #[test]
    fn chains_stop_at_dynamic_index() {
        assert_eq!(
            roots("Table1.data[List1.selectedIndex].name"),
            vec!["Table1.data", "List1.selectedIndex"]
        );
    }

    #[test]
    fn string_and_number_indices_are_static() {
        assert_eq!(roots("Form1[\"email\"] + A.items[2]"), vec!["Form1.email", "A.items[2]"]);
    }

    #[test]
    fn arrow_params_are_not_references() {
        assert_eq!(
            roots("Table1.data.map(row => row.id + Offset.value)"),
            vec!["Table1.data.map", "Offset.value"]
        );
    }

    #[test]
    fn method_calls_on_results_keep_the_receiver_chain() {
        assert_eq!(roots("Input1.text.trim().length"), vec!["Input1.text.trim"]);
    }
}
