//! `{{ }}` template splitting.
//!
//! A property text such as `Hello {{User.name}}, you have {{Inbox.count}}`
//! splits into alternating static text and expression parts. Expression
//! bodies may themselves contain braces (object literals, arrow bodies), so
//! the closing `}}` is found by brace depth, skipping string literals.

use super::ast::Expr;
use super::lexer::Span;
use super::parser::{parse_expression, parse_program};
use super::SyntaxError;

/// One raw piece of a template, borrowing from the property text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplatePart<'a> {
    Text(&'a str),
    /// Code between the braces, and its byte offset in the full text.
    Code { src: &'a str, offset: usize },
}

/// A template whose expression parts are parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Expr(Expr),
}

impl Template {
    /// A template consisting of exactly one `{{ }}` with no surrounding
    /// text evaluates to the raw value rather than a string.
    pub fn single_expression(&self) -> Option<&Expr> {
        match self.parts.as_slice() {
            [Part::Expr(expr)] => Some(expr),
            _ => None,
        }
    }

    pub fn expressions(&self) -> impl Iterator<Item = &Expr> + '_ {
        self.parts.iter().filter_map(|part| match part {
            Part::Expr(expr) => Some(expr),
            Part::Text(_) => None,
        })
    }

    pub fn has_expressions(&self) -> bool {
        self.expressions().next().is_some()
    }
}

/// Splits `text` into static and code parts without parsing the code.
pub fn split_template(text: &str) -> Result<Vec<TemplatePart<'_>>, SyntaxError> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find("{{") {
        let open = cursor + found;
        if open > cursor {
            parts.push(TemplatePart::Text(&text[cursor..open]));
        }
        let body_start = open + 2;
        let close = find_close(bytes, body_start).ok_or_else(|| SyntaxError {
            message: "unterminated '{{' in template".to_string(),
            span: Span::new(open, text.len()),
        })?;
        parts.push(TemplatePart::Code {
            src: &text[body_start..close],
            offset: body_start,
        });
        cursor = close + 2;
    }
    if cursor < text.len() {
        parts.push(TemplatePart::Text(&text[cursor..]));
    }
    Ok(parts)
}

/// Parses every code part as a data expression.
pub fn parse_template(text: &str) -> Result<Template, SyntaxError> {
    parse_with(text, parse_expression)
}

/// Parses every code part as trigger code (`;`-separated sequences).
///
/// Trigger properties are often written without braces
/// (`Api1.run(); showAlert('ok')`); such text is treated as one code part.
pub fn parse_trigger(text: &str) -> Result<Template, SyntaxError> {
    if !text.contains("{{") {
        let expr = parse_program(text, 0)?;
        return Ok(Template {
            parts: vec![Part::Expr(expr)],
        });
    }
    parse_with(text, parse_program)
}

fn parse_with(
    text: &str,
    parse: fn(&str, usize) -> Result<Expr, SyntaxError>,
) -> Result<Template, SyntaxError> {
    let parts = split_template(text)?
        .into_iter()
        .map(|part| match part {
            TemplatePart::Text(s) => Ok(Part::Text(s.to_string())),
            TemplatePart::Code { src, offset } => {
                if src.trim().is_empty() {
                    return Err(SyntaxError {
                        message: "empty '{{ }}' expression".to_string(),
                        span: Span::new(offset - 2, offset + src.len() + 2),
                    });
                }
                parse(src, offset).map(Part::Expr)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Template { parts })
}

/// Index of the `}}` closing an expression body starting at `start`.
fn find_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'{' => depth += 1,
            b'}' if depth > 0 => depth -= 1,
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ast::ExprKind;

    #[test]
    fn splits_mixed_text() {
        let parts = split_template("Hi {{User.name}}!").unwrap();
        assert_eq!(
            parts,
            vec![
                TemplatePart::Text("Hi "),
                TemplatePart::Code {
                    src: "User.name",
                    offset: 5
                },
                TemplatePart::Text("!"),
            ]
        );
    }

    #[test]
    fn nested_braces_do_not_close_early() {
        let parts = split_template("{{ { a: { b: 1 } }.a }}").unwrap();
        assert_eq!(parts.len(), 1);
        let TemplatePart::Code { src, .. } = parts[0] else {
            panic!("expected code");
        };
        assert_eq!(src, " { a: { b: 1 } }.a ");
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let parts = split_template("{{ '}}' + A.x }}").unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn single_expression_detection() {
        assert!(parse_template("{{A.x}}").unwrap().single_expression().is_some());
        assert!(parse_template(" {{A.x}}").unwrap().single_expression().is_none());
        assert!(!parse_template("plain").unwrap().has_expressions());
    }

    #[test]
    fn spans_point_into_full_text() {
        let template = parse_template("ab {{ C.d }}").unwrap();
        let expr = template.expressions().next().unwrap();
        assert_eq!(expr.span, Span::new(6, 9));
    }

    #[test]
    fn unterminated_and_empty_templates_fail() {
        assert!(split_template("{{ A.x").is_err());
        assert!(parse_template("{{  }}").is_err());
        let err = parse_template("{{ A. }}").unwrap_err();
        assert_eq!(err.span.start, 6);
    }

    #[test]
    fn trigger_text_without_braces_is_code() {
        let template = parse_trigger("Api1.run(); showAlert('done')").unwrap();
        let expr = template.single_expression().unwrap();
        assert!(matches!(expr.kind, ExprKind::Sequence(_)));
    }
}
