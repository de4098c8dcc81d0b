//! Reference rewriting for entity renames.
//!
//! Only identifier tokens in expression position are rewritten: member names
//! after `.`, object keys and string contents keep their text. Code that
//! fails to tokenize is left untouched so a half-typed binding never gets
//! corrupted by a rename.

use super::lexer::{tokenize, TokenKind};
use super::template::{split_template, TemplatePart};

/// Renames `from` to `to` inside the `{{ }}` parts of a binding.
pub fn rename_references(text: &str, from: &str, to: &str) -> String {
    if !text.contains(from) {
        return text.to_string();
    }
    let Ok(parts) = split_template(text) else {
        return text.to_string();
    };
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for part in parts {
        if let TemplatePart::Code { src, offset } = part {
            out.push_str(&text[cursor..offset]);
            out.push_str(&rename_in_code(src, from, to));
            cursor = offset + src.len();
        }
    }
    out.push_str(&text[cursor..]);
    out
}

/// Renames inside trigger text, which may be bare code without braces.
pub fn rename_in_trigger(text: &str, from: &str, to: &str) -> String {
    if text.contains("{{") {
        rename_references(text, from, to)
    } else {
        rename_in_code(text, from, to)
    }
}

fn rename_in_code(src: &str, from: &str, to: &str) -> String {
    let Ok(tokens) = tokenize(src, 0) else {
        return src.to_string();
    };
    let mut out = String::with_capacity(src.len());
    let mut cursor = 0;
    for (i, token) in tokens.iter().enumerate() {
        let TokenKind::Ident(name) = &token.kind else {
            continue;
        };
        if name != from {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| &tokens[p].kind);
        let next = tokens.get(i + 1).map(|t| &t.kind);
        let is_member = matches!(prev, Some(TokenKind::Dot | TokenKind::QuestionDot));
        let is_key = matches!(prev, Some(TokenKind::LBrace | TokenKind::Comma))
            && matches!(next, Some(TokenKind::Colon));
        if is_member || is_key {
            continue;
        }
        out.push_str(&src[cursor..token.span.start]);
        out.push_str(to);
        cursor = token.span.end;
    }
    out.push_str(&src[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renames_only_code_identifiers() {
        assert_eq!(
            rename_references("Input1 says {{Input1.text + 'Input1'}}", "Input1", "Name"),
            "Input1 says {{Name.text + 'Input1'}}"
        );
    }

    #[test]
    fn skips_members_keys_and_prefixes() {
        assert_eq!(
            rename_references("{{ { A: A.A, b: AB } }}", "A", "Z"),
            "{{ { A: Z.A, b: AB } }}"
        );
    }

    #[test]
    fn leaves_unparsable_code_alone() {
        assert_eq!(rename_references("{{ A.x # }}", "A", "B"), "{{ A.x # }}");
        assert_eq!(rename_references("{{ A.x", "A", "B"), "{{ A.x");
    }

    #[test]
    fn trigger_code_without_braces() {
        assert_eq!(
            rename_in_trigger("Api1.run(); showAlert(Api1.data)", "Api1", "Users"),
            "Users.run(); showAlert(Users.data)"
        );
    }
}
