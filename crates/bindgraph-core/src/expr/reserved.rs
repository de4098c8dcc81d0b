//! Names that never resolve to entities.
//!
//! Entity names may not shadow these, and the dependency extractor treats
//! references to them as pure globals with no data dependency.

/// JavaScript keywords and literal names.
const KEYWORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "import", "in", "instanceof", "let", "new", "null", "return", "super", "switch",
    "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while", "with",
    "yield",
];

/// Host globals available inside bindings.
const GLOBALS: &[&str] = &[
    "Array", "Boolean", "Date", "Infinity", "JSON", "Math", "NaN", "Number", "Object",
    "Promise", "RegExp", "String", "console", "document", "globalThis", "isNaN", "location",
    "parseFloat", "parseInt", "window",
];

/// Trigger helpers. These are callable only from trigger properties.
pub const TRIGGER_HELPERS: &[&str] = &[
    "clearStore",
    "closeModal",
    "copyToClipboard",
    "download",
    "navigateTo",
    "resetWidget",
    "showAlert",
    "showModal",
    "storeValue",
];

/// True for keywords, host globals and trigger helpers.
pub fn is_reserved(name: &str) -> bool {
    KEYWORDS.contains(&name) || GLOBALS.contains(&name) || TRIGGER_HELPERS.contains(&name)
}

pub fn is_trigger_helper(name: &str) -> bool {
    TRIGGER_HELPERS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_names() {
        assert!(is_reserved("Math"));
        assert!(is_reserved("return"));
        assert!(is_reserved("storeValue"));
        assert!(is_trigger_helper("navigateTo"));
        assert!(!is_trigger_helper("Math"));
        assert!(!is_reserved("Table1"));
        // `appsmith` is an entity, not a global.
        assert!(!is_reserved("appsmith"));
    }
}
