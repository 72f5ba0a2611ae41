//! Parsing raw generator output into structured code units.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Errors raised while parsing a generator response.
///
/// All variants are non-transient: the caller re-prompts immediately with
/// the error message appended, without backing off.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The response contained no function definition.
    #[error("no function detected in the response")]
    NoUnitFound,

    /// The response contained more than one function definition.
    #[error("more than one function detected in the response ({0} found)")]
    AmbiguousUnit(usize),

    /// The parsed function is not the one that was requested.
    #[error("function name mismatch: expected '{expected}', found '{found}'")]
    NameMismatch {
        /// The unit the generation was for.
        expected: String,
        /// The name that actually came back.
        found: String,
    },
}

/// One structured code unit extracted from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUnit {
    /// Function name.
    pub name: String,
    /// Signature header, `def name(params):`.
    pub definition: String,
    /// Full function text including the header.
    pub content: String,
    /// Top-level import statements found alongside the function.
    pub imports: BTreeSet<String>,
}

impl ParsedUnit {
    /// Fail with `NameMismatch` unless this unit is the expected one.
    pub fn ensure_name(&self, expected: &str) -> Result<(), ParseError> {
        if self.name != expected {
            return Err(ParseError::NameMismatch {
                expected: expected.to_string(),
                found: self.name.clone(),
            });
        }
        Ok(())
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:[a-zA-Z0-9_]*)\s*\n(.*?)```").expect("valid regex")
    })
}

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^def\s+(\w+)\s*\(([^)]*)\)\s*:").expect("valid regex"))
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:import\s+[\w.]+(?:\s+as\s+\w+)?|from\s+[\w.]+\s+import\s+.+)$")
            .expect("valid regex")
    })
}

/// Extract the first fenced code block from a response, or the whole text
/// when no fence is present (some models answer with bare code).
pub fn extract_code_block(text: &str) -> String {
    match fence_re().captures(text) {
        Some(caps) => caps[1].to_string(),
        None => text.to_string(),
    }
}

/// Parse a code snippet into exactly one unit.
///
/// Zero function definitions fail with `NoUnitFound`, more than one with
/// `AmbiguousUnit`. Top-level imports around the function are collected
/// into the unit's auxiliary set.
pub fn parse_single_unit(code: &str) -> Result<ParsedUnit, ParseError> {
    let mut imports = BTreeSet::new();
    // (name, definition, lines)
    let mut functions: Vec<(String, String, Vec<&str>)> = Vec::new();

    for line in code.lines() {
        if let Some(caps) = def_re().captures(line) {
            let definition = line.trim_end().to_string();
            functions.push((caps[1].to_string(), definition, vec![line]));
            continue;
        }
        if import_re().is_match(line.trim_end()) && !line.starts_with(char::is_whitespace) {
            imports.insert(line.trim_end().to_string());
            continue;
        }
        if let Some(current) = functions.last_mut() {
            // indented or blank lines belong to the open function body
            if line.trim().is_empty() || line.starts_with(char::is_whitespace) {
                current.2.push(line);
            }
        }
    }

    match functions.len() {
        0 => return Err(ParseError::NoUnitFound),
        1 => {}
        n => return Err(ParseError::AmbiguousUnit(n)),
    }

    let (name, definition, mut lines) = functions.remove(0);
    while lines
        .last()
        .map(|l| l.trim().is_empty())
        .unwrap_or(false)
    {
        lines.pop();
    }
    Ok(ParsedUnit {
        name,
        definition,
        content: lines.join("\n"),
        imports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "\
Some explanation first.

```python
import math
from utils import clamp

def move_to(target, speed=1.0):
    \"\"\"Move toward the target.\"\"\"
    direction = clamp(target, -1, 1)
    return direction * speed
```
";

    #[test]
    fn test_extract_fenced_block() {
        let code = extract_code_block(RESPONSE);
        assert!(code.starts_with("import math"));
        assert!(code.contains("def move_to"));
        assert!(!code.contains("```"));
    }

    #[test]
    fn test_extract_without_fence_returns_text() {
        let code = extract_code_block("def f():\n    pass");
        assert_eq!(code, "def f():\n    pass");
    }

    #[test]
    fn test_parse_single_unit() {
        let unit = parse_single_unit(&extract_code_block(RESPONSE)).unwrap();
        assert_eq!(unit.name, "move_to");
        assert_eq!(unit.definition, "def move_to(target, speed=1.0):");
        assert!(unit.content.contains("return direction * speed"));
        assert_eq!(unit.imports.len(), 2);
        assert!(unit.imports.contains("import math"));
        assert!(unit.imports.contains("from utils import clamp"));
    }

    #[test]
    fn test_no_unit_found() {
        assert_eq!(
            parse_single_unit("just prose, no code"),
            Err(ParseError::NoUnitFound)
        );
    }

    #[test]
    fn test_ambiguous_unit() {
        let code = "def a():\n    pass\n\ndef b():\n    pass\n";
        assert_eq!(parse_single_unit(code), Err(ParseError::AmbiguousUnit(2)));
    }

    #[test]
    fn test_name_mismatch() {
        let unit = parse_single_unit("def actual():\n    pass\n").unwrap();
        assert_eq!(
            unit.ensure_name("expected"),
            Err(ParseError::NameMismatch {
                expected: "expected".to_string(),
                found: "actual".to_string(),
            })
        );
        assert!(unit.ensure_name("actual").is_ok());
    }

    #[test]
    fn test_trailing_blank_lines_trimmed() {
        let unit = parse_single_unit("def f():\n    pass\n\n\n").unwrap();
        assert_eq!(unit.content, "def f():\n    pass");
    }
}
