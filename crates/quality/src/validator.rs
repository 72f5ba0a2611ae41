//! Structural validation of the accumulated source.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

/// One structural defect found in the accumulated source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// 1-based line the defect was found on.
    pub line: usize,
    /// Human-readable defect description.
    pub message: String,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Checks the accumulated source of all units; an empty result is a pass.
pub trait StructuralValidator: Send + Sync {
    /// Check the full source and report every defect found.
    fn check(&self, source: &str) -> Vec<Finding>;
}

/// Default validator: resolves cross-unit call references against the
/// functions defined and the names imported in the accumulated source.
#[derive(Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Create a validator.
    pub fn new() -> Self {
        Self
    }
}

const BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "float", "int", "isinstance", "len",
    "list", "max", "min", "print", "range", "round", "set", "sorted", "str", "sum", "tuple",
    "zip",
];

const KEYWORDS: &[&str] = &[
    "if", "elif", "while", "for", "return", "and", "or", "not", "in", "def", "lambda",
    "assert", "yield", "with", "except", "raise",
];

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^def\s+(\w+)\s*\(").expect("valid regex"))
}

fn import_names_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:import\s+([\w.]+)(?:\s+as\s+(\w+))?|from\s+[\w.]+\s+import\s+(.+))$")
            .expect("valid regex")
    })
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^|[^.\w])(\w+)\s*\(").expect("valid regex"))
}

fn defined_names(source: &str) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    for line in source.lines() {
        if let Some(caps) = def_re().captures(line.trim_start()) {
            names.insert(caps[1].to_string());
            continue;
        }
        if let Some(caps) = import_names_re().captures(line.trim()) {
            if let Some(listed) = caps.get(3) {
                // from m import a, b as c
                for part in listed.as_str().split(',') {
                    let name = match part.split_once(" as ") {
                        Some((_, alias)) => alias,
                        None => part,
                    };
                    names.insert(name.trim().to_string());
                }
            } else if let Some(alias) = caps.get(2) {
                names.insert(alias.as_str().to_string());
            } else if let Some(module) = caps.get(1) {
                let root = module.as_str().split('.').next().unwrap_or("");
                names.insert(root.to_string());
            }
        }
    }
    names
}

impl StructuralValidator for BasicValidator {
    fn check(&self, source: &str) -> Vec<Finding> {
        let defined = defined_names(source);
        let mut findings = Vec::new();

        for (index, line) in source.lines().enumerate() {
            let code = match line.split_once('#') {
                Some((before, _)) => before,
                None => line,
            };
            for caps in call_re().captures_iter(code) {
                let name = &caps[2];
                if defined.contains(name)
                    || BUILTINS.contains(&name)
                    || KEYWORDS.contains(&name)
                {
                    continue;
                }
                findings.push(Finding {
                    line: index + 1,
                    message: format!("undefined name '{name}'"),
                });
            }
        }

        debug!(findings = findings.len(), "Structural check complete");
        findings
    }
}
