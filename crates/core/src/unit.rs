//! Unit model - a single code-generation target.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::state::{StateError, UnitState};

/// A unit represents one code-generation target: a named function with a
/// description of intent, an optional signature, and a generated body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Unique name, immutable after creation
    name: String,

    /// Free-text specification of intent
    pub description: String,

    /// Signature header, usable before the body exists
    pub definition: String,

    /// Generated body; empty until the first successful generation
    pub content: String,

    /// Auxiliary declarations accumulated as content is produced
    pub imports: BTreeSet<String>,

    /// Lifecycle state
    state: UnitState,
}

impl Unit {
    /// Create a unit in the `NotStarted` state.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            definition: String::new(),
            content: String::new(),
            imports: BTreeSet::new(),
            state: UnitState::NotStarted,
        }
    }

    /// Unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Advance the state. Only forward movement is legal; anything else
    /// fails with `IllegalTransition` and leaves the unit untouched.
    pub fn advance_to(&mut self, to: UnitState) -> Result<(), StateError> {
        if to <= self.state {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Force the unit back to `NotStarted`, clearing everything generated.
    pub fn reset(&mut self) {
        self.definition.clear();
        self.content.clear();
        self.imports.clear();
        self.state = UnitState::NotStarted;
    }

    /// Merge auxiliary declarations produced alongside the body.
    pub fn add_imports<I>(&mut self, imports: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.imports.extend(imports);
    }

    /// One-line summary used in sibling context for prompts.
    pub fn brief(&self) -> String {
        format!("**{}**: {}", self.name, self.description)
    }

    /// The most informative text available: the body once written, the
    /// signature once designed, otherwise the brief.
    pub fn body(&self) -> String {
        if !self.content.is_empty() {
            self.content.clone()
        } else if !self.definition.is_empty() {
            self.definition.clone()
        } else {
            self.brief()
        }
    }

    /// Imports plus body, the unit's contribution to the accumulated source.
    pub fn source(&self) -> String {
        if self.content.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for import in &self.imports {
            out.push_str(import);
            out.push('\n');
        }
        out.push_str(&self.content);
        out
    }
}
