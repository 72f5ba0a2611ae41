//! Run plan: the instruction and unit declarations that seed a graph.

use codeloom_core::{DependencyGraph, GraphError};
use serde::Deserialize;

/// A declared generation target and the units it calls.
#[derive(Debug, Deserialize)]
pub struct UnitDecl {
    /// Unit name.
    pub name: String,
    /// Free-text intent.
    pub description: String,
    /// Names of units this one invokes.
    #[serde(default)]
    pub calls: Vec<String>,
}

/// The JSON document a run starts from.
#[derive(Debug, Deserialize)]
pub struct Plan {
    /// The user instruction driving the run.
    pub instruction: String,
    /// Declared units.
    pub units: Vec<UnitDecl>,
}

impl Plan {
    /// Parse a plan from its JSON text.
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Build the dependency graph the plan declares. Edges are added after
    /// all units exist, so declaration order does not matter.
    pub fn build_graph(&self) -> Result<DependencyGraph, GraphError> {
        let mut graph = DependencyGraph::new();
        for unit in &self.units {
            graph.add_unit(&unit.name, &unit.description)?;
        }
        for unit in &self.units {
            for callee in &unit.calls {
                graph.connect(&unit.name, callee)?;
            }
        }
        Ok(graph)
    }
}
