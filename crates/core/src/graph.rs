//! Dependency graph of generation units and its layer partition.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::state::UnitState;
use crate::unit::Unit;

/// Errors raised by graph mutation and layering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A unit with this name already exists.
    #[error("duplicate unit name: {0}")]
    DuplicateName(String),

    /// A unit may not depend on itself.
    #[error("self edge on unit: {0}")]
    SelfEdge(String),

    /// No unit with this name exists.
    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    /// The call graph contains a cycle; no layer partition exists.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// A representative cycle through the call graph.
        cycle: Vec<String>,
    },
}

/// One layer of the partition: units whose callees all live in earlier
/// layers. Layer 0 holds the units with no callees at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    members: Vec<String>,
}

impl Layer {
    /// Unit names in this layer, in name order.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Whether the named unit belongs to this layer.
    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m == name)
    }

    /// Number of units in this layer.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the layer is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Owns all units, their call edges, and the cached layer partition.
///
/// `callees` and `callers` are kept as mutual inverses; the layer cache is
/// invalidated by every mutation and recomputed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    units: BTreeMap<String, Unit>,
    callees: BTreeMap<String, BTreeSet<String>>,
    callers: BTreeMap<String, BTreeSet<String>>,
    #[serde(skip)]
    layers: Option<Vec<Layer>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit. Fails if the name is already taken.
    pub fn add_unit(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<&mut Unit, GraphError> {
        let name = name.into();
        if self.units.contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }
        self.layers = None;
        let unit = Unit::new(name.clone(), description);
        self.callees.entry(name.clone()).or_default();
        self.callers.entry(name.clone()).or_default();
        Ok(self.units.entry(name).or_insert(unit))
    }

    /// Add a callee edge: `caller` invokes `callee`.
    pub fn connect(&mut self, caller: &str, callee: &str) -> Result<(), GraphError> {
        if caller == callee {
            return Err(GraphError::SelfEdge(caller.to_string()));
        }
        if !self.units.contains_key(caller) {
            return Err(GraphError::UnknownUnit(caller.to_string()));
        }
        if !self.units.contains_key(callee) {
            return Err(GraphError::UnknownUnit(callee.to_string()));
        }
        self.layers = None;
        self.callees
            .entry(caller.to_string())
            .or_default()
            .insert(callee.to_string());
        self.callers
            .entry(callee.to_string())
            .or_default()
            .insert(caller.to_string());
        Ok(())
    }

    /// Number of units in the graph.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the graph holds no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Drop all units and edges; used between independent runs.
    pub fn clear(&mut self) {
        self.units.clear();
        self.callees.clear();
        self.callers.clear();
        self.layers = None;
    }

    /// Look up a unit by name.
    pub fn unit(&self, name: &str) -> Result<&Unit, GraphError> {
        self.units
            .get(name)
            .ok_or_else(|| GraphError::UnknownUnit(name.to_string()))
    }

    /// Look up a unit mutably by name.
    pub fn unit_mut(&mut self, name: &str) -> Result<&mut Unit, GraphError> {
        self.units
            .get_mut(name)
            .ok_or_else(|| GraphError::UnknownUnit(name.to_string()))
    }

    /// All units, in name order.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    /// Names of the units `name` invokes.
    pub fn callees_of(&self, name: &str) -> Result<&BTreeSet<String>, GraphError> {
        self.callees
            .get(name)
            .ok_or_else(|| GraphError::UnknownUnit(name.to_string()))
    }

    /// Names of the units invoking `name`.
    pub fn callers_of(&self, name: &str) -> Result<&BTreeSet<String>, GraphError> {
        self.callers
            .get(name)
            .ok_or_else(|| GraphError::UnknownUnit(name.to_string()))
    }

    /// All units other than `excluding`, used to build sibling context for
    /// generation prompts.
    pub fn filtered_units(&self, excluding: &str) -> Vec<&Unit> {
        self.units
            .values()
            .filter(|u| u.name() != excluding)
            .collect()
    }

    /// Every unit reachable from `name` via callee edges, excluding `name`
    /// itself; used to assemble full context when debugging a failure.
    pub fn transitive_closure(&self, name: &str) -> Result<Vec<&Unit>, GraphError> {
        self.unit(name)?;
        let mut reached: BTreeSet<&str> = BTreeSet::new();
        let mut queue: Vec<&str> = vec![name];
        while let Some(current) = queue.pop() {
            if let Some(callees) = self.callees.get(current) {
                for callee in callees {
                    if reached.insert(callee) {
                        queue.push(callee);
                    }
                }
            }
        }
        reached
            .into_iter()
            .map(|n| self.unit(n))
            .collect::<Result<Vec<_>, _>>()
    }

    /// Compute (or return the cached) bottom-up layer partition.
    ///
    /// Repeatedly extracts the units whose every callee is already layered;
    /// if no progress can be made while units remain, the graph is cyclic.
    /// Equivalent to Kahn's algorithm over the reversed call graph.
    pub fn compute_layers(&mut self) -> Result<&[Layer], GraphError> {
        if self.layers.is_none() {
            self.layers = Some(self.layer_partition()?);
        }
        Ok(self.layers.as_deref().unwrap_or(&[]))
    }

    fn layer_partition(&self) -> Result<Vec<Layer>, GraphError> {
        let mut placed: BTreeSet<String> = BTreeSet::new();
        let mut remaining: BTreeSet<&str> =
            self.units.keys().map(String::as_str).collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|name| {
                    self.callees
                        .get(**name)
                        .map(|cs| cs.iter().all(|c| placed.contains(c)))
                        .unwrap_or(true)
                })
                .map(|name| name.to_string())
                .collect();

            if ready.is_empty() {
                return Err(GraphError::CyclicDependency {
                    cycle: self.representative_cycle(&remaining),
                });
            }

            for name in &ready {
                remaining.remove(name.as_str());
            }
            placed.extend(ready.iter().cloned());
            layers.push(Layer { members: ready });
        }

        Ok(layers)
    }

    /// Walk callee edges inside the stuck set until a node repeats. Every
    /// stuck unit has at least one unplaced callee, so the walk closes.
    fn representative_cycle(&self, remaining: &BTreeSet<&str>) -> Vec<String> {
        let mut path: Vec<String> = Vec::new();
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        let Some(start) = remaining.iter().next() else {
            return path;
        };
        let mut current = start.to_string();
        loop {
            if let Some(&at) = seen.get(&current) {
                return path[at..].to_vec();
            }
            seen.insert(current.clone(), path.len());
            path.push(current.clone());
            let next = self
                .callees
                .get(&current)
                .and_then(|cs| cs.iter().find(|c| remaining.contains(c.as_str())))
                .cloned();
            match next {
                Some(n) => current = n,
                None => return path,
            }
        }
    }

    /// Index of the earliest layer containing at least one unit in `state`,
    /// or `None` if no layer does.
    pub fn min_layer_index_by_state(
        &mut self,
        state: UnitState,
    ) -> Result<Option<usize>, GraphError> {
        self.compute_layers()?;
        let layers = self.layers.as_deref().unwrap_or(&[]);
        Ok(layers.iter().position(|layer| {
            layer
                .members()
                .iter()
                .any(|n| self.units.get(n).map(|u| u.state() == state).unwrap_or(false))
        }))
    }

    /// The full accumulated source: the union of every unit's imports
    /// followed by every non-empty body. This is what the structural
    /// validator checks, since cross-unit references must resolve.
    pub fn accumulated_source(&self) -> String {
        let mut imports: BTreeSet<&str> = BTreeSet::new();
        for unit in self.units.values() {
            imports.extend(unit.imports.iter().map(String::as_str));
        }
        let mut out = String::new();
        for import in &imports {
            out.push_str(import);
            out.push('\n');
        }
        for unit in self.units.values() {
            if unit.content.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&unit.content);
            out.push('\n');
        }
        out
    }
}
