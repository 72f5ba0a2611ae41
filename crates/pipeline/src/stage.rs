//! Pipeline stages and traversal modes.

use codeloom_core::UnitState;

/// One pass of the pipeline: a single operation applied to eligible units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Produce each unit's signature.
    Design,
    /// Produce each unit's body.
    Write,
    /// Review and possibly rewrite each unit's body.
    Review,
    /// Structurally validate each unit against the accumulated source.
    Check,
}

impl Stage {
    /// The state a unit must be in to be eligible for this stage.
    pub fn start_state(self) -> UnitState {
        match self {
            Stage::Design => UnitState::NotStarted,
            Stage::Write => UnitState::Designed,
            Stage::Review => UnitState::Written,
            Stage::Check => UnitState::Reviewed,
        }
    }

    /// The state a unit reaches when this stage succeeds.
    pub fn end_state(self) -> UnitState {
        match self {
            Stage::Design => UnitState::Designed,
            Stage::Write => UnitState::Written,
            Stage::Review => UnitState::Reviewed,
            Stage::Check => UnitState::Checked,
        }
    }

    /// Stable name used in logs and checkpoints.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Design => "design",
            Stage::Write => "write",
            Stage::Review => "review",
            Stage::Check => "check",
        }
    }

    /// Inverse of [`Stage::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "design" => Some(Stage::Design),
            "write" => Some(Stage::Write),
            "review" => Some(Stage::Review),
            "check" => Some(Stage::Check),
            _ => None,
        }
    }

    /// All stages in pipeline order.
    pub const ALL: [Stage; 4] = [Stage::Design, Stage::Write, Stage::Review, Stage::Check];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage walks the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Process exactly the earliest eligible layer, then stop. Re-invoke
    /// to advance; later stages never start before a whole dependency
    /// layer is uniform in state.
    Layer,
    /// Process every eligible unit, one at a time, in name order.
    Sequential,
    /// Same selection as sequential, dispatched concurrently; state is
    /// advanced for the whole batch only after every task has joined.
    Parallel,
}

/// Outcome of a completed stage.
#[derive(Debug, Clone, Default)]
pub struct StageResult {
    /// Units whose state changed during the stage.
    pub changed: Vec<String>,
    /// Non-fatal warnings accumulated along the way.
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_states_chain() {
        for pair in Stage::ALL.windows(2) {
            assert_eq!(pair[0].end_state(), pair[1].start_state());
        }
        assert_eq!(Stage::Design.start_state(), UnitState::NotStarted);
        assert_eq!(Stage::Check.end_state(), UnitState::Checked);
    }

    #[test]
    fn test_stage_name_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_name(stage.name()), Some(stage));
        }
        assert_eq!(Stage::from_name("deploy"), None);
    }
}
