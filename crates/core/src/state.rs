//! Unit lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Errors raised by state handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// A numeric state code that maps to no known state.
    #[error("invalid state code: {0}")]
    InvalidState(u8),

    /// A transition that would move a unit backwards or sideways.
    #[error("illegal transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// State the unit is currently in.
        from: UnitState,
        /// State the transition asked for.
        to: UnitState,
    },
}

/// Lifecycle state of a generation unit.
///
/// States are strictly ordered. Under normal operation a unit only moves
/// forward; the single exception is [`Unit::reset`](crate::Unit::reset),
/// which forces a unit back to `NotStarted`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum UnitState {
    /// Declared but nothing generated yet.
    #[default]
    NotStarted,
    /// Signature/definition produced.
    Designed,
    /// Body produced.
    Written,
    /// Body reviewed (possibly rewritten).
    Reviewed,
    /// Body passed the structural check.
    Checked,
}

impl UnitState {
    /// All states in lifecycle order.
    pub const ALL: [UnitState; 5] = [
        UnitState::NotStarted,
        UnitState::Designed,
        UnitState::Written,
        UnitState::Reviewed,
        UnitState::Checked,
    ];

    /// Numeric code of this state.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Total mapping from a numeric code, failing loudly on out-of-range
    /// input instead of coercing.
    pub fn from_code(code: u8) -> Result<Self, StateError> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or(StateError::InvalidState(code))
    }

    /// The state that follows this one, if any.
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self as usize + 1).copied()
    }
}
