//! Failure taxonomy routed through the recovery chain.

use serde::{Deserialize, Serialize};

/// A classified failure raised during generation or validation.
///
/// A tagged variant type instead of an error-class hierarchy: the router
/// matches on the variant and injects the payload into a recovery action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    /// A grammar/structural defect in generated code.
    Bug {
        /// Name of the unit the defect was found in.
        unit: String,
        /// The validator's message, e.g. "undefined name 'y'".
        message: String,
    },

    /// A critic rejected the generated code.
    CriticRejection {
        /// Name of the rejected unit.
        unit: String,
        /// Free-text critic feedback.
        feedback: String,
    },

    /// A human asked for changes.
    HumanFeedback {
        /// Free-text human feedback.
        feedback: String,
    },
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Bug { unit, message } => write!(f, "bug in {unit}: {message}"),
            Failure::CriticRejection { unit, feedback } => {
                write!(f, "critic rejected {unit}: {feedback}")
            }
            Failure::HumanFeedback { feedback } => write!(f, "human feedback: {feedback}"),
        }
    }
}
