//! Failure routing: an ordered chain of (matcher, action) handlers.

use codeloom_core::Failure;
use tracing::debug;

/// The failure categories a handler can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Grammar/structural defects.
    Bug,
    /// Critic rejections.
    CriticRejection,
    /// Human change requests.
    HumanFeedback,
}

impl FailureKind {
    fn matches(self, failure: &Failure) -> bool {
        matches!(
            (self, failure),
            (FailureKind::Bug, Failure::Bug { .. })
                | (FailureKind::CriticRejection, Failure::CriticRejection { .. })
                | (FailureKind::HumanFeedback, Failure::HumanFeedback { .. })
        )
    }
}

/// What to run next once a handler accepts a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Re-enter generation for the unit with the structural error attached.
    RegenerateWithError,
    /// Re-enter generation with free-text feedback attached.
    RegenerateWithFeedback,
}

/// A routed recovery: the action to run with the failure's payload
/// injected into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    /// The follow-up to run.
    pub action: RecoveryAction,
    /// The unit involved, when the failure names one.
    pub unit: Option<String>,
    /// The failure's payload: error message or feedback text.
    pub payload: String,
}

struct Handler {
    kind: FailureKind,
    action: RecoveryAction,
}

/// An ordered list of handlers evaluated in sequence; the first match
/// wins. A failure no handler accepts is the caller's problem and must be
/// treated as fatal, never silently retried.
#[derive(Default)]
pub struct FailureRouter {
    handlers: Vec<Handler>,
}

impl FailureRouter {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the chain.
    pub fn with_handler(mut self, kind: FailureKind, action: RecoveryAction) -> Self {
        self.handlers.push(Handler { kind, action });
        self
    }

    /// The default wiring: bugs regenerate with the error attached,
    /// critic and human feedback regenerate with the feedback attached.
    pub fn standard() -> Self {
        Self::new()
            .with_handler(FailureKind::Bug, RecoveryAction::RegenerateWithError)
            .with_handler(
                FailureKind::CriticRejection,
                RecoveryAction::RegenerateWithFeedback,
            )
            .with_handler(
                FailureKind::HumanFeedback,
                RecoveryAction::RegenerateWithFeedback,
            )
    }

    /// Classify a failure. Returns the first accepting handler's recovery,
    /// or `None` when the chain is exhausted.
    pub fn route(&self, failure: &Failure) -> Option<Recovery> {
        for handler in &self.handlers {
            if !handler.kind.matches(failure) {
                continue;
            }
            debug!(kind = ?handler.kind, "Failure accepted by handler");
            let (unit, payload) = match failure {
                Failure::Bug { unit, message } => (Some(unit.clone()), message.clone()),
                Failure::CriticRejection { unit, feedback } => {
                    (Some(unit.clone()), feedback.clone())
                }
                Failure::HumanFeedback { feedback } => (None, feedback.clone()),
            };
            return Some(Recovery {
                action: handler.action,
                unit,
                payload,
            });
        }
        None
    }
}
