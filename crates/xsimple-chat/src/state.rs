//! Conversation phase machine.
//!
//! Two states:
//! - Idle: no cycle in flight, submissions accepted
//! - Streaming(cycle): the last message is being grown by `cycle`
//!
//! Valid transitions are Idle -> Streaming(any) and Streaming(id) -> Idle.
//! Streaming -> Streaming is never valid, which is what keeps two cycles
//! from interleaving into the same placeholder.

use std::fmt;

use xsimple_core::CycleId;

use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversationPhase {
    #[default]
    Idle,
    Streaming { cycle_id: CycleId },
}

impl fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationPhase::Idle => write!(f, "Idle"),
            ConversationPhase::Streaming { cycle_id } => write!(f, "Streaming({})", cycle_id),
        }
    }
}

impl ConversationPhase {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &ConversationPhase) -> bool {
        matches!(
            (self, target),
            (ConversationPhase::Idle, ConversationPhase::Streaming { .. })
                | (ConversationPhase::Streaming { .. }, ConversationPhase::Idle)
        )
    }

    /// Apply a validated transition.
    pub fn transition(&mut self, target: ConversationPhase) -> Result<(), ChatError> {
        if self.can_transition_to(&target) {
            tracing::debug!("Conversation phase: {} -> {}", self, target);
            *self = target;
            Ok(())
        } else {
            Err(ChatError::InvalidTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// The cycle in flight, if any.
    pub fn active_cycle(&self) -> Option<CycleId> {
        match self {
            ConversationPhase::Idle => None,
            ConversationPhase::Streaming { cycle_id } => Some(*cycle_id),
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, ConversationPhase::Streaming { .. })
    }

    /// Succeeds only if `cycle_id` is the cycle in flight.
    pub fn ensure_active(&self, cycle_id: CycleId) -> Result<(), ChatError> {
        if self.active_cycle() == Some(cycle_id) {
            Ok(())
        } else {
            Err(ChatError::StaleCycle(cycle_id))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming(id: u64) -> ConversationPhase {
        ConversationPhase::Streaming {
            cycle_id: CycleId(id),
        }
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ConversationPhase::Idle.to_string(), "Idle");
        assert_eq!(streaming(3).to_string(), "Streaming(#3)");
    }

    #[test]
    fn test_valid_transitions() {
        assert!(ConversationPhase::Idle.can_transition_to(&streaming(1)));
        assert!(streaming(1).can_transition_to(&ConversationPhase::Idle));
    }

    #[test]
    fn test_invalid_transitions() {
        // A second cycle can never start on top of a running one.
        assert!(!streaming(1).can_transition_to(&streaming(2)));
        assert!(!streaming(1).can_transition_to(&streaming(1)));
        assert!(!ConversationPhase::Idle.can_transition_to(&ConversationPhase::Idle));
    }

    #[test]
    fn test_transition_happy_path() {
        let mut phase = ConversationPhase::default();
        assert_eq!(phase, ConversationPhase::Idle);

        phase.transition(streaming(1)).unwrap();
        assert!(phase.is_streaming());
        assert_eq!(phase.active_cycle(), Some(CycleId(1)));

        phase.transition(ConversationPhase::Idle).unwrap();
        assert!(!phase.is_streaming());
        assert_eq!(phase.active_cycle(), None);
    }

    #[test]
    fn test_invalid_transition_leaves_phase_unchanged() {
        let mut phase = streaming(5);
        let err = phase.transition(streaming(6)).unwrap_err();
        match err {
            ChatError::InvalidTransition { from, to } => {
                assert_eq!(from, streaming(5));
                assert_eq!(to, streaming(6));
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        assert_eq!(phase, streaming(5));
    }

    #[test]
    fn test_ensure_active() {
        let phase = streaming(2);
        assert!(phase.ensure_active(CycleId(2)).is_ok());
        assert!(matches!(
            phase.ensure_active(CycleId(1)),
            Err(ChatError::StaleCycle(CycleId(1)))
        ));
        assert!(ConversationPhase::Idle.ensure_active(CycleId(2)).is_err());
    }
}
