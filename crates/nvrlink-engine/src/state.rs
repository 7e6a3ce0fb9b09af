//! Stream state tracking.

use parking_lot::Mutex;
use tracing::{debug, info};

use nvrlink_ipc::{StreamState, StreamTrigger};

/// Owns the current [`StreamState`] and applies triggers to it.
#[derive(Debug, Default)]
pub struct StreamStateMachine {
    state: Mutex<StreamState>,
}

/// A state change produced by a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous: StreamState,
    pub current: StreamState,
}

impl StreamStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn current(&self) -> StreamState {
        self.state.lock().clone()
    }

    /// Apply `trigger`. Returns the transition if the state changed.
    pub fn apply(&self, trigger: &StreamTrigger) -> Option<Transition> {
        let mut state = self.state.lock();
        let next = state.next(trigger);

        if next == *state {
            debug!(state = state.name(), ?trigger, "Trigger ignored");
            return None;
        }

        info!("State transition: {} -> {}", state.name(), next.name());
        let previous = std::mem::replace(&mut *state, next.clone());
        Some(Transition {
            previous,
            current: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_reports_changes_only() {
        let machine = StreamStateMachine::new();

        let t = machine.apply(&StreamTrigger::Open).unwrap();
        assert_eq!(t.previous, StreamState::Idle);
        assert_eq!(t.current, StreamState::AwaitingHandshake);

        assert!(machine.apply(&StreamTrigger::Pause).is_none());
        assert_eq!(machine.current(), StreamState::AwaitingHandshake);
    }

    #[test]
    fn test_destroy_then_release_closes() {
        let machine = StreamStateMachine::new();
        machine.apply(&StreamTrigger::Open);
        machine.apply(&StreamTrigger::Destroy);
        assert_eq!(machine.current(), StreamState::Closing);
        machine.apply(&StreamTrigger::Released);
        assert_eq!(machine.current(), StreamState::Closed);
        assert!(machine.apply(&StreamTrigger::Open).is_none());
    }
}
