//! Decode frame-mode policy.

use nvrlink_ipc::DecodeFrameMode;

/// Result of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOutcome {
    /// Mode the engine should run in.
    pub mode: DecodeFrameMode,

    /// Replace the incoming unit with a ready unit.
    pub substitute_ready_unit: bool,
}

/// Thresholds that steer decode granularity from buffer pressure.
#[derive(Debug, Clone)]
pub struct DecodePolicy {
    /// Fullness above which decoding is reduced.
    pub reduce_fullness: f64,

    /// Fullness at which incoming data is replaced by a ready unit.
    pub throttle_fullness: f64,

    /// Held frames above which decoding is reduced.
    pub reduce_held: usize,

    /// Held frames above which incoming data is replaced.
    pub throttle_held: usize,
}

impl Default for DecodePolicy {
    fn default() -> Self {
        Self {
            reduce_fullness: 0.5,
            throttle_fullness: 0.8,
            reduce_held: 10,
            throttle_held: 15,
        }
    }
}

impl DecodePolicy {
    /// Evaluate the policy for the next incoming unit.
    ///
    /// `fullness` is buffered bytes over capacity; `held` counts batches sent
    /// since the engine last produced a frame or asked for more data.
    pub fn evaluate(&self, current: DecodeFrameMode, fullness: f64, held: usize) -> PolicyOutcome {
        let mut mode = current;
        let mut substitute_ready_unit = false;

        if fullness >= self.throttle_fullness {
            substitute_ready_unit = true;
        } else if fullness > self.reduce_fullness {
            mode = DecodeFrameMode::Reduced;
        }

        if held > self.throttle_held {
            substitute_ready_unit = true;
        } else if held > self.reduce_held {
            mode = DecodeFrameMode::Reduced;
        }

        if held < self.reduce_held && fullness < self.reduce_fullness {
            mode = DecodeFrameMode::Full;
        }

        PolicyOutcome {
            mode,
            substitute_ready_unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderate_pressure_reduces() {
        let outcome = DecodePolicy::default().evaluate(DecodeFrameMode::Full, 0.6, 5);
        assert_eq!(outcome.mode, DecodeFrameMode::Reduced);
        assert!(!outcome.substitute_ready_unit);
    }

    #[test]
    fn test_low_pressure_restores_full() {
        let outcome = DecodePolicy::default().evaluate(DecodeFrameMode::Reduced, 0.3, 3);
        assert_eq!(outcome.mode, DecodeFrameMode::Full);
        assert!(!outcome.substitute_ready_unit);
    }

    #[test]
    fn test_high_pressure_substitutes_ready_unit() {
        let outcome = DecodePolicy::default().evaluate(DecodeFrameMode::Full, 0.85, 0);
        assert!(outcome.substitute_ready_unit);
        assert_eq!(outcome.mode, DecodeFrameMode::Full);
    }

    #[test]
    fn test_held_frames_drive_mode() {
        let policy = DecodePolicy::default();

        let outcome = policy.evaluate(DecodeFrameMode::Full, 0.1, 12);
        assert_eq!(outcome.mode, DecodeFrameMode::Reduced);
        assert!(!outcome.substitute_ready_unit);

        let outcome = policy.evaluate(DecodeFrameMode::Full, 0.1, 16);
        assert!(outcome.substitute_ready_unit);
    }

    #[test]
    fn test_between_thresholds_keeps_current_mode() {
        let policy = DecodePolicy::default();
        // Held exactly at the lower bound: neither reduce nor restore.
        assert_eq!(
            policy.evaluate(DecodeFrameMode::Reduced, 0.2, 10).mode,
            DecodeFrameMode::Reduced
        );
        assert_eq!(
            policy.evaluate(DecodeFrameMode::Full, 0.2, 10).mode,
            DecodeFrameMode::Full
        );
    }
}
