// src/executors/lifecycle.rs

use std::fmt;

use uuid::Uuid;

use crate::errors::SandboxError;

/// Per-execution states. Each execution walks them once, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    Installed,
    Running,
    Flushing,
    Restored,
}

impl Phase {
    fn successor(self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::Installed),
            Phase::Installed => Some(Phase::Running),
            Phase::Running => Some(Phase::Flushing),
            Phase::Flushing => Some(Phase::Restored),
            Phase::Restored => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Guards the phase sequence of one execution. Skipping a phase or moving
/// out of `Restored` is rejected.
#[derive(Debug)]
pub struct Lifecycle {
    id: Uuid,
    phase: Phase,
}

impl Lifecycle {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, next: Phase) -> Result<(), SandboxError> {
        if self.phase.successor() != Some(next) {
            return Err(SandboxError::Lifecycle {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        log::debug!("[{}] {} -> {}", self.id, self.phase, next);
        self.phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walks_every_phase_in_order() {
        let mut lifecycle = Lifecycle::new(Uuid::new_v4());
        for next in [
            Phase::Installed,
            Phase::Running,
            Phase::Flushing,
            Phase::Restored,
        ] {
            lifecycle.advance(next).unwrap();
        }
        assert_eq!(lifecycle.phase(), Phase::Restored);
    }

    #[test]
    fn test_rejects_skipped_phase() {
        let mut lifecycle = Lifecycle::new(Uuid::new_v4());
        lifecycle.advance(Phase::Installed).unwrap();
        let err = lifecycle.advance(Phase::Flushing).unwrap_err();
        assert!(matches!(err, SandboxError::Lifecycle { .. }));
        assert_eq!(lifecycle.phase(), Phase::Installed);
    }

    #[test]
    fn test_restored_is_terminal() {
        let mut lifecycle = Lifecycle::new(Uuid::new_v4());
        for next in [
            Phase::Installed,
            Phase::Running,
            Phase::Flushing,
            Phase::Restored,
        ] {
            lifecycle.advance(next).unwrap();
        }
        assert!(lifecycle.advance(Phase::Restored).is_err());
        assert!(lifecycle.advance(Phase::Installed).is_err());
    }
}
