//! Microphone arbitration
//!
//! One capture session may run at a time. A session that has been asked to
//! stop still holds the microphone until the adapter acknowledges it.

use serde::{Deserialize, Serialize};

use crate::speech::CaptureSessionId;

/// Who a capture session was started for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOwner {
    WakeWord,
    Command,
    Flow,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureArbiterError {
    #[error("Microphone busy: held by {0:?} capture")]
    MicrophoneBusy(CaptureOwner),

    #[error("Microphone busy: waiting for {0:?} capture to stop")]
    StopPending(CaptureOwner),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Active {
        session: CaptureSessionId,
        owner: CaptureOwner,
    },
    Stopping {
        session: CaptureSessionId,
        owner: CaptureOwner,
    },
}

#[derive(Debug)]
pub struct CaptureArbiter {
    next_session: CaptureSessionId,
    slot: Slot,
}

impl CaptureArbiter {
    pub fn new() -> Self {
        Self {
            next_session: 1,
            slot: Slot::Free,
        }
    }

    /// Claims the microphone and allocates a session id
    pub fn acquire(&mut self, owner: CaptureOwner) -> Result<CaptureSessionId, CaptureArbiterError> {
        match self.slot {
            Slot::Active { owner: held, .. } => Err(CaptureArbiterError::MicrophoneBusy(held)),
            Slot::Stopping { owner: held, .. } => Err(CaptureArbiterError::StopPending(held)),
            Slot::Free => {
                let session = self.next_session;
                self.next_session += 1;
                self.slot = Slot::Active { session, owner };
                Ok(session)
            }
        }
    }

    /// Marks the active session as stopping. Returns it if one was active.
    pub fn release(&mut self) -> Option<(CaptureSessionId, CaptureOwner)> {
        match self.slot {
            Slot::Active { session, owner } => {
                self.slot = Slot::Stopping { session, owner };
                Some((session, owner))
            }
            _ => None,
        }
    }

    /// Frees the microphone once `session` has ended
    ///
    /// Accepts a stop acknowledgement as well as a session that ended on
    /// its own. Returns false for stale ids.
    pub fn acknowledge(&mut self, session: CaptureSessionId) -> bool {
        match self.slot {
            Slot::Active { session: id, .. } | Slot::Stopping { session: id, .. }
                if id == session =>
            {
                self.slot = Slot::Free;
                true
            }
            _ => false,
        }
    }

    /// Session still delivering transcripts, if any
    pub fn active(&self) -> Option<(CaptureSessionId, CaptureOwner)> {
        match self.slot {
            Slot::Active { session, owner } => Some((session, owner)),
            _ => None,
        }
    }

    /// Whether `session` is running or stopping
    pub fn holds(&self, session: CaptureSessionId) -> bool {
        matches!(
            self.slot,
            Slot::Active { session: id, .. } | Slot::Stopping { session: id, .. } if id == session
        )
    }

    pub fn is_stopping(&self, session: CaptureSessionId) -> bool {
        matches!(self.slot, Slot::Stopping { session: id, .. } if id == session)
    }

    pub fn is_free(&self) -> bool {
        self.slot == Slot::Free
    }
}

impl Default for CaptureArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_capture_rejected() {
        let mut arbiter = CaptureArbiter::new();
        let first = arbiter.acquire(CaptureOwner::WakeWord).unwrap();
        assert_eq!(
            arbiter.acquire(CaptureOwner::Flow),
            Err(CaptureArbiterError::MicrophoneBusy(CaptureOwner::WakeWord))
        );
        assert_eq!(arbiter.active(), Some((first, CaptureOwner::WakeWord)));
    }

    #[test]
    fn test_new_capture_waits_for_stop_ack() {
        let mut arbiter = CaptureArbiter::new();
        let first = arbiter.acquire(CaptureOwner::WakeWord).unwrap();
        assert_eq!(arbiter.release(), Some((first, CaptureOwner::WakeWord)));
        assert!(arbiter.is_stopping(first));
        assert_eq!(
            arbiter.acquire(CaptureOwner::Command),
            Err(CaptureArbiterError::StopPending(CaptureOwner::WakeWord))
        );

        assert!(arbiter.acknowledge(first));
        let second = arbiter.acquire(CaptureOwner::Command).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let mut arbiter = CaptureArbiter::new();
        let first = arbiter.acquire(CaptureOwner::WakeWord).unwrap();
        arbiter.release();
        arbiter.acknowledge(first);
        let second = arbiter.acquire(CaptureOwner::Flow).unwrap();

        assert!(!arbiter.acknowledge(first));
        assert!(arbiter.holds(second));
        assert!(!arbiter.holds(first));
    }

    #[test]
    fn test_release_when_free() {
        let mut arbiter = CaptureArbiter::new();
        assert_eq!(arbiter.release(), None);
        assert!(arbiter.is_free());
    }
}
