//! Session lifecycle phases.
//!
//! Phases are totally ordered and only ever move forward; the single
//! exception is `Closed`, reachable from anywhere. A message that arrives
//! while the session is in an earlier phase than its handler requires is a
//! protocol violation (see the `phase_required` middleware).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Invalid,
    Introduction,
    HandshakeRequested,
    HandshakeAccepted,
    ChallengeSent,
    ChallengeVerified,
    RatchetInitialized,
    Established,
    Closed,
}

impl Phase {
    /// Whether a transition from `self` to `to` respects the ordering.
    /// Forward moves and closing are fine; anything else is a regression.
    pub fn can_transition(self, to: Phase) -> bool {
        to == Phase::Closed || to > self
    }
}
