use tracing::debug;
use uuid::Uuid;

use crate::error::EVoteError;

/// Phase of a ballot as seen by one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EVotePhase {
    PkShare,
    EncVote,
    PartialDecrypt,
    Result,
    Aborted,
}

impl EVotePhase {
    fn next(self) -> Option<Self> {
        match self {
            EVotePhase::PkShare => Some(EVotePhase::EncVote),
            EVotePhase::EncVote => Some(EVotePhase::PartialDecrypt),
            EVotePhase::PartialDecrypt => Some(EVotePhase::Result),
            EVotePhase::Result | EVotePhase::Aborted => None,
        }
    }
}

/// Phase marker of a participant
///
/// Phases advance strictly one after another; [`Aborted`](EVotePhase::Aborted) is reachable from
/// anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundState {
    pub ballot: Uuid,
    pub phase: EVotePhase,
}

impl RoundState {
    pub fn new(ballot: Uuid) -> Self {
        Self {
            ballot,
            phase: EVotePhase::PkShare,
        }
    }

    pub fn advance(&mut self, to: EVotePhase) -> Result<(), EVoteError> {
        if to != EVotePhase::Aborted && self.phase.next() != Some(to) {
            return Err(EVoteError::PhaseOutOfOrder {
                from: self.phase,
                to,
            });
        }
        debug!(ballot = %self.ballot, from = ?self.phase, ?to, "phase advanced");
        self.phase = to;
        Ok(())
    }

    pub fn abort(&mut self) {
        self.phase = EVotePhase::Aborted;
    }
}
