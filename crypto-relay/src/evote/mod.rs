//! Distributed e-vote
//!
//! A ballot runs in four rounds, each ending with a barrier at the server:
//!
//! 1. Every voter samples secret `sk_i`, publishes `pk_i = g^sk_i`; server publishes `pk = Π pk_i`
//! 2. Every voter ElGamal-encrypts `g^vote` under `pk`; server publishes `(Π c1_i, Π c2_i)`
//! 3. Every voter publishes its partial decryption `c1^sk_i`; server publishes `Π c1^sk_i`
//! 4. Everyone recovers `g^yes = c2 / Π c1^sk_i` and finds `yes` by linear search
//!
//! No single party is able to decrypt individual votes: the decryption factor exists only once
//! every voter contributed its share. Voter side lives in [`client`](crate::client), coordinator
//! side in [`server`](crate::server).

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigUint;
use num_traits::One;
use tokio::sync::watch;
use uuid::Uuid;

use crate::crypto::GroupParams;
use crate::error::EVoteError;
use crate::message::SessionId;

mod state;

pub use self::state::{EVotePhase, RoundState};

/// Bit size of voters' secret shares
pub const BITS: u64 = 32;

/// Tags attached to vote messages
pub mod tags {
    pub const SECRET_KEY_PARTITION: &str = "secret key partition";
    pub const ENCRYPTED_VOTE: &str = "encrypted vote";
    pub const DECRYPTION_KEY_PARTITION: &str = "decryption key partition";
}

/// Proposal put to vote and a fixed set of voters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub id: Uuid,
    pub proposal: String,
    pub voters: BTreeSet<String>,
    pub group: GroupParams,
}

impl Ballot {
    pub fn new(proposal: impl Into<String>, voters: BTreeSet<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            proposal: proposal.into(),
            voters,
            group: GroupParams::default(),
        }
    }

    /// Session that carries all the messages of the ballot
    pub fn session_id(&self) -> SessionId {
        SessionId::from(self.id)
    }

    /// Recovers amount of yes-votes from `g^yes`
    ///
    /// Searches exponents from `0` to number of voters; anything else is an invalid result.
    pub fn count_yes(&self, result: &BigUint) -> Result<usize, EVoteError> {
        if result.is_one() {
            return Ok(0);
        }
        let mut power = BigUint::one();
        for yes in 1..=self.voters.len() {
            power = power * &self.group.g % &self.group.p;
            if &power == result {
                return Ok(yes);
            }
        }
        Err(EVoteError::InvalidResult {
            result: result.clone(),
            g: self.group.g.clone(),
            p: self.group.p.clone(),
        })
    }

    /// Recovers the tally from `g^yes`
    pub fn tally(&self, result: &BigUint) -> Result<Tally, EVoteError> {
        let yes = self.count_yes(result)?;
        Ok(Tally {
            yes,
            no: self.voters.len() - yes,
        })
    }
}

/// Outcome of a ballot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub yes: usize,
    pub no: usize,
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.yes, self.no)
    }
}

/// Voter's choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Yes,
    No,
}

impl Vote {
    /// Exponent the vote is encoded with
    pub fn exponent(self) -> BigUint {
        match self {
            Vote::Yes => BigUint::one(),
            Vote::No => BigUint::from(0u8),
        }
    }
}

impl From<bool> for Vote {
    fn from(yes: bool) -> Self {
        if yes {
            Vote::Yes
        } else {
            Vote::No
        }
    }
}

/// Source of voter's decisions
///
/// Console front-end asks the user, tests use [`PresetDecision`]. A source may never answer:
/// ballot then hits its timeout.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    async fn decide(&self, ballot: &Ballot) -> Vote;
}

/// Decision set up front, cloneable handle
///
/// Changing the preset affects every clone. [`Withhold`](Preset::Withhold) makes the voter
/// unresponsive.
#[derive(Debug, Clone)]
pub struct PresetDecision {
    preset: Arc<watch::Sender<Preset>>,
}

/// Answer given by [`PresetDecision`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Vote(Vote),
    /// Never answer
    Withhold,
}

impl PresetDecision {
    pub fn new(vote: Vote) -> Self {
        Self {
            preset: Arc::new(watch::channel(Preset::Vote(vote)).0),
        }
    }

    pub fn withhold() -> Self {
        Self {
            preset: Arc::new(watch::channel(Preset::Withhold).0),
        }
    }

    pub fn set(&self, preset: impl Into<Preset>) {
        self.preset.send_replace(preset.into());
    }
}

impl From<Vote> for Preset {
    fn from(vote: Vote) -> Self {
        Preset::Vote(vote)
    }
}

#[async_trait]
impl DecisionSource for PresetDecision {
    async fn decide(&self, _ballot: &Ballot) -> Vote {
        let mut preset = self.preset.subscribe();
        loop {
            if let Preset::Vote(vote) = *preset.borrow_and_update() {
                return vote;
            }
            if preset.changed().await.is_err() {
                // sender is owned by `self`, can't be dropped while we're borrowed
                futures::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use matches::assert_matches;

    use super::*;

    fn ballot(voters: usize) -> Ballot {
        Ballot::new(
            "lunch?",
            (0..voters).map(|i| format!("c{}", i + 1)).collect(),
        )
    }

    #[test]
    fn tally_recovers_amount_of_yes_votes() {
        let ballot = ballot(4);
        for yes in 0..=4u32 {
            let result = ballot.group.pow(&BigUint::from(yes));
            let tally = ballot.tally(&result).unwrap();
            assert_eq!(tally.yes, yes as usize);
            assert_eq!(tally.no, 4 - yes as usize);
        }
        assert_eq!(
            ballot.tally(&BigUint::from(1u8)).unwrap().to_string(),
            "(0,4)"
        );
    }

    #[test]
    fn tally_beyond_number_of_voters_is_invalid() {
        let ballot = ballot(3);
        let result = ballot.group.pow(&BigUint::from(4u8));
        assert_matches!(
            ballot.count_yes(&result),
            Err(EVoteError::InvalidResult { .. })
        );
        let err = ballot.count_yes(&BigUint::from(2u8)).unwrap_err();
        assert_eq!(err.to_string(), "2 is not a valid power of 2341 mod 31123");
    }

    #[test]
    fn ballots_get_distinct_sessions() {
        assert_ne!(ballot(2).session_id(), ballot(2).session_id());
    }

    #[tokio::test]
    async fn withheld_decision_is_released_by_new_preset() {
        let decision = PresetDecision::withhold();
        let ballot = ballot(1);

        let pending = tokio::time::timeout(Duration::from_millis(20), decision.decide(&ballot)).await;
        assert!(pending.is_err());

        let waiting = tokio::spawn({
            let decision = decision.clone();
            let ballot = ballot.clone();
            async move { decision.decide(&ballot).await }
        });
        tokio::task::yield_now().await;
        decision.set(Vote::Yes);
        assert_eq!(waiting.await.unwrap(), Vote::Yes);
    }
}
