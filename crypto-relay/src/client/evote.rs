use num_bigint::{BigUint, RandBigInt};
use tracing::{debug, info};

use crate::crypto::{parse_element, Cipher, ElGamal, KeyMaterial};
use crate::error::Error;
use crate::evote::{tags, Ballot, EVotePhase, RoundState, Tally, BITS};
use crate::message::{Message, SessionId};

use super::Client;

impl Client {
    /// Voter's side of the ballot
    pub(super) async fn participate(&self, ballot: &Ballot) -> Result<Tally, Error> {
        let session = ballot.session_id();
        let group = &ballot.group;
        let mut state = RoundState::new(ballot.id);
        self.publish_phase(state);

        info!(proposal = %ballot.proposal, voters = ballot.voters.len(), "waiting for decision");
        let vote = self.inner.decisions.decide(ballot).await;
        debug!(?vote, "decision made");

        // Round 1: publish share of the public key
        let sk = rand::thread_rng().gen_biguint(BITS) % &group.p;
        let pk_share = group.pow(&sk);
        self.contribute(
            &session,
            Message::plain(pk_share.to_string()).with_tag(tags::SECRET_KEY_PARTITION),
        )
        .await?;
        let public_key = parse_element(&self.wait_for_message(&session).await.plaintext)?;
        self.advance(&mut state, EVotePhase::EncVote)?;

        // Round 2: encrypt the vote under the joint key
        let mut cipher = ElGamal::with_key(KeyMaterial::public_only(group.clone(), public_key, BITS));
        let encrypted_vote = cipher.encrypt_integer(&group.pow(&vote.exponent()))?;
        self.contribute(&session, encrypted_vote.with_tag(tags::ENCRYPTED_VOTE))
            .await?;
        let combined = self.wait_for_message(&session).await;
        let c1 = combined
            .encryption_state
            .clone()
            .ok_or(Error::MalformedMessage {
                reason: "combined ciphertext misses c1",
            })?;
        let c2 = parse_element(&combined.plaintext)?;
        self.advance(&mut state, EVotePhase::PartialDecrypt)?;

        // Round 3: publish partial decryption
        let partial = c1.modpow(&sk, &group.p);
        self.contribute(
            &session,
            Message::plain(partial.to_string()).with_tag(tags::DECRYPTION_KEY_PARTITION),
        )
        .await?;
        let decryption_factor = parse_element(&self.wait_for_message(&session).await.plaintext)?;
        self.advance(&mut state, EVotePhase::Result)?;

        // Round 4: strip the mask, find the exponent
        let result: BigUint = c2 * group.inverse(&decryption_factor)? % &group.p;
        let tally = ballot.tally(&result)?;
        info!(%tally, "ballot complete");
        Ok(tally)
    }

    async fn contribute(&self, session: &SessionId, msg: Message) -> Result<(), Error> {
        let server = &self.inner.server;
        server
            .recv_message(self.name(), server.name(), msg.with_session(session.clone()))
            .await
            .map(|_| ())
    }

    fn advance(&self, state: &mut RoundState, to: EVotePhase) -> Result<(), Error> {
        state.advance(to)?;
        self.publish_phase(*state);
        Ok(())
    }
}
