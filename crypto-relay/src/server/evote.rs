use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use num_bigint::BigUint;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::CryptoClient;
use crate::crypto::parse_element;
use crate::error::{EVoteError, Error};
use crate::evote::{Ballot, EVotePhase, RoundState, Tally};
use crate::message::{Message, SessionId};

use super::{BallotInFlight, CryptoServer, Server};

/// Ballot failure along with the voter to blame, if there's one
struct Failure {
    voter: Option<String>,
    error: Error,
}

impl Server {
    /// Runs a ballot among all currently registered clients
    ///
    /// Ballots never overlap: a ballot initiated while another one is in progress waits for it
    /// to finish. If any voter fails or the ballot doesn't complete within configured timeout,
    /// every voter is told to abort, and the failed voter (if known) is unregistered.
    pub async fn run_evote(&self, proposal: &str) -> Result<Tally, Error> {
        let _ballot_in_progress = self.inner.ballot.lock().await;

        let voters = self.inner.registry.read().await.snapshot();
        if voters.is_empty() {
            warn!("no clients registered, ballot cancelled");
            return Err(EVoteError::NoVoters.into());
        }
        let ballot = Ballot::new(proposal, voters.iter().map(|(name, _)| name.clone()).collect());
        let span = info_span!("ballot", id = %ballot.id);
        self.orchestrate(ballot, voters).instrument(span).await
    }

    async fn orchestrate(
        &self,
        ballot: Ballot,
        voters: Vec<(String, Arc<dyn CryptoClient>)>,
    ) -> Result<Tally, Error> {
        info!(proposal = %ballot.proposal, voters = ?ballot.voters, "ballot started");
        let session = ballot.session_id();
        self.inner.sessions.open(&session).await;
        *self.inner.ballot_in_flight.write().await = Some(BallotInFlight {
            session: session.clone(),
            voters: ballot.voters.clone(),
        });

        let mut participants = JoinSet::new();
        for (name, client) in &voters {
            let (name, client, ballot) = (name.clone(), client.clone(), ballot.clone());
            participants.spawn(
                async move {
                    let tally = client.evote(ballot).await;
                    (name, tally)
                }
                .in_current_span(),
            );
        }
        let mut coordinator = tokio::spawn({
            let server = self.clone();
            let ballot = ballot.clone();
            async move { server.tally_rounds(&ballot).await }.in_current_span()
        });

        let evote_timeout = self.inner.config.evote_timeout;
        let deadline = Instant::now() + evote_timeout;
        let mut tally = None;
        let outcome = loop {
            if participants.is_empty() {
                if let Some(tally) = tally {
                    break Ok(tally);
                }
            }
            tokio::select! {
                _ = sleep_until(deadline) => break Err(Failure {
                    voter: None,
                    error: EVoteError::Timeout(evote_timeout).into(),
                }),
                Some(joined) = participants.join_next() => match joined {
                    Ok((voter, Ok(voter_tally))) => {
                        debug!(%voter, tally = %voter_tally, "voter finished");
                        if tally.map_or(false, |t| t != voter_tally) {
                            warn!(%voter, "voter's tally differs from the server's");
                        }
                    }
                    Ok((voter, Err(err))) => break Err(Failure {
                        voter: Some(voter.clone()),
                        error: EVoteError::VoterFailed { voter, source: Box::new(err) }.into(),
                    }),
                    Err(err) => break Err(Failure { voter: None, error: err.into() }),
                },
                joined = &mut coordinator, if tally.is_none() => {
                    match joined.map_err(Error::from).and_then(|r| r) {
                        Ok(t) => tally = Some(t),
                        Err(err) => break Err(Failure {
                            voter: None,
                            error: EVoteError::Coordinator(Box::new(err)).into(),
                        }),
                    }
                }
            }
        };
        *self.inner.ballot_in_flight.write().await = None;

        let failure = match outcome {
            Ok(tally) => {
                self.inner.sessions.close(&session).await;
                info!(%tally, "ballot complete");
                return Ok(tally);
            }
            Err(failure) => failure,
        };
        error!(err = %failure.error, voter = ?failure.voter, "ballot failed, aborting");

        let reason = failure.error.to_string();
        let notify_timeout = self.inner.config.heartbeat.ping_timeout;
        let notifications = voters
            .iter()
            .filter(|(name, _)| Some(name) != failure.voter.as_ref())
            .map(|(name, client)| {
                let reason = &reason;
                async move {
                    match timeout(notify_timeout, client.evote_abort(reason)).await {
                        Ok(Ok(())) => (),
                        Ok(Err(err)) => warn!(voter = %name, %err, "abort notification failed"),
                        Err(_) => warn!(voter = %name, "abort notification timed out"),
                    }
                }
            });
        join_all(notifications).await;

        coordinator.abort();
        participants.abort_all();
        self.inner.sessions.close(&session).await;

        if let Some(voter) = &failure.voter {
            self.unregister(voter).await;
        }
        Err(failure.error)
    }

    /// Coordinator's side of the ballot
    async fn tally_rounds(&self, ballot: &Ballot) -> Result<Tally, Error> {
        let session = ballot.session_id();
        let group = &ballot.group;
        let mut state = RoundState::new(ballot.id);

        // Round 1: joint public key
        let shares = self.collect(&session, &ballot.voters).await;
        let shares = parse_all(&shares, |m| parse_element(&m.plaintext))?;
        let public_key = group.product(&shares);
        self.broadcast(ballot, Message::plain(public_key.to_string()))
            .await?;
        state.advance(EVotePhase::EncVote)?;

        // Round 2: combined ciphertext
        let votes = self.collect(&session, &ballot.voters).await;
        let c1 = group.product(&parse_all(&votes, |m| {
            m.encryption_state.clone().ok_or(Error::MalformedMessage {
                reason: "encrypted vote misses c1",
            })
        })?);
        let c2 = group.product(&parse_all(&votes, |m| parse_element(&m.ciphertext))?);
        self.broadcast(
            ballot,
            Message {
                plaintext: c2.to_string(),
                encryption_state: Some(c1),
                ..Default::default()
            },
        )
        .await?;
        state.advance(EVotePhase::PartialDecrypt)?;

        // Round 3: joint decryption factor
        let partials = self.collect(&session, &ballot.voters).await;
        let decryption_factor =
            group.product(&parse_all(&partials, |m| parse_element(&m.plaintext))?);
        self.broadcast(ballot, Message::plain(decryption_factor.to_string()))
            .await?;
        state.advance(EVotePhase::Result)?;

        // Round 4
        let result = c2 * group.inverse(&decryption_factor)? % &group.p;
        Ok(ballot.tally(&result)?)
    }

    /// Barrier: waits for contribution of every voter
    async fn collect(&self, session: &SessionId, voters: &BTreeSet<String>) -> Vec<Message> {
        self.inner
            .sessions
            .wait_for_all(session, voters)
            .await
            .into_iter()
            .filter_map(|(sender, msg)| {
                if voters.contains(&sender) {
                    Some(msg)
                } else {
                    warn!(%sender, "ignoring contribution of non-voter");
                    None
                }
            })
            .collect()
    }

    async fn broadcast(&self, ballot: &Ballot, msg: Message) -> Result<(), Error> {
        let msg = msg.with_session(ballot.session_id());
        let deliveries = ballot.voters.iter().map(|voter| {
            let msg = msg.clone();
            async move {
                let client = self.client(voter).await?;
                client.recv_message(self.name(), voter, msg).await
            }
        });
        try_join_all(deliveries).await?;
        Ok(())
    }
}

fn parse_all<F>(msgs: &[Message], parse: F) -> Result<Vec<BigUint>, Error>
where
    F: Fn(&Message) -> Result<BigUint, Error>,
{
    msgs.iter().map(parse).collect()
}
