//! Client core
//!
//! [`CryptoClient`] is the surface the server calls back into. [`Client`] is its in-process
//! implementation: it keeps per-pair message history, ciphers negotiated with counterparties, a
//! rendezvous store for session-scoped messages, and takes part in ballots.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::crypto::{Cipher, DiffieHellman, ElGamal, KeyExchange, SessionChannel};
use crate::error::{EVoteError, Error};
use crate::evote::{Ballot, DecisionSource, EVotePhase, RoundState, Tally};
use crate::message::{ClientPair, Message, SessionId};
use crate::rendezvous::Rendezvous;
use crate::server::CryptoServer;

mod evote;

/// Callbacks the server invokes on a registered client
#[async_trait]
pub trait CryptoClient: Send + Sync {
    /// Unique name of the client
    fn name(&self) -> &str;
    /// Liveness probe
    async fn ping(&self) -> Result<bool, Error>;
    /// Delivers a message from `from` to `to`
    ///
    /// `to` differs from the client's own name when the client receives it as an eavesdropper.
    /// Returns text as observed by the client.
    async fn recv_message(&self, from: &str, to: &str, msg: Message) -> Result<String, Error>;
    /// Runs the reciprocating side of a key exchange initiated by `counterparty`
    async fn recv_secure_channel(
        &self,
        counterparty: &str,
        kx: Box<dyn KeyExchange>,
        cipher: Box<dyn Cipher>,
    ) -> Result<(), Error>;
    /// Takes part in the ballot, returns the tally once every round completes
    async fn evote(&self, ballot: Ballot) -> Result<Tally, Error>;
    /// Interrupts participation in the current ballot
    async fn evote_abort(&self, reason: &str) -> Result<(), Error>;
}

/// In-process client
///
/// Cheap to clone: all clones share the same state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    server: Arc<dyn CryptoServer>,
    decisions: Arc<dyn DecisionSource>,

    history: RwLock<HashMap<ClientPair, Vec<Message>>>,
    ciphers: Mutex<HashMap<String, Box<dyn Cipher>>>,
    sessions: Rendezvous,

    vote: Mutex<Option<VoteInFlight>>,
    phase: watch::Sender<Option<RoundState>>,
}

struct VoteInFlight {
    ballot: Uuid,
    cancel: CancellationToken,
}

impl Client {
    /// Constructs a client talking to `server`
    ///
    /// Client is not registered on the server until [`register`](Self::register) is called.
    pub fn new(
        name: impl Into<String>,
        server: Arc<dyn CryptoServer>,
        decisions: impl DecisionSource + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                server,
                decisions: Arc::new(decisions),
                history: Default::default(),
                ciphers: Default::default(),
                sessions: Rendezvous::new(),
                vote: Mutex::new(None),
                phase: watch::channel(None).0,
            }),
        }
    }

    /// Constructs a client and registers it on the server
    pub async fn connect(
        name: impl Into<String>,
        server: Arc<dyn CryptoServer>,
        decisions: impl DecisionSource + 'static,
    ) -> Result<Self, Error> {
        let client = Self::new(name, server, decisions);
        if !client.register().await? {
            return Err(Error::NameTaken {
                name: client.name().to_owned(),
            });
        }
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Registers the client on its server
    ///
    /// Returns `false` if the name is already taken.
    pub async fn register(&self) -> Result<bool, Error> {
        self.inner
            .server
            .register_client(Arc::new(self.clone()))
            .await
    }

    pub async fn unregister(&self) -> Result<bool, Error> {
        self.inner.server.unregister_client(self.name()).await
    }

    /// Starts receiving copies of `victim`'s traffic
    pub async fn eavesdrop(&self, victim: &str) -> Result<(), Error> {
        self.inner.server.eavesdrop(self.name(), victim).await
    }

    pub async fn stop_eavesdrop(&self, victim: &str) -> Result<(), Error> {
        self.inner.server.stop_eavesdrop(self.name(), victim).await
    }

    /// Sends plaintext message, returns text observed by the recipient
    pub async fn send_message(
        &self,
        to: &str,
        text: &str,
        session: Option<&SessionId>,
    ) -> Result<String, Error> {
        self.ensure_not_self(to)?;
        let msg = Message::plain(text).with_session(session.cloned());
        self.inner.server.send_message(self.name(), to, msg).await
    }

    /// Sends a message encrypted under the cipher negotiated with `to`
    ///
    /// Negotiates the cipher first (Diffie-Hellman + ElGamal) if there's none yet.
    pub async fn send_encrypted_message(
        &self,
        to: &str,
        text: &str,
        session: Option<&SessionId>,
    ) -> Result<String, Error> {
        self.ensure_not_self(to)?;
        if !self.has_secure_channel(to).await
            && !self
                .init_secure_channel(to, Box::new(DiffieHellman::new()), Box::new(ElGamal::new()))
                .await
        {
            return Err(Error::SecureChannel {
                counterparty: to.to_owned(),
            });
        }

        let msg = {
            let mut ciphers = self.inner.ciphers.lock().await;
            let cipher = ciphers.get_mut(to).ok_or_else(|| Error::SecureChannel {
                counterparty: to.to_owned(),
            })?;
            cipher.encrypt(text)?
        };
        self.inner
            .server
            .send_message(self.name(), to, msg.with_session(session.cloned()))
            .await
    }

    /// Takes a message addressed to this client within the session, waiting for one if needed
    pub async fn wait_for_message(&self, session: &SessionId) -> Message {
        let (sender, msg) = self.inner.sessions.wait_for_message(session).await;
        trace!(client = %self.name(), %session, %sender, "session message consumed");
        msg
    }

    /// Negotiates a cipher with `counterparty`
    ///
    /// Local party runs the initiating side of `kx` while the server relays copies of `kx` and
    /// `cipher` to the counterparty, which runs the reciprocating side. If either side fails, the
    /// other one is cancelled and `false` is returned. On success the cipher is bound to the
    /// obtained key and cached for subsequent encrypted messages.
    pub async fn init_secure_channel(
        &self,
        counterparty: &str,
        mut kx: Box<dyn KeyExchange>,
        mut cipher: Box<dyn Cipher>,
    ) -> bool {
        if self.has_secure_channel(counterparty).await {
            warn!(client = %self.name(), counterparty, "secure channel already exists, replacing it");
        }

        let mut relay = tokio::spawn({
            let server = self.inner.server.clone();
            let from = self.name().to_owned();
            let to = counterparty.to_owned();
            let (kx, cipher) = (kx.copy(), cipher.copy());
            async move { server.relay_secure_channel(&from, &to, kx, cipher).await }
        });

        let outcome = {
            let mut initiate = kx.initiate(self, counterparty);
            tokio::select! {
                relayed = &mut relay => match relayed.map_err(Error::from).and_then(|r| r) {
                    Ok(()) => initiate.await,
                    Err(err) => Err(err),
                },
                key = &mut initiate => match key {
                    Ok(key) => relay.await.map_err(Error::from).and_then(|r| r).map(|()| key),
                    Err(err) => {
                        relay.abort();
                        Err(err)
                    }
                },
            }
        };

        match outcome {
            Ok(key) => {
                cipher.set_key(key);
                self.inner
                    .ciphers
                    .lock()
                    .await
                    .insert(counterparty.to_owned(), cipher);
                info!(client = %self.name(), counterparty, "secure channel established");
                true
            }
            Err(err) => {
                error!(client = %self.name(), counterparty, %err, "secure channel failed");
                self.inner.sessions.discard(kx.protocol_id()).await;
                false
            }
        }
    }

    /// Number of session messages received but not consumed yet
    pub async fn pending(&self, session: &SessionId) -> usize {
        self.inner.sessions.pending(session).await
    }

    pub async fn has_secure_channel(&self, counterparty: &str) -> bool {
        self.inner.ciphers.lock().await.contains_key(counterparty)
    }

    /// Messages recorded for the `(from, to)` pair, oldest first
    pub async fn history(&self, from: &str, to: &str) -> Vec<Message> {
        self.inner
            .history
            .read()
            .await
            .get(&ClientPair::new(from, to))
            .cloned()
            .unwrap_or_default()
    }

    /// Phase of the latest ballot this client took part in
    pub fn vote_phase(&self) -> Option<RoundState> {
        *self.inner.phase.borrow()
    }

    pub async fn is_voting(&self) -> bool {
        self.inner.vote.lock().await.is_some()
    }

    fn ensure_not_self(&self, to: &str) -> Result<(), Error> {
        if to == self.name() {
            error!(client = %self.name(), "attempt to send message to itself");
            return Err(Error::SelfAddressed {
                name: to.to_owned(),
            });
        }
        Ok(())
    }

    /// Text of the message as this client sees it
    ///
    /// Encrypted message is decrypted with the cipher negotiated with its sender, if there's one,
    /// even when the client only eavesdrops on it: an eavesdropper ends up with garbage then.
    async fn observe(&self, from: &str, to: &str, msg: &Message) -> String {
        if !msg.is_encrypted() {
            return msg.plaintext.clone();
        }

        let ciphers = self.inner.ciphers.lock().await;
        let Some(cipher) = ciphers.get(from) else {
            return msg.ciphertext.clone();
        };
        match cipher.decrypt(msg) {
            Ok(text) => {
                if to == self.name() && !msg.plaintext.is_empty() && text != msg.plaintext {
                    warn!(client = %self.name(), from, "decrypted text doesn't match sent one");
                }
                text
            }
            Err(err) => {
                warn!(client = %self.name(), from, %err, "unable to decrypt message");
                msg.ciphertext.clone()
            }
        }
    }

    /// Releases vote guard if it still belongs to the ballot
    async fn release_vote(&self, ballot: Uuid) {
        let mut vote = self.inner.vote.lock().await;
        if vote.as_ref().map(|v| v.ballot) == Some(ballot) {
            *vote = None;
        }
    }

    fn mark_aborted(&self, ballot: Uuid) {
        let mut aborted = RoundState::new(ballot);
        aborted.abort();
        self.inner.phase.send_replace(Some(aborted));
    }

    /// Publishes phase of the ballot unless that ballot was already aborted
    fn publish_phase(&self, state: RoundState) {
        self.inner.phase.send_if_modified(|current| match current {
            Some(s) if s.ballot == state.ballot && s.phase == EVotePhase::Aborted => false,
            _ => {
                *current = Some(state);
                true
            }
        });
    }
}

#[async_trait]
impl CryptoClient for Client {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn ping(&self) -> Result<bool, Error> {
        Ok(true)
    }

    async fn recv_message(&self, from: &str, to: &str, msg: Message) -> Result<String, Error> {
        self.inner
            .history
            .write()
            .await
            .entry(ClientPair::new(from, to))
            .or_default()
            .push(msg.clone());

        if let (Some(session), true) = (msg.session_id.clone(), to == self.name()) {
            let text = msg.observed_text().to_owned();
            self.inner.sessions.deposit(&session, from, msg).await;
            trace!(client = %self.name(), %session, from, "session message received");
            return Ok(text);
        }

        let text = self.observe(from, to, &msg).await;
        match (&msg.tag, to == self.name()) {
            (None, true) => info!("{}: {}", from, text),
            (None, false) => info!("{}-{}: {}", from, to, text),
            (Some(tag), _) => info!("{}-{} ({}): {}", from, to, tag, text),
        }
        Ok(text)
    }

    async fn recv_secure_channel(
        &self,
        counterparty: &str,
        mut kx: Box<dyn KeyExchange>,
        mut cipher: Box<dyn Cipher>,
    ) -> Result<(), Error> {
        if self.has_secure_channel(counterparty).await {
            warn!(client = %self.name(), counterparty, "secure channel already exists, replacing it");
        }
        let key = match kx.reciprocate(self, counterparty).await {
            Ok(key) => key,
            Err(err) => {
                self.inner.sessions.discard(kx.protocol_id()).await;
                return Err(err);
            }
        };
        cipher.set_key(key);
        self.inner
            .ciphers
            .lock()
            .await
            .insert(counterparty.to_owned(), cipher);
        info!(client = %self.name(), counterparty, "secure channel accepted");
        Ok(())
    }

    async fn evote(&self, ballot: Ballot) -> Result<Tally, Error> {
        let cancel = {
            let mut vote = self.inner.vote.lock().await;
            if vote.is_some() {
                error!(client = %self.name(), ballot = %ballot.id, "already voting");
                return Err(EVoteError::AlreadyVoting {
                    name: self.name().to_owned(),
                }
                .into());
            }
            let cancel = CancellationToken::new();
            *vote = Some(VoteInFlight {
                ballot: ballot.id,
                cancel: cancel.clone(),
            });
            cancel
        };

        let span = info_span!("evote", voter = %self.name(), ballot = %ballot.id);
        let participation = tokio::spawn({
            let client = self.clone();
            let cancel = cancel.clone();
            async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    tally = client.participate(&ballot) => tally,
                };
                client.release_vote(ballot.id).await;
                if let Err(err) = &result {
                    debug!(%err, "participation ended");
                    client.inner.sessions.discard(&ballot.session_id()).await;
                    client.mark_aborted(ballot.id);
                }
                result
            }
            .instrument(span)
        });

        // caller giving up on the ballot cancels participation
        let _cancel_on_drop = cancel.drop_guard();
        participation.await.map_err(Error::from).and_then(|r| r)
    }

    async fn evote_abort(&self, reason: &str) -> Result<(), Error> {
        let in_flight = self.inner.vote.lock().await.take();
        match in_flight {
            Some(vote) => {
                error!(client = %self.name(), ballot = %vote.ballot, reason, "evote aborted");
                vote.cancel.cancel();
                self.inner
                    .sessions
                    .discard(&SessionId::from(vote.ballot))
                    .await;
                self.mark_aborted(vote.ballot);
            }
            None => warn!(client = %self.name(), reason, "abort requested, but not voting"),
        }
        Ok(())
    }
}

#[async_trait]
impl SessionChannel for Client {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn send_message(
        &self,
        to: &str,
        text: &str,
        session: Option<&SessionId>,
    ) -> Result<String, Error> {
        Client::send_message(self, to, text, session).await
    }

    async fn wait_for_message(&self, session: &SessionId) -> Result<Message, Error> {
        Ok(Client::wait_for_message(self, session).await)
    }
}
