//! Relay server
//!
//! Server keeps track of registered clients, forwards messages between them (along with copies
//! to eavesdroppers), relays key exchanges and coordinates ballots. Liveness of clients is
//! monitored by a background heartbeat started along with the server.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::CryptoClient;
use crate::config::ServerConfig;
use crate::crypto::{Cipher, KeyExchange};
use crate::error::{EVoteError, Error, RemoteError};
use crate::message::{Message, SessionId};
use crate::rendezvous::Rendezvous;

use self::registry::Registry;

mod evote;
mod heartbeat;
mod registry;

/// Pseudo-recipient of ballot contributions relayed to voters
pub const VOTERS: &str = "voters";

/// Operations clients invoke on the server
#[async_trait]
pub trait CryptoServer: Send + Sync {
    fn name(&self) -> &str;
    /// Registers a client, returns `false` if its name is taken
    async fn register_client(&self, client: Arc<dyn CryptoClient>) -> Result<bool, Error>;
    /// Unregisters a client, returns `false` if it wasn't registered
    async fn unregister_client(&self, name: &str) -> Result<bool, Error>;
    async fn client_list(&self, format: ListFormat) -> Result<String, Error>;
    async fn ping(&self) -> Result<bool, Error>;
    /// Subscribes `listener` to all the traffic sent by or to `victim`
    async fn eavesdrop(&self, listener: &str, victim: &str) -> Result<(), Error>;
    async fn stop_eavesdrop(&self, listener: &str, victim: &str) -> Result<(), Error>;
    /// Relays message to `to` and to eavesdroppers of both endpoints
    ///
    /// Eavesdroppers of `to` receive it first, then eavesdroppers of `from`, then `to` itself.
    /// Returns text observed by `to`.
    async fn send_message(&self, from: &str, to: &str, msg: Message) -> Result<String, Error>;
    /// Delivers message addressed to the server itself (e.g. ballot contributions)
    async fn recv_message(&self, from: &str, to: &str, msg: Message) -> Result<String, Error>;
    /// Asks `to` to reciprocate a key exchange initiated by `from`
    async fn relay_secure_channel(
        &self,
        from: &str,
        to: &str,
        kx: Box<dyn KeyExchange>,
        cipher: Box<dyn Cipher>,
    ) -> Result<(), Error>;
    /// Runs a ballot among all registered clients
    ///
    /// Returns the tally formatted as `"(yes,no)"`, or empty string if ballot failed.
    async fn initiate_evote(&self, proposal: &str) -> Result<String, Error>;
}

/// Format of [client list](CryptoServer::client_list)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    /// `[c1, c2, c3]`
    Array,
    /// One name per line
    Lines,
}

/// In-process server
///
/// Cheap to clone: all clones share the same state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    registry: RwLock<Registry>,
    /// Inbox of ballot contributions, open only for the ballot in progress
    sessions: Rendezvous,
    ballot_in_flight: RwLock<Option<BallotInFlight>>,
    ballot: Mutex<()>,
    shutdown: CancellationToken,
}

struct BallotInFlight {
    session: SessionId,
    voters: BTreeSet<String>,
}

impl Server {
    /// Constructs a server and starts its heartbeat
    ///
    /// ## Panics
    /// Panics if called outside of tokio runtime
    pub fn new(config: ServerConfig) -> Self {
        let inner = Arc::new(Inner {
            config,
            registry: Default::default(),
            sessions: Rendezvous::gated(),
            ballot_in_flight: RwLock::new(None),
            ballot: Mutex::new(()),
            shutdown: CancellationToken::new(),
        });
        info!(
            server = %inner.config.name,
            address = %inner.config.listen_address,
            "server started"
        );
        tokio::spawn(heartbeat::monitor(
            Arc::downgrade(&inner),
            inner.config.heartbeat.clone(),
            inner.shutdown.clone(),
        ));
        Self { inner }
    }

    /// Type-erased handle to give out to clients
    ///
    /// Handle doesn't keep the server alive: registered clients hold it while the server holds
    /// them. Once every [`Server`] is dropped, calls through the handle fail with
    /// [`Error::Remote`].
    pub fn handle(&self) -> Arc<dyn CryptoServer> {
        Arc::new(ServerHandle {
            name: self.inner.config.name.clone(),
            inner: Arc::downgrade(&self.inner),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Looks up a registered client
    pub async fn client(&self, name: &str) -> Result<Arc<dyn CryptoClient>, Error> {
        self.inner.registry.read().await.get(name)
    }

    /// Names of clients eavesdropping on `victim`
    pub async fn listeners_of(&self, victim: &str) -> Vec<String> {
        self.inner.registry.read().await.listeners_of(victim).to_vec()
    }

    /// Stops the heartbeat
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn unregister(&self, name: &str) -> bool {
        let removed = self.inner.registry.write().await.remove(name);
        match removed {
            Some(_) => {
                info!(client = name, "client unregistered");
                true
            }
            None => {
                warn!(client = name, "unable to unregister: client not found");
                false
            }
        }
    }

    /// Relays a copy of ballot contribution to voters other than its sender
    async fn relay_to_voters(&self, from: &str, msg: &Message) {
        let voters = match &*self.inner.ballot_in_flight.read().await {
            Some(ballot) if msg.session_id.as_ref() == Some(&ballot.session) => {
                ballot.voters.clone()
            }
            _ => return,
        };
        let copy = msg.relay_copy();
        let deliveries = voters.iter().filter(|v| *v != from).map(|voter| {
            let copy = copy.clone();
            async move {
                let delivered = match self.client(voter).await {
                    Ok(client) => client.recv_message(from, VOTERS, copy).await.map(|_| ()),
                    Err(err) => Err(err),
                };
                if let Err(err) = delivered {
                    warn!(voter = %voter, %err, "unable to relay ballot contribution");
                }
            }
        });
        join_all(deliveries).await;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl CryptoServer for Server {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    async fn register_client(&self, client: Arc<dyn CryptoClient>) -> Result<bool, Error> {
        let name = client.name().to_owned();
        let inserted = self.inner.registry.write().await.insert(client);
        if inserted {
            info!(client = %name, "client registered");
        } else {
            warn!(client = %name, "name is already taken");
        }
        Ok(inserted)
    }

    async fn unregister_client(&self, name: &str) -> Result<bool, Error> {
        Ok(self.unregister(name).await)
    }

    async fn client_list(&self, format: ListFormat) -> Result<String, Error> {
        let registry = self.inner.registry.read().await;
        let names: Vec<&str> = registry.names().collect();
        Ok(match format {
            ListFormat::Array => format!("[{}]", names.join(", ")),
            ListFormat::Lines => names.join("\n"),
        })
    }

    async fn ping(&self) -> Result<bool, Error> {
        Ok(true)
    }

    async fn eavesdrop(&self, listener: &str, victim: &str) -> Result<(), Error> {
        let added = self
            .inner
            .registry
            .write()
            .await
            .add_listener(listener, victim)?;
        if added {
            info!(listener, victim, "eavesdropper added");
        } else {
            warn!(listener, victim, "already eavesdropping");
        }
        Ok(())
    }

    async fn stop_eavesdrop(&self, listener: &str, victim: &str) -> Result<(), Error> {
        let removed = self
            .inner
            .registry
            .write()
            .await
            .remove_listener(listener, victim)?;
        if removed {
            info!(listener, victim, "eavesdropper removed");
        } else {
            warn!(listener, victim, "wasn't eavesdropping");
        }
        Ok(())
    }

    async fn send_message(&self, from: &str, to: &str, msg: Message) -> Result<String, Error> {
        let route = self.inner.registry.read().await.route(from, to)?;

        for (listener, client) in route.listeners {
            debug!(from, to, %listener, "forwarding to eavesdropper");
            client.recv_message(from, to, msg.clone()).await?;
        }

        route
            .recipient
            .recv_message(from, to, msg)
            .await
            .map_err(|err| {
                warn!(from, to, %err, "delivery failed");
                Error::client_not_found(to)
            })
    }

    async fn recv_message(&self, from: &str, to: &str, msg: Message) -> Result<String, Error> {
        self.relay_to_voters(from, &msg).await;

        let text = msg.observed_text().to_owned();
        match msg.session_id.clone() {
            Some(session) => {
                if !self.inner.sessions.deposit(&session, from, msg).await {
                    warn!(from, %session, "contribution to a ballot that's not in progress");
                    return Err(EVoteError::NotInProgress { session }.into());
                }
            }
            None => info!("{}-{}: {}", from, to, text),
        }
        Ok(text)
    }

    async fn relay_secure_channel(
        &self,
        from: &str,
        to: &str,
        kx: Box<dyn KeyExchange>,
        cipher: Box<dyn Cipher>,
    ) -> Result<(), Error> {
        let recipient = {
            let registry = self.inner.registry.read().await;
            registry.get(from)?;
            registry.get(to)?
        };
        debug!(from, to, protocol = %kx.protocol_id(), "relaying key exchange");
        recipient.recv_secure_channel(from, kx, cipher).await
    }

    async fn initiate_evote(&self, proposal: &str) -> Result<String, Error> {
        Ok(self
            .run_evote(proposal)
            .await
            .map(|tally| tally.to_string())
            .unwrap_or_default())
    }
}

/// Client-side handle of a [`Server`], see [`Server::handle`]
struct ServerHandle {
    name: String,
    inner: Weak<Inner>,
}

impl ServerHandle {
    fn server(&self) -> Result<Server, Error> {
        match self.inner.upgrade() {
            Some(inner) => Ok(Server { inner }),
            None => Err(RemoteError::new(format!("server {} is gone", self.name)).into()),
        }
    }
}

#[async_trait]
impl CryptoServer for ServerHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn register_client(&self, client: Arc<dyn CryptoClient>) -> Result<bool, Error> {
        self.server()?.register_client(client).await
    }

    async fn unregister_client(&self, name: &str) -> Result<bool, Error> {
        self.server()?.unregister_client(name).await
    }

    async fn client_list(&self, format: ListFormat) -> Result<String, Error> {
        self.server()?.client_list(format).await
    }

    async fn ping(&self) -> Result<bool, Error> {
        self.server()?.ping().await
    }

    async fn eavesdrop(&self, listener: &str, victim: &str) -> Result<(), Error> {
        self.server()?.eavesdrop(listener, victim).await
    }

    async fn stop_eavesdrop(&self, listener: &str, victim: &str) -> Result<(), Error> {
        self.server()?.stop_eavesdrop(listener, victim).await
    }

    async fn send_message(&self, from: &str, to: &str, msg: Message) -> Result<String, Error> {
        self.server()?.send_message(from, to, msg).await
    }

    async fn recv_message(&self, from: &str, to: &str, msg: Message) -> Result<String, Error> {
        self.server()?.recv_message(from, to, msg).await
    }

    async fn relay_secure_channel(
        &self,
        from: &str,
        to: &str,
        kx: Box<dyn KeyExchange>,
        cipher: Box<dyn Cipher>,
    ) -> Result<(), Error> {
        self.server()?
            .relay_secure_channel(from, to, kx, cipher)
            .await
    }

    async fn initiate_evote(&self, proposal: &str) -> Result<String, Error> {
        self.server()?.initiate_evote(proposal).await
    }
}
