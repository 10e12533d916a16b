//! Development tools
//!
//! [`Simulation`] launches an in-process server and connects clients to it, each with a preset
//! decision, which is enough to run ballots and key exchanges in tests.
//!
//! ## Example
//! ```rust
//! # use crypto_relay::dev::Simulation;
//! # use crypto_relay::{ServerConfig, Vote};
//! # #[tokio::main(flavor = "multi_thread")] async fn main() -> Result<(), crypto_relay::Error> {
//! let mut simulation = Simulation::launch(ServerConfig::default());
//! for (name, vote) in [("c1", Vote::Yes), ("c2", Vote::No), ("c3", Vote::Yes)] {
//!     simulation.connect(name).await?.decision.set(vote);
//! }
//!
//! let tally = simulation.server().run_evote("pizza for lunch?").await?;
//! assert_eq!(tally.to_string(), "(2,1)");
//! # Ok(()) }
//! ```

use crate::client::Client;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::evote::{Preset, PresetDecision, Vote};
use crate::server::Server;

/// Server with clients attached to it
pub struct Simulation {
    server: Server,
    voters: Vec<Voter>,
}

/// Client connected to the simulation along with its decision handle
#[derive(Clone)]
pub struct Voter {
    pub client: Client,
    pub decision: PresetDecision,
}

impl Simulation {
    /// Starts a server
    ///
    /// ## Panics
    /// Panics if called outside of tokio runtime
    pub fn launch(config: ServerConfig) -> Self {
        Self {
            server: Server::new(config),
            voters: vec![],
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Connects a new client that votes `No` until told otherwise
    pub async fn connect(&mut self, name: &str) -> Result<&Voter, Error> {
        let decision = PresetDecision::new(Vote::No);
        let client = Client::connect(name, self.server.handle(), decision.clone()).await?;
        self.voters.push(Voter { client, decision });
        Ok(&self.voters[self.voters.len() - 1])
    }

    /// Looks up a client connected via [`connect`](Self::connect)
    pub fn voter(&self, name: &str) -> Option<&Voter> {
        self.voters.iter().find(|v| v.client.name() == name)
    }

    /// Clients in order of connection
    pub fn voters(&self) -> &[Voter] {
        &self.voters
    }

    /// Sets decisions of clients in order of connection
    ///
    /// Extra presets are ignored, clients beyond the presets keep their decision.
    pub fn preset_votes<P: Into<Preset>>(&self, presets: impl IntoIterator<Item = P>) {
        for (voter, preset) in self.voters.iter().zip(presets) {
            voter.decision.set(preset);
        }
    }

    /// Forgets about client, unregistering it from the server
    pub async fn disconnect(&mut self, name: &str) -> Result<bool, Error> {
        let Some(index) = self.voters.iter().position(|v| v.client.name() == name) else {
            return Ok(false);
        };
        let voter = self.voters.remove(index);
        voter.client.unregister().await
    }
}
