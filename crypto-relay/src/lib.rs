//! A playground for multi-party cryptography: clients register on a relay server, exchange
//! plaintext or encrypted messages, eavesdrop on each other, and run distributed ballots whose
//! tally no single party is able to decrypt alone.
//!
//! ## Overview
//!
//! * [Server](server::Server) relays messages between registered clients. Every message is also
//!   delivered to the clients eavesdropping on its sender or recipient. A background heartbeat
//!   evicts clients that stop responding.
//! * [Client](client::Client) keeps message history, negotiates ciphers with its counterparties
//!   ([Diffie-Hellman](crypto::DiffieHellman) followed by [ElGamal](crypto::ElGamal)) and takes
//!   part in ballots.
//! * [Rendezvous store](rendezvous) synchronizes request/response exchanges and protocol rounds
//!   on both sides.
//! * [E-vote](evote) runs four barrier-synchronized rounds of threshold ElGamal over all
//!   registered clients, with timeout and coordinated abort.
//!
//! Client and server talk through [`CryptoClient`] and [`CryptoServer`] traits, so a transport
//! (RPC, sockets, ...) can be plugged in between them. Out of the box, both live in the same
//! process.
//!
//! Group parameters are tiny and the cipher encrypts character by character: this crate is meant
//! for teaching and demonstrations, not for protecting anything.
//!
//! ## Features
//!
//! * `dev` enables development tools such as [simulation](dev::Simulation)

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod config;
pub mod crypto;
mod error;
pub mod evote;
mod message;
pub mod rendezvous;
pub mod server;

#[cfg(feature = "dev")]
#[cfg_attr(docsrs, doc(cfg(feature = "dev")))]
pub mod dev;

pub use self::error::*;
pub use self::message::*;
#[doc(no_inline)]
pub use self::{
    client::{Client, CryptoClient},
    config::{HeartbeatConfig, ServerConfig},
    evote::{Ballot, PresetDecision, Tally, Vote},
    server::{CryptoServer, ListFormat, Server},
};
