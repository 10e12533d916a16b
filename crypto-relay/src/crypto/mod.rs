//! Key exchange and cipher protocols
//!
//! Both are pluggable: a client is handed a [`KeyExchange`] and a [`Cipher`] instance when
//! establishing a secure channel, and the counterparty receives [copies](KeyExchange::copy) of them.
//! A copy shares protocol identity but never mutable state, so parties living in the same process
//! don't step on each other's RNG.
//!
//! Group sizes are deliberately tiny and the cipher works character by character: this is a
//! teaching tool, not a secure one.

use async_trait::async_trait;
use num_bigint::BigUint;

use crate::error::{CipherError, Error};
use crate::message::{Message, SessionId};

pub mod diffie_hellman;
pub mod elgamal;

pub use self::{diffie_hellman::DiffieHellman, elgamal::ElGamal};

/// Modulus shared by all built-in protocols
pub const P: u32 = 31123;
/// Generator shared by all built-in protocols
pub const G: u32 = 2341;

/// Public group parameters `(p, g)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupParams {
    pub p: BigUint,
    pub g: BigUint,
}

impl GroupParams {
    pub fn new(p: impl Into<BigUint>, g: impl Into<BigUint>) -> Self {
        Self {
            p: p.into(),
            g: g.into(),
        }
    }

    /// `g^e mod p`
    pub fn pow(&self, e: &BigUint) -> BigUint {
        self.g.modpow(e, &self.p)
    }

    /// Multiplies all the elements modulo `p`
    pub fn product<'a>(&self, elements: impl IntoIterator<Item = &'a BigUint>) -> BigUint {
        elements
            .into_iter()
            .fold(BigUint::from(1u8), |acc, x| acc * x % &self.p)
    }

    /// Multiplicative inverse modulo `p`
    pub fn inverse(&self, x: &BigUint) -> Result<BigUint, CipherError> {
        x.modinv(&self.p).ok_or(CipherError::NotInvertible)
    }
}

impl Default for GroupParams {
    fn default() -> Self {
        Self::new(P, G)
    }
}

/// Public half of a key exchange: group parameters and peer's public value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhTuple {
    pub group: GroupParams,
    pub peer_public: BigUint,
}

/// Outcome of a key exchange
///
/// Never crosses the wire as a whole: only its public half is ever sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Private scalar, `None` for encryption-only keys
    pub private: Option<BigUint>,
    pub public: DhTuple,
    pub bits: u64,
}

impl KeyMaterial {
    /// Key that can only encrypt towards `peer_public`
    pub fn public_only(group: GroupParams, peer_public: BigUint, bits: u64) -> Self {
        Self {
            private: None,
            public: DhTuple { group, peer_public },
            bits,
        }
    }
}

/// Endpoint able to exchange session-scoped messages with its peers
///
/// Implemented by [`Client`](crate::client::Client); key exchange protocols talk through it.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    /// Name of the local party
    fn name(&self) -> &str;
    /// Sends `text` to `to` within given session, returns text that was delivered
    async fn send_message(
        &self,
        to: &str,
        text: &str,
        session: Option<&SessionId>,
    ) -> Result<String, Error>;
    /// Waits for a message addressed to the local party within given session
    async fn wait_for_message(&self, session: &SessionId) -> Result<Message, Error>;
}

/// Two-party key exchange
#[async_trait]
pub trait KeyExchange: Send + Sync {
    /// Identifies a protocol run; used as session id of its messages
    fn protocol_id(&self) -> &SessionId;
    /// Security parameter of the produced key
    fn bits(&self) -> u64;
    /// Reseeds internal RNG, makes protocol run reproducible
    fn seed(&mut self, seed: u64);
    /// Runs the initiating side of the protocol with `peer`
    async fn initiate(&mut self, me: &dyn SessionChannel, peer: &str)
        -> Result<KeyMaterial, Error>;
    /// Runs the responding side of the protocol with `peer`
    async fn reciprocate(
        &mut self,
        me: &dyn SessionChannel,
        peer: &str,
    ) -> Result<KeyMaterial, Error>;
    /// Fresh instance with the same protocol id and independent RNG
    fn copy(&self) -> Box<dyn KeyExchange>;
}

/// Encryption scheme bound to a [`KeyMaterial`]
pub trait Cipher: Send + Sync {
    /// Binds cipher to the key
    fn set_key(&mut self, key: KeyMaterial);
    fn key(&self) -> Option<&KeyMaterial>;
    /// Reseeds internal RNG
    fn seed(&mut self, seed: u64);

    fn encrypt(&mut self, plaintext: &str) -> Result<Message, CipherError>;
    fn decrypt(&self, msg: &Message) -> Result<String, CipherError>;
    /// Encrypts a single group element; ciphertext is its decimal representation
    fn encrypt_integer(&mut self, m: &BigUint) -> Result<Message, CipherError>;
    fn decrypt_integer(&self, msg: &Message) -> Result<BigUint, CipherError>;

    /// Fresh unbound instance of the same scheme
    fn copy(&self) -> Box<dyn Cipher>;
}

pub(crate) fn parse_element(text: &str) -> Result<BigUint, Error> {
    text.trim()
        .parse::<BigUint>()
        .map_err(|_| Error::MalformedMessage {
            reason: "expected a decimal group element",
        })
}
