use std::time::Duration;

use num_bigint::BigUint;
use thiserror::Error;

/// Error of any client or server operation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Target name is not registered on the server or didn't respond
    #[error("client {name} not found")]
    ClientNotFound { name: String },
    #[error("name {name} is already registered")]
    NameTaken { name: String },
    /// Transport-level failure
    #[error("remote call failed")]
    Remote(#[source] RemoteError),
    /// Operation was interrupted by cooperative cancellation
    #[error("operation cancelled")]
    Cancelled,
    #[error("{name} cannot send messages to itself")]
    SelfAddressed { name: String },
    #[error("secure channel with {counterparty} could not be established")]
    SecureChannel { counterparty: String },
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: &'static str },
    #[error("cipher failure")]
    Cipher(#[from] CipherError),
    #[error("e-vote failure")]
    EVote(#[from] EVoteError),
}

impl Error {
    pub(crate) fn client_not_found(name: impl Into<String>) -> Self {
        Error::ClientNotFound { name: name.into() }
    }

    /// Tells whether error is a cooperative cancellation rather than a real failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Transport failure reported by a remote handle
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct RemoteError {
    reason: String,
}

impl RemoteError {
    /// Constructs an error with given description
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Error::Cancelled
        } else {
            Error::Remote(RemoteError::new(format!("task failed: {}", err)))
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Error::Remote(err)
    }
}

/// Error of a [`Cipher`](crate::crypto::Cipher) operation
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CipherError {
    #[error("cipher is not bound to a key")]
    MissingKey,
    #[error("decryption requires a private scalar")]
    MissingPrivateKey,
    #[error("message doesn't carry encryption state")]
    MissingEncryptionState,
    #[error("character {0:?} doesn't fit into the group")]
    UnsupportedCharacter(char),
    #[error("value {0} can't be represented as a character")]
    UnrepresentableCiphertext(u32),
    #[error("ciphertext is not an integer")]
    MalformedCiphertext,
    #[error("group element has no inverse")]
    NotInvertible,
}

/// Error of a ballot
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EVoteError {
    #[error("{result} is not a valid power of {g} mod {p}")]
    InvalidResult {
        result: BigUint,
        g: BigUint,
        p: BigUint,
    },
    #[error("{name} already participating in evote")]
    AlreadyVoting { name: String },
    #[error("no clients registered to vote")]
    NoVoters,
    #[error("ballot didn't complete within {0:?}")]
    Timeout(Duration),
    #[error("voter {voter} failed")]
    VoterFailed {
        voter: String,
        #[source]
        source: Box<Error>,
    },
    #[error("tally task failed")]
    Coordinator(#[source] Box<Error>),
    #[error("no ballot in progress for session {session}")]
    NotInProgress { session: crate::message::SessionId },
    #[error("phase {to:?} can't follow {from:?}")]
    PhaseOutOfOrder {
        from: crate::evote::EVotePhase,
        to: crate::evote::EVotePhase,
    },
}
