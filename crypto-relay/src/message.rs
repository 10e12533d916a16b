use std::fmt;

use num_bigint::BigUint;

/// Correlation token that routes a message into a rendezvous slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh unique session id
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<uuid::Uuid> for SessionId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message travelling between clients
///
/// Routing endpoints are not part of the message: they travel alongside it (see
/// [`CryptoServer::send_message`](crate::server::CryptoServer::send_message)) and form
/// the [`ClientPair`] under which endpoints record it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Text as typed by sender
    ///
    /// For encrypted messages it's kept for testing purposes only and is never relayed
    /// to third parties.
    pub plaintext: String,
    /// Encrypted text, empty if message is not encrypted
    pub ciphertext: String,
    pub session_id: Option<SessionId>,
    /// Human-readable label shown to eavesdroppers
    pub tag: Option<String>,
    /// Protocol-specific auxiliary value (e.g. ElGamal ephemeral key), opaque to routing
    pub encryption_state: Option<BigUint>,
}

impl Message {
    /// Constructs an unencrypted message
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            plaintext: text.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<Option<SessionId>>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn is_encrypted(&self) -> bool {
        !self.ciphertext.is_empty()
    }

    /// Text a third party observes: ciphertext if message is encrypted, plaintext otherwise
    pub fn observed_text(&self) -> &str {
        if self.is_encrypted() {
            &self.ciphertext
        } else {
            &self.plaintext
        }
    }

    /// Copy of the message that is safe to hand to a bystander
    ///
    /// Session id is dropped so the copy never lands in a rendezvous slot, and plaintext of
    /// encrypted message is erased.
    pub fn relay_copy(&self) -> Self {
        Self {
            plaintext: if self.is_encrypted() {
                String::new()
            } else {
                self.plaintext.clone()
            },
            ciphertext: self.ciphertext.clone(),
            session_id: None,
            tag: self.tag.clone(),
            encryption_state: self.encryption_state.clone(),
        }
    }
}

/// Ordered pair of endpoints, key of the message history
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientPair {
    pub from: String,
    pub to: String,
}

impl ClientPair {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for ClientPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}
