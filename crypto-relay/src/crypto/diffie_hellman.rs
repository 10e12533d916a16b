use async_trait::async_trait;
use num_bigint::{BigUint, RandBigInt};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, trace};

use crate::error::Error;
use crate::message::SessionId;

use super::{parse_element, GroupParams, KeyExchange, KeyMaterial, SessionChannel};

/// Bit size of sampled exponents
pub const BITS: u64 = 31;

/// Diffie-Hellman over the fixed group `(P, G)`
///
/// Initiator samples `x`, sends `g^x` and waits for `y_hat`; reciprocator waits for `x_hat` first
/// and then replies with `g^y`. Both sides keep their own exponent along with peer's public value.
/// No combined scalar secret is derived: the resulting tuple is used directly as ElGamal key.
pub struct DiffieHellman {
    id: SessionId,
    group: GroupParams,
    rng: ChaCha20Rng,
}

impl DiffieHellman {
    /// Constructs a protocol instance with a fresh unique id
    pub fn new() -> Self {
        Self::with_id(SessionId::random())
    }

    pub fn with_id(id: SessionId) -> Self {
        Self {
            id,
            group: GroupParams::default(),
            rng: ChaCha20Rng::from_entropy(),
        }
    }

    pub fn group(&self) -> &GroupParams {
        &self.group
    }

    fn sample_exponent(&mut self) -> BigUint {
        self.rng.gen_biguint(BITS)
    }

    fn key(&self, private: BigUint, peer_public: BigUint) -> KeyMaterial {
        KeyMaterial {
            private: Some(private),
            public: super::DhTuple {
                group: self.group.clone(),
                peer_public,
            },
            bits: BITS,
        }
    }
}

impl Default for DiffieHellman {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyExchange for DiffieHellman {
    fn protocol_id(&self) -> &SessionId {
        &self.id
    }

    fn bits(&self) -> u64 {
        BITS
    }

    fn seed(&mut self, seed: u64) {
        self.rng = ChaCha20Rng::seed_from_u64(seed);
    }

    async fn initiate(
        &mut self,
        me: &dyn SessionChannel,
        peer: &str,
    ) -> Result<KeyMaterial, Error> {
        let x = self.sample_exponent();
        let x_hat = self.group.pow(&x);
        trace!(protocol = %self.id, me = me.name(), peer, "sending x_hat");
        me.send_message(peer, &x_hat.to_string(), Some(&self.id))
            .await?;

        let reply = me.wait_for_message(&self.id).await?;
        let y_hat = parse_element(&reply.plaintext)?;
        debug!(protocol = %self.id, me = me.name(), peer, "key exchange initiated");
        Ok(self.key(x, y_hat))
    }

    async fn reciprocate(
        &mut self,
        me: &dyn SessionChannel,
        peer: &str,
    ) -> Result<KeyMaterial, Error> {
        let y = self.sample_exponent();
        let y_hat = self.group.pow(&y);

        let request = me.wait_for_message(&self.id).await?;
        let x_hat = parse_element(&request.plaintext)?;
        trace!(protocol = %self.id, me = me.name(), peer, "sending y_hat");
        me.send_message(peer, &y_hat.to_string(), Some(&self.id))
            .await?;

        debug!(protocol = %self.id, me = me.name(), peer, "key exchange reciprocated");
        Ok(self.key(y, x_hat))
    }

    fn copy(&self) -> Box<dyn KeyExchange> {
        Box::new(Self::with_id(self.id.clone()))
    }
}
