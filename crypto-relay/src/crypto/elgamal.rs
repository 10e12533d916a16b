use num_bigint::{BigUint, RandBigInt};
use num_traits::ToPrimitive;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::error::CipherError;
use crate::message::Message;

use super::{Cipher, KeyMaterial};

/// ElGamal over the key's group, applied character by character
///
/// Every character of plaintext is treated as a group element (its code point) and encrypted
/// under the same ephemeral value, so only characters with code point below `p` are supported.
/// Ciphertext is the sequence of resulting elements reinterpreted as characters. Identical
/// characters encrypt to identical ciphertext characters within one message.
pub struct ElGamal {
    key: Option<KeyMaterial>,
    rng: ChaCha20Rng,
}

impl ElGamal {
    /// Constructs a cipher that's not bound to any key yet
    pub fn new() -> Self {
        Self {
            key: None,
            rng: ChaCha20Rng::from_entropy(),
        }
    }

    pub fn with_key(key: KeyMaterial) -> Self {
        let mut cipher = Self::new();
        cipher.set_key(key);
        cipher
    }

    fn bound_key(&self) -> Result<&KeyMaterial, CipherError> {
        self.key.as_ref().ok_or(CipherError::MissingKey)
    }

    /// Samples ephemeral `y` and returns `(xhat^y, g^y)`
    fn ephemeral(&mut self) -> Result<(BigUint, BigUint), CipherError> {
        let key = self.key.as_ref().ok_or(CipherError::MissingKey)?;
        let group = &key.public.group;
        let y = self.rng.gen_biguint(key.bits) % &group.p;
        let mask = key.public.peer_public.modpow(&y, &group.p);
        Ok((mask, group.pow(&y)))
    }

    /// Inverse of `yhat^x`, the factor that strips the mask off
    fn unmask_factor(&self, msg: &Message) -> Result<BigUint, CipherError> {
        let key = self.bound_key()?;
        let x = key.private.as_ref().ok_or(CipherError::MissingPrivateKey)?;
        let y_hat = msg
            .encryption_state
            .as_ref()
            .ok_or(CipherError::MissingEncryptionState)?;
        let group = &key.public.group;
        group.inverse(&y_hat.modpow(x, &group.p))
    }
}

impl Default for ElGamal {
    fn default() -> Self {
        Self::new()
    }
}

impl Cipher for ElGamal {
    fn set_key(&mut self, key: KeyMaterial) {
        self.key = Some(key);
    }

    fn key(&self) -> Option<&KeyMaterial> {
        self.key.as_ref()
    }

    fn seed(&mut self, seed: u64) {
        self.rng = ChaCha20Rng::seed_from_u64(seed);
    }

    fn encrypt(&mut self, plaintext: &str) -> Result<Message, CipherError> {
        let (mask, y_hat) = self.ephemeral()?;
        let p = &self.bound_key()?.public.group.p;

        let ciphertext = plaintext
            .chars()
            .map(|ch| {
                let m = BigUint::from(u32::from(ch));
                if &m >= p {
                    return Err(CipherError::UnsupportedCharacter(ch));
                }
                to_char(&(&mask * m % p))
            })
            .collect::<Result<String, _>>()?;

        Ok(Message {
            plaintext: plaintext.to_owned(),
            ciphertext,
            encryption_state: Some(y_hat),
            ..Default::default()
        })
    }

    fn decrypt(&self, msg: &Message) -> Result<String, CipherError> {
        let factor = self.unmask_factor(msg)?;
        let p = &self.bound_key()?.public.group.p;

        msg.ciphertext
            .chars()
            .map(|ch| to_char(&(&factor * BigUint::from(u32::from(ch)) % p)))
            .collect()
    }

    fn encrypt_integer(&mut self, m: &BigUint) -> Result<Message, CipherError> {
        let (mask, y_hat) = self.ephemeral()?;
        let p = &self.bound_key()?.public.group.p;
        let c = mask * m % p;

        Ok(Message {
            plaintext: m.to_string(),
            ciphertext: c.to_string(),
            encryption_state: Some(y_hat),
            ..Default::default()
        })
    }

    fn decrypt_integer(&self, msg: &Message) -> Result<BigUint, CipherError> {
        let factor = self.unmask_factor(msg)?;
        let p = &self.bound_key()?.public.group.p;
        let c = msg
            .ciphertext
            .trim()
            .parse::<BigUint>()
            .map_err(|_| CipherError::MalformedCiphertext)?;
        Ok(factor * c % p)
    }

    fn copy(&self) -> Box<dyn Cipher> {
        Box::new(Self::new())
    }
}

fn to_char(x: &BigUint) -> Result<char, CipherError> {
    let code = x.to_u32().ok_or(CipherError::MalformedCiphertext)?;
    char::from_u32(code).ok_or(CipherError::UnrepresentableCiphertext(code))
}
