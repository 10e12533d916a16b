#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crypto_relay::crypto::{Cipher, KeyExchange};
use crypto_relay::{Ballot, CryptoClient, Error, Message, RemoteError, Tally};

/// Single delivery observed by a [`Recorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receiver: String,
    pub from: String,
    pub to: String,
    pub text: String,
}

pub type Log = Arc<Mutex<Vec<Delivery>>>;

/// Client that writes every delivery into a log shared with other recorders
pub struct Recorder {
    name: String,
    log: Log,
    broken: bool,
}

impl Recorder {
    pub fn new(name: &str, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            log: log.clone(),
            broken: false,
        })
    }

    /// Recorder that rejects every call
    pub fn broken(name: &str, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            log: log.clone(),
            broken: true,
        })
    }

    fn fail_if_broken(&self) -> Result<(), Error> {
        if self.broken {
            Err(RemoteError::new(format!("{} is broken", self.name)).into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CryptoClient for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<bool, Error> {
        self.fail_if_broken()?;
        Ok(true)
    }

    async fn recv_message(&self, from: &str, to: &str, msg: Message) -> Result<String, Error> {
        self.fail_if_broken()?;
        self.log.lock().unwrap().push(Delivery {
            receiver: self.name.clone(),
            from: from.to_owned(),
            to: to.to_owned(),
            text: msg.observed_text().to_owned(),
        });
        Ok(msg.observed_text().to_owned())
    }

    async fn recv_secure_channel(
        &self,
        _counterparty: &str,
        _kx: Box<dyn KeyExchange>,
        _cipher: Box<dyn Cipher>,
    ) -> Result<(), Error> {
        self.fail_if_broken()?;
        Err(RemoteError::new("recorder doesn't negotiate ciphers").into())
    }

    async fn evote(&self, _ballot: Ballot) -> Result<Tally, Error> {
        Err(RemoteError::new("recorder doesn't vote").into())
    }

    async fn evote_abort(&self, _reason: &str) -> Result<(), Error> {
        self.fail_if_broken()
    }
}

/// Client that never answers pings
pub struct Hanging(pub &'static str);

#[async_trait]
impl CryptoClient for Hanging {
    fn name(&self) -> &str {
        self.0
    }

    async fn ping(&self) -> Result<bool, Error> {
        futures::future::pending().await
    }

    async fn recv_message(&self, _from: &str, _to: &str, _msg: Message) -> Result<String, Error> {
        futures::future::pending().await
    }

    async fn recv_secure_channel(
        &self,
        _counterparty: &str,
        _kx: Box<dyn KeyExchange>,
        _cipher: Box<dyn Cipher>,
    ) -> Result<(), Error> {
        futures::future::pending().await
    }

    async fn evote(&self, _ballot: Ballot) -> Result<Tally, Error> {
        futures::future::pending().await
    }

    async fn evote_abort(&self, _reason: &str) -> Result<(), Error> {
        futures::future::pending().await
    }
}

/// Client that misses every other ping
pub struct Flaky {
    name: &'static str,
    pings: AtomicU32,
}

impl Flaky {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            pings: AtomicU32::new(0),
        })
    }

    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CryptoClient for Flaky {
    fn name(&self) -> &str {
        self.name
    }

    async fn ping(&self) -> Result<bool, Error> {
        let n = self.pings.fetch_add(1, Ordering::SeqCst);
        if n % 2 == 0 {
            Err(RemoteError::new("packet lost").into())
        } else {
            Ok(true)
        }
    }

    async fn recv_message(&self, _from: &str, _to: &str, msg: Message) -> Result<String, Error> {
        Ok(msg.plaintext)
    }

    async fn recv_secure_channel(
        &self,
        _counterparty: &str,
        _kx: Box<dyn KeyExchange>,
        _cipher: Box<dyn Cipher>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn evote(&self, _ballot: Ballot) -> Result<Tally, Error> {
        Err(RemoteError::new("flaky client doesn't vote").into())
    }

    async fn evote_abort(&self, _reason: &str) -> Result<(), Error> {
        Ok(())
    }
}
