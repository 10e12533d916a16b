use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::client::CryptoClient;
use crate::error::Error;

/// Registered clients along with their eavesdroppers
///
/// Both tables are mutated together, so a registered client always has its (possibly empty)
/// listener list and a listener list never outlives its client.
#[derive(Default)]
pub(crate) struct Registry {
    clients: BTreeMap<String, Arc<dyn CryptoClient>>,
    /// victim -> listeners, in order of subscription
    notifications: HashMap<String, Vec<String>>,
}

/// Recipients of a single message, in delivery order
pub(crate) struct Route {
    pub listeners: Vec<(String, Arc<dyn CryptoClient>)>,
    pub recipient: Arc<dyn CryptoClient>,
}

impl Registry {
    /// Registers the client, returns `false` if the name is taken
    pub fn insert(&mut self, client: Arc<dyn CryptoClient>) -> bool {
        let name = client.name().to_owned();
        if self.clients.contains_key(&name) {
            return false;
        }
        self.notifications.insert(name.clone(), vec![]);
        self.clients.insert(name, client);
        true
    }

    /// Removes the client and purges it from every listener list
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn CryptoClient>> {
        let client = self.clients.remove(name)?;
        self.notifications.remove(name);
        for listeners in self.notifications.values_mut() {
            listeners.retain(|listener| listener != name);
        }
        Some(client)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CryptoClient>, Error> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| Error::client_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Registered names in alphabetical order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    /// Handles of all registered clients in alphabetical order
    pub fn snapshot(&self) -> Vec<(String, Arc<dyn CryptoClient>)> {
        self.clients
            .iter()
            .map(|(name, client)| (name.clone(), client.clone()))
            .collect()
    }

    /// Subscribes `listener` to `victim`'s traffic, returns `false` if it's already subscribed
    pub fn add_listener(&mut self, listener: &str, victim: &str) -> Result<bool, Error> {
        self.ensure_registered(listener)?;
        self.ensure_registered(victim)?;
        let listeners = self
            .notifications
            .entry(victim.to_owned())
            .or_default();
        if listeners.iter().any(|l| l == listener) {
            return Ok(false);
        }
        listeners.push(listener.to_owned());
        Ok(true)
    }

    /// Unsubscribes `listener`, returns `false` if it wasn't subscribed
    pub fn remove_listener(&mut self, listener: &str, victim: &str) -> Result<bool, Error> {
        self.ensure_registered(listener)?;
        self.ensure_registered(victim)?;
        let listeners = self
            .notifications
            .entry(victim.to_owned())
            .or_default();
        let before = listeners.len();
        listeners.retain(|l| l != listener);
        Ok(listeners.len() != before)
    }

    pub fn listeners_of(&self, victim: &str) -> &[String] {
        self.notifications
            .get(victim)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolves recipients of a message from `from` to `to`
    ///
    /// Listeners of `to` go first, then listeners of `from`. Every listener appears once, and
    /// the recipient itself is never listed as a listener.
    pub fn route(&self, from: &str, to: &str) -> Result<Route, Error> {
        self.ensure_registered(from)?;
        let recipient = self.get(to)?;

        let mut listeners: Vec<(String, Arc<dyn CryptoClient>)> = vec![];
        for name in self.listeners_of(to).iter().chain(self.listeners_of(from)) {
            if name == to || listeners.iter().any(|(l, _)| l == name) {
                continue;
            }
            listeners.push((name.clone(), self.get(name)?));
        }

        Ok(Route {
            listeners,
            recipient,
        })
    }

    fn ensure_registered(&self, name: &str) -> Result<(), Error> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(Error::client_not_found(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use matches::assert_matches;

    use crate::crypto::{Cipher, KeyExchange};
    use crate::evote::{Ballot, Tally};
    use crate::message::Message;

    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl CryptoClient for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn ping(&self) -> Result<bool, Error> {
            Ok(true)
        }
        async fn recv_message(&self, _: &str, _: &str, msg: Message) -> Result<String, Error> {
            Ok(msg.plaintext)
        }
        async fn recv_secure_channel(
            &self,
            _: &str,
            _: Box<dyn KeyExchange>,
            _: Box<dyn Cipher>,
        ) -> Result<(), Error> {
            Ok(())
        }
        async fn evote(&self, _: Ballot) -> Result<Tally, Error> {
            Ok(Tally { yes: 0, no: 0 })
        }
        async fn evote_abort(&self, _: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    fn registry(names: &[&'static str]) -> Registry {
        let mut registry = Registry::default();
        for name in names {
            assert!(registry.insert(Arc::new(Named(*name))));
        }
        registry
    }

    fn route_names(route: &Route) -> Vec<&str> {
        route.listeners.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = registry(&["c1"]);
        registry.add_listener("c1", "c1").unwrap();

        assert!(!registry.insert(Arc::new(Named("c1"))));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["c1"]);
        assert_eq!(registry.listeners_of("c1"), ["c1"]);
    }

    #[test]
    fn listeners_are_listed_once_in_subscription_order() {
        let mut registry = registry(&["a", "b", "c", "d"]);
        assert!(registry.add_listener("d", "a").unwrap());
        assert!(registry.add_listener("c", "a").unwrap());
        assert!(!registry.add_listener("c", "a").unwrap());

        assert_eq!(registry.listeners_of("a"), ["d", "c"]);
    }

    #[test]
    fn route_lists_listeners_of_recipient_first() {
        let mut registry = registry(&["from", "to", "l1", "l2", "l3"]);
        registry.add_listener("l2", "from").unwrap();
        registry.add_listener("l1", "to").unwrap();
        registry.add_listener("l3", "to").unwrap();
        registry.add_listener("l1", "from").unwrap();
        registry.add_listener("to", "from").unwrap();

        let route = registry.route("from", "to").unwrap();
        assert_eq!(route_names(&route), ["l1", "l3", "l2"]);
        assert_eq!(route.recipient.name(), "to");
    }

    #[test]
    fn unregistering_purges_client_from_listener_lists() {
        let mut registry = registry(&["a", "b", "c"]);
        registry.add_listener("c", "a").unwrap();
        registry.add_listener("c", "b").unwrap();
        registry.add_listener("a", "c").unwrap();

        assert!(registry.remove("c").is_some());
        assert!(registry.remove("c").is_none());
        assert!(registry.listeners_of("a").is_empty());
        assert!(registry.listeners_of("b").is_empty());
        assert!(registry.listeners_of("c").is_empty());
        assert_eq!(route_names(&registry.route("a", "b").unwrap()), Vec::<&str>::new());
    }

    #[test]
    fn unknown_names_are_reported() {
        let mut registry = registry(&["a"]);
        assert_matches!(
            registry.add_listener("a", "ghost"),
            Err(Error::ClientNotFound { name }) if name == "ghost"
        );
        assert_matches!(
            registry.remove_listener("ghost", "a"),
            Err(Error::ClientNotFound { .. })
        );
        assert!(matches!(
            registry.route("ghost", "a"),
            Err(Error::ClientNotFound { .. })
        ));
        assert!(matches!(
            registry.route("a", "ghost"),
            Err(Error::ClientNotFound { .. })
        ));
    }
}
