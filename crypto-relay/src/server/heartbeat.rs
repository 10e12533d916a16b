use std::collections::HashMap;
use std::sync::Weak;

use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::HeartbeatConfig;

use super::{Inner, Server};

/// Pings every registered client once per period and evicts those that miss `max_fails` pings
/// in a row
///
/// Stops once the server is dropped or shut down.
pub(super) async fn monitor(server: Weak<Inner>, config: HeartbeatConfig, shutdown: CancellationToken) {
    let mut fails: HashMap<String, u32> = HashMap::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.period) => (),
        }
        let Some(inner) = server.upgrade() else {
            break;
        };
        let server = Server { inner };

        let clients = server.inner.registry.read().await.snapshot();
        trace!(clients = clients.len(), "pinging clients");
        let ping_timeout = config.ping_timeout;
        let pings = clients.into_iter().map(|(name, client)| async move {
            let alive = matches!(timeout(ping_timeout, client.ping()).await, Ok(Ok(_)));
            (name, alive)
        });
        let results = join_all(pings).await;

        fails.retain(|name, _| results.iter().any(|(n, _)| n == name));
        for (name, alive) in results {
            if alive {
                fails.remove(&name);
                continue;
            }
            let missed = fails.entry(name.clone()).or_insert(0);
            *missed += 1;
            debug!(client = %name, missed = *missed, "client missed heartbeat");
            if *missed >= config.max_fails {
                fails.remove(&name);
                warn!(client = %name, "client stopped responding, evicting it");
                server.unregister(&name).await;
            }
        }
    }
    debug!("heartbeat stopped");
}
