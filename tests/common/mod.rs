//! Integration test common infrastructure.
//!
//! Wires a server communicator and any number of clients over one shared
//! in-memory transport, so whole protocol flows run inside a single test
//! process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use switchboard::Communicator;
use switchboard::config::CommunicatorConfig;
use switchboard::plugins::{ClientCorePlugin, ServerCorePlugin};
use switchboard::store::MemoryStore;
use switchboard::transport::MemoryTransport;

/// One in-process network: shared transport, a running server, and the
/// store behind it.
#[allow(dead_code)]
pub struct TestNet {
    pub transport: MemoryTransport,
    pub store: Arc<MemoryStore>,
    pub server: Communicator,
}

#[allow(dead_code)]
impl TestNet {
    /// Start a server communicator with the core server plugin loaded.
    pub async fn start() -> anyhow::Result<Self> {
        let transport = MemoryTransport::new();
        let store = Arc::new(MemoryStore::new());
        let server = Communicator::new(
            CommunicatorConfig::with_identity("server"),
            Arc::new(transport.clone()),
        )?;
        server
            .load_plugin(Arc::new(ServerCorePlugin::new(store.clone())))
            .await?;
        Ok(Self { transport, store, server })
    }

    /// A communicator sharing this network's transport, no plugins loaded.
    pub fn bare(&self, identity: &str) -> anyhow::Result<Communicator> {
        Ok(Communicator::new(
            CommunicatorConfig::with_identity(identity),
            Arc::new(self.transport.clone()),
        )?)
    }

    /// A client communicator with the core client plugin loaded.
    pub async fn client(
        &self,
        identity: &str,
    ) -> anyhow::Result<(Communicator, Arc<ClientCorePlugin>)> {
        let comm = self.bare(identity)?;
        let core = Arc::new(ClientCorePlugin::new());
        comm.load_plugin(core.clone()).await?;
        Ok((comm, core))
    }

    pub async fn shutdown(&self) {
        self.server.shutdown().await;
    }
}

/// Metadata map literal helper.
#[allow(dead_code)]
pub fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Poll `check` every 10ms until it holds, giving up after two seconds.
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
