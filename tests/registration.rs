mod common;

use common::{TestNet, meta};
use std::time::Duration;
use switchboard::store::RegistryStore;

#[tokio::test]
async fn test_registration_round_trip() -> anyhow::Result<()> {
    let net = TestNet::start().await?;
    let (client, core) = net.client("client-a").await?;

    core.register(&client, meta(&[("region", "uk"), ("build", "4.0")]))
        .await?;

    let record = net
        .store
        .get_registration("client-a")
        .expect("registration stored");
    assert_eq!(record.metadata.get("region").map(String::as_str), Some("uk"));
    assert_eq!(record.metadata.get("build").map(String::as_str), Some("4.0"));
    assert_eq!(net.store.registration_count(), 1);

    client.shutdown().await;
    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reregistration_overwrites_metadata() -> anyhow::Result<()> {
    let net = TestNet::start().await?;
    let (client, core) = net.client("client-a").await?;

    core.register(&client, meta(&[("region", "uk")])).await?;
    core.register(&client, meta(&[("region", "de")])).await?;

    let record = net.store.get_registration("client-a").unwrap();
    assert_eq!(record.metadata.get("region").map(String::as_str), Some("de"));
    assert_eq!(net.store.registration_count(), 1);

    client.shutdown().await;
    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_registration_times_out_without_server() -> anyhow::Result<()> {
    use std::sync::Arc;
    use switchboard::Communicator;
    use switchboard::config::CommunicatorConfig;
    use switchboard::plugins::ClientCorePlugin;
    use switchboard::transport::MemoryTransport;

    let mut config = CommunicatorConfig::with_identity("client-a");
    config.ping_timeout = Duration::from_millis(200);
    let client = Communicator::new(config, Arc::new(MemoryTransport::new()))?;
    let core = Arc::new(ClientCorePlugin::new());
    client.load_plugin(core.clone()).await?;

    let err = core
        .register(&client, meta(&[]))
        .await
        .expect_err("no server should answer");
    assert_eq!(err.code(), "timeout");

    client.shutdown().await;
    Ok(())
}
