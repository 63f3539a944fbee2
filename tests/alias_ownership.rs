mod common;

use common::TestNet;
use std::time::Duration;
use switchboard::plugins::{PingOutcome, PingTarget};
use switchboard::store::RegistryStore;

#[tokio::test]
async fn test_request_grants_first_contact_and_checks_token() -> anyhow::Result<()> {
    let net = TestNet::start().await?;
    let (a, core_a) = net.client("client-a").await?;
    let (b, core_b) = net.client("client-b").await?;

    // First contact claims the alias for the requester.
    assert_eq!(core_a.request_ownership(&a, "UK123", "t1").await?, "t1");
    assert_eq!(net.store.get_alias_owner("UK123").as_deref(), Some("client-a"));

    // A different token is denied; denial surfaces as the empty token.
    assert_eq!(core_b.request_ownership(&b, "UK123", "t2").await?, "");
    assert_eq!(net.store.get_alias_owner("UK123").as_deref(), Some("client-a"));

    // The matching token is granted even from another identity.
    assert_eq!(core_b.request_ownership(&b, "UK123", "t1").await?, "t1");

    a.shutdown().await;
    b.shutdown().await;
    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_demand_displaces_owner_and_notifies() -> anyhow::Result<()> {
    let net = TestNet::start().await?;
    let (a, core_a) = net.client("client-a").await?;
    let (b, core_b) = net.client("client-b").await?;
    let mut lost = core_a.subscribe_ownership_lost();

    assert_eq!(core_a.request_ownership(&a, "UK123", "t1").await?, "t1");
    assert_eq!(core_b.demand_ownership(&b, "UK123", "t2").await?, "t2");
    assert_eq!(net.store.get_alias_owner("UK123").as_deref(), Some("client-b"));

    // The displaced owner hears about it.
    let alias = tokio::time::timeout(Duration::from_secs(2), lost.recv()).await??;
    assert_eq!(alias, "UK123");

    // Alias traffic now lands on the new owner.
    let report = core_a
        .ping(&a, PingTarget::Alias("UK123".into()), Some(Duration::from_secs(2)))
        .await;
    assert_eq!(report.outcome, PingOutcome::Success);
    assert_eq!(report.served_by.as_deref(), Some("client-b"));

    // The old token no longer re-claims the alias.
    assert_eq!(core_a.request_ownership(&a, "UK123", "t1").await?, "");

    a.shutdown().await;
    b.shutdown().await;
    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_self_demand_raises_no_notification() -> anyhow::Result<()> {
    let net = TestNet::start().await?;
    let (a, core_a) = net.client("client-a").await?;
    let mut lost = core_a.subscribe_ownership_lost();

    assert_eq!(core_a.request_ownership(&a, "UK123", "t1").await?, "t1");
    // Rotating one's own token must not count as a displacement.
    assert_eq!(core_a.demand_ownership(&a, "UK123", "t2").await?, "t2");
    assert_eq!(net.store.get_alias_owner("UK123").as_deref(), Some("client-a"));

    let got = tokio::time::timeout(Duration::from_millis(300), lost.recv()).await;
    assert!(got.is_err(), "no lost-ownership event expected");

    a.shutdown().await;
    net.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_empty_token_request_is_nacked() -> anyhow::Result<()> {
    let net = TestNet::start().await?;
    let (a, core_a) = net.client("client-a").await?;

    // The store rejects empty tokens; the server answers with a denial
    // rather than an error.
    assert_eq!(core_a.request_ownership(&a, "UK123", "").await?, "");
    assert_eq!(net.store.alias_count(), 0);

    a.shutdown().await;
    net.shutdown().await;
    Ok(())
}
