mod common;

use common::eventually;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use switchboard::config::CommunicatorConfig;
use switchboard::transport::MemoryTransport;
use switchboard::{
    Channel, Communicator, DispatchStatus, LabelFilter, Message, MessageHandler, Result, label,
};

struct Counting {
    calls: Arc<AtomicUsize>,
    status: DispatchStatus,
}

#[async_trait::async_trait]
impl MessageHandler for Counting {
    async fn handle(&self, _comm: &Communicator, _msg: &Message) -> Result<DispatchStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status)
    }
}

fn comm(transport: &MemoryTransport, identity: &str) -> anyhow::Result<Communicator> {
    Ok(Communicator::new(
        CommunicatorConfig::with_identity(identity),
        Arc::new(transport.clone()),
    )?)
}

#[tokio::test]
async fn test_handler_receives_through_receive_loop() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let producer = comm(&transport, "producer")?;
    let consumer = comm(&transport, "consumer")?;

    let calls = Arc::new(AtomicUsize::new(0));
    consumer
        .add_handler(
            Channel::Registrations,
            LabelFilter::label(label::PING),
            Arc::new(Counting { calls: calls.clone(), status: DispatchStatus::Complete }),
        )
        .await;
    assert!(consumer.is_listening(Channel::Registrations));

    let mut msg = Message::with_label(label::PING);
    producer.send_to_registrations(&mut msg).await?;

    assert!(eventually(|| calls.load(Ordering::SeqCst) == 1).await);
    // Completed deliveries leave nothing pending on the transport.
    assert!(eventually(|| transport.pending_count() == 0).await);
    assert!(transport.dead_letters().is_empty());

    consumer.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unmatched_message_is_dead_lettered() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let producer = comm(&transport, "producer")?;
    let consumer = comm(&transport, "consumer")?;

    consumer
        .add_handler(
            Channel::Registrations,
            LabelFilter::label(label::PING),
            Arc::new(Counting { calls: Arc::default(), status: DispatchStatus::Complete }),
        )
        .await;

    let mut stray = Message::with_label("telemetry.sample");
    producer.send_to_registrations(&mut stray).await?;

    assert!(eventually(|| !transport.dead_letters().is_empty()).await);
    let dead = transport.dead_letters();
    assert_eq!(dead[0].reason, "no handler");
    assert!(dead[0].message.has_label("telemetry.sample"));

    consumer.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_listening_stops_when_last_handler_leaves() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let producer = comm(&transport, "producer")?;
    let consumer = comm(&transport, "consumer")?;

    let id = consumer
        .add_handler(
            Channel::Aliases,
            LabelFilter::Any,
            Arc::new(Counting { calls: Arc::default(), status: DispatchStatus::Complete }),
        )
        .await;
    assert!(consumer.is_listening(Channel::Aliases));

    assert!(consumer.remove_handler(Channel::Aliases, id).await);
    assert!(!consumer.is_listening(Channel::Aliases));

    // With no loop running, traffic stays queued on the transport.
    let mut msg = Message::with_label(label::PING);
    producer.send_to_alias("UK123", &mut msg).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.queue_depth(Channel::Aliases), 1);

    consumer.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_wait_for_reply_correlates_across_communicators() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let requester = comm(&transport, "requester")?;
    let responder = comm(&transport, "responder")?;

    struct Echo;
    #[async_trait::async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, comm: &Communicator, msg: &Message) -> Result<DispatchStatus> {
            let mut reply = Message::reply_to(msg, label::ACKNOWLEDGE);
            comm.send_to_client(&mut reply).await?;
            Ok(DispatchStatus::Complete)
        }
    }

    responder
        .add_handler(Channel::ServerRequests, LabelFilter::label("echo.request"), Arc::new(Echo))
        .await;

    let mut request = Message::with_label("echo.request");
    requester.send_to_server(&mut request).await?;
    let reply = requester
        .wait_for_reply(&request, Some(Duration::from_secs(2)), None)
        .await
        .expect("reply within deadline");
    assert!(reply.answers(request.id));
    assert!(reply.has_label(label::ACKNOWLEDGE));

    responder.shutdown().await;
    requester.shutdown().await;
    Ok(())
}
