use crate::*;

use waypost_core::codec::{Action, Call, Value};
use waypost_services::router::KeyClass;
use waypost_services::transport::TransportError;

/// A private message reaches its recipient after one poll round.
#[tokio::test]
async fn test_direct_send_and_poll() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |_| {}).await?;

    a.add_contact("b", &b)?;
    assert_eq!(a.node.send("b", b"hello from a")?, 1);

    let report = b.poll(&a).await?;
    assert_eq!(report.routed, 1);
    assert!(report.received_bytes > 0);
    assert_eq!(report.sent_bytes, 0);

    let d = b.next_delivery().await?;
    assert_eq!(d.class, KeyClass::Content);
    assert_eq!(d.channel, None);
    assert_eq!(d.content, b"hello from a");

    // Nothing new on the next round.
    let report = b.poll(&a).await?;
    assert_eq!(report.received_bytes, 0);
    assert!(b.idle());

    stop_all(&[&a, &b]).await;
    Ok(())
}

/// The poller pushes its own outbox in the same round it pulls.
#[tokio::test]
async fn test_poll_round_is_bidirectional() -> Result<()> {
    let hub = MemoryHub::new();
    let mut a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |_| {}).await?;

    a.add_contact("b", &b)?;
    b.add_contact("a", &a)?;
    a.node.send("b", b"a to b")?;
    b.node.send("a", b"b to a")?;

    let report = b.poll(&a).await?;
    assert!(report.sent_bytes > 0);
    assert!(report.received_bytes > 0);

    assert_eq!(a.next_delivery().await?.content, b"b to a");
    assert_eq!(b.next_delivery().await?.content, b"a to b");

    let info = b.core().sync().peer_info("a").context("no peer info for a")?;
    assert_eq!(info.routing_key, Some(a.core().keys().routing_public()));
    assert!(info.tx_bytes > 0 && info.rx_bytes > 0);

    stop_all(&[&a, &b]).await;
    Ok(())
}

/// A relay that cannot open a message stores it and passes it on; the
/// sender never sees its own message come back.
#[tokio::test]
async fn test_relay_through_middle_node() -> Result<()> {
    let hub = MemoryHub::new();
    let mut a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |_| {}).await?;
    let mut c = spawn_node(&hub, "c", false, |_| {}).await?;

    a.add_contact("c", &c)?;
    a.node.send("c", b"via b")?;

    b.poll(&a).await?;
    assert!(b.idle());
    assert_eq!(b.store.outbox_len()?, 1);

    c.poll(&b).await?;
    let d = c.next_delivery().await?;
    assert_eq!(d.content, b"via b");

    // c consumed it and does not forward consumed private traffic.
    assert_eq!(c.store.outbox_len()?, 0);

    // The echo from b is recognised and dropped.
    let report = a.poll(&b).await?;
    assert!(report.received_bytes > 0);
    assert!(a.idle());

    stop_all(&[&a, &b, &c]).await;
    Ok(())
}

/// The admin surface drives sends remotely; the public surface refuses.
#[tokio::test]
async fn test_admin_surface_send() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", true, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |_| {}).await?;
    let client = b.transport()?;

    let contact = Contact {
        name: "b".into(),
        public_key: b.content_key(),
    };
    client
        .rpc(&a.admin_host(), Call::new(Action::PutContact, vec![Value::Contact(contact)]))
        .await?;

    let send = || Call::new(Action::Send, vec![Value::Str("b".into()), Value::Bytes(b"remote".to_vec())]);

    match client.rpc(&a.host, send()).await {
        Err(TransportError::Remote(msg)) => assert!(msg.contains("public surface"), "{msg}"),
        other => panic!("public surface accepted Send: {other:?}"),
    }

    let queued = client.rpc(&a.admin_host(), send()).await?.into_uint()?;
    assert_eq!(queued, 1);

    b.poll(&a).await?;
    assert_eq!(b.next_delivery().await?.content, b"remote");

    stop_all(&[&a, &b]).await;
    Ok(())
}

/// Sends to unknown contacts fail without touching the outbox.
#[tokio::test]
async fn test_send_to_unknown_contact() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    assert!(a.node.send("nobody", b"x").is_err());
    assert_eq!(a.store.outbox_len()?, 0);
    a.node.stop().await;
    Ok(())
}
