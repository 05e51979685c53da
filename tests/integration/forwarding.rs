use crate::*;

use waypost_core::config::RoutePatch;
use waypost_core::Channel;
use waypost_services::router::KeyClass;

fn ops() -> Channel {
    Channel::from_passphrase("ops", "shared secret", KeyFamily::X25519Aes)
}

/// A relay without the channel key still carries channel traffic.
#[tokio::test]
async fn test_channel_crosses_non_member() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |_| {}).await?;
    let mut c = spawn_node(&hub, "c", false, |_| {}).await?;
    a.store.put_channel(ops())?;
    c.store.put_channel(ops())?;

    a.node.send_channel("ops", b"status green")?;

    b.poll(&a).await?;
    assert!(b.idle());
    let relayed = b.store.outbox_since(i64::MIN, &[])?;
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].channel, "ops");

    c.poll(&b).await?;
    let d = c.next_delivery().await?;
    assert_eq!(d.class, KeyClass::Channel);
    assert_eq!(d.channel.as_deref(), Some("ops"));
    assert_eq!(d.content, b"status green");

    stop_all(&[&a, &b, &c]).await;
    Ok(())
}

/// Members both read and pass on channel traffic.
#[tokio::test]
async fn test_member_reads_and_forwards() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |_| {}).await?;
    let mut c = spawn_node(&hub, "c", false, |_| {}).await?;
    for n in [&a, &b, &c] {
        n.store.put_channel(ops())?;
    }

    a.node.send_channel("ops", b"all hands")?;
    b.poll(&a).await?;
    assert_eq!(b.next_delivery().await?.content, b"all hands");
    assert_eq!(b.store.outbox_len()?, 1);

    c.poll(&b).await?;
    assert_eq!(c.next_delivery().await?.content, b"all hands");

    stop_all(&[&a, &b, &c]).await;
    Ok(())
}

/// A patch rewrites the channel label on the way out, once per target.
#[tokio::test]
async fn test_redirect_rewrites_label() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let b = spawn_node(&hub, "b", false, |c| {
        c.routing.patches = vec![RoutePatch {
            from: "ops".into(),
            to: vec!["ops-eu".into(), "ops-us".into()],
        }];
    })
    .await?;
    let mut c = spawn_node(&hub, "c", false, |_| {}).await?;

    a.store.put_channel(ops())?;
    c.store.put_channel(Channel {
        name: "ops-eu".into(),
        keypair: ops().keypair,
    })?;

    a.node.send_channel("ops", b"region update")?;
    b.poll(&a).await?;

    let labels: Vec<String> = b
        .store
        .outbox_since(i64::MIN, &[])?
        .into_iter()
        .map(|m| m.channel)
        .collect();
    assert_eq!(labels, vec!["ops-eu".to_owned(), "ops-us".to_owned()]);

    // Both copies share a ciphertext, so c treats the second as a repeat.
    let report = c.poll(&b).await?;
    assert_eq!(report.routed, 1);
    let d = c.next_delivery().await?;
    assert_eq!(d.channel.as_deref(), Some("ops-eu"));
    assert_eq!(d.content, b"region update");
    assert!(c.idle());

    stop_all(&[&a, &b, &c]).await;
    Ok(())
}

/// A relay can refuse to carry private traffic it cannot read.
#[tokio::test]
async fn test_unknown_private_traffic_dropped_when_disabled() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let b = spawn_node(&hub, "b", false, |c| c.routing.forward_unknown_content = false).await?;
    let mut c = spawn_node(&hub, "c", false, |_| {}).await?;

    a.add_contact("c", &c)?;
    a.node.send("c", b"never arrives")?;

    let report = b.poll(&a).await?;
    assert_eq!(report.routed, 1);
    assert_eq!(b.store.outbox_len()?, 0);

    let report = c.poll(&b).await?;
    assert_eq!(report.received_bytes, 0);
    assert!(c.idle());

    stop_all(&[&a, &b, &c]).await;
    Ok(())
}

/// With channel checks off a member neither reads nor claims the post,
/// so it is forwarded as unknown.
#[tokio::test]
async fn test_channel_checks_disabled() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |c| c.routing.check_channels = false).await?;
    a.store.put_channel(ops())?;
    b.store.put_channel(ops())?;

    a.node.send_channel("ops", b"unread")?;
    b.poll(&a).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b.idle());
    assert_eq!(b.store.outbox_len()?, 1);

    stop_all(&[&a, &b]).await;
    Ok(())
}
