use crate::*;

use waypost_core::wire::CRYPTO_RESERVE;
use waypost_core::Channel;
use waypost_services::router::KeyClass;

/// Poll until the server has nothing more to hand over.
async fn drain(client: &TestNode, server: &TestNode) -> Result<usize> {
    let mut rounds = 0;
    loop {
        let report = client.poll(server).await?;
        if report.received_bytes == 0 {
            return Ok(rounds);
        }
        rounds += 1;
        if rounds > 32 {
            bail!("{} never drained {}", client.host, server.host);
        }
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A message larger than one envelope arrives whole, across several
/// bundles, and leaves no partial stream behind.
#[tokio::test]
async fn test_large_private_message_reassembles() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |_| {}).await?;
    assert_eq!(a.core().chunk_size(), LIMIT - CRYPTO_RESERVE);

    let content = pattern(10_000);
    a.add_contact("b", &b)?;
    let envelopes = a.node.send("b", &content)?;
    // Header plus four chunks.
    assert_eq!(envelopes, 5);
    assert_eq!(a.store.outbox_len()?, 5);

    let rounds = drain(&b, &a).await?;
    assert!(rounds >= 2, "whole stream fit one bundle ({rounds} rounds)");

    let d = b.next_delivery().await?;
    assert_eq!(d.class, KeyClass::Content);
    assert_eq!(d.content, content);
    assert_eq!(b.core().chunker().pending_streams(), 0);
    assert!(b.idle());

    stop_all(&[&a, &b]).await;
    Ok(())
}

/// Chunked channel posts keep their channel name through reassembly.
#[tokio::test]
async fn test_large_channel_post_reassembles() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |_| {}).await?;

    let channel = Channel::from_passphrase("ops", "correct horse", KeyFamily::X25519ChaCha);
    a.store.put_channel(channel.clone())?;
    b.store.put_channel(channel)?;

    let content = pattern(7_000);
    assert!(a.node.send_channel("ops", &content)? > 1);

    drain(&b, &a).await?;
    let d = b.next_delivery().await?;
    assert_eq!(d.class, KeyClass::Channel);
    assert_eq!(d.channel.as_deref(), Some("ops"));
    assert_eq!(d.content, content);

    stop_all(&[&a, &b]).await;
    Ok(())
}

/// Content exactly one chunk long still goes out as a single envelope.
#[tokio::test]
async fn test_chunk_sized_message_is_not_split() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |_| {}).await?;

    let content = pattern(a.core().chunk_size());
    a.add_contact("b", &b)?;
    assert_eq!(a.node.send("b", &content)?, 1);

    b.poll(&a).await?;
    assert_eq!(b.next_delivery().await?.content, content);

    stop_all(&[&a, &b]).await;
    Ok(())
}
