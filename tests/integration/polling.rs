use crate::*;

use waypost_services::policy::PollPolicy;
use waypost_services::registry::POLL_POLICY;
use waypost_core::crypto::sealed_len;
use waypost_services::sync::bundle_budget;

const DEAD: &str = "mem://nowhere";

/// A dead group is retried up to the ceiling, then the policy moves on to
/// the next group and stays there while it answers.
#[tokio::test]
async fn test_groups_fall_through_to_reachable_peer() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut c = spawn_node(&hub, "c", false, |cfg| cfg.sync.retry_ceiling = 1).await?;

    c.add_peer("dead", DEAD, "a-first")?;
    c.add_peer("live", &a.uri(), "b-second")?;
    a.add_contact("c", &c)?;
    a.node.send("c", b"found you")?;

    let policy = PollPolicy::from_core(c.core());

    let pass = policy.poll_once().await?;
    assert_eq!(pass.group.as_deref(), Some("a-first"));
    assert_eq!((pass.attempted, pass.succeeded), (1, 0));
    assert_eq!(policy.failures(DEAD), 1);

    let pass = policy.poll_once().await?;
    assert_eq!((pass.attempted, pass.skipped), (0, 1));
    assert_eq!(policy.group_index(), 1);

    let pass = policy.poll_once().await?;
    assert_eq!(pass.group.as_deref(), Some("b-second"));
    assert_eq!((pass.attempted, pass.succeeded), (1, 1));
    assert_eq!(c.next_delivery().await?.content, b"found you");

    policy.poll_once().await?;
    assert_eq!(policy.group_index(), 1);

    stop_all(&[&a, &c]).await;
    Ok(())
}

/// Exhausted groups start over only when retrying forever.
#[tokio::test]
async fn test_retry_forever_wraps_and_forgets_failures() -> Result<()> {
    let hub = MemoryHub::new();
    let once = spawn_node(&hub, "once", false, |cfg| cfg.sync.retry_ceiling = 1).await?;
    let forever = spawn_node(&hub, "forever", false, |cfg| {
        cfg.sync.retry_ceiling = 1;
        cfg.sync.retry_forever = true;
    })
    .await?;

    for n in [&once, &forever] {
        n.add_peer("dead", DEAD, "only")?;
    }
    let stuck = PollPolicy::from_core(once.core());
    let wraps = PollPolicy::from_core(forever.core());

    for policy in [&stuck, &wraps] {
        assert_eq!(policy.poll_once().await?.attempted, 1);
        assert_eq!(policy.poll_once().await?.attempted, 0);
    }

    assert_eq!(stuck.failures(DEAD), 1);
    assert_eq!(stuck.poll_once().await?.skipped, 1);

    assert_eq!(wraps.failures(DEAD), 0);
    assert_eq!(wraps.poll_once().await?.attempted, 1);

    stop_all(&[&once, &forever]).await;
    Ok(())
}

/// Disabled peers and peers on unattached schemes are never dialled.
#[tokio::test]
async fn test_unusable_peers_are_skipped() -> Result<()> {
    let hub = MemoryHub::new();
    let c = spawn_node(&hub, "c", false, |_| {}).await?;
    c.add_peer("udp", "udp://10.0.0.1:9", "g")?;
    c.store.put_peer(Peer {
        name: "off".into(),
        enabled: false,
        uri: DEAD.into(),
        group: "g".into(),
    })?;

    let pass = PollPolicy::from_core(c.core()).poll_once().await?;
    assert_eq!(pass.group.as_deref(), Some("g"));
    assert_eq!((pass.attempted, pass.skipped), (0, 1));

    c.node.stop().await;
    Ok(())
}

/// The timer-driven policy and a per-peer loop both deliver on their own.
#[tokio::test]
async fn test_background_loops_deliver() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |cfg| {
        cfg.sync.poll_interval_secs = 1;
        cfg.sync.jitter = 0.5;
    })
    .await?;
    let mut c = spawn_node(&hub, "c", false, |cfg| cfg.discovery.peer_poll_interval_secs = 1).await?;

    a.add_contact("b", &b)?;
    a.add_contact("c", &c)?;
    a.node.send("b", b"by policy")?;
    a.node.send("c", b"by peer loop")?;

    b.add_peer("a", &a.uri(), "")?;
    b.node.start(&[POLL_POLICY])?;
    c.node.spawn_peer_loop(&a.uri())?;

    assert_eq!(b.next_delivery().await?.content, b"by policy");
    assert_eq!(c.next_delivery().await?.content, b"by peer loop");

    stop_all(&[&a, &b, &c]).await;
    Ok(())
}

/// Flushing drops outbox entries past the retention age.
#[tokio::test]
async fn test_flush_honours_retention() -> Result<()> {
    let hub = MemoryHub::new();
    let keep = spawn_node(&hub, "keep", false, |_| {}).await?;
    let purge = spawn_node(&hub, "purge", false, |cfg| cfg.sync.retention_secs = 0).await?;

    for n in [&keep, &purge] {
        n.store.put_channel(waypost_core::Channel::generate("log", KeyFamily::X25519ChaCha))?;
        n.node.send_channel("log", b"entry")?;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(PollPolicy::from_core(keep.core()).flush()?, 0);
    assert_eq!(PollPolicy::from_core(purge.core()).flush()?, 1);
    assert_eq!(keep.store.outbox_len()?, 1);
    assert_eq!(purge.store.outbox_len()?, 0);

    stop_all(&[&keep, &purge]).await;
    Ok(())
}

/// A client with large frames polling a server with small ones gets the
/// server's outbox in bundles sized for the server, over several rounds.
#[tokio::test]
async fn test_poll_across_mismatched_limits() -> Result<()> {
    let hub = MemoryHub::new();
    let small = spawn_node(&hub, "small", false, |_| {}).await?;
    let mut big = spawn_node_with_limit(&hub, "big", false, 1 << 16, |_| {}).await?;

    small.add_contact("big", &big)?;
    for i in 0..10u8 {
        small.node.send("big", &[i; 1000])?;
    }

    let mut delivered = Vec::new();
    for _ in 0..10 {
        let report = big.poll(&small).await?;
        assert!(report.received_bytes < LIMIT, "bundle of {} bytes", report.received_bytes);
        assert!(report.received_bytes <= sealed_len(bundle_budget(LIMIT)));
        while let Ok(d) = big.rx.try_recv() {
            delivered.push(d.content[0]);
        }
        if delivered.len() == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    delivered.sort_unstable();
    assert_eq!(delivered, (0..10).collect::<Vec<u8>>());

    stop_all(&[&small, &big]).await;
    Ok(())
}
