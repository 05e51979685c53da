use crate::*;

use waypost_services::discovery::{Advertisement, Decision, Negotiator};

/// Two nodes hearing each other's announcements elect at least one poller,
/// and exactly one unless their ranks tie. The elected side's poll loop
/// carries traffic both ways.
#[tokio::test]
async fn test_negotiated_pair_exchanges_messages() -> Result<()> {
    let hub = MemoryHub::new();
    let mut a = spawn_node(&hub, "a", false, |c| c.discovery.peer_poll_interval_secs = 1).await?;
    let mut b = spawn_node(&hub, "b", false, |c| c.discovery.peer_poll_interval_secs = 1).await?;

    let na = Negotiator::new(a.core().keys().routing_public().short_id());
    let nb = Negotiator::new(b.core().keys().routing_public().short_id());

    // Announcements cross the wire as JSON.
    let ad_a = Advertisement::decode(&na.advertise(&a.uri()).encode()?)?;
    let ad_b = Advertisement::decode(&nb.advertise(&b.uri()).encode()?)?;

    let a_decides = na.observe(&ad_b);
    let b_decides = nb.observe(&ad_a);
    let initiators = [a_decides, b_decides]
        .iter()
        .filter(|d| **d == Decision::Initiate)
        .count();
    if ad_a.rank == ad_b.rank {
        assert_eq!(initiators, 2);
    } else {
        assert_eq!(initiators, 1);
    }

    // Later announcements change nothing.
    assert_eq!(na.observe(&nb.advertise(&b.uri())), Decision::Ignore);
    assert_eq!(na.observe(&ad_a), Decision::Ignore);
    assert_eq!(na.known_peers(), 1);

    a.add_contact("b", &b)?;
    b.add_contact("a", &a)?;
    a.node.send("b", b"ping")?;
    b.node.send("a", b"pong")?;

    if a_decides == Decision::Initiate {
        a.node.spawn_peer_loop(&ad_b.addr)?;
    }
    if b_decides == Decision::Initiate {
        b.node.spawn_peer_loop(&ad_a.addr)?;
    }

    assert_eq!(b.next_delivery().await?.content, b"ping");
    assert_eq!(a.next_delivery().await?.content, b"pong");

    stop_all(&[&a, &b]).await;
    Ok(())
}

#[test]
fn test_garbage_advertisement_rejected() {
    assert!(Advertisement::decode(b"not json").is_err());
    assert!(Advertisement::decode(br#"{"node":"x","addr":"tcp://h:1"}"#).is_err());
}
