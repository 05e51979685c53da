use crate::*;

use waypost_core::codec::{Action, Call, Value};
use waypost_core::Profile;
use waypost_services::router::KeyClass;

fn profile(name: &str, enabled: bool) -> Profile {
    Profile {
        name: name.to_owned(),
        enabled,
        keypair: Keypair::generate(KeyFamily::X25519ChaCha),
    }
}

/// Point a contact called `name` on `sender` at `key`.
fn contact_for(sender: &TestNode, name: &str, key: PublicKey) -> Result<()> {
    sender.store.put_contact(Contact {
        name: name.to_owned(),
        public_key: key,
    })?;
    Ok(())
}

/// With profile checks on, an enabled profile opens its traffic and the
/// message is not passed on.
#[tokio::test]
async fn test_enabled_profile_consumes() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |c| c.routing.check_profiles = true).await?;

    let alt = profile("alt", true);
    b.store.put_profile(alt.clone())?;
    contact_for(&a, "alt", alt.keypair.public())?;
    a.node.send("alt", b"to the alias")?;

    b.poll(&a).await?;
    let d = b.next_delivery().await?;
    assert_eq!(d.class, KeyClass::Profile);
    assert_eq!(d.content, b"to the alias");
    assert_eq!(b.store.outbox_len()?, 0);

    stop_all(&[&a, &b]).await;
    Ok(())
}

/// Disabled profiles are not tried, so their traffic travels on.
#[tokio::test]
async fn test_disabled_profile_is_ignored() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", false, |c| c.routing.check_profiles = true).await?;

    let off = profile("off", false);
    b.store.put_profile(off.clone())?;
    contact_for(&a, "off", off.keypair.public())?;
    a.node.send("off", b"parked")?;

    b.poll(&a).await?;
    assert!(b.idle());
    assert_eq!(b.store.outbox_len()?, 1);

    stop_all(&[&a, &b]).await;
    Ok(())
}

/// Loading a profile over the admin surface makes it the content identity.
#[tokio::test]
async fn test_load_profile_over_admin_surface() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", false, |_| {}).await?;
    let mut b = spawn_node(&hub, "b", true, |_| {}).await?;
    let client = a.transport()?;

    let work = profile("work", true);
    client
        .rpc(&b.admin_host(), Call::new(Action::PutProfile, vec![Value::Profile(work.clone())]))
        .await?;
    let loaded = client
        .rpc(&b.admin_host(), Call::new(Action::LoadProfile, vec![Value::Str("work".into())]))
        .await?
        .into_public_key()?;
    assert_eq!(loaded, work.keypair.public());
    assert_eq!(b.content_key(), loaded);

    contact_for(&a, "b-work", loaded)?;
    a.node.send("b-work", b"new identity")?;

    b.poll(&a).await?;
    let d = b.next_delivery().await?;
    assert_eq!(d.class, KeyClass::Content);
    assert_eq!(d.content, b"new identity");

    // Unknown profiles are reported, not silently ignored.
    let missing = client
        .rpc(&b.admin_host(), Call::new(Action::LoadProfile, vec![Value::Str("nope".into())]))
        .await;
    assert!(missing.is_err());

    stop_all(&[&a, &b]).await;
    Ok(())
}
