//! RPC surfaces.
//!
//! The public surface answers `Id`, `Pickup` and `Dropoff` only. The admin
//! surface answers every action: record CRUD, profile load and sends. A
//! listener exposes whichever surface it was bound with.

use std::sync::Arc;

use async_trait::async_trait;

use waypost_core::codec::{Action, Args, Call, CodecError, Response, Value};

use crate::node::{NodeCore, NodeError};
use crate::registry::{PolicyFuture, Shutdown};
use crate::store::StoreError;
use crate::sync::{bundle_budget, SyncError};
use crate::transport::{RpcHandler, Transport};

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("{0:?} is not available on the public surface")]
    Forbidden(Action),
    #[error("no {kind} named {name:?}")]
    NotFound { kind: &'static str, name: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Node(#[from] NodeError),
}

pub struct RpcSurface {
    core: Arc<NodeCore>,
    admin: bool,
}

impl RpcSurface {
    pub fn public(core: Arc<NodeCore>) -> Self {
        Self { core, admin: false }
    }

    pub fn admin(core: Arc<NodeCore>) -> Self {
        Self { core, admin: true }
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    fn dispatch(&self, call: Call) -> Result<Value, SurfaceError> {
        let action = call.action;
        if !self.admin && !action.is_public() {
            return Err(SurfaceError::Forbidden(action));
        }
        let mut args = call.args();
        let store = self.core.store();

        let value = match action {
            Action::Id => Value::PublicKey(self.core.keys().routing_public()),
            Action::Pickup => {
                let caller = args.next_value()?.into_public_key()?;
                let since = args.int()?;
                let asked = usize::try_from(args.uint()?).unwrap_or(usize::MAX);
                // The reply also has to fit our own frames.
                let max_bytes = match self.core.transports().byte_limit() {
                    Some(limit) => asked.min(bundle_budget(limit)),
                    None => asked,
                };
                let channels = args.rest_strings()?;
                Value::Bundle(self.core.sync().pickup(&caller, since, max_bytes, &channels)?)
            }
            Action::Dropoff => {
                let bundle = args.next_value()?.into_bundle()?;
                Value::Uint(self.core.sync().dropoff(&bundle)? as u64)
            }

            Action::ListChannels => Value::Channels(store.list_channels()?),
            Action::GetChannel => {
                let name = args.string()?;
                Value::Channel(store.get_channel(&name)?.ok_or_else(|| not_found("channel", name))?)
            }
            Action::PutChannel => {
                store.put_channel(args.next_value()?.into_channel()?)?;
                Value::Nil
            }
            Action::DeleteChannel => deleted("channel", &mut args, |n| store.delete_channel(n))?,

            Action::ListContacts => Value::Contacts(store.list_contacts()?),
            Action::GetContact => {
                let name = args.string()?;
                Value::Contact(store.get_contact(&name)?.ok_or_else(|| not_found("contact", name))?)
            }
            Action::PutContact => {
                store.put_contact(args.next_value()?.into_contact()?)?;
                Value::Nil
            }
            Action::DeleteContact => deleted("contact", &mut args, |n| store.delete_contact(n))?,

            Action::ListProfiles => Value::Profiles(store.list_profiles()?),
            Action::GetProfile => {
                let name = args.string()?;
                Value::Profile(store.get_profile(&name)?.ok_or_else(|| not_found("profile", name))?)
            }
            Action::PutProfile => {
                store.put_profile(args.next_value()?.into_profile()?)?;
                Value::Nil
            }
            Action::DeleteProfile => deleted("profile", &mut args, |n| store.delete_profile(n))?,
            Action::LoadProfile => Value::PublicKey(self.core.load_profile(&args.string()?)?),

            Action::ListPeers => Value::Peers(store.list_peers()?),
            Action::GetPeer => {
                let name = args.string()?;
                Value::Peer(store.get_peer(&name)?.ok_or_else(|| not_found("peer", name))?)
            }
            Action::PutPeer => {
                store.put_peer(args.next_value()?.into_peer()?)?;
                Value::Nil
            }
            Action::DeletePeer => deleted("peer", &mut args, |n| store.delete_peer(n))?,

            Action::Send => {
                let contact = args.string()?;
                let content = args.bytes()?;
                Value::Uint(self.core.send(&contact, &content)? as u64)
            }
            Action::SendChannel => {
                let channel = args.string()?;
                let content = args.bytes()?;
                Value::Uint(self.core.send_channel(&channel, &content)? as u64)
            }
        };
        Ok(value)
    }
}

fn not_found(kind: &'static str, name: String) -> SurfaceError {
    SurfaceError::NotFound { kind, name }
}

fn deleted(
    kind: &'static str,
    args: &mut Args,
    delete: impl FnOnce(&str) -> Result<bool, StoreError>,
) -> Result<Value, SurfaceError> {
    let name = args.string()?;
    if delete(&name)? {
        Ok(Value::Nil)
    } else {
        Err(not_found(kind, name))
    }
}

#[async_trait]
impl RpcHandler for RpcSurface {
    async fn handle(&self, call: Call) -> Response {
        let action = call.action;
        match self.dispatch(call) {
            Ok(value) => Response::ok(value),
            Err(e) => {
                match &e {
                    SurfaceError::Forbidden(_) => {
                        tracing::warn!(?action, "admin action refused on public surface")
                    }
                    _ => tracing::debug!(?action, error = %e, "call failed"),
                }
                Response::err(e)
            }
        }
    }
}

/// Serve one surface on `addr` over `transport` until shutdown.
pub fn serve(
    core: Arc<NodeCore>,
    transport: Arc<dyn Transport>,
    addr: String,
    admin: bool,
    shutdown: Shutdown,
) -> PolicyFuture {
    let handler: Arc<dyn RpcHandler> = if admin {
        Arc::new(RpcSurface::admin(core))
    } else {
        Arc::new(RpcSurface::public(core))
    };
    Box::pin(async move {
        if addr.is_empty() {
            tracing::info!(admin, "no listen address, surface not served");
            return;
        }
        tracing::info!(addr, admin, scheme = transport.scheme(), "listener starting");
        if let Err(e) = transport.listen(&addr, handler, shutdown).await {
            tracing::error!(addr, admin, error = %e, "listener exited");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::NodeKeys;
    use crate::node::Node;
    use crate::registry::Registry;
    use crate::store::MemoryStore;
    use crate::transport::{MemoryHub, MemoryTransport, MEMORY_SCHEME};
    use waypost_core::codec::encode_frame;
    use waypost_core::config::WaypostConfig;
    use waypost_core::{Channel, Contact, KeyFamily, Keypair, Peer};

    fn core() -> Arc<NodeCore> {
        core_with_limit(1 << 16)
    }

    fn core_with_limit(limit: usize) -> Arc<NodeCore> {
        let hub = MemoryHub::new();
        let mut registry = Registry::with_defaults();
        registry.register_transport(MEMORY_SCHEME, move |_| {
            Arc::new(MemoryTransport::new(hub.clone(), limit))
        });
        let keys = NodeKeys::new(
            Keypair::generate(KeyFamily::X25519ChaCha),
            Keypair::generate(KeyFamily::X25519ChaCha),
        );
        let (node, _rx) = Node::new(
            WaypostConfig::default(),
            Arc::new(MemoryStore::new()),
            keys,
            Arc::new(registry),
        )
        .unwrap();
        node.core().clone()
    }

    async fn call(surface: &RpcSurface, action: Action, args: Vec<Value>) -> Result<Value, String> {
        surface.handle(Call::new(action, args)).await.into_result()
    }

    #[tokio::test]
    async fn public_surface_refuses_admin_actions() {
        let surface = RpcSurface::public(core());
        for action in Action::ALL {
            let result = call(&surface, action, vec![]).await;
            if action.is_public() {
                continue;
            }
            let err = result.unwrap_err();
            assert!(err.contains("public surface"), "{action:?}: {err}");
        }
    }

    #[tokio::test]
    async fn id_returns_routing_key() {
        let core = core();
        let surface = RpcSurface::public(core.clone());
        let v = call(&surface, Action::Id, vec![]).await.unwrap();
        assert_eq!(v, Value::PublicKey(core.keys().routing_public()));
    }

    #[tokio::test]
    async fn admin_crud_round_trip() {
        let surface = RpcSurface::admin(core());
        let peer = Peer {
            name: "relay".into(),
            enabled: true,
            uri: "tcp://10.0.0.2:7450".into(),
            group: "lan".into(),
        };
        call(&surface, Action::PutPeer, vec![Value::Peer(peer.clone())]).await.unwrap();
        let got = call(&surface, Action::GetPeer, vec![Value::Str("relay".into())]).await.unwrap();
        assert_eq!(got, Value::Peer(peer.clone()));
        assert_eq!(
            call(&surface, Action::ListPeers, vec![]).await.unwrap(),
            Value::Peers(vec![peer])
        );

        call(&surface, Action::DeletePeer, vec![Value::Str("relay".into())]).await.unwrap();
        let err = call(&surface, Action::DeletePeer, vec![Value::Str("relay".into())])
            .await
            .unwrap_err();
        assert!(err.contains("no peer named"));
    }

    #[tokio::test]
    async fn admin_send_goes_to_outbox() {
        let core = core();
        let surface = RpcSurface::admin(core.clone());
        let friend = Keypair::generate(KeyFamily::X25519ChaCha);
        call(
            &surface,
            Action::PutContact,
            vec![Value::Contact(Contact {
                name: "friend".into(),
                public_key: friend.public(),
            })],
        )
        .await
        .unwrap();
        call(
            &surface,
            Action::PutChannel,
            vec![Value::Channel(Channel::generate("ops", KeyFamily::X25519ChaCha))],
        )
        .await
        .unwrap();

        let sent = call(
            &surface,
            Action::Send,
            vec![Value::Str("friend".into()), Value::Bytes(b"hi".to_vec())],
        )
        .await
        .unwrap();
        assert_eq!(sent, Value::Uint(1));
        call(
            &surface,
            Action::SendChannel,
            vec![Value::Str("ops".into()), Value::Bytes(b"all".to_vec())],
        )
        .await
        .unwrap();
        assert_eq!(core.store().outbox_len().unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_arguments_are_reported() {
        let surface = RpcSurface::admin(core());
        let err = call(&surface, Action::GetChannel, vec![]).await.unwrap_err();
        assert!(err.contains("missing argument"));
        let err = call(&surface, Action::Dropoff, vec![Value::Int(1)]).await.unwrap_err();
        assert!(err.contains("expected"));
    }

    #[tokio::test]
    async fn pickup_is_capped_by_our_own_frame_limit() {
        const SMALL: usize = 4096;
        let core = core_with_limit(SMALL);
        let caller = Keypair::generate(KeyFamily::X25519ChaCha);
        for i in 0..10u8 {
            core.send_to(&caller.public(), &[i; 1000]).unwrap();
        }
        let surface = RpcSurface::public(core.clone());

        // A caller with much larger frames asks for everything at once.
        let bundle = call(
            &surface,
            Action::Pickup,
            vec![
                Value::PublicKey(caller.public()),
                Value::Int(0),
                Value::Uint(1 << 20),
            ],
        )
        .await
        .unwrap()
        .into_bundle()
        .unwrap();
        assert!(!bundle.is_empty());

        let frame = encode_frame(&Response::ok(Value::Bundle(bundle.clone())).encode()).unwrap();
        assert!(frame.len() <= SMALL, "reply frame of {} bytes", frame.len());

        let plaintext = caller.open(&bundle.data).unwrap().unwrap();
        let taken = Value::decode(&plaintext).unwrap().into_bytes_array().unwrap();
        assert!(!taken.is_empty() && taken.len() < 10);
    }
}
