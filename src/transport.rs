// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Transport surface consumed by the announce subsystem (§6): `Gossip`,
//! `Multicast`, `FindPeers`, `Send`, `SelfNode`. A libp2p-gossipsub
//! backend (generalized from the consensus transport) and an in-memory
//! mock for tests both implement it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use libp2p::{
    core::upgrade,
    gossipsub::{self, IdentTopic, MessageAuthenticity},
    identify, noise, ping,
    swarm::{Config as SwarmConfig, NetworkBehaviour, Swarm, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Transport as _,
};
use libp2p::futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::monitoring::metrics::Metrics;
use crate::types::{EnodeUrl, NodeId};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The outbound channel to the swarm task was closed.
    #[error("transport shut down")]
    Closed,
    /// Listen or dial address did not parse.
    #[error("bad address")]
    BadAddress,
    /// I/O or protocol setup failure.
    #[error("io")]
    Io,
}

/// Broadcast a payload to the whole mesh under the given message code.
pub trait Gossip: Send + Sync {
    /// `Gossip(payload, code)`.
    fn gossip(&self, code: u8, payload: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Deliver a payload to specific node ids without broadcasting it to the
/// whole mesh.
pub trait Multicast: Send + Sync {
    /// `Multicast(targets, payload, code, sendToSelf)`.
    fn multicast(
        &self,
        targets: &[NodeId],
        code: u8,
        payload: Vec<u8>,
        send_to_self: bool,
    ) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Enumerate currently connected peers.
pub trait FindPeers: Send + Sync {
    /// `FindPeers(ids?)`.
    fn find_peers(&self, ids: Option<&[NodeId]>) -> BoxFuture<'_, Vec<NodeId>>;
}

/// This node's own externally reachable enode.
pub trait SelfNode: Send + Sync {
    /// `SelfNode() -> Node`.
    fn self_node(&self) -> EnodeUrl;
}

/// Inbound message delivered by the transport: `(peer, code, payload)`.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// The node id the message was received from.
    pub peer: NodeId,
    /// Envelope message code.
    pub code: u8,
    /// Raw envelope bytes (decode with `codec::Envelope::decode`).
    pub payload: Vec<u8>,
}

/// Full transport surface required by the announce subsystem.
pub trait AnnounceTransport: Gossip + Multicast + FindPeers + SelfNode {}
impl<T: Gossip + Multicast + FindPeers + SelfNode> AnnounceTransport for T {}

const DIRECT_TOPIC_PREFIX: &str = "istanbul-announce/direct/";
const BROADCAST_TOPIC: &str = "istanbul-announce/broadcast";

/// Runtime configuration for the gossipsub-backed transport.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Listen multiaddr, e.g. `/ip4/0.0.0.0/tcp/30303`.
    pub listen_addr: String,
    /// Data directory for the persistent libp2p identity.
    pub data_dir: String,
    /// Bootstrap peer multiaddrs to dial at startup.
    pub bootstrap: Vec<String>,
    /// The externally reachable enode this node advertises via `SelfNode`.
    pub self_node: EnodeUrl,
}

enum Outbound {
    Broadcast { payload: Vec<u8> },
    Direct { target: NodeId, payload: Vec<u8> },
}

#[derive(Debug)]
enum BehaviourEvent {
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
    Ping(()),
}
impl From<gossipsub::Event> for BehaviourEvent {
    fn from(e: gossipsub::Event) -> Self {
        Self::Gossipsub(e)
    }
}
impl From<identify::Event> for BehaviourEvent {
    fn from(e: identify::Event) -> Self {
        Self::Identify(e)
    }
}
impl From<ping::Event> for BehaviourEvent {
    fn from(_e: ping::Event) -> Self {
        Self::Ping(())
    }
}

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "BehaviourEvent")]
struct Behaviour {
    gossipsub: gossipsub::Behaviour,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

fn direct_topic(node: &NodeId) -> IdentTopic {
    IdentTopic::new(format!("{DIRECT_TOPIC_PREFIX}{node}"))
}

/// A libp2p-gossipsub-backed transport: one broadcast topic shared by
/// every node, plus one per-node "direct" topic each node subscribes to
/// for itself, used to approximate `Multicast` without a dedicated
/// unicast protocol.
pub struct GossipsubTransport {
    self_node: EnodeUrl,
    self_node_id: NodeId,
    outbound_tx: mpsc::Sender<Outbound>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    connected_peers: Arc<Mutex<HashSet<PeerId>>>,
    node_id_to_peer: Arc<Mutex<std::collections::HashMap<NodeId, PeerId>>>,
}

fn ensure_dir(path: &str) -> Result<(), TransportError> {
    let p = Path::new(path);
    if !p.exists() {
        std::fs::create_dir_all(p).map_err(|_| TransportError::Io)?;
    }
    Ok(())
}

impl GossipsubTransport {
    /// Spawn the swarm task and return a handle plus its join handle.
    pub fn spawn(
        cfg: TransportConfig,
        metrics: Arc<Metrics>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), TransportError> {
        ensure_dir(&cfg.data_dir)?;
        let (local_peer_id, id_keys) = crate::networking::p2p_identity::load_or_create_identity(&cfg.data_dir)
            .map_err(|_| TransportError::Io)?;

        let self_node_id = cfg.self_node.node_id();
        let self_node_str = cfg.self_node.to_string();
        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(1024);
        let (in_tx, in_rx) = mpsc::channel::<InboundMessage>(1024);
        let connected_peers = Arc::new(Mutex::new(HashSet::new()));
        let node_id_to_peer = Arc::new(Mutex::new(std::collections::HashMap::new()));

        let listen_addr = cfg.listen_addr.clone();
        let bootstrap = cfg.bootstrap.clone();
        let peers_for_task = connected_peers.clone();
        let node_id_to_peer_for_task = node_id_to_peer.clone();

        let join = tokio::spawn(async move {
            let noise_keys = match noise::Config::new(&id_keys) {
                Ok(v) => v,
                Err(_) => {
                    warn!("failed to build noise config");
                    return;
                }
            };
            let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
                .upgrade(upgrade::Version::V1)
                .authenticate(noise_keys)
                .multiplex(yamux::Config::default())
                .boxed();

            let gcfg = gossipsub::ConfigBuilder::default()
                .validation_mode(gossipsub::ValidationMode::Permissive)
                .heartbeat_interval(Duration::from_secs(1))
                .build()
                .unwrap_or_else(|_| gossipsub::Config::default());

            let mut gossipsub = match gossipsub::Behaviour::new(MessageAuthenticity::Signed(id_keys.clone()), gcfg) {
                Ok(v) => v,
                Err(_) => {
                    warn!("failed to create gossipsub behaviour");
                    return;
                }
            };

            let broadcast_topic = IdentTopic::new(BROADCAST_TOPIC);
            if let Err(e) = gossipsub.subscribe(&broadcast_topic) {
                warn!(err = ?e, "failed to subscribe broadcast topic");
            }
            let own_direct_topic = direct_topic(&self_node_id);
            if let Err(e) = gossipsub.subscribe(&own_direct_topic) {
                warn!(err = ?e, "failed to subscribe own direct topic");
            }

            // Advertise our own enode in the identify agent-version field so
            // peers can learn the secp256k1-derived node id that goes with
            // our libp2p `PeerId` (the two identities are unrelated
            // otherwise: the enode id is devp2p-style, ours is Ed25519).
            let identify = identify::Behaviour::new(
                identify::Config::new("istanbul-announce/1.0.0".to_string(), id_keys.public())
                    .with_agent_version(self_node_str),
            );
            let ping = ping::Behaviour::new(
                ping::Config::new()
                    .with_interval(Duration::from_secs(10))
                    .with_timeout(Duration::from_secs(20)),
            );

            let behaviour = Behaviour { gossipsub, identify, ping };
            let mut swarm = Swarm::new(transport, behaviour, local_peer_id, SwarmConfig::with_tokio_executor());

            let listen: Multiaddr = match listen_addr.parse() {
                Ok(v) => v,
                Err(_) => {
                    warn!(addr = %listen_addr, "bad listen_addr");
                    return;
                }
            };
            if let Err(e) = swarm.listen_on(listen) {
                warn!(err = ?e, "listen_on failed");
                return;
            }

            for b in bootstrap.iter().map(|x| x.trim()).filter(|x| !x.is_empty()) {
                match b.parse::<Multiaddr>() {
                    Ok(ma) => {
                        if let Err(e) = swarm.dial(ma.clone()) {
                            warn!(boot = %b, err = ?e, "dial bootstrap failed");
                        }
                    }
                    Err(_) => warn!(boot = %b, "bad bootstrap addr; skipping"),
                }
            }

            info!(%local_peer_id, %self_node_id, "announce transport started");
            metrics.p2p_peers.set(0);

            loop {
                tokio::select! {
                    maybe_out = out_rx.recv() => {
                        match maybe_out {
                            Some(Outbound::Broadcast { payload }) => {
                                if let Err(e) = swarm.behaviour_mut().gossipsub.publish(broadcast_topic.clone(), payload) {
                                    warn!(err=?e, "broadcast publish failed");
                                }
                            }
                            Some(Outbound::Direct { target, payload }) => {
                                let topic = direct_topic(&target);
                                if let Err(e) = swarm.behaviour_mut().gossipsub.publish(topic, payload) {
                                    warn!(err=?e, "direct publish failed");
                                }
                            }
                            None => {
                                warn!("outbound channel closed; stopping transport task");
                                break;
                            }
                        }
                    }

                    ev = swarm.select_next_some() => {
                        match ev {
                            SwarmEvent::NewListenAddr { address, .. } => {
                                info!(addr=%address, "listening");
                            }
                            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                                peers_for_task.lock().expect("peer set poisoned").insert(peer_id);
                                metrics.p2p_peers.inc();
                            }
                            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                                peers_for_task.lock().expect("peer set poisoned").remove(&peer_id);
                                metrics.p2p_peers.dec();
                            }
                            SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Message {
                                propagation_source,
                                message,
                                ..
                            })) => {
                                let Some(code) = message.data.first().copied() else {
                                    metrics.announce_invalid_envelope_total.inc();
                                    continue;
                                };
                                let peer_node_id = NodeId(crate::crypto::address::keccak256(&propagation_source.to_bytes()));
                                let inbound = InboundMessage {
                                    peer: peer_node_id,
                                    code,
                                    payload: message.data,
                                };
                                if in_tx.send(inbound).await.is_err() {
                                    warn!("inbound channel closed; dropping message");
                                }
                            }
                            SwarmEvent::Behaviour(BehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. })) => {
                                match EnodeUrl::parse(&info.agent_version) {
                                    Ok(peer_enode) => {
                                        let peer_node_id = peer_enode.node_id();
                                        node_id_to_peer_for_task.lock().expect("node id map poisoned").insert(peer_node_id, peer_id);
                                    }
                                    Err(_) => warn!(%peer_id, "identify: peer advertised an unparseable agent-version enode"),
                                }
                            }
                            SwarmEvent::Behaviour(BehaviourEvent::Identify(_)) => {}
                            SwarmEvent::Behaviour(BehaviourEvent::Ping(_)) => {}
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                self_node: cfg.self_node,
                self_node_id,
                outbound_tx: out_tx,
                inbound_rx: Mutex::new(in_rx),
                connected_peers,
                node_id_to_peer,
            },
            join,
        ))
    }

    /// Take the inbound message receiver (call once at startup).
    pub fn take_inbound(&self) -> mpsc::Receiver<InboundMessage> {
        let mut guard = self.inbound_rx.lock().expect("inbound receiver poisoned");
        std::mem::replace(&mut *guard, mpsc::channel(1).1)
    }
}

impl Gossip for GossipsubTransport {
    fn gossip(&self, _code: u8, payload: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.outbound_tx
                .send(Outbound::Broadcast { payload })
                .await
                .map_err(|_| TransportError::Closed)
        })
    }
}

impl Multicast for GossipsubTransport {
    fn multicast(
        &self,
        targets: &[NodeId],
        _code: u8,
        payload: Vec<u8>,
        send_to_self: bool,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        let targets: Vec<NodeId> = targets
            .iter()
            .copied()
            .filter(|t| send_to_self || *t != self.self_node_id)
            .collect();
        Box::pin(async move {
            for target in targets {
                self.outbound_tx
                    .send(Outbound::Direct { target, payload: payload.clone() })
                    .await
                    .map_err(|_| TransportError::Closed)?;
            }
            Ok(())
        })
    }
}

impl FindPeers for GossipsubTransport {
    fn find_peers(&self, ids: Option<&[NodeId]>) -> BoxFuture<'_, Vec<NodeId>> {
        let connected: Vec<PeerId> = self.connected_peers.lock().expect("peer set poisoned").iter().copied().collect();
        let map = self.node_id_to_peer.lock().expect("node id map poisoned");
        let mut known: Vec<NodeId> = map
            .iter()
            .filter(|(_, peer)| connected.contains(peer))
            .map(|(node, _)| *node)
            .collect();
        if let Some(filter) = ids {
            known.retain(|n| filter.contains(n));
        }
        Box::pin(async move { known })
    }
}

impl SelfNode for GossipsubTransport {
    fn self_node(&self) -> EnodeUrl {
        self.self_node.clone()
    }
}

/// In-memory transport for tests: records every outbound send instead of
/// touching the network.
pub struct MockTransport {
    self_node: EnodeUrl,
    self_node_id: NodeId,
    /// Every `(code, payload)` broadcast via `gossip`.
    pub broadcasts: Mutex<Vec<(u8, Vec<u8>)>>,
    /// Every `(targets, code, payload, send_to_self)` call via `multicast`.
    pub multicasts: Mutex<Vec<(Vec<NodeId>, u8, Vec<u8>, bool)>>,
    /// Peers to report from `find_peers`.
    pub peers: Mutex<Vec<NodeId>>,
}

impl MockTransport {
    /// Construct a mock transport advertising `self_node`.
    pub fn new(self_node: EnodeUrl) -> Self {
        let self_node_id = self_node.node_id();
        Self {
            self_node,
            self_node_id,
            broadcasts: Mutex::new(Vec::new()),
            multicasts: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        }
    }
}

impl Gossip for MockTransport {
    fn gossip(&self, code: u8, payload: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>> {
        self.broadcasts.lock().expect("mock transport poisoned").push((code, payload));
        Box::pin(async { Ok(()) })
    }
}

impl Multicast for MockTransport {
    fn multicast(
        &self,
        targets: &[NodeId],
        code: u8,
        payload: Vec<u8>,
        send_to_self: bool,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        self.multicasts
            .lock()
            .expect("mock transport poisoned")
            .push((targets.to_vec(), code, payload, send_to_self));
        Box::pin(async { Ok(()) })
    }
}

impl FindPeers for MockTransport {
    fn find_peers(&self, ids: Option<&[NodeId]>) -> BoxFuture<'_, Vec<NodeId>> {
        let mut peers = self.peers.lock().expect("mock transport poisoned").clone();
        if let Some(filter) = ids {
            peers.retain(|n| filter.contains(n));
        }
        Box::pin(async move { peers })
    }
}

impl SelfNode for MockTransport {
    fn self_node(&self) -> EnodeUrl {
        self.self_node.clone()
    }
}

impl MockTransport {
    /// This mock's own node id, for convenience in tests.
    pub fn self_node_id(&self) -> NodeId {
        self.self_node_id
    }
}
