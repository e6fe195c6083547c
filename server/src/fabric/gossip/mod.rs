//! Gossipsub transport: one topic shared by every node of the fleet.

pub mod behaviour;
pub mod identity;
pub mod swarm;

use libp2p::{Multiaddr, PeerId};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::config::FabricConfig;
use super::{FabricTransport, TransportEvent};
use crate::error::FabricError;
use swarm::SwarmCommand;

pub struct GossipTransport {
    cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    peer_id: PeerId,
}

impl GossipTransport {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

/// Load the node keypair, build the swarm, listen, dial configured peers and
/// spawn the swarm event loop.
pub async fn start(config: &FabricConfig, data_dir: &str) -> Result<GossipTransport, FabricError> {
    let keypair = identity::node_keypair(data_dir)?;
    let peer_id = PeerId::from(keypair.public());

    let mut swarm = swarm::build_swarm(keypair, config)?;

    let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", config.listen_port)
        .parse()
        .map_err(|e: libp2p::multiaddr::Error| FabricError::Gossip(e.to_string()))?;
    swarm
        .listen_on(listen_addr.clone())
        .map_err(|e| FabricError::Gossip(e.to_string()))?;
    tracing::info!(%peer_id, %listen_addr, "Gossip fabric listening");

    let topic = libp2p::gossipsub::IdentTopic::new(&config.topic);
    swarm
        .behaviour_mut()
        .gossipsub
        .subscribe(&topic)
        .map_err(|e| FabricError::Gossip(format!("{e:?}")))?;

    for peer in &config.peers {
        match peer.parse::<Multiaddr>() {
            Ok(addr) => match swarm.dial(addr.clone()) {
                Ok(()) => tracing::info!(%addr, "Dialing fabric peer"),
                Err(e) => tracing::warn!(%addr, error = %e, "Failed to dial fabric peer"),
            },
            Err(e) => tracing::warn!(peer = %peer, error = %e, "Ignoring invalid peer address"),
        }
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (evt_tx, evt_rx) = mpsc::unbounded_channel();
    tokio::spawn(swarm::run_swarm_loop(swarm, topic, cmd_rx, evt_tx));

    Ok(GossipTransport {
        cmd_tx,
        inbound: Mutex::new(Some(evt_rx)),
        peer_id,
    })
}

impl FabricTransport for GossipTransport {
    fn publish(&self, frame: Vec<u8>) -> Result<(), FabricError> {
        self.cmd_tx
            .send(SwarmCommand::Publish(frame))
            .map_err(|_| FabricError::Closed)
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, FabricError> {
        self.inbound
            .lock()
            .map_err(|_| FabricError::Closed)?
            .take()
            .ok_or(FabricError::Closed)
    }

    fn name(&self) -> &'static str {
        "gossipsub"
    }
}
