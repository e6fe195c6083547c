use futures_util::StreamExt;
use libp2p::{gossipsub, identify, identity, noise, tcp, yamux, Swarm, SwarmBuilder};
use std::time::Duration;
use tokio::sync::mpsc;

use super::behaviour::{build_behaviour, FleetBehaviour, FleetBehaviourEvent};
use crate::error::FabricError;
use crate::fabric::config::FabricConfig;
use crate::fabric::TransportEvent;

/// Commands sent from the fabric handle to the swarm event loop.
pub enum SwarmCommand {
    Publish(Vec<u8>),
}

pub fn build_swarm(
    keypair: identity::Keypair,
    config: &FabricConfig,
) -> Result<Swarm<FleetBehaviour>, FabricError> {
    let config = config.clone();
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| FabricError::Gossip(e.to_string()))?
        .with_behaviour(|key| {
            build_behaviour(key, &config)
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        })
        .map_err(|e| FabricError::Gossip(e.to_string()))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(120)))
        .build();
    Ok(swarm)
}

/// Run the swarm until the command channel closes.
///
/// Inbound gossip on `topic` is forwarded as frames; a peer subscribing to the topic
/// is reported so the fleet can resync with it.
pub async fn run_swarm_loop(
    mut swarm: Swarm<FleetBehaviour>,
    topic: gossipsub::IdentTopic,
    mut cmd_rx: mpsc::UnboundedReceiver<SwarmCommand>,
    evt_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let topic_hash = topic.hash();
    loop {
        tokio::select! {
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &topic_hash, &evt_tx);
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SwarmCommand::Publish(data)) => {
                        match swarm.behaviour_mut().gossipsub.publish(topic.clone(), data) {
                            Ok(id) => tracing::trace!(message_id = %id, "Published to fleet topic"),
                            // A lone node has nobody to publish to.
                            Err(gossipsub::PublishError::InsufficientPeers) => {
                                tracing::trace!("No fleet peers, event stays local")
                            }
                            Err(e) => tracing::warn!(error = ?e, "Failed to publish fleet event"),
                        }
                    }
                    None => {
                        tracing::info!("Fabric command channel closed, shutting down swarm");
                        break;
                    }
                }
            }
        }
    }
}

fn handle_swarm_event(
    event: libp2p::swarm::SwarmEvent<FleetBehaviourEvent>,
    topic_hash: &gossipsub::TopicHash,
    evt_tx: &mpsc::UnboundedSender<TransportEvent>,
) {
    use libp2p::swarm::SwarmEvent as LibSwarmEvent;

    match event {
        LibSwarmEvent::Behaviour(FleetBehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message,
            ..
        })) => {
            if &message.topic != topic_hash {
                return;
            }
            tracing::trace!(
                source = %propagation_source,
                bytes = message.data.len(),
                "Fleet frame received"
            );
            let _ = evt_tx.send(TransportEvent::Frame(message.data));
        }
        LibSwarmEvent::Behaviour(FleetBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed {
            peer_id,
            topic,
        })) => {
            if &topic == topic_hash {
                tracing::info!(%peer_id, "Fleet peer joined topic");
                let _ = evt_tx.send(TransportEvent::PeerJoined(peer_id.to_string()));
            }
        }
        LibSwarmEvent::Behaviour(FleetBehaviourEvent::Identify(identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            tracing::debug!(
                %peer_id,
                listen_addrs = info.listen_addrs.len(),
                "Identify received"
            );
        }
        LibSwarmEvent::ConnectionEstablished {
            peer_id, endpoint, ..
        } => {
            tracing::debug!(%peer_id, ?endpoint, "Fleet connection established");
        }
        LibSwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
            tracing::info!(%peer_id, ?cause, "Fleet connection closed");
        }
        LibSwarmEvent::NewListenAddr { address, .. } => {
            tracing::info!(%address, "Fabric listening on");
        }
        _ => {}
    }
}
