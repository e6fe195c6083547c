use libp2p::{gossipsub, identify, identity, ping, swarm::NetworkBehaviour};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::FabricError;
use crate::fabric::config::FabricConfig;

/// Composed behaviour of a fleet node: gossipsub for fleet events, identify for
/// address exchange, ping for liveness.
#[derive(NetworkBehaviour)]
pub struct FleetBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

pub fn build_behaviour(
    keypair: &identity::Keypair,
    config: &FabricConfig,
) -> Result<FleetBehaviour, FabricError> {
    let topic_hash = gossipsub::IdentTopic::new(&config.topic).hash();

    let topic_score_params = gossipsub::TopicScoreParams {
        topic_weight: 1.0,
        time_in_mesh_weight: 0.01,
        time_in_mesh_quantum: Duration::from_secs(1),
        time_in_mesh_cap: 100.0,
        first_message_deliveries_weight: 1.0,
        first_message_deliveries_cap: 50.0,
        first_message_deliveries_decay: 0.95,
        // Fleet traffic is bursty; do not punish quiet peers.
        mesh_message_deliveries_weight: 0.0,
        invalid_message_deliveries_weight: -10.0,
        invalid_message_deliveries_decay: 0.9,
        ..Default::default()
    };

    let mut topics = std::collections::HashMap::new();
    topics.insert(topic_hash, topic_score_params);

    let peer_score_params = gossipsub::PeerScoreParams {
        topics,
        decay_interval: Duration::from_secs(10),
        decay_to_zero: 0.01,
        ..Default::default()
    };

    let peer_score_thresholds = gossipsub::PeerScoreThresholds {
        gossip_threshold: -100.0,
        publish_threshold: -200.0,
        graylist_threshold: -300.0,
        opportunistic_graft_threshold: 5.0,
        ..Default::default()
    };

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .mesh_n(config.mesh_n)
        .mesh_n_low(config.mesh_n_low)
        .mesh_n_high(config.mesh_n_high)
        .mesh_outbound_min(1)
        .heartbeat_interval(Duration::from_secs(1))
        .max_transmit_size(config.max_transmit_size)
        .validation_mode(gossipsub::ValidationMode::Strict)
        .flood_publish(true)
        .message_id_fn(|msg| {
            // Envelopes carry origin + sequence, so equal content means a duplicate.
            let mut hasher = Sha256::new();
            hasher.update(&msg.data);
            gossipsub::MessageId::from(hasher.finalize().to_vec())
        })
        .build()
        .map_err(|e| FabricError::Gossip(e.to_string()))?;

    let mut gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(keypair.clone()),
        gossipsub_config,
    )
    .map_err(|e| FabricError::Gossip(e.to_string()))?;

    gossipsub
        .with_peer_score(peer_score_params, peer_score_thresholds)
        .map_err(|e| FabricError::Gossip(e.to_string()))?;

    Ok(FleetBehaviour {
        gossipsub,
        identify: identify::Behaviour::new(identify::Config::new(
            "/chorus/1.0.0".to_string(),
            keypair.public(),
        )),
        ping: ping::Behaviour::default(),
    })
}
