use libp2p::identity::Keypair;
use rand::Rng;
use libp2p::PeerId;
use std::fs;
use std::path::Path;

use crate::error::FabricError;

/// Load or generate the node's Ed25519 keypair.
///
/// Stored as a 32-byte seed at `{data_dir}/node_identity.key`, so a restarted node
/// keeps its peer id.
pub fn node_keypair(data_dir: &str) -> Result<Keypair, FabricError> {
    let key_path = Path::new(data_dir).join("node_identity.key");

    if key_path.exists() {
        let seed = fs::read(&key_path).map_err(|e| FabricError::Identity(e.to_string()))?;
        if seed.len() != 32 {
            return Err(FabricError::Identity(format!(
                "{} must hold a 32-byte Ed25519 seed, found {} bytes",
                key_path.display(),
                seed.len()
            )));
        }
        let keypair = Keypair::ed25519_from_bytes(seed)
            .map_err(|e| FabricError::Identity(e.to_string()))?;
        tracing::info!(
            peer_id = %PeerId::from(keypair.public()),
            path = %key_path.display(),
            "Node identity loaded"
        );
        Ok(keypair)
    } else {
        let seed: [u8; 32] = rand::rng().random();
        let keypair = Keypair::ed25519_from_bytes(seed)
            .map_err(|e| FabricError::Identity(e.to_string()))?;

        fs::create_dir_all(data_dir).map_err(|e| FabricError::Identity(e.to_string()))?;
        fs::write(&key_path, seed).map_err(|e| FabricError::Identity(e.to_string()))?;
        tracing::info!(
            peer_id = %PeerId::from(keypair.public()),
            path = %key_path.display(),
            "Node identity generated"
        );
        Ok(keypair)
    }
}
