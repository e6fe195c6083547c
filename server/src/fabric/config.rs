use serde::{Deserialize, Serialize};

/// Broadcast fabric configuration (`[fabric]` section).
///
/// With `enabled = false` the node runs standalone on an in-process bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Join a gossip mesh with other nodes.
    #[serde(default)]
    pub enabled: bool,

    /// TCP port of the gossip listener (separate from the HTTP port).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Multiaddrs of other nodes to dial at startup,
    /// e.g. `/ip4/10.0.0.2/tcp/5001`.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Gossipsub topic shared by the fleet.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Gossipsub mesh degree (D).
    #[serde(default = "default_mesh_n")]
    pub mesh_n: usize,

    /// Mesh low watermark (D_lo).
    #[serde(default = "default_mesh_n_low")]
    pub mesh_n_low: usize,

    /// Mesh high watermark (D_hi).
    #[serde(default = "default_mesh_n_high")]
    pub mesh_n_high: usize,

    /// Largest fleet event in bytes. Must fit voice notes forwarded to remote rooms.
    #[serde(default = "default_max_transmit_size")]
    pub max_transmit_size: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_port: default_listen_port(),
            peers: Vec::new(),
            topic: default_topic(),
            mesh_n: default_mesh_n(),
            mesh_n_low: default_mesh_n_low(),
            mesh_n_high: default_mesh_n_high(),
            max_transmit_size: default_max_transmit_size(),
        }
    }
}

fn default_listen_port() -> u16 {
    5001
}
fn default_topic() -> String {
    "chorus/fleet/1".to_string()
}
fn default_mesh_n() -> usize {
    4
}
fn default_mesh_n_low() -> usize {
    3
}
fn default_mesh_n_high() -> usize {
    8
}
fn default_max_transmit_size() -> usize {
    // 4 MiB attachments plus envelope overhead
    5 * 1024 * 1024
}
