use clap::{Parser, ValueEnum};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::fabric::config::FabricConfig;

/// Message/directory store backend.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// SQLite file in `data_dir`, shareable between processes.
    Sqlite,
    /// Process memory; history is lost on restart.
    Memory,
}

/// Command-line flags. Only flags that were actually given override lower layers.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "chorus-server", version, about = "Chorus chat coordination server")]
pub struct Cli {
    /// Port to listen on
    #[arg(long, env = "CHORUS_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long, env = "CHORUS_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./chorus.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (database, node key)
    #[arg(long, env = "CHORUS_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Fleet-unique id of this process
    #[arg(long, env = "CHORUS_NODE_ID")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Store backend
    #[arg(long, value_enum, env = "CHORUS_STORE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreKind>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,
    /// Defaults to the gossip peer id when the fabric is enabled, else a random UUID.
    #[serde(default)]
    pub node_id: Option<String>,
    pub store: StoreKind,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub calls: CallsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub fabric: FabricConfig,
}

/// `[history]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Newest messages kept per room or DM channel (default: 500)
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

fn default_max_messages() -> usize {
    crate::store::DEFAULT_MAX_MESSAGES
}

/// `[calls]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsConfig {
    /// Seconds an unanswered call rings before it is logged as missed (default: 30)
    #[serde(default = "default_ring_timeout_secs")]
    pub ring_timeout_secs: u64,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: default_ring_timeout_secs(),
        }
    }
}

fn default_ring_timeout_secs() -> u64 {
    30
}

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest inline voice note or attachment URL in bytes (default: 4 MiB)
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

fn default_max_attachment_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            node_id: None,
            store: StoreKind::Sqlite,
            history: HistoryConfig::default(),
            calls: CallsConfig::default(),
            limits: LimitsConfig::default(),
            fabric: FabricConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHORUS_*) < CLI args
    pub fn load() -> Result<Self, ConfigError> {
        let cli = Cli::parse();
        Self::figment(&cli).extract::<Config>()?.validated()
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            // CHORUS_FABRIC__ENABLED=true -> fabric.enabled
            .merge(Env::prefixed("CHORUS_").split("__"))
            .merge(Serialized::defaults(cli.clone()))
    }

    /// Reject settings that would misbehave at runtime.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.history.max_messages == 0 {
            return Err(ConfigError::Invalid {
                key: "history.max_messages",
                reason: "must be at least 1".into(),
            });
        }
        if self.calls.ring_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "calls.ring_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        let f = &self.fabric;
        if !(f.mesh_n_low <= f.mesh_n && f.mesh_n <= f.mesh_n_high) {
            return Err(ConfigError::Invalid {
                key: "fabric.mesh_n",
                reason: "expected mesh_n_low <= mesh_n <= mesh_n_high".into(),
            });
        }
        if f.max_transmit_size < self.limits.max_attachment_bytes {
            tracing::warn!(
                max_transmit_size = f.max_transmit_size,
                max_attachment_bytes = self.limits.max_attachment_bytes,
                "Fabric frames are smaller than the attachment limit; large voice notes will not reach other nodes"
            );
        }
        Ok(self)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            max_attachment_bytes: self.limits.max_attachment_bytes,
            ring_timeout: Duration::from_secs(self.calls.ring_timeout_secs),
            ..Settings::default()
        }
    }
}

/// Runtime knobs handlers read through `AppState`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_attachment_bytes: usize,
    pub ring_timeout: Duration,
    /// Extra time a callee-side view of an unanswered call survives before it is
    /// dropped, in case the caller's node never reports the outcome.
    pub ring_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_attachment_bytes: default_max_attachment_bytes(),
            ring_timeout: Duration::from_secs(default_ring_timeout_secs()),
            ring_grace: Duration::from_secs(5),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chorus Server Configuration
# Place this file at ./chorus.toml or specify with --config <path>
# Settings can be overridden via environment variables (CHORUS_PORT,
# CHORUS_FABRIC__ENABLED, ...) or CLI flags (--port, ...)

# HTTP/WebSocket port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0)
# bind_address = "0.0.0.0"

# Enable structured JSON logging
# json_logs = false

# Data directory for the SQLite database and the node key
# data_dir = "./data"

# Fleet-unique id of this process (default: gossip peer id, or a random UUID)
# node_id = "node-a"

# Store backend: "sqlite" (shared by all processes pointed at the same file)
# or "memory" (history lost on restart)
# store = "sqlite"

# ---- History ----
# [history]
# max_messages = 500   # newest messages kept per room / DM channel

# ---- Calls ----
# [calls]
# ring_timeout_secs = 30   # unanswered calls become "missed" after this

# ---- Limits ----
# [limits]
# max_attachment_bytes = 4194304   # 4 MiB voice note / attachment URL

# ---- Broadcast Fabric ----
# [fabric]
# enabled = false                 # join a gossip mesh with other processes
# listen_port = 5001              # gossip TCP port
# peers = ["/ip4/10.0.0.2/tcp/5001"]
# topic = "chorus/fleet/1"
# mesh_n = 4
# mesh_n_low = 3
# mesh_n_high = 8
# max_transmit_size = 5242880     # must exceed max_attachment_bytes
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve() {
        let config: Config = Config::figment(&Cli {
            config: "/nonexistent/chorus.toml".into(),
            ..Cli::default()
        })
        .extract()
        .unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.history.max_messages, 500);
        assert_eq!(config.calls.ring_timeout_secs, 30);
        assert!(!config.fabric.enabled);
    }

    #[test]
    fn test_toml_then_cli_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chorus.toml");
        std::fs::write(
            &path,
            "port = 6000\nstore = \"memory\"\n[calls]\nring_timeout_secs = 5\n",
        )
        .unwrap();

        let cli = Cli {
            config: path.to_str().unwrap().into(),
            ..Cli::default()
        };
        let config: Config = Config::figment(&cli).extract().unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.calls.ring_timeout_secs, 5);

        let cli = Cli {
            port: Some(7000),
            ..cli
        };
        let config: Config = Config::figment(&cli).extract().unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.store, StoreKind::Memory);
    }

    #[test]
    fn test_validation_rejects_bad_mesh() {
        let mut config = Config::default();
        config.fabric.mesh_n_low = 10;
        assert!(matches!(
            config.validated(),
            Err(ConfigError::Invalid { key: "fabric.mesh_n", .. })
        ));
    }

    #[test]
    fn test_template_mentions_every_section() {
        let template = generate_config_template();
        for section in ["[history]", "[calls]", "[limits]", "[fabric]"] {
            assert!(template.contains(section));
        }
    }
}
