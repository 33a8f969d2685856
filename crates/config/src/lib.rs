//! Configuration loading, env substitution and env overrides.
//!
//! Config files: `chatgate.toml`, `chatgate.yaml` or `chatgate.json`,
//! searched in `./` then `~/.config/chatgate/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` in all string values.

pub mod loader;
pub mod schema;
pub mod substitute;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        AuthConfig, BridgeConfig, BrokerConfig, FetchConfig, GatewayConfig, InstancesConfig,
        ServerConfig, StoreConfig, WebhookConfig,
    },
};
