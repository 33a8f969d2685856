use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{schema::GatewayConfig, substitute::substitute_env};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "chatgate.toml",
    "chatgate.yaml",
    "chatgate.yml",
    "chatgate.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply env
/// overrides.
///
/// Search order:
/// 1. `./chatgate.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/chatgate/chatgate.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `GatewayConfig::default()` if no config file is found.
pub fn discover_and_load() -> GatewayConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                GatewayConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            GatewayConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Returns the user-global config directory (`~/.config/chatgate/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "chatgate").map(|d| d.config_dir().to_path_buf())
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Overlay deployment env vars onto a loaded config. Empty values are
/// ignored.
pub fn apply_env_overrides(config: &mut GatewayConfig, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(bind) = var("CHATGATE_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = var("CHATGATE_PORT").or_else(|| var("SERVER_PORT")) {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid port override"),
        }
    }
    if let Some(name) = var("CONTAINER_NAME") {
        config.server.container_name = name;
    }
    if let Some(token) = var("GLOBAL_TOKEN") {
        config.auth.global_token = Some(Secret::new(token));
    }
    if let Some(path) = var("DB_PATH") {
        config.store.path = PathBuf::from(path);
    }
    if let Some(query) = var("DB_QUERY_URL") {
        config.store.query = Some(query);
    }
    if let Some(url) = var("AMQP_URL") {
        config.broker.url = Some(url);
    }
    if let Some(vhost) = var("AMQP_VHOST") {
        config.broker.vhost = Some(vhost);
    }
    if let Some(queues) = var("AMQP_QUEUES") {
        config.broker.queues = queues
            .split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(url) = var("GLOBAL_WEBHOOK") {
        config.webhook.global_url = Some(url);
    }
    if let Some(key) = var("LICENSE_KEY") {
        config.webhook.license_key = Some(Secret::new(key));
    }
    if let Some(url) = var("CHATGATE_BRIDGE_URL") {
        config.bridge.url = url;
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<GatewayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn loads_toml_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatgate.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9000

[broker]
queues = ["crm", "bot"]
"#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.broker.queues, vec!["crm", "bot"]);
        assert_eq!(cfg.broker.exchange, "chatgate_api_v3");
        assert_eq!(cfg.instances.reserved_name, "codechat");
    }

    #[test]
    fn loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatgate.yaml");
        std::fs::write(&path, "instances:\n  qr_wait_ms: 10\n").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.instances.qr_wait_ms, 10);
    }

    #[test]
    fn fetch_limits_default_to_public_hosts_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatgate.toml");
        std::fs::write(&path, "[fetch]\nmax_redirects = 1\n").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.fetch.max_redirects, 1);
        assert_eq!(cfg.fetch.max_bytes, 64 * 1024 * 1024);
        assert!(!cfg.fetch.allow_private_hosts);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatgate.ini");
        std::fs::write(&path, "").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CHATGATE_PORT", "7000"),
            ("GLOBAL_TOKEN", "admin"),
            ("AMQP_QUEUES", "crm, ,bot"),
            ("GLOBAL_WEBHOOK", "https://hooks.example.com"),
            ("DB_PATH", ""),
        ]);
        let mut cfg = GatewayConfig::default();
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.server.port, 7000);
        assert_eq!(
            cfg.auth.global_token.as_ref().unwrap().expose_secret(),
            "admin"
        );
        assert_eq!(cfg.broker.queues, vec!["crm", "bot"]);
        assert_eq!(
            cfg.webhook.global_url.as_deref(),
            Some("https://hooks.example.com")
        );
        assert_eq!(cfg.store.path, PathBuf::from("./data"));
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut cfg = GatewayConfig::default();
        apply_env_overrides(&mut cfg, |k| (k == "CHATGATE_PORT").then(|| "http".into()));
        assert_eq!(cfg.server.port, 8084);
    }
}
