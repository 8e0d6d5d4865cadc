use serde::Deserialize;
use std::path::Path;

/// Top-level configuration parsed from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// Listener configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Broker configuration.
#[derive(Debug, Default, Deserialize)]
pub struct BrokerConfig {
    /// Shared secret the state tokens are encrypted under. Optional at
    /// startup: a broker without a secret still serves, answering 500 to
    /// every callback until the operator fixes the deployment.
    #[serde(default)]
    pub state_secret: Option<String>,
    /// Hosts the decrypted target may point at. Empty disables the check
    /// and any origin carried by a valid token is redirected to.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Load config from a TOML file, applying environment variable overrides.
///
/// The file is optional — the original deployment of this service ran on
/// environment variables alone, so an absent file just means defaults.
pub fn load_config(path: &Path) -> Result<Config, String> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse TOML config: {e}"))?
    } else {
        tracing::info!(
            "Config file '{}' not found, using defaults and environment",
            path.display()
        );
        Config::default()
    };

    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(config)
}

/// Apply environment variable overrides.
fn apply_env_overrides(config: &mut Config) {
    // OAUTH_STATE_SECRET overrides broker.state_secret
    if let Ok(val) = std::env::var("OAUTH_STATE_SECRET") {
        config.broker.state_secret = Some(val);
    }

    // PORT overrides server.port
    if let Ok(val) = std::env::var("PORT") {
        match val.parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(_) => tracing::warn!("Ignoring PORT='{val}': not a valid port number"),
        }
    }
}

/// Validate the entire configuration. Returns an error string on failure.
fn validate(config: &Config) -> Result<(), String> {
    match config.broker.state_secret.as_deref() {
        None | Some("") => {
            tracing::warn!(
                "No state secret configured (broker.state_secret / OAUTH_STATE_SECRET); \
                 all callbacks will be answered with 500 until one is set"
            );
        }
        Some(secret) if secret.len() < 16 => {
            tracing::warn!("state secret is shorter than 16 characters; consider a longer one");
        }
        Some(_) => {}
    }

    for entry in &config.broker.allowed_domains {
        if entry.is_empty() {
            return Err("broker.allowed_domains must not contain empty entries".to_string());
        }
        if entry.contains('/') || entry.contains(char::is_whitespace) {
            return Err(format!(
                "broker.allowed_domains entry '{entry}' must be a bare hostname \
                 (e.g. \"localhost\") or a dot-prefixed suffix (e.g. \".vercel.app\")"
            ));
        }
    }

    Ok(())
}
