//! Load config from file and environment.

use std::path::{Path, PathBuf};

use mine_core::{ConnectionConfig, DEFAULT_CHUNK_SIZE};
use serde::Deserialize;

/// Client configuration. File: ~/.config/mine/config.toml or /etc/mine/config.toml.
/// Env overrides: MINE_HOST, MINE_PORT, MINE_LOGIN, MINE_PASSWORD, MINE_CHUNK_SIZE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Broker host (default localhost).
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port (default 1135).
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Publish chunk size and receive buffer size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1135
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            login: None,
            password: None,
            chunk_size: default_chunk_size(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Load config: explicit file if given, else the first default path that exists; then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => load_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => load_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("MINE_HOST") {
        c.host = s;
    }
    if let Some(s) = var("MINE_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.port = p,
            Err(_) => tracing::warn!(value = %s, "ignoring invalid MINE_PORT"),
        }
    }
    if let Some(s) = var("MINE_LOGIN") {
        c.login = Some(s);
    }
    if let Some(s) = var("MINE_PASSWORD") {
        c.password = Some(s);
    }
    if let Some(s) = var("MINE_CHUNK_SIZE") {
        match s.parse::<usize>() {
            Ok(n) if n > 0 => c.chunk_size = n,
            _ => tracing::warn!(value = %s, "ignoring invalid MINE_CHUNK_SIZE"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/mine/config.toml"));
    }
    out.push(PathBuf::from("/etc/mine/config.toml"));
    out
}

fn load_file(path: &Path) -> anyhow::Result<Config> {
    use anyhow::Context;

    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let c = toml::from_str::<Config>(&s)
        .with_context(|| format!("parsing config {}", path.display()))?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(c)
}
