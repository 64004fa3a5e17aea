//! Node configuration, loaded from a TOML file.

use std::path::PathBuf;

use serde::Deserialize;

/// The role a node plays. Determines which periodic loops and announce
/// behaviors are active.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Indexer,
    Archiver,
    Full,
}

impl Role {
    pub fn runs_indexer(self) -> bool {
        matches!(self, Role::Indexer | Role::Full)
    }
    pub fn runs_archiver(self) -> bool {
        matches!(self, Role::Archiver | Role::Full)
    }
    pub fn auto_registers_unknown_boards(self) -> bool {
        !matches!(self, Role::Client)
    }
    pub fn forwards_announces(self) -> bool {
        !matches!(self, Role::Client)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Client => "client",
            Role::Indexer => "indexer",
            Role::Archiver => "archiver",
            Role::Full => "full",
        };
        write!(f, "{s}")
    }
}

fn default_limit_default() -> usize {
    50
}
fn default_limit_max() -> usize {
    200
}
fn default_index_sync_interval_secs() -> u64 {
    15
}
fn default_archive_interval_secs() -> u64 {
    60
}
fn default_recent_cid_ttl_secs() -> u64 {
    30 * 60
}
fn default_recent_cid_capacity() -> usize {
    4096
}
fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}
fn default_peer_timeout_secs() -> u64 {
    3
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct BoardmeshConfig {
    pub role: Role,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub content_store_endpoint: String,
    #[serde(default)]
    pub trusted_peers: Vec<String>,
    #[serde(default = "default_limit_default")]
    pub search_limit_default: usize,
    #[serde(default = "default_limit_max")]
    pub search_limit_max: usize,
    #[serde(default = "default_index_sync_interval_secs")]
    pub index_sync_interval_secs: u64,
    #[serde(default = "default_archive_interval_secs")]
    pub archive_interval_secs: u64,
    #[serde(default = "default_recent_cid_ttl_secs")]
    pub recent_cid_ttl_secs: u64,
    #[serde(default = "default_recent_cid_capacity")]
    pub recent_cid_capacity: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_request_body_bytes: usize,
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    #[serde(default)]
    pub enable_latin1_recovery: bool,
}

impl BoardmeshConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let cfg: BoardmeshConfig = toml::from_str(s)?;
        Ok(cfg)
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))
    }

    pub fn boards_json_path(&self) -> PathBuf {
        self.data_dir.join("boards.json")
    }

    pub fn trusted_indexers_json_path(&self) -> PathBuf {
        self.data_dir.join("trusted_indexers.json")
    }

    pub fn index_db_path(&self) -> PathBuf {
        self.data_dir.join("index.db")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }
}
