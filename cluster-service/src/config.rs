//! Service configuration and credentials.
//!
//! The configuration file is a JSON document; every key has a default so a
//! partial file is enough. Credentials live in a separate file that is
//! stored obfuscated (keyed XOR + base64) so they are not casually
//! readable on disk; `--setup` imports a plaintext credentials file into
//! that store.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BusLogin {
    pub username: String,
    pub password: String,
    pub station_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub login: BusLogin,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            login: BusLogin::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseLogin {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub login: DatabaseLogin,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8086,
            database: "muon_cluster".into(),
            login: DatabaseLogin::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LdapConfig {
    pub host: String,
    pub bind_dn: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub port: u16,
    pub bind_address: String,
    pub cert: PathBuf,
    pub privkey: PathBuf,
    pub fullchain: PathBuf,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            port: 1983,
            bind_address: "127.0.0.1".into(),
            cert: PathBuf::new(),
            privkey: PathBuf::new(),
            fullchain: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub save_file: PathBuf,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            save_file: PathBuf::from("trigger.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Intervals {
    pub detector_summary_s: u64,
    pub cluster_log_s: u64,
    pub histogram_sample_time_s: u64,
    pub histogram_save_s: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            detector_summary_s: 30,
            cluster_log_s: 5,
            histogram_sample_time_s: 6 * 3600,
            histogram_save_s: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub source_bus: BusConfig,
    pub sink_bus: BusConfig,
    pub database: DatabaseConfig,
    pub ldap: LdapConfig,
    pub rest: RestConfig,
    pub trigger: TriggerConfig,
    pub run_local_cluster: bool,
    pub max_geohash_length: usize,
    pub data_directory: PathBuf,
    pub intervals: Intervals,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("could not read configuration file {}", path.display()))?;
        let mut config: Config = serde_json::from_slice(&bytes)
            .with_context(|| format!("could not parse configuration file {}", path.display()))?;
        if config.max_geohash_length == 0 {
            config.max_geohash_length = 6;
        }
        if config.data_directory.as_os_str().is_empty() {
            config.data_directory = PathBuf::from(".");
        }
        Ok(config)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.detector_summary_s)
    }

    pub fn cluster_log_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.cluster_log_s)
    }

    pub fn apply_credentials(&mut self, credentials: &Credentials) {
        self.source_bus.login = credentials.source.clone();
        self.sink_bus.login = credentials.sink.clone();
        self.database.login = credentials.database.clone();
        if !credentials.database_name.is_empty() {
            self.database.database = credentials.database_name.clone();
        }
        self.ldap.bind_dn = credentials.ldap_bind_dn.clone();
        self.ldap.password = credentials.ldap_password.clone();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Credentials {
    pub source: BusLogin,
    pub sink: BusLogin,
    pub database: DatabaseLogin,
    pub database_name: String,
    pub ldap_bind_dn: String,
    pub ldap_password: String,
}

/// Key stream for the credentials store. This is obfuscation, not
/// encryption: it keeps credentials out of casual file listings only.
const STORE_KEY: &[u8] = b"muon-cluster-credential-store";

fn keyed_xor(data: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, byte)| byte ^ STORE_KEY[i % STORE_KEY.len()] ^ (i as u8).wrapping_mul(31))
        .collect()
}

impl Credentials {
    pub fn load_plain(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("could not read credentials file {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("could not parse credentials file {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let encoded = std::fs::read_to_string(path)
            .with_context(|| format!("could not read credentials store {}", path.display()))?;
        let Ok(obfuscated) = STANDARD.decode(encoded.trim()) else {
            bail!("credentials store {} is not valid", path.display());
        };
        let json = keyed_xor(&obfuscated);
        serde_json::from_slice(&json)
            .with_context(|| format!("credentials store {} is corrupt", path.display()))
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self).context("could not serialize credentials")?;
        let encoded = STANDARD.encode(keyed_xor(&json));
        std::fs::write(path, encoded)
            .with_context(|| format!("could not write credentials store {}", path.display()))
    }
}
