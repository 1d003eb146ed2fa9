//! Process settings (`carma.toml`).
//!
//! These only say where things are and how loud to be. The topology
//! itself lives in the node's JSON config directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSettings {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub bootstrap: BootstrapSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Config directory. Empty = `$data_dir/config`.
    #[serde(default)]
    pub config_dir: String,
    /// Write the phonebook as one `packed.json` instead of one file per entry.
    #[serde(default)]
    pub pack_phonebook: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSection {
    /// Where snapshots for new nodes go. Empty = `$data_dir/bootstrap`.
    #[serde(default)]
    pub output_dir: String,
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_directive")]
    pub directive: String,
}

fn default_channel_id() -> String {
    "direct".to_string()
}

fn default_log_directive() -> String {
    "carma=info".to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            config_dir: String::new(),
            pack_phonebook: false,
        }
    }
}

impl Default for BootstrapSection {
    fn default() -> Self {
        Self {
            output_dir: String::new(),
            channel_id: default_channel_id(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            directive: default_log_directive(),
        }
    }
}

impl NodeSettings {
    /// Load `carma.toml` from the data directory, or defaults if absent.
    pub fn load() -> anyhow::Result<Self> {
        let path = data_dir().join("carma.toml");
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        resolve(&self.node.config_dir, "config")
    }

    pub fn bootstrap_dir(&self) -> PathBuf {
        resolve(&self.bootstrap.output_dir, "bootstrap")
    }
}

fn resolve(configured: &str, fallback: &str) -> PathBuf {
    if configured.is_empty() {
        data_dir().join(fallback)
    } else {
        PathBuf::from(configured)
    }
}

/// `$CARMA_DATA_DIR`, else `~/.carma`.
fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CARMA_DATA_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".carma"))
        .unwrap_or_else(|_| PathBuf::from("/tmp/carma"))
}
