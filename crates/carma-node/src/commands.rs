//! Command handlers.

use std::path::Path;
use std::sync::Arc;

use carma_topology::{ByteStore, Config, FsStore};
use tracing::info;

fn open(dir: &Path) -> anyhow::Result<Config> {
    let store: Arc<dyn ByteStore> = Arc::new(FsStore::new(dir));
    Ok(Config::load(store)?)
}

/// Load, validate and derive the neighbor sets.
pub fn check(dir: &Path) -> anyhow::Result<Config> {
    let config = open(dir)?;
    config.validate()?;
    let rx = config.rx_nodes()?;
    let tx = config.tx_nodes()?;
    info!(
        psn = %config.local().psn(),
        role = %config.local().role(),
        rx = ?rx.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
        tx = ?tx.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
        "neighbor sets derived"
    );
    Ok(config)
}

/// Move to a new epoch and write the config back.
pub fn epoch(dir: &Path, nonce_hex: &str, packed: bool) -> anyhow::Result<()> {
    let nonce = hex::decode(nonce_hex)?;
    let mut config = open(dir)?;
    config.set_epoch_nonce(nonce);
    config.validate()?;
    config.flush(packed)?;
    info!(nonce = nonce_hex, "epoch nonce updated");
    Ok(())
}

/// Write a config directory for a node this one is bootstrapping.
pub fn bootstrap(dir: &Path, out: &Path, channel_id: &str, link_address: &str) -> anyhow::Result<()> {
    let config = open(dir)?;
    let dst: Arc<dyn ByteStore> = Arc::new(FsStore::new(out));
    config.prepare_to_bootstrap(dst, channel_id, link_address)?;
    info!(out = %out.display(), "bootstrap directory ready");
    Ok(())
}
