//! A node's configuration directory as a whole.
//!
//! ```text
//! global.json      network-wide parameters
//! local.json       this node's private view
//! bootstrap.json   present only on a node bootstrapped by another
//! phonebook/       every node's public entry
//! ```

use std::sync::Arc;

use carma_types::PsnSet;
use serde_json::Value;
use tracing::info;

use crate::bootstrap::BootstrapConfig;
use crate::entry::PhonebookEntry;
use crate::global::GlobalConfig;
use crate::local::LocalConfig;
use crate::phonebook::{write_json, Phonebook};
use crate::store::ByteStore;
use crate::{Result, Topology, TopologyError};

pub const GLOBAL_FILE: &str = "global.json";
pub const LOCAL_FILE: &str = "local.json";
pub const BOOTSTRAP_FILE: &str = "bootstrap.json";
pub const PHONEBOOK_DIR: &str = "phonebook";

pub struct Config {
    store: Arc<dyn ByteStore>,
    global: GlobalConfig,
    local: LocalConfig,
    phonebook: Phonebook,
    bootstrap: Option<BootstrapConfig>,
}

impl Config {
    /// Assemble a config from parts. `phonebook` should be rooted in
    /// `store` for [`Config::flush`] to write it alongside the rest.
    pub fn new(
        store: Arc<dyn ByteStore>,
        global: GlobalConfig,
        local: LocalConfig,
        phonebook: Phonebook,
        bootstrap: Option<BootstrapConfig>,
    ) -> Self {
        Self {
            store,
            global,
            local,
            phonebook,
            bootstrap,
        }
    }

    /// Load every file of the directory behind `store`.
    ///
    /// A freshly bootstrapped directory may carry derived state computed
    /// by its bootstrapper, so it is cleared on load.
    pub fn load(store: Arc<dyn ByteStore>) -> Result<Self> {
        let global = GlobalConfig::from_json(read_json(store.as_ref(), GLOBAL_FILE)?)
            .map_err(|e| e.within(GLOBAL_FILE))?;
        let phonebook = Phonebook::open(Arc::clone(&store), PHONEBOOK_DIR, &global)?;
        let local = LocalConfig::from_json(read_json(store.as_ref(), LOCAL_FILE)?, &global, &phonebook)
            .map_err(|e| e.within(LOCAL_FILE))?;
        let bootstrap = if store.exists(BOOTSTRAP_FILE)? {
            let value = read_json(store.as_ref(), BOOTSTRAP_FILE)?;
            Some(BootstrapConfig::from_json(value).map_err(|e| e.within(BOOTSTRAP_FILE))?)
        } else {
            None
        };

        let config = Self::new(store, global, local, phonebook, bootstrap);
        if config.bootstrap.is_some() {
            config.clear_deducible();
        }
        info!(
            psn = %config.local.psn(),
            role = %config.local.role(),
            phonebook = config.phonebook.len(),
            bootstrapped = config.bootstrap.is_some(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn local(&self) -> &LocalConfig {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut LocalConfig {
        &mut self.local
    }

    pub fn phonebook(&self) -> &Phonebook {
        &self.phonebook
    }

    pub fn bootstrap(&self) -> Option<&BootstrapConfig> {
        self.bootstrap.as_ref()
    }

    pub fn topology(&self) -> Topology<'_> {
        Topology::new(&self.global, &self.phonebook)
    }

    /// Check the global parameters and that a topology shape exists
    /// for them.
    pub fn validate(&self) -> Result<()> {
        self.global.validate()?;
        self.global.rangegen_row()?;
        Ok(())
    }

    pub fn rx_nodes(&self) -> Result<Arc<PsnSet>> {
        self.local.rx_nodes(&self.topology())
    }

    pub fn tx_nodes(&self) -> Result<Arc<PsnSet>> {
        self.local.tx_nodes(&self.topology())
    }

    /// Add or replace a phonebook entry, dropping every derived value
    /// that could depend on it.
    pub fn add_entry(&self, entry: PhonebookEntry) -> Result<Arc<PhonebookEntry>> {
        let entry = self.phonebook.add_and_invalidate(entry, &self.global)?;
        self.local.clear_deducible(&self.global);
        Ok(entry)
    }

    /// Start a new epoch.
    pub fn set_epoch_nonce(&mut self, epoch_nonce: Vec<u8>) {
        self.global.set_epoch_nonce(epoch_nonce);
        self.clear_deducible();
    }

    pub fn clear_deducible(&self) {
        self.phonebook.clear_deducible(&self.global);
        self.local.clear_deducible(&self.global);
    }

    /// Write every file back to the store.
    pub fn flush(&self, packed: bool) -> Result<()> {
        match &self.bootstrap {
            Some(bootstrap) => write_json(self.store.as_ref(), BOOTSTRAP_FILE, &bootstrap.to_json())?,
            None => self.store.remove(BOOTSTRAP_FILE)?,
        }
        write_json(self.store.as_ref(), GLOBAL_FILE, &self.global.to_json())?;
        write_json(self.store.as_ref(), LOCAL_FILE, &self.local.to_json())?;
        self.phonebook.flush(&self.global, packed)
    }

    /// Write into `dst` the config directory of a node about to be
    /// bootstrapped by this one, reached over `channel_id` at
    /// `link_address`.
    ///
    /// The new node gets this node's global parameters and phonebook, a
    /// local template with this node's role but no identity or keys, and
    /// a `bootstrap.json` naming this node. No derived state is copied.
    pub fn prepare_to_bootstrap(
        &self,
        dst: Arc<dyn ByteStore>,
        channel_id: &str,
        link_address: &str,
    ) -> Result<Config> {
        let phonebook = Phonebook::new(Arc::clone(&dst), PHONEBOOK_DIR);
        phonebook.copy_assign(&self.phonebook, &self.global)?;
        let snapshot = Config::new(
            dst,
            self.global.clone(),
            self.local.bootstrap_template()?,
            phonebook,
            Some(BootstrapConfig::new(self.local.psn().clone(), channel_id, link_address)),
        );
        snapshot.clear_deducible();
        snapshot.flush(false)?;
        info!(
            bootstrapper = %self.local.psn(),
            channel_id,
            entries = snapshot.phonebook.len(),
            "bootstrap snapshot written"
        );
        Ok(snapshot)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("global", &self.global)
            .field("local", &self.local)
            .field("phonebook", &self.phonebook)
            .field("bootstrap", &self.bootstrap)
            .finish_non_exhaustive()
    }
}

fn read_json(store: &dyn ByteStore, key: &str) -> Result<Value> {
    let bytes = store.read(key)?;
    serde_json::from_slice(&bytes).map_err(|e| TopologyError::parse(key, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use carma_crypto::bucket::bucket_index;
    use carma_crypto::x25519;
    use carma_types::{Psn, Role};
    use num_bigint::BigUint;
    use serde_json::json;

    fn write(store: &dyn ByteStore, key: &str, value: Value) {
        write_json(store, key, &value).expect("write");
    }

    /// A rigid five-server network seen from idle server "s".
    fn fixture() -> Arc<dyn ByteStore> {
        let store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
        let mut global = GlobalConfig::new(5, 1, BigUint::from(257u32), b"epoch-1".to_vec()).expect("global");
        global.set_correctness_test_only(true).set_is_rigid(true);
        write(store.as_ref(), GLOBAL_FILE, global.to_json());

        let (pk, sk) = x25519::keygen();
        write(
            store.as_ref(),
            LOCAL_FILE,
            json!({
                "psn": "s", "role": "idle_server",
                "pk": hex::encode(pk.to_bytes()), "sk": hex::encode(sk.to_bytes()),
                "other_servers": ["t"],
            }),
        );
        for (psn, role) in [("s", "idle_server"), ("t", "idle_server"), ("c", "client")] {
            write(
                store.as_ref(),
                &format!("{PHONEBOOK_DIR}/unpacked/{psn}"),
                json!({"psn": psn, "role": role, "pk": hex::encode(x25519::keygen().0.to_bytes())}),
            );
        }
        store
    }

    #[test]
    fn test_load_and_validate() {
        let config = Config::load(fixture()).expect("load");
        config.validate().expect("valid");
        assert_eq!(config.local().psn(), &Psn::new("s"));
        assert_eq!(config.phonebook().len(), 3);
        assert!(config.bootstrap().is_none());
        let rx = config.rx_nodes().expect("rx");
        assert_eq!(rx.iter().collect::<Vec<_>>(), [&Psn::new("t")]);
    }

    #[test]
    fn test_parse_errors_name_the_file() {
        let store = fixture();
        let mut local: Value = serde_json::from_slice(&store.read(LOCAL_FILE).expect("read")).expect("json");
        local["color"] = json!("blue");
        write(store.as_ref(), LOCAL_FILE, local);
        let err = Config::load(store).expect_err("unknown key");
        assert_eq!(err.to_string(), "local.json: color: unknown key");
    }

    #[test]
    fn test_set_epoch_nonce_clears_buckets() {
        let mut config = Config::load(fixture()).expect("load");
        let c = config.phonebook().at(&Psn::new("c"), config.global()).expect("c");
        let sets = c.bucket_sets().expect("client");
        sets.bucket(&config.topology()).expect("bucket");
        assert!(c.to_json().get("bucket").is_some());

        config.set_epoch_nonce(b"epoch-2".to_vec());
        assert!(c.to_json().get("bucket").is_none());
        assert_eq!(config.global().epoch_nonce(), b"epoch-2");
    }

    #[test]
    fn test_new_epoch_after_reload_rederives_buckets() {
        let store = fixture();
        let config = Config::load(Arc::clone(&store)).expect("load");
        let c = Psn::new("c");
        let entry = config.phonebook().at(&c, config.global()).expect("c");
        let sets = entry.bucket_sets().expect("client");
        sets.bucket_clients(&config.topology()).expect("clients");
        config.flush(false).expect("flush");

        let mut reloaded = Config::load(store).expect("reload");
        reloaded.set_epoch_nonce(b"epoch-2".to_vec());
        let entry = reloaded.phonebook().at(&c, reloaded.global()).expect("c");
        assert!(entry.to_json().get("bucket").is_none());
        let num_buckets = reloaded.global().num_buckets().expect("buckets");
        let bucket = entry.bucket_sets().expect("client").bucket(&reloaded.topology()).expect("bucket");
        assert_eq!(bucket, bucket_index(b"epoch-2", c.as_bytes(), num_buckets).expect("index"));
    }

    #[test]
    fn test_add_entry_refreshes_neighbors() {
        let mut config = Config::load(fixture()).expect("load");
        assert_eq!(config.rx_nodes().expect("rx").len(), 1);
        let u = PhonebookEntry::new(Psn::new("u"), Role::IdleServer, x25519::keygen().0, None, None).expect("u");
        config.add_entry(u).expect("add");
        let others: PsnSet = [Psn::new("t"), Psn::new("u")].into_iter().collect();
        config.local_mut().set_other_servers(others.clone()).expect("server");
        assert_eq!(*config.rx_nodes().expect("rx"), others);
    }

    #[test]
    fn test_flush_roundtrip() {
        let store = fixture();
        let config = Config::load(Arc::clone(&store)).expect("load");
        config.flush(true).expect("flush");
        assert!(store.exists("phonebook/packed.json").expect("exists"));
        let again = Config::load(store).expect("reload");
        assert_eq!(again.global(), config.global());
        assert_eq!(again.local().to_json(), config.local().to_json());
        assert_eq!(again.phonebook().psns(), config.phonebook().psns());
    }

    #[test]
    fn test_prepare_to_bootstrap() {
        let config = Config::load(fixture()).expect("load");
        config.rx_nodes().expect("rx");
        let dst: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
        config
            .prepare_to_bootstrap(Arc::clone(&dst), "direct", "10.0.0.2:4000")
            .expect("snapshot");

        let snapshot = Config::load(dst).expect("load snapshot");
        let bootstrap = snapshot.bootstrap().expect("bootstrap.json");
        assert_eq!(bootstrap.bootstrapper, Psn::new("s"));
        assert_eq!(bootstrap.link_address, "10.0.0.2:4000");
        assert_eq!(snapshot.local().psn(), &Psn::new("None"));
        assert_eq!(snapshot.local().role(), Role::IdleServer);
        assert!(snapshot.local().to_json().get("rx_nodes").is_none());
        assert_eq!(snapshot.phonebook().psns(), config.phonebook().psns());
    }
}
