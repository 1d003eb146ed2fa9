//! Integration tests for the CARMA topology engine.
//!
//! The library part only holds fixtures: an in-memory network that tests
//! populate entry by entry and then view from one node.
//!
//! ```sh
//! cargo test -p carma-integration-tests
//! ```

use std::sync::Arc;

use carma_crypto::x25519;
use carma_topology::{GlobalConfig, LocalConfig, MemoryStore, Phonebook, PhonebookEntry, Topology};
use carma_types::{NodeCount, Psn, PsnSet, Role};
use num_bigint::BigUint;
use serde_json::Value;

/// Parameters plus a phonebook, with nodes added one at a time.
pub struct Network {
    pub global: GlobalConfig,
    pub phonebook: Phonebook,
}

impl Network {
    pub fn new(num_servers: NodeCount, rigid: bool) -> Self {
        let mut global = GlobalConfig::new(num_servers, 1, BigUint::from(7919u32), b"epoch-0".to_vec())
            .expect("global parameters");
        global.set_correctness_test_only(true).set_is_rigid(rigid);
        Self {
            global,
            phonebook: Phonebook::new(Arc::new(MemoryStore::new()), "phonebook"),
        }
    }

    pub fn topo(&self) -> Topology<'_> {
        Topology::new(&self.global, &self.phonebook)
    }

    /// Add a node whose role has no group.
    pub fn add(&self, psn: &str, role: Role) -> Arc<PhonebookEntry> {
        self.insert(psn, role, None, None)
    }

    pub fn add_mc(&self, psn: &str, group: NodeCount, order: NodeCount) -> Arc<PhonebookEntry> {
        let role = if order == 0 { Role::McLeader } else { Role::McFollower };
        self.insert(psn, role, Some(group), Some(order))
    }

    pub fn add_rs(&self, psn: &str, group: NodeCount) -> Arc<PhonebookEntry> {
        self.insert(psn, Role::RsServer, Some(group), None)
    }

    fn insert(&self, psn: &str, role: Role, group: Option<NodeCount>, order: Option<NodeCount>) -> Arc<PhonebookEntry> {
        let entry = PhonebookEntry::new(Psn::new(psn), role, x25519::keygen().0, group, order).expect("entry");
        self.phonebook.add(entry)
    }

    /// The local view of `psn`, which must already be in the phonebook.
    /// `extra` supplies the local-only keys.
    pub fn local(&self, psn: &str, extra: Value) -> LocalConfig {
        let entry = self.phonebook.at(&Psn::new(psn), &self.global).expect("phonebook entry");
        let mut obj = entry.to_json().as_object().cloned().expect("entry object");
        obj.insert("sk".into(), Value::String(hex::encode(x25519::NodeSecretKey::random().to_bytes())));
        if let Value::Object(extra) = extra {
            obj.extend(extra);
        }
        LocalConfig::from_json(Value::Object(obj), &self.global, &self.phonebook).expect("local config")
    }

    /// Every node of `role`.
    pub fn with_role(&self, role: Role) -> PsnSet {
        self.phonebook
            .entries(&self.global)
            .expect("entries")
            .iter()
            .filter(|e| e.role() == role)
            .map(|e| e.psn().clone())
            .collect()
    }

    /// Nodes of `role` that share `psn`'s bucket.
    pub fn bucket_peers(&self, psn: &str, role: Role) -> PsnSet {
        let topo = self.topo();
        let bucket_of = |p: &Psn| {
            self.phonebook
                .at(p, &self.global)
                .expect("entry")
                .bucket_sets()
                .expect("bucketed role")
                .bucket(&topo)
                .expect("bucket")
        };
        let mine = bucket_of(&Psn::new(psn));
        self.with_role(role).into_iter().filter(|p| bucket_of(p) == mine).collect()
    }
}

pub fn psns(names: &[&str]) -> PsnSet {
    names.iter().map(|n| Psn::new(*n)).collect()
}
