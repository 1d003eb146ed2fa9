//! The phonebook: every node's public entry, keyed by PSN.
//!
//! Entries live in the byte store either one file per PSN under
//! `<dir>/unpacked/<slug>` or all together in `<dir>/packed.json`. An
//! unpacked file wins over a packed entry for the same PSN. Packed entries
//! are parsed when the phonebook is opened; unpacked ones are registered as
//! empty slots and parsed on first access.
//!
//! A slot is filled at most once. Concurrent first readers may each load
//! and parse the same file, but only the first result is installed and
//! every caller gets that same `Arc`.
//!
//! Entries on disk may carry derived fields written by an earlier flush.
//! Once derived state has been cleared, every entry loaded afterwards is
//! cleared as well, so nothing computed before the clear comes back.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use carma_types::{Psn, PsnHash, PsnSet};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::entry::PhonebookEntry;
use crate::global::GlobalConfig;
use crate::memo::Memo;
use crate::store::{join_key, ByteStore};
use crate::{Result, Topology, TopologyError};

const UNPACKED: &str = "unpacked";
const PACKED: &str = "packed.json";

type Slot = Arc<Memo<PhonebookEntry>>;

#[derive(Default)]
struct Index {
    slots: BTreeMap<Psn, Slot>,
    hashes: BTreeMap<PsnHash, Psn>,
}

impl Index {
    fn insert(&mut self, psn: Psn, slot: Slot) {
        self.hashes.insert(PsnHash::new(&psn), psn.clone());
        self.slots.insert(psn, slot);
    }
}

pub struct Phonebook {
    store: Arc<dyn ByteStore>,
    dir: String,
    index: RwLock<Index>,
    /// Set once stored derived fields can no longer be trusted.
    stale_on_disk: AtomicBool,
}

impl Phonebook {
    /// An empty phonebook persisted under `dir`.
    pub fn new(store: Arc<dyn ByteStore>, dir: &str) -> Self {
        Self {
            store,
            dir: join_key(&[dir]),
            index: RwLock::new(Index::default()),
            stale_on_disk: AtomicBool::new(false),
        }
    }

    /// Register every entry found under `dir`.
    ///
    /// Files whose name is not the canonical slug of the PSN it decodes to
    /// are skipped. A packed file fully shadowed by unpacked files is
    /// removed.
    pub fn open(store: Arc<dyn ByteStore>, dir: &str, global: &GlobalConfig) -> Result<Self> {
        let phonebook = Self::new(store, dir);

        let unpacked_dir = join_key(&[&phonebook.dir, UNPACKED]);
        let mut unpacked = BTreeSet::new();
        for slug in phonebook.store.list(&unpacked_dir)? {
            match canonical_psn(&slug) {
                Some(psn) => {
                    unpacked.insert(psn);
                }
                None => warn!(dir = %unpacked_dir, slug = %slug, "skipping entry file with a non-canonical name"),
            }
        }

        let packed = phonebook.packed_key();
        if phonebook.store.exists(&packed)? {
            let bytes = phonebook.store.read(&packed)?;
            let value: Value = serde_json::from_slice(&bytes).map_err(|e| TopologyError::parse(&packed, e))?;
            let Value::Object(obj) = value else {
                return Err(TopologyError::parse(&packed, "expected an object keyed by PSN"));
            };
            let mut subsumed = true;
            for (slug, value) in obj {
                let Some(psn) = canonical_psn(&slug) else {
                    warn!(file = %packed, slug = %slug, "skipping packed entry with a non-canonical name");
                    continue;
                };
                if unpacked.contains(&psn) {
                    continue;
                }
                subsumed = false;
                let context = format!("{packed}: {slug}");
                let entry = PhonebookEntry::from_json(value, global).map_err(|e| e.within(&context))?;
                check_psn(&psn, &entry, &context)?;
                phonebook.add(entry);
            }
            if subsumed {
                phonebook.store.remove(&packed)?;
                debug!(file = %packed, "removed packed file shadowed by unpacked entries");
            }
        }

        for psn in unpacked {
            phonebook.add_placeholder(psn);
        }

        info!(dir = %phonebook.dir, entries = phonebook.len(), "phonebook opened");
        Ok(phonebook)
    }

    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.index.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().slots.is_empty()
    }

    pub fn contains(&self, psn: &Psn) -> bool {
        self.index.read().slots.contains_key(psn)
    }

    pub(crate) fn require(&self, psn: &Psn) -> Result<()> {
        if self.contains(psn) {
            Ok(())
        } else {
            Err(TopologyError::NotFound(psn.clone()))
        }
    }

    /// Every PSN with a slot, loaded or not.
    pub fn psns(&self) -> PsnSet {
        self.index.read().slots.keys().cloned().collect()
    }

    /// The PSN whose hash is `hash`, if it is in the phonebook.
    pub fn psn_for_hash(&self, hash: &PsnHash) -> Option<Psn> {
        self.index.read().hashes.get(hash).cloned()
    }

    /// The entry for `psn`, loading it if this is the first access.
    pub fn find(&self, psn: &Psn, global: &GlobalConfig) -> Result<Option<Arc<PhonebookEntry>>> {
        loop {
            let Some(slot) = self.slot(psn) else {
                return Ok(None);
            };
            if let Some(entry) = slot.get() {
                return Ok(Some(entry));
            }

            let fresh = Arc::new(self.load(psn, global)?);
            let installed = slot.install(Arc::clone(&fresh));
            if !Arc::ptr_eq(&installed, &fresh) {
                warn!(psn = %psn, "discarded redundant phonebook load");
            }

            // An add may have replaced the slot while we were loading.
            match self.slot(psn) {
                Some(current) if Arc::ptr_eq(&current, &slot) => return Ok(Some(installed)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Like [`Phonebook::find`], but a missing PSN is an error.
    pub fn at(&self, psn: &Psn, global: &GlobalConfig) -> Result<Arc<PhonebookEntry>> {
        self.find(psn, global)?
            .ok_or_else(|| TopologyError::NotFound(psn.clone()))
    }

    /// The entry of the node whose PSN hashes to `hash`.
    pub fn find_by_hash(&self, hash: &PsnHash, global: &GlobalConfig) -> Result<Option<Arc<PhonebookEntry>>> {
        match self.psn_for_hash(hash) {
            Some(psn) => self.find(&psn, global),
            None => Ok(None),
        }
    }

    /// Like [`Phonebook::find_by_hash`], but a missing hash is an error.
    pub fn at_hash(&self, hash: &PsnHash, global: &GlobalConfig) -> Result<Arc<PhonebookEntry>> {
        self.find_by_hash(hash, global)?
            .ok_or(TopologyError::HashNotFound(*hash))
    }

    fn slot(&self, psn: &Psn) -> Option<Slot> {
        self.index.read().slots.get(psn).cloned()
    }

    fn entry_key(&self, psn: &Psn) -> String {
        join_key(&[&self.dir, UNPACKED, &psn.to_slug()])
    }

    fn packed_key(&self) -> String {
        join_key(&[&self.dir, PACKED])
    }

    fn load(&self, psn: &Psn, global: &GlobalConfig) -> Result<PhonebookEntry> {
        let key = self.entry_key(psn);
        let bytes = self.store.read(&key)?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| TopologyError::parse(&key, e))?;
        let entry = PhonebookEntry::from_json(value, global).map_err(|e| e.within(&key))?;
        check_psn(psn, &entry, &key)?;
        if self.stale_on_disk.load(Ordering::Acquire) {
            entry.clear_deducible(global);
        }
        debug!(psn = %psn, role = %entry.role(), "phonebook entry loaded");
        Ok(entry)
    }

    /// Insert or replace an entry without touching derived state.
    pub fn add(&self, entry: PhonebookEntry) -> Arc<PhonebookEntry> {
        let entry = Arc::new(entry);
        let slot = Arc::new(Memo::new());
        slot.install(Arc::clone(&entry));
        self.index.write().insert(entry.psn().clone(), slot);
        entry
    }

    /// Register `psn` as present but not yet loaded. Existing slots are
    /// left alone.
    pub fn add_placeholder(&self, psn: Psn) {
        let mut index = self.index.write();
        if !index.slots.contains_key(&psn) {
            index.insert(psn, Slot::default());
        }
    }

    /// Insert an entry and drop every derived value its arrival can
    /// change: its own state, and the peer sets of its bucket.
    pub fn add_and_invalidate(&self, entry: PhonebookEntry, global: &GlobalConfig) -> Result<Arc<PhonebookEntry>> {
        entry.clear_deducible(global);
        let entry = self.add(entry);
        let topo = Topology::new(global, self);
        let Some(sets) = entry.bucket_sets() else {
            return Ok(entry);
        };
        // Peers still on disk may have stored peer sets without the newcomer.
        self.stale_on_disk.store(true, Ordering::Release);
        let bucket = sets.bucket(&topo)?;
        for other in self.loaded() {
            if let Some(peer) = other.bucket_sets() {
                if peer.bucket(&topo)? == bucket {
                    peer.invalidate_peers();
                }
            }
        }
        debug!(psn = %entry.psn(), bucket, "bucket peers invalidated");
        Ok(entry)
    }

    /// Entries already in memory; never touches the store.
    fn loaded(&self) -> Vec<Arc<PhonebookEntry>> {
        self.index.read().slots.values().filter_map(|slot| slot.get()).collect()
    }

    /// Every entry, loading the ones not yet in memory.
    pub fn entries(&self, global: &GlobalConfig) -> Result<Vec<Arc<PhonebookEntry>>> {
        self.psns()
            .iter()
            .filter_map(|psn| self.find(psn, global).transpose())
            .collect()
    }

    /// Replace this phonebook's contents with deep copies of every entry
    /// of `src`.
    pub fn copy_assign(&self, src: &Phonebook, global: &GlobalConfig) -> Result<()> {
        let mut copies = Index::default();
        for entry in src.entries(global)? {
            copies.insert(entry.psn().clone(), Arc::new(Memo::with((*entry).clone())));
        }
        debug!(entries = copies.slots.len(), "phonebook copied");
        *self.index.write() = copies;
        Ok(())
    }

    /// Clear the derived state of every loaded entry, and of every entry
    /// loaded from now on.
    pub fn clear_deducible(&self, global: &GlobalConfig) {
        self.stale_on_disk.store(true, Ordering::Release);
        let loaded = self.loaded();
        for entry in &loaded {
            entry.clear_deducible(global);
        }
        debug!(entries = loaded.len(), "phonebook deducible state cleared");
    }

    /// Write every entry to the store, either packed into one file or
    /// one file per entry. The other layout is removed.
    pub fn flush(&self, global: &GlobalConfig, packed: bool) -> Result<()> {
        let entries = self.entries(global)?;
        let unpacked = join_key(&[&self.dir, UNPACKED]);
        if packed {
            let obj: Map<String, Value> = entries
                .iter()
                .map(|entry| (entry.psn().to_slug(), entry.to_json()))
                .collect();
            write_json(self.store.as_ref(), &self.packed_key(), &Value::Object(obj))?;
            for slug in self.store.list(&unpacked)? {
                self.store.remove(&join_key(&[&unpacked, &slug]))?;
            }
        } else {
            for entry in &entries {
                write_json(self.store.as_ref(), &self.entry_key(entry.psn()), &entry.to_json())?;
            }
            self.store.remove(&self.packed_key())?;
        }
        info!(dir = %self.dir, entries = entries.len(), packed, "phonebook flushed");
        Ok(())
    }
}

impl std::fmt::Debug for Phonebook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phonebook")
            .field("dir", &self.dir)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// The PSN named by `slug`, if `slug` is its canonical encoding.
fn canonical_psn(slug: &str) -> Option<Psn> {
    Psn::from_slug(slug).ok().filter(|psn| psn.to_slug() == slug)
}

fn check_psn(expected: &Psn, entry: &PhonebookEntry, context: &str) -> Result<()> {
    if entry.psn() == expected {
        Ok(())
    } else {
        Err(TopologyError::Corruption(format!(
            "{context}: stored under \"{expected}\" but names \"{}\"",
            entry.psn()
        )))
    }
}

pub(crate) fn write_json(store: &dyn ByteStore, key: &str, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| TopologyError::parse(key, e))?;
    store.write(key, &bytes)
}
