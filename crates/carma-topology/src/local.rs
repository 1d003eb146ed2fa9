//! The owning node's private view.
//!
//! [`LocalConfig`] wraps the node's own public entry and adds its secret
//! keys, its explicit peer overrides and the neighbor sets only the node
//! itself needs: MC groups, layers, and finally `rx_nodes`/`tx_nodes`,
//! the sets the transport connects to.
//!
//! | Role          | rx_nodes                                            | tx_nodes                                            |
//! |---------------|-----------------------------------------------------|-----------------------------------------------------|
//! | `client`      | bucket_mb_servers                                   | bucket_mb_servers                                   |
//! | `idle_server` | other_servers                                       | other_servers                                       |
//! | `mb_server`   | bucket_clients ∪ prev_layer ∪ other_servers         | mc_leaders ∪ bucket_clients ∪ other_servers         |
//! | `mc_follower` | {mc_leader} ∪ other_servers                         | {mc_leader} ∪ other_servers                         |
//! | `mc_leader`   | mc_group\[1..\] ∪ mb_servers ∪ other_servers        | mc_group\[1..\] ∪ next_layer ∪ other_servers        |
//! | `rs_server`   | prev_layer ∪ other_servers                          | next_layer ∪ other_servers                          |

use std::collections::BTreeMap;
use std::sync::Arc;

use carma_crypto::anon;
use carma_crypto::vrf::{EvalResult, VrfShell};
use carma_crypto::x25519::{NodePublicKey, NodeSecretKey, KEY_SIZE};
use carma_types::{NodeCount, Psn, PsnSet, Role};
use num_bigint::BigUint;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;
use zeroize::Zeroizing;

use crate::entry::{ticket_value, EntryRole, McPosition, PhonebookEntry};
use crate::global::GlobalConfig;
use crate::json::{hex_value, psns_value, Fields, Hex};
use crate::memo::Memo;
use crate::phonebook::Phonebook;
use crate::{Result, Topology, TopologyError};

/// Local-only state per role.
#[derive(Clone, Debug)]
pub enum LocalRole {
    Client,
    IdleServer,
    MbServer {
        prev_layer: Memo<PsnSet>,
    },
    McFollower {
        mc_leader: Memo<Psn>,
    },
    McLeader {
        mb_servers: Memo<PsnSet>,
        next_layer: Memo<PsnSet>,
    },
    RsServer {
        prev_layer: Memo<PsnSet>,
        next_layer: Memo<PsnSet>,
    },
}

impl LocalRole {
    fn empty(role: Role) -> Self {
        match role {
            Role::Client => LocalRole::Client,
            Role::IdleServer => LocalRole::IdleServer,
            Role::MbServer => LocalRole::MbServer { prev_layer: Memo::new() },
            Role::McFollower => LocalRole::McFollower { mc_leader: Memo::new() },
            Role::McLeader => LocalRole::McLeader {
                mb_servers: Memo::new(),
                next_layer: Memo::new(),
            },
            Role::RsServer => LocalRole::RsServer {
                prev_layer: Memo::new(),
                next_layer: Memo::new(),
            },
        }
    }

    fn parse(f: &mut Fields, role: Role, phonebook: &Phonebook, rigid: bool) -> Result<Self> {
        Ok(match role {
            Role::Client => LocalRole::Client,
            Role::IdleServer => LocalRole::IdleServer,
            Role::MbServer => LocalRole::MbServer {
                prev_layer: parse_set(f, "prev_layer", phonebook, !rigid)?,
            },
            Role::McFollower => {
                let mc_leader = match f.optional::<Psn>("mc_leader")? {
                    Some(psn) => {
                        phonebook.require(&psn).map_err(|e| e.within("mc_leader"))?;
                        Memo::with(psn)
                    }
                    None => Memo::new(),
                };
                LocalRole::McFollower { mc_leader }
            }
            Role::McLeader => LocalRole::McLeader {
                mb_servers: parse_set(f, "mb_servers", phonebook, !rigid)?,
                next_layer: parse_set(f, "next_layer", phonebook, !rigid)?,
            },
            Role::RsServer => LocalRole::RsServer {
                prev_layer: parse_set(f, "prev_layer", phonebook, !rigid)?,
                next_layer: parse_set(f, "next_layer", phonebook, !rigid)?,
            },
        })
    }

    fn write_json(&self, obj: &mut Map<String, Value>) {
        match self {
            LocalRole::Client | LocalRole::IdleServer => {}
            LocalRole::MbServer { prev_layer } => put_set(obj, "prev_layer", prev_layer),
            LocalRole::McFollower { mc_leader } => {
                if let Some(leader) = mc_leader.get() {
                    obj.insert("mc_leader".into(), Value::String(leader.to_slug()));
                }
            }
            LocalRole::McLeader { mb_servers, next_layer } => {
                put_set(obj, "mb_servers", mb_servers);
                put_set(obj, "next_layer", next_layer);
            }
            LocalRole::RsServer { prev_layer, next_layer } => {
                put_set(obj, "prev_layer", prev_layer);
                put_set(obj, "next_layer", next_layer);
            }
        }
    }

    /// Rigid layouts derive every layer structurally, so the layers are
    /// deducible there. Non-rigid layers are raw input and stay.
    fn clear(&self, rigid: bool) {
        match self {
            LocalRole::Client | LocalRole::IdleServer => {}
            LocalRole::McFollower { mc_leader } => mc_leader.clear(),
            LocalRole::MbServer { prev_layer } => {
                if rigid {
                    prev_layer.clear();
                }
            }
            LocalRole::McLeader { mb_servers, next_layer } => {
                if rigid {
                    mb_servers.clear();
                    next_layer.clear();
                }
            }
            LocalRole::RsServer { prev_layer, next_layer } => {
                if rigid {
                    prev_layer.clear();
                    next_layer.clear();
                }
            }
        }
    }
}

fn put_set(obj: &mut Map<String, Value>, key: &str, memo: &Memo<PsnSet>) {
    if let Some(set) = memo.get() {
        obj.insert(key.into(), psns_value(set.iter()));
    }
}

fn parse_set(f: &mut Fields, key: &str, phonebook: &Phonebook, required: bool) -> Result<Memo<PsnSet>> {
    match f.known_set(key, phonebook)? {
        Some(set) => Ok(Memo::with(set)),
        None if required => Err(TopologyError::parse(key, "missing required key")),
        None => Ok(Memo::new()),
    }
}

/// A rigid-only structural layer: every entry with `role`.
fn rigid_layer(topo: &Topology<'_>, memo: &Memo<PsnSet>, key: &str, role: Role) -> Result<Arc<PsnSet>> {
    if let Some(set) = memo.get() {
        return Ok(set);
    }
    if !topo.global.is_rigid() {
        return Err(TopologyError::Config(format!(
            "{key} is not set and the layout is not rigid"
        )));
    }
    memo.get_or_try_init(|| topo.scan_role(role))
}

type McGroup = Arc<Vec<Psn>>;

/// The owning node's configuration.
pub struct LocalConfig {
    entry: PhonebookEntry,
    secret_key: NodeSecretKey,
    vrf_secret_key: Option<Zeroizing<Vec<u8>>>,
    other_servers: Option<PsnSet>,
    role: LocalRole,
    mc_groups: RwLock<BTreeMap<NodeCount, McGroup>>,
    rx_nodes: Memo<PsnSet>,
    tx_nodes: Memo<PsnSet>,
    ticket: Memo<EvalResult>,
}

impl LocalConfig {
    /// A fresh local config. Servers start with no `other_servers`.
    pub fn new(entry: PhonebookEntry, secret_key: NodeSecretKey) -> Self {
        let role = entry.role();
        Self {
            role: LocalRole::empty(role),
            other_servers: role.is_server().then(PsnSet::new),
            entry,
            secret_key,
            vrf_secret_key: None,
            mc_groups: RwLock::new(BTreeMap::new()),
            rx_nodes: Memo::new(),
            tx_nodes: Memo::new(),
            ticket: Memo::new(),
        }
    }

    pub fn with_vrf_secret_key(mut self, global: &GlobalConfig, vrf_secret_key: Vec<u8>) -> Result<Self> {
        if vrf_secret_key.len() != global.vrf().sk_size() {
            return Err(TopologyError::parse("vrf_sk", "Invalid VRF SK size"));
        }
        self.vrf_secret_key = Some(Zeroizing::new(vrf_secret_key));
        self.ticket.clear();
        Ok(self)
    }

    /// Parse `local.json`. Every PSN it names must already be in
    /// `phonebook`.
    pub fn from_json(value: Value, global: &GlobalConfig, phonebook: &Phonebook) -> Result<Self> {
        let mut f = Fields::new(value)?;
        let mut entry = PhonebookEntry::parse_fields(&mut f, global, true)?;
        let ticket = entry.take_ticket();
        let role = entry.role();

        let Hex(sk) = f.required("sk")?;
        let sk = Zeroizing::new(sk);
        let secret_key = NodeSecretKey::from_slice(&sk).map_err(|e| TopologyError::parse("sk", e))?;

        let mut local = Self::new(entry, secret_key);
        if let Some(Hex(vrf_sk)) = f.optional::<Hex>("vrf_sk")? {
            local = local.with_vrf_secret_key(global, vrf_sk)?;
        }
        if let Some(ticket) = ticket {
            local.ticket.set(ticket);
        }

        if role.is_server() {
            let other = f
                .known_set("other_servers", phonebook)?
                .ok_or_else(|| TopologyError::parse("other_servers", "missing required key"))?;
            local.other_servers = Some(other);
        }
        local.role = LocalRole::parse(&mut f, role, phonebook, global.is_rigid())?;

        if let Some(groups) = f.optional::<BTreeMap<NodeCount, Vec<Psn>>>("mc_groups")? {
            for (group, members) in &groups {
                for psn in members {
                    phonebook
                        .require(psn)
                        .map_err(|e| e.within(&format!("mc_groups: {group}")))?;
                }
            }
            *local.mc_groups.get_mut() = groups
                .into_iter()
                .filter(|(_, members)| !members.is_empty())
                .map(|(group, members)| (group, Arc::new(members)))
                .collect();
        }
        if let Some(set) = f.known_set("rx_nodes", phonebook)? {
            local.rx_nodes.set(set);
        }
        if let Some(set) = f.known_set("tx_nodes", phonebook)? {
            local.tx_nodes.set(set);
        }

        f.finish()?;
        Ok(local)
    }

    pub fn to_json(&self) -> Value {
        let Value::Object(mut obj) = self.entry.to_json() else {
            return Value::Null;
        };
        obj.insert("sk".into(), hex_value(&self.secret_key.to_bytes()));
        if let Some(vrf_sk) = &self.vrf_secret_key {
            obj.insert("vrf_sk".into(), hex_value(vrf_sk));
        }
        if let (Some(_), Some(ticket)) = (self.entry.vrf_public_key(), self.ticket.get()) {
            obj.insert("ticket".into(), ticket_value(&ticket));
        }
        if let Some(other) = &self.other_servers {
            obj.insert("other_servers".into(), psns_value(other.iter()));
        }
        self.role.write_json(&mut obj);
        let groups = self.mc_groups.read();
        if !groups.is_empty() {
            let groups: Map<String, Value> = groups
                .iter()
                .map(|(group, members)| (group.to_string(), psns_value(members.iter())))
                .collect();
            obj.insert("mc_groups".into(), Value::Object(groups));
        }
        if let Some(set) = self.rx_nodes.get() {
            obj.insert("rx_nodes".into(), psns_value(set.iter()));
        }
        if let Some(set) = self.tx_nodes.get() {
            obj.insert("tx_nodes".into(), psns_value(set.iter()));
        }
        Value::Object(obj)
    }

    pub fn psn(&self) -> &Psn {
        self.entry.psn()
    }

    pub fn role(&self) -> Role {
        self.entry.role()
    }

    pub fn role_state(&self) -> &LocalRole {
        &self.role
    }

    /// This node's public entry, without its ticket.
    pub fn entry(&self) -> &PhonebookEntry {
        &self.entry
    }

    pub fn public_key(&self) -> &NodePublicKey {
        self.entry.public_key()
    }

    fn wrong_role(&self, field: &'static str) -> TopologyError {
        TopologyError::WrongRole {
            psn: self.psn().clone(),
            role: self.role(),
            field,
        }
    }

    /// The entry this node publishes: its public fields plus this epoch's
    /// ticket when it has a VRF key.
    pub fn public_entry(&self, global: &GlobalConfig) -> Result<PhonebookEntry> {
        let entry = self.entry.clone();
        match (self.entry.vrf_public_key(), self.vrf_secret_key.is_some()) {
            (Some(vrf_pk), true) => {
                let ticket = (*self.ticket(global)?).clone();
                entry.with_vrf(global, vrf_pk.to_vec(), Some(ticket))
            }
            _ => Ok(entry),
        }
    }

    // Explicit peers

    pub fn other_servers(&self) -> Result<&PsnSet> {
        self.other_servers.as_ref().ok_or_else(|| self.wrong_role("other_servers"))
    }

    /// Replace the explicit peer set. The neighbor sets built from it are
    /// dropped.
    pub fn set_other_servers(&mut self, other_servers: PsnSet) -> Result<()> {
        if self.other_servers.is_none() {
            return Err(self.wrong_role("other_servers"));
        }
        self.other_servers = Some(other_servers);
        self.rx_nodes.clear();
        self.tx_nodes.clear();
        Ok(())
    }

    // Buckets

    pub fn bucket(&self, topo: &Topology<'_>) -> Result<NodeCount> {
        self.entry
            .bucket_sets()
            .ok_or_else(|| self.wrong_role("bucket"))?
            .bucket(topo)
    }

    pub fn bucket_clients(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        self.entry
            .bucket_sets()
            .ok_or_else(|| self.wrong_role("bucket_clients"))?
            .bucket_clients(topo)
    }

    pub fn bucket_mb_servers(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        self.entry
            .bucket_sets()
            .ok_or_else(|| self.wrong_role("bucket_mb_servers"))?
            .bucket_mb_servers(topo)
    }

    // Multicast clusters

    pub fn mc_leaders(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        match self.entry.role_state() {
            EntryRole::MbServer(mailbox) => mailbox.mc_leaders(topo),
            _ => Err(self.wrong_role("mc_leaders")),
        }
    }

    /// The MC servers of `group`, ordered by `order`; the leader is first.
    pub fn mc_group(&self, topo: &Topology<'_>, group: NodeCount) -> Result<McGroup> {
        if let Some(members) = self.mc_groups.read().get(&group) {
            return Ok(Arc::clone(members));
        }
        let fresh = Arc::new(derive_mc_group(topo, group)?);
        let mut groups = self.mc_groups.write();
        Ok(Arc::clone(groups.entry(group).or_insert(fresh)))
    }

    /// The MC group `server` belongs to.
    pub fn mc_group_of(&self, topo: &Topology<'_>, server: &PhonebookEntry) -> Result<McGroup> {
        match server.mc_position() {
            Some(McPosition { group, .. }) => self.mc_group(topo, group),
            None => Err(TopologyError::Config(format!(
                "Node \"{}\" was expected to have role {} or {} but has role {} instead",
                server.psn(),
                Role::McLeader,
                Role::McFollower,
                server.role()
            ))),
        }
    }

    /// The leader of this follower's group.
    pub fn mc_leader(&self, topo: &Topology<'_>) -> Result<Psn> {
        let LocalRole::McFollower { mc_leader } = &self.role else {
            return Err(self.wrong_role("mc_leader"));
        };
        let group = self.entry.group().ok_or_else(|| self.wrong_role("group"))?;
        let leader = mc_leader.get_or_try_init(|| {
            let found = topo.scan(|entry| {
                Ok(entry.role() == Role::McLeader && entry.group() == Some(group))
            })?;
            found
                .into_iter()
                .next()
                .ok_or_else(|| TopologyError::Config(format!("MC group {group} is missing an MC leader")))
        })?;
        Ok(Psn::clone(&leader))
    }

    /// Mailbox servers an MC leader delivers to.
    pub fn mb_servers(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        match &self.role {
            LocalRole::McLeader { mb_servers, .. } => rigid_layer(topo, mb_servers, "mb_servers", Role::MbServer),
            _ => Err(self.wrong_role("mb_servers")),
        }
    }

    pub fn next_layer(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        match &self.role {
            LocalRole::McLeader { next_layer, .. } | LocalRole::RsServer { next_layer, .. } => {
                rigid_layer(topo, next_layer, "next_layer", Role::MbServer)
            }
            _ => Err(self.wrong_role("next_layer")),
        }
    }

    pub fn prev_layer(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        match &self.role {
            LocalRole::MbServer { prev_layer } | LocalRole::RsServer { prev_layer, .. } => {
                rigid_layer(topo, prev_layer, "prev_layer", Role::McLeader)
            }
            _ => Err(self.wrong_role("prev_layer")),
        }
    }

    // Neighbor sets

    /// Nodes this node receives from.
    pub fn rx_nodes(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        self.rx_nodes.get_or_try_init(|| {
            let mut rx = PsnSet::new();
            match &self.role {
                LocalRole::Client => rx.extend(self.bucket_mb_servers(topo)?.iter().cloned()),
                LocalRole::IdleServer => {}
                LocalRole::MbServer { .. } => {
                    rx.extend(self.bucket_clients(topo)?.iter().cloned());
                    rx.extend(self.prev_layer(topo)?.iter().cloned());
                }
                LocalRole::McFollower { .. } => {
                    rx.insert(self.mc_leader(topo)?);
                }
                LocalRole::McLeader { .. } => {
                    rx.extend(self.own_mc_followers(topo)?);
                    rx.extend(self.mb_servers(topo)?.iter().cloned());
                }
                LocalRole::RsServer { .. } => rx.extend(self.prev_layer(topo)?.iter().cloned()),
            }
            if let Some(other) = &self.other_servers {
                rx.extend(other.iter().cloned());
            }
            debug!(psn = %self.psn(), role = %self.role(), count = rx.len(), "rx_nodes derived");
            Ok(rx)
        })
    }

    /// Nodes this node sends to.
    pub fn tx_nodes(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        self.tx_nodes.get_or_try_init(|| {
            let mut tx = PsnSet::new();
            match &self.role {
                LocalRole::Client => tx.extend(self.bucket_mb_servers(topo)?.iter().cloned()),
                LocalRole::IdleServer => {}
                LocalRole::MbServer { .. } => {
                    tx.extend(self.mc_leaders(topo)?.iter().cloned());
                    tx.extend(self.bucket_clients(topo)?.iter().cloned());
                }
                LocalRole::McFollower { .. } => {
                    tx.insert(self.mc_leader(topo)?);
                }
                LocalRole::McLeader { .. } => {
                    tx.extend(self.own_mc_followers(topo)?);
                    tx.extend(self.next_layer(topo)?.iter().cloned());
                }
                LocalRole::RsServer { .. } => tx.extend(self.next_layer(topo)?.iter().cloned()),
            }
            if let Some(other) = &self.other_servers {
                tx.extend(other.iter().cloned());
            }
            debug!(psn = %self.psn(), role = %self.role(), count = tx.len(), "tx_nodes derived");
            Ok(tx)
        })
    }

    /// Members of this leader's group other than the leader itself.
    fn own_mc_followers(&self, topo: &Topology<'_>) -> Result<Vec<Psn>> {
        let group = self.entry.group().ok_or_else(|| self.wrong_role("group"))?;
        Ok(self.mc_group(topo, group)?.iter().skip(1).cloned().collect())
    }

    // Keys and randomness

    /// This node's ticket for the current epoch: the one `local.json`
    /// carried, else evaluated with the VRF secret key.
    pub fn ticket(&self, global: &GlobalConfig) -> Result<Arc<EvalResult>> {
        self.ticket.get_or_try_init(|| {
            let vrf_sk = self
                .vrf_secret_key
                .as_ref()
                .ok_or_else(|| TopologyError::Config(format!("node \"{}\" has no VRF secret key", self.psn())))?;
            let vrf = global.vrf();
            Ok(vrf.ticket_eval(vrf_sk, &VrfShell::ticket_input(global.epoch_nonce()))?)
        })
    }

    /// A verifiable random number below `modulus`.
    pub fn dice_roll(&self, global: &GlobalConfig, prefix: &[u8], input: &[u8], modulus: &BigUint) -> Result<BigUint> {
        let vrf_sk = self
            .vrf_secret_key
            .as_ref()
            .ok_or_else(|| TopologyError::Config(format!("node \"{}\" has no VRF secret key", self.psn())))?;
        Ok(global.vrf().dice_roll(vrf_sk, prefix, input, modulus)?)
    }

    pub fn anon_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(anon::anon_decrypt(&self.secret_key, ciphertext)?)
    }

    /// Forget every derived value. Calling it twice is the same as once.
    pub fn clear_deducible(&self, global: &GlobalConfig) {
        self.entry.clear_deducible(global);
        self.role.clear(global.is_rigid());
        self.mc_groups.write().clear();
        self.rx_nodes.clear();
        self.tx_nodes.clear();
        self.ticket.clear();
        debug!(psn = %self.psn(), "local deducible state cleared");
    }

    /// A copy for a node about to be bootstrapped from this one: same
    /// role and peers, but no identity or key material.
    pub fn bootstrap_template(&self) -> Result<Self> {
        let entry = self
            .entry
            .reissued(Psn::new("None"), NodePublicKey::from_bytes([0u8; KEY_SIZE]));
        let mut template = Self::new(entry, NodeSecretKey::from_slice(&[0u8; KEY_SIZE])?);
        template.other_servers = self.other_servers.clone();
        template.role = self.role.clone();
        template.mc_groups = RwLock::new(self.mc_groups.read().clone());
        Ok(template)
    }
}

impl std::fmt::Debug for LocalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalConfig")
            .field("entry", &self.entry)
            .field("other_servers", &self.other_servers)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

fn derive_mc_group(topo: &Topology<'_>, group: NodeCount) -> Result<Vec<Psn>> {
    let mut by_order: BTreeMap<NodeCount, Psn> = BTreeMap::new();
    for entry in topo.phonebook.entries(topo.global)? {
        let Some(position) = entry.mc_position() else {
            continue;
        };
        if position.group != group {
            continue;
        }
        if let Some(other) = by_order.insert(position.order, entry.psn().clone()) {
            return Err(TopologyError::Config(format!(
                "MC servers \"{other}\" and \"{}\" in group {group} both have order {}",
                entry.psn(),
                position.order
            )));
        }
    }
    let size = NodeCount::try_from(by_order.len()).unwrap_or(NodeCount::MAX);
    let min = topo.global.min_mc_size();
    if size < min {
        return Err(TopologyError::Config(format!(
            "MC group {group} only has {size} servers, which is fewer than the minimum of {min}"
        )));
    }
    if let Some((&max_order, psn)) = by_order.last_key_value() {
        if max_order >= size {
            return Err(TopologyError::Config(format!(
                "MC server \"{psn}\" in group {group} has order {max_order}, \
                 which is not less than the size of its group, {size}"
            )));
        }
    }
    debug!(group, size, "mc group derived");
    Ok(by_order.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use carma_crypto::x25519;
    use serde_json::json;

    fn global(rigid: bool) -> GlobalConfig {
        let mut g = GlobalConfig::new(5, 1, BigUint::from(257u32), b"nonce".to_vec()).expect("global");
        g.set_correctness_test_only(true).set_is_rigid(rigid);
        g
    }

    fn add(pb: &Phonebook, psn: &str, role: Role, position: Option<(NodeCount, NodeCount)>) {
        let group = position.map(|p| p.0);
        let order = position.filter(|_| role.is_mc_server()).map(|p| p.1);
        let entry = PhonebookEntry::new(Psn::new(psn), role, x25519::keygen().0, group, order).expect("entry");
        pb.add(entry);
    }

    fn local_json(psn: &str, role: &str) -> Value {
        let (pk, sk) = x25519::keygen();
        json!({"psn": psn, "role": role, "pk": hex::encode(pk.to_bytes()), "sk": hex::encode(sk.to_bytes())})
    }

    fn set(psns: &[&str]) -> PsnSet {
        psns.iter().map(|p| Psn::new(*p)).collect()
    }

    #[test]
    fn test_mc_group_ordering_and_errors() {
        let g = global(true);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        add(&pb, "lead", Role::McLeader, Some((0, 0)));
        add(&pb, "f2", Role::McFollower, Some((0, 2)));
        add(&pb, "f1", Role::McFollower, Some((0, 1)));
        add(&pb, "lonely", Role::McLeader, Some((1, 0)));
        add(&pb, "gap", Role::McFollower, Some((2, 3)));
        add(&pb, "gaplead", Role::McLeader, Some((2, 0)));
        let topo = Topology::new(&g, &pb);

        let mut value = local_json("f1", "mc_follower");
        value["group"] = json!("0");
        value["order"] = json!("1");
        value["other_servers"] = json!([]);
        let local = LocalConfig::from_json(value, &g, &pb).expect("local");

        let group = local.mc_group(&topo, 0).expect("group 0");
        assert_eq!(*group, vec![Psn::new("lead"), Psn::new("f1"), Psn::new("f2")]);
        assert!(Arc::ptr_eq(&group, &local.mc_group(&topo, 0).expect("cached")));
        assert_eq!(local.mc_leader(&topo).expect("leader"), Psn::new("lead"));

        let err = local.mc_group(&topo, 1).expect_err("too small");
        assert_eq!(
            err.to_string(),
            "configuration error: MC group 1 only has 1 servers, which is fewer than the minimum of 2"
        );
        let err = local.mc_group(&topo, 2).expect_err("order gap");
        assert!(err.to_string().contains("has order 3, which is not less than the size of its group, 2"));

        let idle = PhonebookEntry::new(Psn::new("idle"), Role::IdleServer, x25519::keygen().0, None, None).expect("idle");
        assert!(local.mc_group_of(&topo, &idle).is_err());
    }

    #[test]
    fn test_missing_leader() {
        let g = global(true);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        add(&pb, "f1", Role::McFollower, Some((4, 1)));
        let topo = Topology::new(&g, &pb);
        let mut value = local_json("f1", "mc_follower");
        value["group"] = json!(4);
        value["order"] = json!(1);
        value["other_servers"] = json!([]);
        let local = LocalConfig::from_json(value, &g, &pb).expect("local");
        let err = local.mc_leader(&topo).expect_err("no leader");
        assert_eq!(err.to_string(), "configuration error: MC group 4 is missing an MC leader");
    }

    #[test]
    fn test_server_requires_other_servers() {
        let g = global(true);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        let err = LocalConfig::from_json(local_json("s", "idle_server"), &g, &pb).expect_err("missing");
        assert_eq!(err.to_string(), "other_servers: missing required key");

        let mut value = local_json("s", "idle_server");
        value["other_servers"] = json!(["ghost"]);
        let err = LocalConfig::from_json(value, &g, &pb).expect_err("unknown peer");
        assert_eq!(err.to_string(), "other_servers: PSN not in phonebook: \"ghost\"");

        let mut value = local_json("c", "client");
        value["other_servers"] = json!([]);
        let err = LocalConfig::from_json(value, &g, &pb).expect_err("clients have none");
        assert_eq!(err.to_string(), "other_servers: unknown key");
    }

    #[test]
    fn test_non_rigid_layers_are_required() {
        let g = global(false);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        let mut value = local_json("r", "rs_server");
        value["group"] = json!("0");
        value["other_servers"] = json!([]);
        value["prev_layer"] = json!([]);
        let err = LocalConfig::from_json(value, &g, &pb).expect_err("next_layer");
        assert_eq!(err.to_string(), "next_layer: missing required key");
    }

    #[test]
    fn test_wrong_role_is_an_error() {
        let g = global(true);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        let topo = Topology::new(&g, &pb);
        let local = LocalConfig::from_json(local_json("c", "client"), &g, &pb).expect("client");
        let err = local.next_layer(&topo).expect_err("clients have no layers");
        assert_eq!(err.to_string(), "node \"c\" has role client, which has no next_layer");
        assert!(local.other_servers().is_err());
    }

    #[test]
    fn test_set_other_servers_invalidates_neighbors() {
        let g = global(true);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        add(&pb, "a", Role::IdleServer, None);
        add(&pb, "b", Role::IdleServer, None);
        let topo = Topology::new(&g, &pb);
        let mut value = local_json("s", "idle_server");
        value["other_servers"] = json!(["a"]);
        let mut local = LocalConfig::from_json(value, &g, &pb).expect("local");
        assert_eq!(*local.rx_nodes(&topo).expect("rx"), set(&["a"]));

        local.set_other_servers(set(&["a", "b"])).expect("server");
        assert_eq!(*local.rx_nodes(&topo).expect("rx"), set(&["a", "b"]));
        assert_eq!(*local.tx_nodes(&topo).expect("tx"), set(&["a", "b"]));
    }

    #[test]
    fn test_ticket_and_public_entry() {
        let g = global(true);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        let kp = g.vrf().keygen();
        let mut value = local_json("c", "client");
        value["vrf_pk"] = json!(hex::encode(&kp.public));
        value["vrf_sk"] = json!(hex::encode(&kp.secret));
        let local = LocalConfig::from_json(value, &g, &pb).expect("local");

        let ticket = local.ticket(&g).expect("ticket");
        assert!(ticket.is_verified());
        let published = local.public_entry(&g).expect("entry");
        let reparsed = PhonebookEntry::from_json(published.to_json(), &g).expect("reparse");
        assert_eq!(reparsed.ticket(&g).expect("verifies"), Some(&*ticket));

        local.clear_deducible(&g);
        local.clear_deducible(&g);
        assert!(!Arc::ptr_eq(&ticket, &local.ticket(&g).expect("fresh ticket")));

        let modulus = BigUint::from(10u32);
        let roll = local.dice_roll(&g, b"p", b"i", &modulus).expect("roll");
        assert!(roll < modulus);
        assert_eq!(roll, local.dice_roll(&g, b"p", b"i", &modulus).expect("roll"));
    }

    #[test]
    fn test_local_ticket_kept_across_reload() {
        let g = global(true);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        let kp = g.vrf().keygen();
        let mut value = local_json("c", "client");
        value["vrf_pk"] = json!(hex::encode(&kp.public));
        value["vrf_sk"] = json!(hex::encode(&kp.secret));
        let local = LocalConfig::from_json(value, &g, &pb).expect("local");
        let ticket = local.ticket(&g).expect("ticket");

        let mut saved = local.to_json();
        assert!(saved.get("ticket").is_some());
        saved.as_object_mut().expect("object").remove("vrf_sk");
        let reloaded = LocalConfig::from_json(saved, &g, &pb).expect("reload");
        assert_eq!(*reloaded.ticket(&g).expect("stored ticket"), *ticket);

        reloaded.clear_deducible(&g);
        assert!(reloaded.ticket(&g).is_err(), "no secret key to evaluate a new one");
        assert!(reloaded.to_json().get("ticket").is_none());
    }

    #[test]
    fn test_anon_roundtrip_through_entry() {
        let g = global(true);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        let local = LocalConfig::from_json(local_json("c", "client"), &g, &pb).expect("local");
        let ciphertext = local.entry().anon_encrypt(b"secret").expect("encrypt");
        assert_eq!(local.anon_decrypt(&ciphertext).expect("decrypt"), b"secret");
    }

    #[test]
    fn test_json_roundtrip_keeps_raw_fields() {
        let g = global(false);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        add(&pb, "m", Role::MbServer, None);
        add(&pb, "x", Role::IdleServer, None);
        let mut value = local_json("l", "mc_leader");
        value["group"] = json!("0");
        value["order"] = json!("0");
        value["other_servers"] = json!(["x"]);
        value["mb_servers"] = json!(["m"]);
        value["next_layer"] = json!(["m"]);
        let local = LocalConfig::from_json(value, &g, &pb).expect("local");
        local.clear_deducible(&g);
        let again = LocalConfig::from_json(local.to_json(), &g, &pb).expect("reparse");
        assert_eq!(again.to_json(), local.to_json());
        let topo = Topology::new(&g, &pb);
        assert_eq!(*again.next_layer(&topo).expect("kept"), set(&["m"]));
    }

    #[test]
    fn test_bootstrap_template_drops_identity() {
        let g = global(true);
        let pb = Phonebook::new(Arc::new(MemoryStore::new()), "phonebook");
        let mut value = local_json("r", "rs_server");
        value["group"] = json!("1");
        value["other_servers"] = json!([]);
        let local = LocalConfig::from_json(value, &g, &pb).expect("local");
        let template = local.bootstrap_template().expect("template");
        assert_eq!(template.psn(), &Psn::new("None"));
        assert_eq!(template.role(), Role::RsServer);
        assert_eq!(template.entry().group(), Some(1));
        let json = template.to_json();
        assert_eq!(json["pk"], json!("00".repeat(KEY_SIZE)));
        assert_eq!(json["sk"], json!("00".repeat(KEY_SIZE)));
    }
}
