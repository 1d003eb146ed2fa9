//! Phonebook entries.
//!
//! An entry is the public record of one node. Which fields it carries
//! depends on the node's role, so the role-specific state lives in the
//! variants of [`EntryRole`]; code that needs a bucket or an MC position
//! has to match on the role to get at it.
//!
//! Derived fields (bucket, bucket peer sets, rigid `mc_leaders`) start
//! unset, are computed on first use from a [`Topology`], and are dropped
//! by [`PhonebookEntry::clear_deducible`].

use std::sync::Arc;

use carma_crypto::anon;
use carma_crypto::bucket::bucket_index;
use carma_crypto::vrf::{EvalResult, VrfShell};
use carma_crypto::x25519::NodePublicKey;
use carma_types::{NodeCount, Psn, PsnSet, Role};
use serde_json::{Map, Value};
use tracing::debug;

use crate::global::GlobalConfig;
use crate::json::{hex_value, int_value, psns_value, Fields, Hex, Num};
use crate::memo::{BucketCell, Memo};
use crate::{Result, Topology, TopologyError};

/// Bucket membership of a client or mailbox server.
#[derive(Clone, Debug)]
pub struct BucketSets {
    psn: Psn,
    bucket: BucketCell,
    clients: Memo<PsnSet>,
    mb_servers: Memo<PsnSet>,
}

impl BucketSets {
    pub fn new(psn: Psn) -> Self {
        Self {
            psn,
            bucket: BucketCell::new(),
            clients: Memo::new(),
            mb_servers: Memo::new(),
        }
    }

    /// `SHA-512(epoch_nonce || psn) mod num_buckets`.
    pub fn bucket(&self, topo: &Topology<'_>) -> Result<NodeCount> {
        self.bucket.get_or_try_init(|| {
            let num_buckets = topo.global.num_buckets()?;
            let bucket = bucket_index(topo.global.epoch_nonce(), self.psn.as_bytes(), num_buckets)?;
            debug!(psn = %self.psn, bucket, "bucket derived");
            Ok(bucket)
        })
    }

    /// Every client in this bucket.
    pub fn bucket_clients(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        self.clients.get_or_try_init(|| self.same_bucket(topo, Role::Client))
    }

    /// Every mailbox server in this bucket.
    pub fn bucket_mb_servers(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        self.mb_servers.get_or_try_init(|| self.same_bucket(topo, Role::MbServer))
    }

    fn same_bucket(&self, topo: &Topology<'_>, role: Role) -> Result<PsnSet> {
        let mine = self.bucket(topo)?;
        topo.scan(|entry| {
            if entry.role() != role {
                return Ok(false);
            }
            match entry.bucket_sets() {
                Some(sets) => Ok(sets.bucket(topo)? == mine),
                None => Ok(false),
            }
        })
    }

    /// Drop the peer sets but keep the bucket itself.
    pub fn invalidate_peers(&self) {
        self.clients.clear();
        self.mb_servers.clear();
    }

    pub fn clear(&self) {
        self.bucket.clear();
        self.invalidate_peers();
    }

    fn parse_cached(&self, f: &mut Fields) -> Result<()> {
        if let Some(Num(bucket)) = f.optional::<Num<NodeCount>>("bucket")? {
            self.bucket.set(bucket);
        }
        if let Some(set) = f.optional::<PsnSet>("bucket_clients")? {
            self.clients.set(set);
        }
        if let Some(set) = f.optional::<PsnSet>("bucket_mb_servers")? {
            self.mb_servers.set(set);
        }
        Ok(())
    }

    fn write_cached(&self, obj: &mut Map<String, Value>) {
        if let Some(bucket) = self.bucket.get() {
            obj.insert("bucket".into(), int_value(bucket));
        }
        if let Some(set) = self.clients.get() {
            obj.insert("bucket_clients".into(), psns_value(set.iter()));
        }
        if let Some(set) = self.mb_servers.get() {
            obj.insert("bucket_mb_servers".into(), psns_value(set.iter()));
        }
    }
}

/// Mailbox-server state.
#[derive(Clone, Debug)]
pub struct MailboxRole {
    pub sets: BucketSets,
    mc_leaders: Memo<PsnSet>,
}

impl MailboxRole {
    pub fn new(psn: Psn) -> Self {
        Self {
            sets: BucketSets::new(psn),
            mc_leaders: Memo::new(),
        }
    }

    /// The MC leaders this mailbox server feeds from.
    ///
    /// Rigid layouts derive it as every `mc_leader` in the phonebook.
    /// Non-rigid layouts must publish it explicitly.
    pub fn mc_leaders(&self, topo: &Topology<'_>) -> Result<Arc<PsnSet>> {
        if let Some(leaders) = self.mc_leaders.get() {
            return Ok(leaders);
        }
        if !topo.global.is_rigid() {
            return Err(TopologyError::Config(format!(
                "mb_server \"{}\" has no mc_leaders and the layout is not rigid",
                self.sets.psn
            )));
        }
        self.mc_leaders.get_or_try_init(|| topo.scan_role(Role::McLeader))
    }

    pub fn set_mc_leaders(&self, leaders: PsnSet) {
        self.mc_leaders.set(leaders);
    }

    pub(crate) fn clear(&self, global: &GlobalConfig) {
        self.sets.clear();
        if global.is_rigid() {
            self.mc_leaders.clear();
        }
    }
}

/// Place of a multicast-cluster server within its group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct McPosition {
    pub group: NodeCount,
    pub order: NodeCount,
}

/// Role-specific public state.
#[derive(Clone, Debug)]
pub enum EntryRole {
    Client(BucketSets),
    IdleServer,
    MbServer(MailboxRole),
    McFollower(McPosition),
    McLeader(McPosition),
    RsServer { group: NodeCount },
}

impl EntryRole {
    /// Build the state for `role`, checking that exactly the role's
    /// positional fields are supplied.
    pub fn new(psn: &Psn, role: Role, group: Option<NodeCount>, order: Option<NodeCount>) -> Result<Self> {
        let needs_group = role.is_mc_server() || role == Role::RsServer;
        let needs_order = role.is_mc_server();
        if group.is_some() != needs_group {
            return Err(TopologyError::parse("group", format!("not valid for role {role}")));
        }
        if order.is_some() != needs_order {
            return Err(TopologyError::parse("order", format!("not valid for role {role}")));
        }
        let position = |group: Option<NodeCount>, order: Option<NodeCount>| McPosition {
            group: group.unwrap_or_default(),
            order: order.unwrap_or_default(),
        };
        Ok(match role {
            Role::Client => EntryRole::Client(BucketSets::new(psn.clone())),
            Role::IdleServer => EntryRole::IdleServer,
            Role::MbServer => EntryRole::MbServer(MailboxRole::new(psn.clone())),
            Role::McFollower => {
                if order == Some(0) {
                    return Err(TopologyError::parse("order", "an MC follower cannot have order 0"));
                }
                EntryRole::McFollower(position(group, order))
            }
            Role::McLeader => {
                if order != Some(0) {
                    return Err(TopologyError::parse("order", "an MC leader must have order 0"));
                }
                EntryRole::McLeader(position(group, order))
            }
            Role::RsServer => EntryRole::RsServer {
                group: group.unwrap_or_default(),
            },
        })
    }

    pub fn role(&self) -> Role {
        match self {
            EntryRole::Client(_) => Role::Client,
            EntryRole::IdleServer => Role::IdleServer,
            EntryRole::MbServer(_) => Role::MbServer,
            EntryRole::McFollower(_) => Role::McFollower,
            EntryRole::McLeader(_) => Role::McLeader,
            EntryRole::RsServer { .. } => Role::RsServer,
        }
    }
}

/// The public record of one node.
#[derive(Clone, Debug)]
pub struct PhonebookEntry {
    psn: Psn,
    public_key: NodePublicKey,
    vrf_public_key: Option<Vec<u8>>,
    ticket: Option<EvalResult>,
    role: EntryRole,
}

impl PhonebookEntry {
    pub fn new(
        psn: Psn,
        role: Role,
        public_key: NodePublicKey,
        group: Option<NodeCount>,
        order: Option<NodeCount>,
    ) -> Result<Self> {
        let role = EntryRole::new(&psn, role, group, order)?;
        Ok(Self {
            psn,
            public_key,
            vrf_public_key: None,
            ticket: None,
            role,
        })
    }

    /// Attach a VRF public key and, optionally, this epoch's ticket.
    ///
    /// A ticket is checked here; a forged or stale one is an error, never
    /// silently dropped.
    pub fn with_vrf(mut self, global: &GlobalConfig, vrf_public_key: Vec<u8>, ticket: Option<EvalResult>) -> Result<Self> {
        let vrf = global.vrf();
        if vrf_public_key.len() != vrf.pk_size() {
            return Err(TopologyError::parse("vrf_pk", "Invalid VRF PK size"));
        }
        if let Some(ticket) = &ticket {
            if ticket.proof().len() != vrf.proof_size() || ticket.output().len() != vrf.output_size() {
                return Err(TopologyError::parse("ticket", "invalid VRF ticket size"));
            }
            let input = VrfShell::ticket_input(global.epoch_nonce());
            if !ticket.verify(vrf, &vrf_public_key, &input) {
                return Err(TopologyError::parse("ticket", "invalid VRF ticket"));
            }
        }
        self.vrf_public_key = Some(vrf_public_key);
        self.ticket = ticket;
        Ok(self)
    }

    pub fn from_json(value: Value, global: &GlobalConfig) -> Result<Self> {
        let mut f = Fields::new(value)?;
        let entry = Self::parse_fields(&mut f, global, false)?;
        f.finish()?;
        Ok(entry)
    }

    /// Parse the fields every record shares. The local config continues
    /// with its own keys on the same object.
    ///
    /// A published entry with a VRF key must carry this epoch's ticket.
    /// The local config may omit it, since it can evaluate its own.
    pub(crate) fn parse_fields(f: &mut Fields, global: &GlobalConfig, local: bool) -> Result<Self> {
        let psn: Psn = f.required("psn")?;
        let role: Role = f.required("role")?;
        let Hex(pk) = f.required("pk")?;
        let public_key = NodePublicKey::from_slice(&pk).map_err(|e| TopologyError::parse("pk", e))?;
        let group = if role.is_mc_server() || role == Role::RsServer {
            let Num(group) = f.required::<Num<NodeCount>>("group")?;
            Some(group)
        } else {
            None
        };
        let order = if role.is_mc_server() {
            let Num(order) = f.required::<Num<NodeCount>>("order")?;
            Some(order)
        } else {
            None
        };
        let mut entry = Self::new(psn, role, public_key, group, order)?;

        if let Some(Hex(vrf_pk)) = f.optional::<Hex>("vrf_pk")? {
            if vrf_pk.len() != global.vrf().pk_size() {
                return Err(TopologyError::parse("vrf_pk", "Invalid VRF PK size"));
            }
            let ticket = match f.take_raw("ticket") {
                Some(v) => Some(parse_ticket(v).map_err(|e| e.within("ticket"))?),
                None if local => None,
                None => return Err(TopologyError::parse("ticket", "missing required key")),
            };
            entry = entry.with_vrf(global, vrf_pk, ticket)?;
        }

        match &entry.role {
            EntryRole::Client(sets) => sets.parse_cached(f)?,
            EntryRole::MbServer(mailbox) => {
                mailbox.sets.parse_cached(f)?;
                match f.optional::<PsnSet>("mc_leaders")? {
                    Some(leaders) => mailbox.set_mc_leaders(leaders),
                    None if local && !global.is_rigid() => {
                        return Err(TopologyError::parse("mc_leaders", "missing required key"));
                    }
                    None => {}
                }
            }
            _ => {}
        }
        Ok(entry)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("psn".into(), Value::String(self.psn.to_slug()));
        obj.insert("role".into(), Value::String(self.role().as_str().into()));
        obj.insert("pk".into(), hex_value(self.public_key.as_bytes()));
        if let Some(vrf_pk) = &self.vrf_public_key {
            obj.insert("vrf_pk".into(), hex_value(vrf_pk));
        }
        if let Some(ticket) = &self.ticket {
            obj.insert("ticket".into(), ticket_value(ticket));
        }
        self.write_role_json(&mut obj);
        Value::Object(obj)
    }

    pub(crate) fn write_role_json(&self, obj: &mut Map<String, Value>) {
        match &self.role {
            EntryRole::Client(sets) => sets.write_cached(obj),
            EntryRole::IdleServer => {}
            EntryRole::MbServer(mailbox) => {
                mailbox.sets.write_cached(obj);
                if let Some(leaders) = mailbox.mc_leaders.get() {
                    obj.insert("mc_leaders".into(), psns_value(leaders.iter()));
                }
            }
            EntryRole::McFollower(p) | EntryRole::McLeader(p) => {
                obj.insert("group".into(), int_value(p.group));
                obj.insert("order".into(), int_value(p.order));
            }
            EntryRole::RsServer { group } => {
                obj.insert("group".into(), int_value(*group));
            }
        }
    }

    pub fn psn(&self) -> &Psn {
        &self.psn
    }

    pub fn role(&self) -> Role {
        self.role.role()
    }

    pub fn role_state(&self) -> &EntryRole {
        &self.role
    }

    pub fn public_key(&self) -> &NodePublicKey {
        &self.public_key
    }

    pub fn vrf_public_key(&self) -> Option<&[u8]> {
        self.vrf_public_key.as_deref()
    }

    /// Bucket state, for the two roles that have one.
    pub fn bucket_sets(&self) -> Option<&BucketSets> {
        match &self.role {
            EntryRole::Client(sets) => Some(sets),
            EntryRole::MbServer(mailbox) => Some(&mailbox.sets),
            _ => None,
        }
    }

    pub fn mc_position(&self) -> Option<McPosition> {
        match &self.role {
            EntryRole::McFollower(p) | EntryRole::McLeader(p) => Some(*p),
            _ => None,
        }
    }

    /// Group of an MC or RS server.
    pub fn group(&self) -> Option<NodeCount> {
        match &self.role {
            EntryRole::McFollower(p) | EntryRole::McLeader(p) => Some(p.group),
            EntryRole::RsServer { group } => Some(*group),
            _ => None,
        }
    }

    /// Move the parsed ticket out, for the local config to own.
    pub(crate) fn take_ticket(&mut self) -> Option<EvalResult> {
        self.ticket.take()
    }

    /// A copy under another identity, with no VRF material and none of
    /// the state derived from the old PSN.
    pub(crate) fn reissued(&self, psn: Psn, public_key: NodePublicKey) -> Self {
        let role = match &self.role {
            EntryRole::Client(_) => EntryRole::Client(BucketSets::new(psn.clone())),
            EntryRole::MbServer(mailbox) => EntryRole::MbServer(MailboxRole {
                sets: BucketSets::new(psn.clone()),
                mc_leaders: mailbox.mc_leaders.clone(),
            }),
            other => other.clone(),
        };
        Self {
            psn,
            public_key,
            vrf_public_key: None,
            ticket: None,
            role,
        }
    }

    /// This epoch's ticket, verified against the current epoch nonce.
    ///
    /// The check runs at most once until the next `clear_deducible`.
    pub fn ticket(&self, global: &GlobalConfig) -> Result<Option<&EvalResult>> {
        let (Some(ticket), Some(vrf_pk)) = (&self.ticket, &self.vrf_public_key) else {
            return Ok(None);
        };
        let input = VrfShell::ticket_input(global.epoch_nonce());
        if ticket.verify(global.vrf(), vrf_pk, &input) {
            Ok(Some(ticket))
        } else {
            Err(TopologyError::parse(
                format!("{}: ticket", self.psn),
                "ticket does not verify for the current epoch",
            ))
        }
    }

    /// Encrypt `plaintext` to this node without identifying the sender.
    pub fn anon_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(anon::anon_encrypt(&self.public_key, plaintext)?)
    }

    /// Forget every derived field and the ticket's verification state.
    pub fn clear_deducible(&self, global: &GlobalConfig) {
        if let Some(ticket) = &self.ticket {
            ticket.set_verified(false);
        }
        match &self.role {
            EntryRole::Client(sets) => sets.clear(),
            EntryRole::MbServer(mailbox) => mailbox.clear(global),
            EntryRole::IdleServer | EntryRole::McFollower(_) | EntryRole::McLeader(_) | EntryRole::RsServer { .. } => {}
        }
    }
}

pub(crate) fn ticket_value(ticket: &EvalResult) -> Value {
    let mut t = Map::new();
    t.insert("output".into(), hex_value(ticket.output()));
    t.insert("proof".into(), hex_value(ticket.proof()));
    Value::Object(t)
}

fn parse_ticket(value: Value) -> Result<EvalResult> {
    let mut f = Fields::new(value)?;
    let Hex(proof) = f.required("proof")?;
    let Hex(output) = f.required("output")?;
    // Older snapshots record whether the writer had verified the ticket.
    // A received ticket is always re-verified, so the flag is ignored.
    let _ = f.optional::<bool>("verified")?;
    f.finish()?;
    Ok(EvalResult::unverified(proof, output))
}
