//! Network-wide parameters.
//!
//! Parsed once per epoch from `global.json`. The setters exist for config
//! generation; a running node never mutates its copy except to move to a
//! new epoch nonce.

use carma_crypto::vrf::VrfShell;
use carma_types::NodeCount;
use num_bigint::BigUint;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::json::{hex_value, int_value, Fields, Hex, Num};
use crate::rangegen::{Row, Shape};
use crate::{Result, TopologyError};

/// The minimum possible number of servers in a deployment.
pub const MIN_SERVERS: NodeCount = 3;

/// The minimum possible number of MC servers in an MC group.
pub const MIN_MC_SIZE: NodeCount = 2;

/// Global parameters shared by every node of a deployment.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalConfig {
    correctness_test_only: bool,
    corruption_rate: f64,
    epoch_nonce: Vec<u8>,
    is_rigid: bool,
    num_clients: u64,
    num_servers: NodeCount,
    prime: BigUint,
    privacy_failure_rate: f64,
    robustness_failure_rate: f64,
    shamir_threshold: NodeCount,
    vrf: VrfShell,
}

impl GlobalConfig {
    /// Parameters with every rate left at its default.
    pub fn new(num_servers: NodeCount, shamir_threshold: NodeCount, prime: BigUint, epoch_nonce: Vec<u8>) -> Result<Self> {
        let mut config = Self {
            correctness_test_only: false,
            corruption_rate: -1.0,
            epoch_nonce,
            is_rigid: false,
            num_clients: 0,
            num_servers: MIN_SERVERS,
            prime,
            privacy_failure_rate: -1.0,
            robustness_failure_rate: -1.0,
            shamir_threshold: 1,
            vrf: VrfShell::default(),
        };
        config.set_num_servers(num_servers)?;
        config.set_shamir_threshold(shamir_threshold)?;
        Ok(config)
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let mut f = Fields::new(value)?;
        let correctness_test_only = f.or("correctness_test_only", false)?;
        let Num(corruption_rate) = f.or("corruption_rate", Num(-1.0))?;
        let Hex(epoch_nonce) = f.required("epoch_nonce")?;
        let is_rigid = f.or("is_rigid", false)?;
        let Num(num_clients) = f.or("num_clients", Num(0u64))?;
        let Num(num_servers) = f.required::<Num<NodeCount>>("num_servers")?;
        let Num(prime) = f.required::<Num<BigUint>>("prime")?;
        let Num(privacy_failure_rate) = f.or("privacy_failure_rate", Num(-1.0))?;
        let Num(robustness_failure_rate) = f.or("robustness_failure_rate", Num(-1.0))?;
        let Num(shamir_threshold) = f.required::<Num<NodeCount>>("shamir_threshold")?;
        let vrf = match f.take_raw("vrf") {
            Some(v) => parse_vrf(v).map_err(|e| e.within("vrf"))?,
            None => return Err(TopologyError::parse("vrf", "missing required key")),
        };
        f.finish()?;

        if num_servers < MIN_SERVERS {
            return Err(TopologyError::parse("num_servers", format!("invalid value: {num_servers}")));
        }
        if shamir_threshold < 1 {
            return Err(TopologyError::parse("shamir_threshold", "invalid value: 0"));
        }
        Ok(Self {
            correctness_test_only,
            corruption_rate,
            epoch_nonce,
            is_rigid,
            num_clients,
            num_servers,
            prime,
            privacy_failure_rate,
            robustness_failure_rate,
            shamir_threshold,
            vrf,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "correctness_test_only": self.correctness_test_only,
            "corruption_rate": self.corruption_rate,
            "epoch_nonce": hex_value(&self.epoch_nonce),
            "is_rigid": self.is_rigid,
            "num_clients": int_value(self.num_clients),
            "num_servers": int_value(self.num_servers),
            "prime": int_value(&self.prime),
            "privacy_failure_rate": self.privacy_failure_rate,
            "robustness_failure_rate": self.robustness_failure_rate,
            "shamir_threshold": int_value(self.shamir_threshold),
            "vrf": {"name": self.vrf.name(), "params": Value::Object(Map::new())},
        })
    }

    /// Check that the parameters fit together.
    pub fn validate(&self) -> Result<()> {
        if self.num_servers < self.shamir_threshold.saturating_add(2) {
            return Err(TopologyError::Config(
                "num_servers must be at least shamir_threshold + 2".into(),
            ));
        }
        if !self.correctness_test_only && !self.default_rate() && !self.exotic_rate() {
            return Err(TopologyError::Config(
                "default_rate or exotic_rate must be true when correctness_test_only = false".into(),
            ));
        }
        Ok(())
    }

    pub fn correctness_test_only(&self) -> bool {
        self.correctness_test_only
    }

    pub fn corruption_rate(&self) -> f64 {
        self.corruption_rate
    }

    pub fn privacy_failure_rate(&self) -> f64 {
        self.privacy_failure_rate
    }

    pub fn robustness_failure_rate(&self) -> f64 {
        self.robustness_failure_rate
    }

    /// No rate is overridden (a negative rate means "use the default").
    pub fn default_rate(&self) -> bool {
        !self.correctness_test_only
            && self.corruption_rate < 0.0
            && self.robustness_failure_rate < 0.0
            && self.privacy_failure_rate < 0.0
    }

    /// Every rate is overridden explicitly.
    pub fn exotic_rate(&self) -> bool {
        !self.correctness_test_only
            && self.corruption_rate >= 0.0
            && self.robustness_failure_rate >= 0.0
            && self.privacy_failure_rate >= 0.0
    }

    pub fn epoch_nonce(&self) -> &[u8] {
        &self.epoch_nonce
    }

    pub fn is_rigid(&self) -> bool {
        self.is_rigid
    }

    pub fn num_clients(&self) -> u64 {
        self.num_clients
    }

    pub fn num_servers(&self) -> NodeCount {
        self.num_servers
    }

    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    /// Number of bytes that always fit under the prime.
    pub fn prime_space(&self) -> u64 {
        self.prime.bits().saturating_sub(1) / 8
    }

    pub fn shamir_threshold(&self) -> NodeCount {
        self.shamir_threshold
    }

    pub fn vrf(&self) -> VrfShell {
        self.vrf
    }

    pub fn min_servers(&self) -> NodeCount {
        MIN_SERVERS
    }

    pub fn min_mc_size(&self) -> NodeCount {
        MIN_MC_SIZE
    }

    /// The topology-shape row for these parameters.
    pub fn rangegen_row(&self) -> Result<&'static Row> {
        if !self.correctness_test_only && !self.default_rate() {
            return Err(TopologyError::Config("Exotic rates are not supported yet".into()));
        }
        Shape::new(self.is_rigid, self.correctness_test_only)
            .row(self.num_servers)
            .ok_or_else(|| {
                TopologyError::Config(format!(
                    "Missing rangegen_row for is_rigid = {}, correctness_test_only = {}, and num_servers = {}",
                    self.is_rigid, self.correctness_test_only, self.num_servers
                ))
            })
    }

    /// Connection cap for non-rigid layouts.
    ///
    /// Rigid layouts have no such cap; calling this on one is a bug.
    pub fn max_connections(&self) -> Result<u64> {
        assert!(!self.is_rigid, "max_connections should never be used when is_rigid = true");
        Ok(3 * u64::from(self.rangegen_row()?.down_degree))
    }

    pub fn down_degree(&self) -> Result<u32> {
        Ok(self.rangegen_row()?.down_degree)
    }

    pub fn mc_size(&self) -> Result<NodeCount> {
        Ok(self.rangegen_row()?.mc_size)
    }

    pub fn min_good_mc_size(&self) -> Result<NodeCount> {
        Ok(self.rangegen_row()?.min_good_mc_size)
    }

    pub fn min_good_rs_layer_size(&self) -> Result<NodeCount> {
        Ok(self.rangegen_row()?.min_good_rs_layer_size)
    }

    pub fn num_buckets(&self) -> Result<NodeCount> {
        Ok(self.rangegen_row()?.num_buckets)
    }

    pub fn num_idle(&self) -> Result<NodeCount> {
        Ok(self.rangegen_row()?.num_idle)
    }

    pub fn num_mbs(&self) -> Result<NodeCount> {
        Ok(self.rangegen_row()?.num_mbs)
    }

    pub fn num_mcs(&self) -> Result<NodeCount> {
        Ok(self.rangegen_row()?.num_mcs)
    }

    pub fn mbs_per_client(&self) -> Result<NodeCount> {
        Ok(self.rangegen_row()?.mbs_per_client)
    }

    pub fn num_parallel_messages(&self) -> Result<u32> {
        Ok(self.rangegen_row()?.num_parallel_messages)
    }

    pub fn num_parallel_msgs_for_registration(&self) -> Result<u32> {
        self.num_parallel_messages()
    }

    pub fn num_parallel_msgs_for_routing(&self) -> Result<u32> {
        Ok(self.rangegen_row()?.num_parallel_msgs_for_routing)
    }

    pub fn num_per_rs_layer(&self) -> Result<NodeCount> {
        Ok(self.rangegen_row()?.num_per_rs_layer)
    }

    pub fn num_routing_layers(&self) -> Result<u32> {
        Ok(self.rangegen_row()?.num_routing_layers)
    }

    // Setters, for config generation.

    pub fn set_num_servers(&mut self, num_servers: NodeCount) -> Result<&mut Self> {
        if num_servers < MIN_SERVERS {
            return Err(TopologyError::Config(format!("Invalid num_servers: {num_servers}")));
        }
        self.num_servers = num_servers;
        Ok(self)
    }

    pub fn set_shamir_threshold(&mut self, shamir_threshold: NodeCount) -> Result<&mut Self> {
        if shamir_threshold < 1 {
            return Err(TopologyError::Config(format!("Invalid shamir_threshold: {shamir_threshold}")));
        }
        self.shamir_threshold = shamir_threshold;
        Ok(self)
    }

    pub fn set_epoch_nonce(&mut self, epoch_nonce: Vec<u8>) -> &mut Self {
        debug!(nonce = %hex::encode(&epoch_nonce), "epoch nonce updated");
        self.epoch_nonce = epoch_nonce;
        self
    }

    pub fn set_correctness_test_only(&mut self, value: bool) -> &mut Self {
        self.correctness_test_only = value;
        self
    }

    pub fn set_is_rigid(&mut self, value: bool) -> &mut Self {
        self.is_rigid = value;
        self
    }

    pub fn set_num_clients(&mut self, value: u64) -> &mut Self {
        self.num_clients = value;
        self
    }

    pub fn set_rates(&mut self, corruption: f64, robustness_failure: f64, privacy_failure: f64) -> &mut Self {
        self.corruption_rate = corruption;
        self.robustness_failure_rate = robustness_failure;
        self.privacy_failure_rate = privacy_failure;
        self
    }

    pub fn set_vrf(&mut self, vrf: VrfShell) -> &mut Self {
        self.vrf = vrf;
        self
    }
}

fn parse_vrf(value: Value) -> Result<VrfShell> {
    let mut f = Fields::new(value)?;
    let name: String = f.required("name")?;
    let vrf = VrfShell::from_name(&name).map_err(|e| TopologyError::parse("name", e))?;
    match f.take_raw("params") {
        None | Some(Value::Null) => {}
        Some(Value::Object(params)) if params.is_empty() => {}
        Some(_) => return Err(TopologyError::parse("params", format!("{name} takes no parameters"))),
    }
    f.finish()?;
    Ok(vrf)
}
