//! Topology-shape tables.
//!
//! Four tables, one per `(is_rigid, correctness_test_only)` shape, each
//! indexed by server count. A `None` slot means the shape has no layout
//! for that many servers.
//!
//! Rigid layouts have a single multicast cluster feeding every mailbox
//! server directly. Non-rigid layouts insert relay/shuffle layers between
//! the multicast clusters and the mailbox servers and park left-over
//! servers as idle.

use carma_types::NodeCount;

/// Number of rows in every table (server counts `0..TABLE_LEN`).
pub const TABLE_LEN: usize = 129;

/// One topology shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Row {
    pub num_servers: NodeCount,
    pub down_degree: u32,
    pub mc_size: NodeCount,
    pub min_good_mc_size: NodeCount,
    pub min_good_rs_layer_size: NodeCount,
    pub num_buckets: NodeCount,
    pub num_idle: NodeCount,
    pub num_mbs: NodeCount,
    pub num_mcs: NodeCount,
    pub mbs_per_client: NodeCount,
    pub num_parallel_messages: u32,
    pub num_parallel_msgs_for_routing: u32,
    pub num_per_rs_layer: NodeCount,
    pub num_routing_layers: u32,
}

impl Row {
    /// Total servers the layout places.
    pub fn placed(&self) -> NodeCount {
        self.num_mbs + self.num_mcs * self.mc_size + self.num_routing_layers * self.num_per_rs_layer + self.num_idle
    }
}

/// Which table a configuration draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    RigidCorrectnessOnly,
    RigidDefault,
    NonrigidCorrectnessOnly,
    NonrigidDefault,
}

pub type Table = [Option<Row>; TABLE_LEN];

static RIGID_CORRECTNESS_ONLY: Table = build(Shape::RigidCorrectnessOnly);
static RIGID_DEFAULT: Table = build(Shape::RigidDefault);
static NONRIGID_CORRECTNESS_ONLY: Table = build(Shape::NonrigidCorrectnessOnly);
static NONRIGID_DEFAULT: Table = build(Shape::NonrigidDefault);

impl Shape {
    pub fn new(is_rigid: bool, correctness_test_only: bool) -> Self {
        match (is_rigid, correctness_test_only) {
            (true, true) => Shape::RigidCorrectnessOnly,
            (true, false) => Shape::RigidDefault,
            (false, true) => Shape::NonrigidCorrectnessOnly,
            (false, false) => Shape::NonrigidDefault,
        }
    }

    pub fn table(self) -> &'static Table {
        match self {
            Shape::RigidCorrectnessOnly => &RIGID_CORRECTNESS_ONLY,
            Shape::RigidDefault => &RIGID_DEFAULT,
            Shape::NonrigidCorrectnessOnly => &NONRIGID_CORRECTNESS_ONLY,
            Shape::NonrigidDefault => &NONRIGID_DEFAULT,
        }
    }

    /// Row for `num_servers`, if the table has one.
    pub fn row(self, num_servers: NodeCount) -> Option<&'static Row> {
        let index = usize::try_from(num_servers).ok()?;
        self.table().get(index)?.as_ref()
    }

    const fn is_rigid(self) -> bool {
        matches!(self, Shape::RigidCorrectnessOnly | Shape::RigidDefault)
    }

    const fn correctness_only(self) -> bool {
        matches!(self, Shape::RigidCorrectnessOnly | Shape::NonrigidCorrectnessOnly)
    }

    /// Smallest server count with a layout.
    const fn first_row(self) -> u32 {
        match self {
            Shape::RigidCorrectnessOnly => 3,
            Shape::RigidDefault => 7,
            Shape::NonrigidCorrectnessOnly => 8,
            Shape::NonrigidDefault => 16,
        }
    }
}

const fn at_least(value: u32, floor: u32) -> u32 {
    if value < floor {
        floor
    } else {
        value
    }
}

const fn at_most(value: u32, ceiling: u32) -> u32 {
    if value > ceiling {
        ceiling
    } else {
        value
    }
}

const fn layout(shape: Shape, n: u32) -> Option<Row> {
    if n < shape.first_row() {
        return None;
    }
    let (parallel, parallel_routing) = if shape.correctness_only() { (1, 1) } else { (3, 2) };

    if shape.is_rigid() {
        let num_mbs = (n + 2) / 3;
        let mc_size = n - num_mbs;
        return Some(Row {
            num_servers: n,
            down_degree: num_mbs,
            mc_size,
            min_good_mc_size: mc_size / 2 + 1,
            min_good_rs_layer_size: 0,
            num_buckets: num_mbs,
            num_idle: 0,
            num_mbs,
            num_mcs: 1,
            mbs_per_client: 1,
            num_parallel_messages: parallel,
            num_parallel_msgs_for_routing: parallel_routing,
            num_per_rs_layer: 0,
            num_routing_layers: 0,
        });
    }

    let (layers, mc_size) = if shape.correctness_only() { (2, 3) } else { (3, 4) };
    let num_per_rs_layer = at_least(n / 8, 1);
    let num_mbs = at_least(n / 4, 1);
    let routed = layers * num_per_rs_layer;
    if num_mbs + routed + mc_size > n {
        return None;
    }
    let remaining = n - num_mbs - routed;
    let num_mcs = remaining / mc_size;
    let mbs_per_client = if shape.correctness_only() { 1 } else { at_most(2, num_mbs) };
    Some(Row {
        num_servers: n,
        down_degree: at_least(num_per_rs_layer, 2),
        mc_size,
        min_good_mc_size: mc_size / 2 + 1,
        min_good_rs_layer_size: num_per_rs_layer / 2 + 1,
        num_buckets: num_mbs,
        num_idle: remaining - num_mcs * mc_size,
        num_mbs,
        num_mcs,
        mbs_per_client,
        num_parallel_messages: parallel,
        num_parallel_msgs_for_routing: parallel_routing,
        num_per_rs_layer,
        num_routing_layers: layers,
    })
}

const fn build(shape: Shape) -> Table {
    let mut table: Table = [None; TABLE_LEN];
    let mut n = 0;
    while n < TABLE_LEN {
        table[n] = layout(shape, n as u32);
        n += 1;
    }
    table
}
