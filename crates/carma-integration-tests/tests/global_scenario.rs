//! Global parameter validation and shape selection.

use carma_topology::{GlobalConfig, TopologyError};
use num_bigint::BigUint;
use serde_json::json;

#[test]
fn test_five_server_rigid_correctness_only() {
    let mut g = GlobalConfig::new(5, 1, BigUint::from(7919u32), vec![0xab; 16]).expect("global");
    g.set_is_rigid(true).set_correctness_test_only(true);
    g.validate().expect("valid");
    let row = g.rangegen_row().expect("row");
    assert_eq!(row.num_servers, 5);
    assert_eq!(g.num_buckets().expect("buckets"), g.num_mbs().expect("mbs"));
}

#[test]
fn test_shamir_threshold_bound() {
    let mut g = GlobalConfig::new(5, 4, BigUint::from(7919u32), vec![1]).expect("global");
    g.set_correctness_test_only(true);
    let err = g.validate().expect_err("5 - 2 < 4");
    assert!(matches!(err, TopologyError::Config(_)));
}

#[test]
fn test_exactly_one_rate_mode() {
    let mut g = GlobalConfig::new(9, 1, BigUint::from(7919u32), vec![1]).expect("global");
    g.validate().expect("default rates");
    g.set_rates(0.1, -1.0, -1.0);
    assert!(!g.default_rate() && !g.exotic_rate());
    assert!(g.validate().is_err());
    g.set_rates(0.1, 0.01, 0.01);
    assert!(g.exotic_rate());
    g.validate().expect("exotic rates validate");
    assert!(g.rangegen_row().is_err(), "exotic rates have no table");
}

#[test]
fn test_json_roundtrip_from_numbers_and_strings() {
    let g = GlobalConfig::from_json(json!({
        "correctness_test_only": true,
        "corruption_rate": -1,
        "epoch_nonce": "00ff",
        "is_rigid": true,
        "num_clients": 100,
        "num_servers": "5",
        "prime": "340282366920938463463374607431768211297",
        "privacy_failure_rate": "-1",
        "robustness_failure_rate": -1,
        "shamir_threshold": 1,
        "vrf": {"name": "schnorrkel", "params": {}},
    }))
    .expect("parse");
    assert_eq!(g.num_servers(), 5);
    assert_eq!(g.epoch_nonce(), [0x00, 0xff]);
    assert_eq!(GlobalConfig::from_json(g.to_json()).expect("reparse"), g);
}
