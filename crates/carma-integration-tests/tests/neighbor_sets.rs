//! rx/tx neighbor sets for each of the six roles.

use carma_integration_tests::{psns, Network};
use carma_types::{Psn, PsnSet, Role};
use serde_json::json;

fn union(sets: &[&PsnSet]) -> PsnSet {
    sets.iter().flat_map(|s| s.iter().cloned()).collect()
}

#[test]
fn test_client_uses_bucket_mailboxes() {
    let net = Network::new(8, true);
    for c in ["c1", "c2", "c3", "c4"] {
        net.add(c, Role::Client);
    }
    for m in ["m1", "m2", "m3"] {
        net.add(m, Role::MbServer);
    }
    let local = net.local("c1", json!({}));
    let topo = net.topo();
    let expected = net.bucket_peers("c1", Role::MbServer);
    assert_eq!(*local.rx_nodes(&topo).expect("rx"), expected);
    assert_eq!(*local.tx_nodes(&topo).expect("tx"), expected);
}

#[test]
fn test_idle_server_uses_other_servers() {
    let net = Network::new(5, true);
    net.add("i", Role::IdleServer);
    net.add("d", Role::IdleServer);
    let local = net.local("i", json!({"other_servers": ["d"]}));
    let topo = net.topo();
    assert_eq!(*local.rx_nodes(&topo).expect("rx"), psns(&["d"]));
    assert_eq!(*local.tx_nodes(&topo).expect("tx"), psns(&["d"]));
}

#[test]
fn test_rigid_mailbox_server() {
    let net = Network::new(8, true);
    for c in ["c1", "c2", "c3", "c4", "c5"] {
        net.add(c, Role::Client);
    }
    net.add("m", Role::MbServer);
    net.add_mc("l0", 0, 0);
    net.add_mc("f0", 0, 1);
    net.add_mc("l1", 1, 0);
    net.add_mc("f1", 1, 1);
    net.add("d", Role::IdleServer);

    let local = net.local("m", json!({"other_servers": ["d"]}));
    let topo = net.topo();
    let clients = net.bucket_peers("m", Role::Client);
    let leaders = psns(&["l0", "l1"]);
    let other = psns(&["d"]);

    assert_eq!(*local.mc_leaders(&topo).expect("leaders"), leaders);
    assert_eq!(*local.prev_layer(&topo).expect("prev"), leaders);
    assert_eq!(*local.rx_nodes(&topo).expect("rx"), union(&[&clients, &leaders, &other]));
    assert_eq!(*local.tx_nodes(&topo).expect("tx"), union(&[&leaders, &clients, &other]));
}

#[test]
fn test_mc_follower() {
    let net = Network::new(5, true);
    net.add_mc("lead", 3, 0);
    net.add_mc("f", 3, 1);
    net.add_mc("g", 3, 2);
    net.add("d", Role::IdleServer);
    let local = net.local("f", json!({"other_servers": ["d"]}));
    let topo = net.topo();
    assert_eq!(local.mc_leader(&topo).expect("leader"), Psn::new("lead"));
    assert_eq!(*local.rx_nodes(&topo).expect("rx"), psns(&["lead", "d"]));
    assert_eq!(*local.tx_nodes(&topo).expect("tx"), psns(&["lead", "d"]));
}

#[test]
fn test_mc_leader_sees_group_and_mailboxes() {
    let net = Network::new(5, true);
    net.add_mc("self", 0, 0);
    net.add_mc("A", 0, 1);
    net.add_mc("B", 0, 2);
    net.add("C", Role::MbServer);
    net.add("D", Role::IdleServer);
    let local = net.local("self", json!({"other_servers": ["D"]}));
    let topo = net.topo();

    let group = local.mc_group(&topo, 0).expect("group");
    assert_eq!(*group, vec![Psn::new("self"), Psn::new("A"), Psn::new("B")]);
    assert_eq!(*local.mb_servers(&topo).expect("mb_servers"), psns(&["C"]));
    assert_eq!(*local.rx_nodes(&topo).expect("rx"), psns(&["A", "B", "C", "D"]));
    assert_eq!(*local.tx_nodes(&topo).expect("tx"), psns(&["A", "B", "C", "D"]));
}

#[test]
fn test_non_rigid_mc_leader_uses_parsed_layers() {
    let net = Network::new(8, false);
    net.add_mc("self", 0, 0);
    net.add_mc("A", 0, 1);
    net.add("C", Role::MbServer);
    net.add_rs("R", 0);
    net.add("D", Role::IdleServer);
    let local = net.local(
        "self",
        json!({"other_servers": ["D"], "mb_servers": ["C"], "next_layer": ["R"]}),
    );
    let topo = net.topo();
    assert_eq!(*local.rx_nodes(&topo).expect("rx"), psns(&["A", "C", "D"]));
    assert_eq!(*local.tx_nodes(&topo).expect("tx"), psns(&["A", "R", "D"]));
}

#[test]
fn test_rs_server() {
    let net = Network::new(8, false);
    net.add_rs("r", 0);
    net.add_mc("l", 0, 0);
    net.add_mc("f", 0, 1);
    net.add_rs("next", 1);
    net.add("d", Role::IdleServer);
    let local = net.local(
        "r",
        json!({"other_servers": ["d"], "prev_layer": ["l"], "next_layer": ["next"]}),
    );
    let topo = net.topo();
    assert_eq!(*local.rx_nodes(&topo).expect("rx"), psns(&["l", "d"]));
    assert_eq!(*local.tx_nodes(&topo).expect("tx"), psns(&["next", "d"]));
}

#[test]
fn test_neighbor_sets_are_memoized() {
    let net = Network::new(5, true);
    net.add("i", Role::IdleServer);
    net.add("d", Role::IdleServer);
    let local = net.local("i", json!({"other_servers": ["d"]}));
    let topo = net.topo();
    let first = local.rx_nodes(&topo).expect("rx");
    let second = local.rx_nodes(&topo).expect("rx");
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}
