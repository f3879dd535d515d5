use std::net::IpAddr;

use bgpd_rde::replay::{apply_all, events_from_file, parse_events};
use bgpd_rde::rib::{AttributeStore, DecisionFlags, NetworkKey, PeerId, RibEvent};
use bgpd_rde::{RdeError, ServerConfig, RIB};

const CONFIG: &str = r#"
    router_id = "192.0.2.254"
    default_as = 65000

    [[peers]]
    id = 1
    remote_ip = "192.0.2.1"
    remote_as = 65001
    router_id = "10.0.0.2"

    [[peers]]
    id = 2
    remote_ip = "192.0.2.2"
    remote_as = 65002
    router_id = "10.0.0.1"

    [[peers]]
    id = 3
    remote_ip = "192.0.2.3"
    remote_as = 65001
    router_id = "10.0.0.3"

    [[peers]]
    id = 4
    remote_ip = "192.0.2.4"
    remote_as = 65000
    router_id = "10.0.0.4"
"#;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine() -> RIB {
    let config: ServerConfig = CONFIG.parse().unwrap();
    let mut rib = RIB::from_config(&config).unwrap();
    let ups = parse_events(
        r#"[
            {"event": "peer_up", "peer": 1},
            {"event": "peer_up", "peer": 2},
            {"event": "peer_up", "peer": 3},
            {"event": "peer_up", "peer": 4}
        ]"#,
    )
    .unwrap();
    assert!(apply_all(&mut rib, &ups).is_empty());
    rib
}

fn run(rib: &mut RIB, script: &str) {
    let events = parse_events(script).unwrap();
    let errors = apply_all(rib, &events);
    assert!(errors.is_empty(), "{:?}", errors);
}

fn key(s: &str) -> NetworkKey {
    s.parse().unwrap()
}

fn order(rib: &RIB, network: &str) -> Vec<u32> {
    rib.routes(&key(network)).iter().map(|r| r.peer.0).collect()
}

fn update(peer: u32, as_path: &str, med: u32) -> String {
    format!(
        r#"{{"event": "update", "peer": {}, "prefix": "10.0.0.0/24",
            "attributes": {{"as_path": "{}", "med": {}}}}}"#,
        peer, as_path, med
    )
}

#[test]
fn test_med_non_transitive_all_orders() {
    init();
    let a = update(1, "65001 100", 10);
    let b = update(2, "65002 100", 5);
    let c = update(3, "65001 100", 20);
    let orders = [
        [&a, &b, &c],
        [&a, &c, &b],
        [&b, &a, &c],
        [&b, &c, &a],
        [&c, &a, &b],
        [&c, &b, &a],
    ];
    for updates in orders.iter() {
        let mut rib = engine();
        let script = format!(
            "[{}]",
            updates.iter().map(|u| u.as_str()).collect::<Vec<_>>().join(",")
        );
        run(&mut rib, &script);
        assert_eq!(order(&rib, "10.0.0.0/24"), vec![2, 1, 3], "{}", script);

        run(
            &mut rib,
            r#"[{"event": "withdraw", "peer": 2, "prefix": "10.0.0.0/24"}]"#,
        );
        assert_eq!(order(&rib, "10.0.0.0/24"), vec![1, 3]);
        assert_eq!(
            rib.active(&key("10.0.0.0/24")).map(|r| r.peer),
            Some(PeerId(1))
        );
    }
}

#[test]
fn test_always_compare_med() {
    init();
    let mut config: ServerConfig = CONFIG.parse().unwrap();
    config.decision = DecisionFlags {
        always_compare_med: true,
        route_age: false,
    };
    let mut rib = RIB::from_config(&config).unwrap();
    let script = format!(
        r#"[{{"event": "peer_up", "peer": 1}}, {{"event": "peer_up", "peer": 2}},
            {{"event": "peer_up", "peer": 3}}, {}, {}, {}]"#,
        update(3, "65001 100", 20),
        update(1, "65001 100", 10),
        update(2, "65002 100", 5)
    );
    run(&mut rib, &script);
    assert_eq!(order(&rib, "10.0.0.0/24"), vec![2, 1, 3]);
}

#[test]
fn test_intern_attribute_twice() {
    init();
    let store = AttributeStore::new();
    let first = store.intern_attribute(0x40, 1, vec![0]);
    let second = store.intern_attribute(0x40, 1, vec![0]);
    assert_eq!(first, second);
    assert_eq!(second.refcount(), 2);
    store.release_attribute(first);
    store.release_attribute(second);
    assert_eq!(store.attribute_count(), 0);
}

#[test]
fn test_local_pref_update_notifies_once() {
    init();
    let mut rib = engine();
    run(
        &mut rib,
        r#"[{"event": "update", "peer": 1, "prefix": "10.0.0.0/24",
             "attributes": {"as_path": "65001", "local_pref": 100}}]"#,
    );
    rib.take_events();
    run(
        &mut rib,
        r#"[{"event": "update", "peer": 1, "prefix": "10.0.0.0/24",
             "attributes": {"as_path": "65001", "local_pref": 200}}]"#,
    );
    let changes = rib
        .take_events()
        .into_iter()
        .filter(|e| matches!(e, RibEvent::BestPathChanged { .. }))
        .count();
    assert_eq!(changes, 1);
    assert_eq!(rib.prefix_count(), 1);
    assert_eq!(rib.path_count(), 1);
    assert_eq!(
        rib.active(&key("10.0.0.0/24")).unwrap().attributes.local_pref,
        200
    );
}

#[test]
fn test_peer_down_removes_everything() {
    init();
    let mut rib = engine();
    run(
        &mut rib,
        r#"[
            {"event": "update", "peer": 1, "prefix": "10.0.0.0/24",
             "attributes": {"as_path": "65001", "nexthop": "192.0.2.1"}},
            {"event": "update", "peer": 1, "prefix": "10.0.1.0/24",
             "attributes": {"as_path": "65001 65010", "nexthop": "192.0.2.1"}},
            {"event": "peer_down", "peer": 1}
        ]"#,
    );
    assert!(rib.get(&key("10.0.0.0/24")).is_none());
    assert!(rib.get(&key("10.0.1.0/24")).is_none());
    assert_eq!(rib.path_count(), 0);
    assert_eq!(rib.nexthop_count(), 0);
    let nexthop: IpAddr = "192.0.2.1".parse().unwrap();
    assert_eq!(
        rib.take_events().last(),
        Some(&RibEvent::NexthopRemoved(nexthop))
    );
    assert_eq!(rib.attribute_store().aspath_count(), 0);
}

#[test]
fn test_rejected_events() {
    init();
    let mut rib = engine();
    let events = parse_events(
        r#"[
            {"event": "update", "peer": 1, "prefix": "10.0.0.0/24",
             "attributes": {"as_path": "65001"}},
            {"event": "update", "peer": 1, "prefix": "10.0.0.0/24",
             "attributes": {"as_path": "65001 {"}},
            {"event": "update", "peer": 7, "prefix": "10.0.0.0/24"},
            {"event": "withdraw", "peer": 1, "prefix": "10.1.0.0/16"}
        ]"#,
    )
    .unwrap();
    let errors = apply_all(&mut rib, &events);
    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[0], (1, RdeError::Parse(_))));
    assert!(matches!(errors[1], (2, RdeError::UnknownPeer(PeerId(7)))));
    // Text errors never reach the engine, the first announcement stays
    assert_eq!(rib.prefix_count(), 1);
}

#[test]
fn test_shared_nexthop_flips_once_per_network() {
    init();
    let mut rib = engine();
    run(
        &mut rib,
        r#"[
            {"event": "update", "peer": 1, "prefix": "10.0.0.0/24",
             "attributes": {"as_path": "65001", "local_pref": 300, "nexthop": "198.51.100.1"}},
            {"event": "update", "peer": 2, "prefix": "10.0.0.0/24",
             "attributes": {"as_path": "65002", "local_pref": 200, "nexthop": "198.51.100.1"}},
            {"event": "update", "peer": 4, "prefix": "10.0.0.0/24",
             "attributes": {"as_path": "", "local_pref": 100}},
            {"event": "nexthop", "address": "198.51.100.1", "reachable": true}
        ]"#,
    );
    assert_eq!(order(&rib, "10.0.0.0/24"), vec![1, 2, 4]);
    rib.take_events();

    let flips = [(false, vec![4, 1, 2], 4), (true, vec![1, 2, 4], 1)];
    for (reachable, expected, best) in flips.iter() {
        run(
            &mut rib,
            &format!(
                r#"[{{"event": "nexthop", "address": "198.51.100.1", "reachable": {}}}]"#,
                reachable
            ),
        );
        let changes: Vec<_> = rib
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                RibEvent::BestPathChanged { new, .. } => Some(new.map(|r| r.peer)),
                _ => None,
            })
            .collect();
        assert_eq!(changes, vec![Some(PeerId(*best))]);
        assert_eq!(&order(&rib, "10.0.0.0/24"), expected);
        let routes = rib.routes(&key("10.0.0.0/24"));
        assert_eq!(rib.active(&key("10.0.0.0/24")), Some(routes[0].clone()));
    }
}

/// Small deterministic generator for the churn test
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) % bound
    }
}

#[test]
fn test_churn_keeps_active_consistent() {
    init();
    for seed in 1..10u64 {
        let mut rng = Lcg(seed);
        let mut rib = engine();
        run(
            &mut rib,
            r#"[{"event": "nexthop", "address": "192.0.2.1", "reachable": true, "connected": true}]"#,
        );
        for _ in 0..200 {
            let peer = rng.next(4) + 1;
            let event = match rng.next(5) {
                0 => format!(
                    r#"{{"event": "withdraw", "peer": {}, "prefix": "10.0.0.0/24"}}"#,
                    peer
                ),
                1 => format!(
                    r#"{{"event": "nexthop", "address": "192.0.2.{}", "reachable": {}}}"#,
                    rng.next(2) + 1,
                    rng.next(2) == 0
                ),
                _ => format!(
                    r#"{{"event": "update", "peer": {}, "prefix": "10.0.0.0/24",
                        "attributes": {{"as_path": "{} 100", "med": {}, "nexthop": "192.0.2.{}"}}}}"#,
                    peer,
                    65001 + rng.next(2),
                    rng.next(4) * 10,
                    rng.next(2) + 1
                ),
            };
            run(&mut rib, &format!("[{}]", event));
            rib.take_events();

            let routes = rib.routes(&key("10.0.0.0/24"));
            match rib.active(&key("10.0.0.0/24")) {
                Some(active) => assert_eq!(active, routes[0]),
                None => assert!(routes.iter().all(|r| !r.eligible)),
            }
            // Ineligible candidates sort behind every eligible one
            let first_ineligible = routes.iter().position(|r| !r.eligible);
            if let Some(pos) = first_ineligible {
                assert!(routes[pos..].iter().all(|r| !r.eligible));
            }
        }
    }
}

#[test]
fn test_demo_replay() {
    init();
    let dir = env!("CARGO_MANIFEST_DIR");
    let config = ServerConfig::from_file(&format!("{}/demos/rde.toml", dir)).unwrap();
    let mut rib = RIB::from_config(&config).unwrap();
    let events = events_from_file(&format!("{}/demos/events.json", dir)).unwrap();
    let errors = apply_all(&mut rib, &events);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].1, RdeError::Parse(_)));

    assert_eq!(order(&rib, "10.10.0.0/16"), vec![1, 3]);
    assert_eq!(
        rib.active(&key("10.20.0.0/24")).unwrap().attributes.local_pref,
        150
    );
    let v6 = rib.active(&key("2001:db8:100::/48")).unwrap();
    assert_eq!(v6.peer, PeerId(4));
    assert!(rib.active(&key("rd 65000:1 172.16.0.0/12")).is_some());
    assert_eq!(rib.node_count(), 4);
    assert_eq!(rib.nexthop_count(), 3);

    let forwards: Vec<_> = rib
        .take_events()
        .into_iter()
        .filter_map(|e| match e {
            RibEvent::ForwardingChanged { key, nexthop } => Some((key, nexthop)),
            _ => None,
        })
        .collect();
    assert!(forwards.contains(&(
        key("2001:db8:100::/48"),
        Some("fe80::1".parse().unwrap())
    )));
}
