use cachenet_core::cache::EvictionPolicy;
use cachenet_core::*;
use serde_json::{json, Value};

fn base() -> Value {
    json!({
        "seed": 3,
        "topology": {
            "nodes": [
                {"id": 1, "role": "receiver"},
                {"id": 2, "role": "router", "cache_size": 2},
                {"id": 3, "role": "router"},
                {"id": 4, "role": "source", "contents": [10, 11]}
            ],
            "edges": [
                {"from": 1, "to": 2, "delay_us": 1000},
                {"from": 2, "to": 3, "delay_us": 1000},
                {"from": 3, "to": 4, "delay_us": 2000, "reverse_delay_us": 4000, "kind": "external"}
            ]
        },
        "strategy": {"name": "LCD"},
        "workload": [
            {"time": 0, "receiver": 1, "content": 10},
            {"time": 50000, "receiver": 1, "content": 10},
            {"time": 100000, "receiver": 1, "content": 11}
        ]
    })
}

fn build(value: &Value) -> Result<(Simulation, CollectorSet), ConfigError> {
    ScenarioConfig::from_json_str(&value.to_string())?.build()
}

fn build_err(value: &Value) -> ConfigError {
    match build(value) {
        Ok(_) => panic!("scenario should have been rejected"),
        Err(e) => e,
    }
}

#[test]
fn test_full_scenario_runs() {
    let config = ScenarioConfig::from_json_str(&base().to_string()).unwrap();
    let (mut sim, mut collectors) = config.build().unwrap();
    assert_eq!(sim.strategy().name(), "LCD");
    assert_eq!(collectors.len(), 2);

    let report = sim.run(&mut collectors, config.limits()).unwrap();
    assert_eq!(report.requests, 3);
    assert_eq!(report.stop, StopReason::Exhausted);
    // Request 2 -> 3 -> 4 takes 4 ms, content back 4 + 1 + 1 ms.
    assert_eq!(report.end_time, 100_000 + 4_000 + 6_000);

    let results = collectors.results();
    // LCD left the first copy at node 2, which serves the second request.
    assert_eq!(results["CACHE_HIT_RATIO"]["SERVER_HITS"], 2);
    assert_eq!(results["CACHE_HIT_RATIO"]["CACHE_HITS"], 1);
    assert_eq!(results["LATENCY"]["COUNT"], 3);
}

#[test]
fn test_asymmetric_link_delays() {
    let (sim, _) = build(&base()).unwrap();
    let network = sim.network();
    assert_eq!(network.link_delay(3, 4), Some(2_000));
    assert_eq!(network.link_delay(4, 3), Some(4_000));
    assert_eq!(network.link_kind(4, 3), Some(LinkKind::External));
    assert_eq!(network.distance(1, 4), Some(4_000));
    assert_eq!(network.distance(4, 1), Some(6_000));
}

#[test]
fn test_horizon_from_scenario() {
    let mut value = base();
    value["until"] = json!(60_000);
    let config = ScenarioConfig::from_json_str(&value.to_string()).unwrap();
    let (mut sim, mut collectors) = config.build().unwrap();
    let report = sim.run(&mut collectors, config.limits()).unwrap();
    assert_eq!(report.stop, StopReason::Horizon);
    assert_eq!(report.requests, 2);
}

#[test]
fn test_malformed_json() {
    assert!(matches!(
        ScenarioConfig::from_json_str("{\"topology\": "),
        Err(ConfigError::Parse(_))
    ));
    let mut value = base();
    value["strategy"] = json!({"name": "MOST_POPULAR"});
    assert!(matches!(build(&value), Err(ConfigError::Parse(_))));
}

#[test]
fn test_unknown_strategy_name() {
    assert!(matches!(
        "magic".parse::<StrategyConfig>(),
        Err(ConfigError::UnknownStrategy(name)) if name == "magic"
    ));
    assert_eq!("nrr".parse::<StrategyConfig>().unwrap().local_cache_ratio(), None);
}

#[test]
fn test_unknown_edge_endpoint() {
    let mut value = base();
    value["topology"]["edges"][0]["to"] = json!(9);
    assert!(matches!(
        build_err(&value),
        ConfigError::UnknownEdgeEndpoint { from: 1, to: 9, missing: 9 }
    ));
}

#[test]
fn test_self_loop() {
    let mut value = base();
    value["topology"]["edges"][0]["to"] = json!(1);
    assert!(matches!(build_err(&value), ConfigError::SelfLoop(1)));
}

#[test]
fn test_duplicate_node() {
    let mut value = base();
    value["topology"]["nodes"][2]["id"] = json!(2);
    assert!(matches!(build_err(&value), ConfigError::DuplicateNode(2)));
}

#[test]
fn test_zero_capacity() {
    let mut value = base();
    value["topology"]["nodes"][1]["cache_size"] = json!(0);
    assert!(matches!(
        build_err(&value),
        ConfigError::ZeroCapacity { node: 2 }
    ));
}

#[test]
fn test_cache_on_receiver_is_rejected() {
    let mut value = base();
    value["topology"]["nodes"][0]["cache_size"] = json!(4);
    assert!(matches!(
        build_err(&value),
        ConfigError::WrongRole {
            node: 1,
            role: "receiver",
            expected: "router"
        }
    ));
}

#[test]
fn test_no_source() {
    let mut value = base();
    value["topology"]["nodes"][3] = json!({"id": 4, "role": "router"});
    assert!(matches!(build_err(&value), ConfigError::NoSource));
}

#[test]
fn test_content_pinned_twice() {
    let mut value = base();
    value["topology"]["nodes"]
        .as_array_mut()
        .unwrap()
        .push(json!({"id": 5, "role": "source", "contents": [11]}));
    assert!(matches!(
        build_err(&value),
        ConfigError::ContentConflict { content: 11 }
    ));
}

#[test]
fn test_unreachable_receiver() {
    let mut value = base();
    value["topology"]["nodes"]
        .as_array_mut()
        .unwrap()
        .push(json!({"id": 7, "role": "receiver"}));
    assert!(matches!(
        build_err(&value),
        ConfigError::UnreachableReceiver(7)
    ));
}

#[test]
fn test_hashrouting_without_caches() {
    let mut value = base();
    value["topology"]["nodes"][1] = json!({"id": 2, "role": "router"});
    value["strategy"] = json!({"name": "HASHROUTING"});
    assert!(matches!(build_err(&value), ConfigError::NoCacheNodes));
}

#[test]
fn test_invalid_probability() {
    let mut value = base();
    value["strategy"] = json!({"name": "RAND_BERNOULLI", "p": 1.5});
    assert!(matches!(
        build_err(&value),
        ConfigError::InvalidParameter { name: "p", .. }
    ));
}

#[test]
fn test_topology_change_on_unknown_node() {
    let mut value = base();
    value["topology_changes"] = json!([
        {"time": 10, "change": {"kind": "remove_node", "node": 42}}
    ]);
    assert!(matches!(build_err(&value), ConfigError::UnknownNode(42)));
}

#[test]
fn test_topology_change_on_missing_link() {
    let mut value = base();
    value["topology_changes"] = json!([
        {"time": 10, "change": {"kind": "remove_link", "a": 1, "b": 4}}
    ]);
    assert!(matches!(
        build_err(&value),
        ConfigError::UnknownEdgeEndpoint { from: 1, to: 4, .. }
    ));
}

#[test]
fn test_min_policy_gets_the_workload_index() {
    let mut value = base();
    value["cache"] = json!({"policy": {"name": "MIN"}});
    let (mut sim, mut collectors) = build(&value).unwrap();
    assert!(sim.context().next_references().is_some());
    sim.run(&mut collectors, RunLimits::default()).unwrap();
    assert_eq!(
        collectors.results()["CACHE_HIT_RATIO"]["CACHE_HITS"],
        json!(1)
    );
}

#[test]
fn test_per_node_policy_override() {
    let mut value = base();
    value["topology"]["nodes"][1]["policy"] = json!({"name": "SLRU", "segments": 2});
    let (sim, _) = build(&value).unwrap();
    assert!(matches!(
        sim.network().cache(2).unwrap().policy(),
        EvictionPolicy::Slru(_)
    ));
}

#[test]
fn test_negative_wall_clock() {
    let mut value = base();
    value["wall_clock_secs"] = json!(-1.0);
    assert!(matches!(
        build_err(&value),
        ConfigError::InvalidParameter {
            name: "wall_clock_secs",
            ..
        }
    ));
}

#[test]
fn test_duplicate_collector() {
    let mut value = base();
    value["collectors"] = json!([
        {"name": "LATENCY"},
        {"name": "SESSIONS"},
        {"name": "LATENCY", "samples": true}
    ]);
    assert!(matches!(
        build_err(&value),
        ConfigError::DuplicateCollector("LATENCY")
    ));
}
