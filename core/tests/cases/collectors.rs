use crate::common::{line, TestHarness};
use cachenet_core::*;
use serde_json::json;

fn close(a: &serde_json::Value, b: f64) -> bool {
    (a.as_f64().unwrap() - b).abs() < 1e-6
}

fn miss_then_hit() -> crate::common::Outcome {
    let mut h = line(CacheSpec::lru(1), StrategyConfig::Lce);
    h.request(0, 1, 10).request(100_000, 1, 10);
    h.run()
}

#[test]
fn test_hit_ratio_per_node_and_content() {
    let r = miss_then_hit().results();
    let chr = &r["CACHE_HIT_RATIO"];
    assert!(close(&chr["MEAN"], 0.5));
    assert_eq!(chr["CACHE_HITS"], 1);
    assert_eq!(chr["SERVER_HITS"], 1);
    assert_eq!(chr["PER_NODE_HITS"], json!({"2": 1}));
    assert_eq!(chr["PER_NODE_MISSES"], json!({"2": 1}));
    assert!(close(&chr["PER_CONTENT"]["10"], 0.5));
}

#[test]
fn test_latency_mean_and_samples() {
    let r = miss_then_hit().results();
    let latency = &r["LATENCY"];
    assert!(close(&latency["MEAN"], 3_000.0));
    assert_eq!(latency["COUNT"], 2);
    assert_eq!(latency["SAMPLES"], json!([4_000, 2_000]));
}

#[test]
fn test_path_stretch() {
    let r = miss_then_hit().results();
    // The miss walks the full path, the hit half of it both ways.
    assert_eq!(r["PATH_STRETCH"]["SAMPLES"], json!([1.0, 0.5]));
    assert!(close(&r["PATH_STRETCH"]["MEAN"], 0.75));
}

#[test]
fn test_link_load_split_by_kind() {
    let mut h = TestHarness::new();
    h.receiver(1)
        .cache_router(2, CacheSpec::lru(1))
        .source(3)
        .connect(1, 2)
        .external(2, 3)
        .strategy(StrategyConfig::Lce);
    h.request(0, 1, 10).request(100_000, 1, 10);
    let out = h.run();
    let load = &out.results()["LINK_LOAD"];

    // Two requests and two contents over 1-2 within 0.1 s.
    assert!(close(&load["PER_LINK_INTERNAL"]["1->2"], 3_000.0));
    assert!(close(&load["PER_LINK_INTERNAL"]["2->1"], 30_000.0));
    assert!(close(&load["PER_LINK_EXTERNAL"]["2->3"], 1_500.0));
    assert!(close(&load["PER_LINK_EXTERNAL"]["3->2"], 15_000.0));
    assert!(close(&load["MEAN_INTERNAL"], 16_500.0));
    assert!(close(&load["MEAN_EXTERNAL"], 8_250.0));
}

#[test]
fn test_sessions_count_stores_and_evictions() {
    let mut h = line(CacheSpec::lru(1), StrategyConfig::Lce);
    h.trace(0, 100_000, 1, &[1, 2, 1]);
    let out = h.run();
    let sessions = &out.results()["SESSIONS"];
    assert_eq!(sessions["STARTED"], 3);
    assert_eq!(sessions["SUCCEEDED"], 3);
    assert_eq!(sessions["STORED"], 3);
    assert_eq!(sessions["EVICTED"], 2);
}

#[test]
fn test_collector_set_from_config() {
    let mut h = line(CacheSpec::lru(1), StrategyConfig::Lce);
    h.request(0, 1, 10);
    let mut sim = h.build();
    let configs: Vec<CollectorConfig> = serde_json::from_value(json!([
        {"name": "CACHE_HIT_RATIO"},
        {"name": "SESSIONS"},
        {"name": "LATENCY", "samples": true}
    ]))
    .unwrap();
    let mut set = CollectorSet::new();
    for config in &configs {
        set.push(config.build(sim.network()).unwrap());
    }
    sim.run(&mut set, RunLimits::default()).unwrap();
    let results = set.results();
    let names: Vec<&String> = results.as_object().unwrap().keys().collect();
    assert_eq!(names, ["CACHE_HIT_RATIO", "LATENCY", "SESSIONS"]);
    assert_eq!(results["CACHE_HIT_RATIO"]["PER_NODE_MISSES"], json!({"2": 1}));
}

#[test]
fn test_link_load_rejects_zero_sizes() {
    let sim = line(CacheSpec::lru(1), StrategyConfig::Lce).build();
    let config = CollectorConfig::LinkLoad {
        req_size: 0,
        content_size: 1500,
    };
    assert!(matches!(
        config.build(sim.network()),
        Err(ConfigError::InvalidParameter { .. })
    ));
}

#[test]
fn test_config_names_match_result_keys() {
    let sim = line(CacheSpec::lru(1), StrategyConfig::Lce).build();
    let configs = [
        CollectorConfig::CacheHitRatio {
            per_node: true,
            per_content: true,
        },
        CollectorConfig::LinkLoad {
            req_size: 150,
            content_size: 1500,
        },
        CollectorConfig::Latency { samples: false },
        CollectorConfig::PathStretch { samples: false },
        CollectorConfig::Sessions,
    ];
    for config in configs {
        assert_eq!(config.build(sim.network()).unwrap().name(), config.name());
    }
}
