use cachenet_core::cache::{EvictionPolicy, Policy};
use cachenet_core::*;

fn cache(capacity: usize, policy: PolicyConfig) -> Cache {
    Cache::new(2, capacity, &policy, &AdmissionConfig::Always, &RunContext::new(1)).unwrap()
}

#[test]
fn test_lru_evicts_least_recently_used() {
    let mut c = cache(2, PolicyConfig::Lru);
    c.put(1);
    c.put(2);
    assert!(c.get(1));
    assert_eq!(c.put(3), Some(2));
    assert!(c.has(1) && c.has(3) && !c.has(2));
}

#[test]
fn test_fifo_ignores_hits() {
    let mut c = cache(2, PolicyConfig::Fifo);
    c.put(1);
    c.put(2);
    assert!(c.get(1));
    assert_eq!(c.put(3), Some(1));
    assert!(c.has(2) && c.has(3));
}

#[test]
fn test_capacity_never_exceeded() {
    let policies = vec![
        PolicyConfig::Lru,
        PolicyConfig::Fifo,
        PolicyConfig::Random,
        PolicyConfig::Lfu,
        PolicyConfig::PerfectLfu,
        PolicyConfig::ApproxLfu {
            max_count: 4,
            aging_period: Some(8),
        },
        PolicyConfig::Slru {
            segments: 3,
            alloc: None,
        },
        PolicyConfig::Climb,
        PolicyConfig::Ttl {
            ttl: 1_000_000,
            refresh_on_hit: true,
            proactive_expiry: false,
        },
    ];
    for policy in policies {
        let mut c = cache(3, policy.clone());
        for i in 0..300u64 {
            let k = (i * 7 + i / 3) % 11;
            if !c.get(k) {
                c.put(k);
            }
            assert!(c.len() <= 3, "{} holds {} items", policy.name(), c.len());
            if policy != PolicyConfig::PerfectLfu {
                assert!(c.has(k), "{} did not keep {k}", policy.name());
            }
        }
    }
}

#[test]
fn test_in_cache_lfu_keeps_frequent_item() {
    let mut c = cache(2, PolicyConfig::Lfu);
    c.put(1);
    c.get(1);
    c.get(1);
    c.put(2);
    assert_eq!(c.put(3), Some(2));
    assert!(c.has(1));
}

#[test]
fn test_perfect_lfu_counters_survive_eviction() {
    let mut c = cache(2, PolicyConfig::PerfectLfu);
    c.put(1);
    c.get(1);
    c.get(1);
    c.put(2);
    for _ in 0..5 {
        assert!(!c.get(3));
    }
    assert_eq!(c.put(3), Some(2));
    for _ in 0..9 {
        assert!(!c.get(2));
    }
    // 2 now has the highest count although it was just evicted.
    assert_eq!(c.put(2), Some(1));
    assert!(c.has(2) && c.has(3));
}

#[test]
fn test_perfect_lfu_rejects_less_popular_newcomer() {
    let mut c = cache(1, PolicyConfig::PerfectLfu);
    c.put(1);
    for _ in 0..3 {
        assert!(c.get(1));
    }
    assert!(!c.get(2));
    // 2 reaches a count of 2 with this offer, 1 already has 4.
    assert_eq!(c.put(2), None);
    assert_eq!(c.dump(), vec![1]);

    for _ in 0..3 {
        assert!(!c.get(2));
    }
    assert_eq!(c.put(2), Some(1));
    assert_eq!(c.dump(), vec![2]);
}

#[test]
fn test_slru_promotes_on_hit_and_evicts_from_probation() {
    let mut c = cache(
        4,
        PolicyConfig::Slru {
            segments: 2,
            alloc: None,
        },
    );
    c.put(1);
    c.put(2);
    assert!(c.get(1));
    c.put(3);
    assert_eq!(c.put(4), Some(2));
    let EvictionPolicy::Slru(slru) = c.policy() else {
        panic!("expected SLRU");
    };
    assert_eq!(slru.segment_of(1), Some(0));
    assert_eq!(slru.segment_of(4), Some(1));
}

#[test]
fn test_slru_rejects_bad_allocation() {
    let policy = PolicyConfig::Slru {
        segments: 2,
        alloc: Some(vec![0.9, 0.3]),
    };
    let err = Cache::new(2, 4, &policy, &AdmissionConfig::Always, &RunContext::new(1));
    assert!(matches!(err, Err(ConfigError::InvalidParameter { name: "alloc", .. })));
}

#[test]
fn test_climb_moves_hit_one_rank_up() {
    let mut c = cache(3, PolicyConfig::Climb);
    c.put(1);
    c.put(2);
    c.put(3);
    assert!(c.get(3));
    assert_eq!(c.dump(), vec![1, 3, 2]);
    assert_eq!(c.put(4), Some(2));
    assert_eq!(c.dump(), vec![1, 3, 4]);
}

#[test]
fn test_zero_capacity_is_rejected() {
    let err = Cache::new(7, 0, &PolicyConfig::Lru, &AdmissionConfig::Always, &RunContext::new(1));
    assert!(matches!(err, Err(ConfigError::ZeroCapacity { node: 7 })));
}

#[test]
fn test_min_without_index_is_rejected() {
    let err = Cache::new(7, 2, &PolicyConfig::Min, &AdmissionConfig::Always, &RunContext::new(1));
    assert!(matches!(err, Err(ConfigError::MissingTrace)));
}

#[test]
fn test_unknown_policy_name() {
    assert!(matches!(
        "MRU".parse::<PolicyConfig>(),
        Err(ConfigError::UnknownPolicy(name)) if name == "MRU"
    ));
    assert_eq!("lru".parse::<PolicyConfig>().unwrap(), PolicyConfig::Lru);
}

#[test]
fn test_after_k_hits_admission() {
    let mut c = Cache::new(
        2,
        2,
        &PolicyConfig::Lru,
        &AdmissionConfig::AfterKHits { k: 2, memory: None },
        &RunContext::new(1),
    )
    .unwrap();
    c.put(5);
    assert!(!c.has(5));
    c.put(5);
    assert!(c.has(5));
}

#[test]
fn test_clear_and_remove() {
    let mut c = cache(3, PolicyConfig::Lru);
    c.put(1);
    c.put(2);
    assert!(c.remove(1));
    assert!(!c.remove(1));
    assert_eq!(c.len(), 1);
    c.clear();
    assert!(c.is_empty());
}

#[test]
fn test_null_cache_stores_nothing() {
    let mut c = cache(4, PolicyConfig::Null);
    assert_eq!(c.put(1), None);
    assert!(!c.has(1));
    assert!(!c.get(1));
    assert!(c.is_empty());
    assert_eq!("null".parse::<PolicyConfig>().unwrap(), PolicyConfig::Null);
}

#[test]
fn test_sharded_cache_places_by_content_id() {
    let policy = PolicyConfig::Shard {
        shards: 2,
        policy: Box::new(PolicyConfig::Lru),
    };
    let mut c = cache(5, policy);
    // Shard 0 gets three slots and shard 1 gets two.
    for k in [1, 3, 2, 4, 6] {
        c.put(k);
    }
    assert_eq!(c.put(5), Some(1));
    let EvictionPolicy::Shard(s) = c.policy() else {
        panic!("expected a sharded cache");
    };
    assert_eq!(s.shards()[0].dump(), vec![6, 4, 2]);
    assert_eq!(s.shards()[1].dump(), vec![5, 3]);
    assert_eq!(s.shard_of(7), 1);
    assert_eq!(c.len(), 5);
}

#[test]
fn test_array_cache_puts_into_member_of_last_lookup() {
    let policy = PolicyConfig::Array {
        caches: 3,
        policy: Box::new(PolicyConfig::Lru),
        weights: None,
    };
    let mut c = cache(3, policy);
    for k in 1..=20 {
        assert!(!c.get(k));
        c.put(k);
        let EvictionPolicy::Array(a) = c.policy() else {
            panic!("expected an array cache");
        };
        let picked = a.selected().unwrap();
        assert_eq!(a.members()[picked].dump(), vec![k]);
    }
    assert!(c.len() <= 3);
}

#[test]
fn test_weighted_array_only_uses_weighted_members() {
    let policy = PolicyConfig::Array {
        caches: 2,
        policy: Box::new(PolicyConfig::Lru),
        weights: Some(vec![0.0, 1.0]),
    };
    let mut c = cache(4, policy);
    for k in 1..=10 {
        c.get(k);
        c.put(k);
    }
    let EvictionPolicy::Array(a) = c.policy() else {
        panic!("expected an array cache");
    };
    assert!(a.members()[0].is_empty());
    assert_eq!(a.members()[1].dump(), vec![10, 9]);
}

#[test]
fn test_array_weights_are_validated() {
    for weights in [vec![0.5, 0.6], vec![1.0]] {
        let policy = PolicyConfig::Array {
            caches: 2,
            policy: Box::new(PolicyConfig::Lru),
            weights: Some(weights),
        };
        let err = Cache::new(1, 4, &policy, &AdmissionConfig::Always, &RunContext::new(1));
        assert!(matches!(
            err,
            Err(ConfigError::InvalidParameter { name: "weights", .. })
        ));
    }
}

#[test]
fn test_path_cache_puts_into_every_level() {
    let policy = PolicyConfig::Path {
        levels: 2,
        policy: Box::new(PolicyConfig::Lru),
    };
    let mut c = cache(4, policy);
    c.put(1);
    c.put(2);
    c.put(3);
    let EvictionPolicy::Path(p) = c.policy() else {
        panic!("expected a path cache");
    };
    assert_eq!(p.levels()[0].dump(), vec![3, 2]);
    assert_eq!(p.levels()[1].dump(), vec![3, 2]);
    assert!(!c.get(1));
}

#[test]
fn test_path_cache_copies_hit_into_earlier_levels() {
    let policy = PolicyConfig::Path {
        levels: 2,
        policy: Box::new(PolicyConfig::Lru),
    };
    let mut c = cache(4, policy);
    c.put(1);
    c.put(2);
    // Hit in the first level only refreshes that level.
    assert!(c.get(1));
    c.put(3);
    {
        let EvictionPolicy::Path(p) = c.policy() else {
            panic!("expected a path cache");
        };
        assert_eq!(p.levels()[0].dump(), vec![3, 1]);
        assert_eq!(p.levels()[1].dump(), vec![3, 2]);
    }
    assert!(c.get(2));
    let EvictionPolicy::Path(p) = c.policy() else {
        panic!("expected a path cache");
    };
    assert_eq!(p.levels()[0].dump(), vec![2, 3]);
    assert_eq!(p.levels()[1].dump(), vec![2, 3]);
}

#[test]
fn test_tree_cache_fills_leaf_from_root() {
    let policy = PolicyConfig::Tree {
        leaves: 2,
        policy: Box::new(PolicyConfig::Lru),
    };
    let mut c = cache(3, policy);
    assert!(!c.get(1));
    c.put(1);
    {
        let EvictionPolicy::Tree(t) = c.policy() else {
            panic!("expected a tree cache");
        };
        assert_eq!(t.root().dump(), vec![1]);
        assert_eq!(t.leaves().iter().filter(|l| l.has(1)).count(), 1);
    }
    for _ in 0..32 {
        assert!(c.get(1));
    }
    let EvictionPolicy::Tree(t) = c.policy() else {
        panic!("expected a tree cache");
    };
    assert!(t.leaves().iter().all(|l| l.dump() == vec![1]));
}

#[test]
fn test_composite_members_are_validated() {
    let nested = PolicyConfig::Shard {
        shards: 2,
        policy: Box::new(PolicyConfig::Path {
            levels: 2,
            policy: Box::default(),
        }),
    };
    let too_many = PolicyConfig::Shard {
        shards: 5,
        policy: Box::new(PolicyConfig::Lru),
    };
    let no_leaves = PolicyConfig::Tree {
        leaves: 0,
        policy: Box::new(PolicyConfig::Lru),
    };
    for policy in [nested, too_many, no_leaves] {
        let err = Cache::new(1, 4, &policy, &AdmissionConfig::Always, &RunContext::new(1));
        assert!(matches!(err, Err(ConfigError::InvalidParameter { .. })), "{policy:?}");
    }
}

#[test]
fn test_composite_policy_from_json() {
    let policy: PolicyConfig =
        serde_json::from_str(r#"{"name": "SHARD", "shards": 3, "policy": {"name": "FIFO"}}"#).unwrap();
    assert_eq!(
        policy,
        PolicyConfig::Shard {
            shards: 3,
            policy: Box::new(PolicyConfig::Fifo),
        }
    );
    assert!(PolicyConfig::Array {
        caches: 2,
        policy: Box::new(PolicyConfig::Min),
        weights: None,
    }
    .needs_trace());
}
