use crate::common::{Outcome, Served, TestHarness};
use cachenet_core::strategy::hashrouting::DEFAULT_REPLICAS;
use cachenet_core::strategy::{HashRing, HashRouting, InterClusterRouting};
use cachenet_core::*;

const CONTENTS: u64 = 24;

/// Receivers 1 and 2 behind router 3, which reaches the source 6 through
/// either cache 4 (the shorter way) or cache 5.
fn fabric(routing: HashRouting) -> TestHarness {
    let mut h = TestHarness::new();
    h.receiver(1)
        .receiver(2)
        .router(3)
        .cache_router(4, CacheSpec::lru(64))
        .cache_router(5, CacheSpec::lru(64))
        .source(6)
        .connect(1, 3)
        .connect(2, 3)
        .connect(3, 4)
        .connect(3, 5)
        .connect(4, 6)
        .connect_with_delay(5, 6, 2 * MS)
        .strategy(StrategyConfig::Hashrouting {
            routing,
            replicas: DEFAULT_REPLICAS,
        });
    h
}

/// Every content once from receiver 1, then once more from receiver 2.
fn two_rounds(h: &mut TestHarness) {
    let contents: Vec<ContentId> = (0..CONTENTS).collect();
    h.trace(0, 10_000, 1, &contents);
    h.trace(1_000_000, 10_000, 2, &contents);
}

fn owner(k: ContentId) -> NodeId {
    HashRing::new(&[4, 5], DEFAULT_REPLICAS).lookup(k).unwrap()
}

fn second_round(out: &Outcome, k: ContentId) -> Option<Served> {
    out.served(CONTENTS + k)
}

#[test]
fn test_both_caches_own_part_of_the_catalogue() {
    let owners: Vec<NodeId> = (0..CONTENTS).map(owner).collect();
    assert!(owners.contains(&4) && owners.contains(&5));
}

#[test]
fn test_symmetric_routing_is_receiver_independent() {
    let mut h = fabric(HashRouting::Symm);
    two_rounds(&mut h);
    let out = h.run();
    let StrategyKind::Hashrouting(hr) = out.sim.strategy() else {
        panic!("expected HASHROUTING");
    };
    for k in 0..CONTENTS {
        assert_eq!(hr.authoritative_cache(k), Some(owner(k)));
        assert_eq!(out.served(k), Some(Served::Source(6)));
        assert_eq!(second_round(&out, k), Some(Served::Cache(owner(k))));
        let other = if owner(k) == 4 { 5 } else { 4 };
        assert!(!out.dump(other).contains(&k));
    }
}

#[test]
fn test_asymmetric_routing_caches_only_on_the_direct_path() {
    let mut h = fabric(HashRouting::Asymm);
    two_rounds(&mut h);
    let out = h.run();
    for k in 0..CONTENTS {
        let expected = if owner(k) == 4 {
            Served::Cache(4)
        } else {
            Served::Source(6)
        };
        assert_eq!(second_round(&out, k), Some(expected), "content {k}");
    }
    assert!(out.dump(5).is_empty());
}

#[test]
fn test_multicast_sends_a_branch_copy_to_the_owner() {
    let mut h = fabric(HashRouting::Multicast);
    two_rounds(&mut h);
    let out = h.run();
    for k in 0..CONTENTS {
        assert_eq!(second_round(&out, k), Some(Served::Cache(owner(k))));
    }
    let branch_hops: Vec<_> = out
        .recorder
        .content_hops
        .iter()
        .filter(|hop| !hop.main_path)
        .collect();
    assert!(!branch_hops.is_empty());
    assert!(branch_hops.iter().all(|hop| hop.from == 6 && hop.to == 5));
}

#[test]
fn test_owner_removal_remaps_to_survivor() {
    let mut h = fabric(HashRouting::Symm);
    two_rounds(&mut h);
    h.topology_change(500_000, TopologyChange::RemoveNode { node: 4 });
    let out = h.run();
    let StrategyKind::Hashrouting(hr) = out.sim.strategy() else {
        panic!("expected HASHROUTING");
    };
    for k in 0..CONTENTS {
        assert_eq!(hr.authoritative_cache(k), Some(5));
        let expected = if owner(k) == 5 {
            Served::Cache(5)
        } else {
            Served::Source(6)
        };
        assert_eq!(second_round(&out, k), Some(expected), "content {k}");
    }
}

#[test]
fn test_restored_owner_takes_its_contents_back() {
    let mut h = fabric(HashRouting::Symm);
    h.request(0, 1, 0);
    h.topology_change(10_000, TopologyChange::RemoveNode { node: 4 });
    h.topology_change(20_000, TopologyChange::RestoreNode { node: 4 });
    let out = h.run();
    let StrategyKind::Hashrouting(hr) = out.sim.strategy() else {
        panic!("expected HASHROUTING");
    };
    for k in 0..CONTENTS {
        assert_eq!(hr.authoritative_cache(k), Some(owner(k)));
    }
    assert_eq!(out.sim.network().version(), 2);
}

#[test]
fn test_unreachable_owner_falls_back_to_source() {
    let mut h = fabric(HashRouting::Symm);
    h.topology_change(0, TopologyChange::RemoveLink { a: 3, b: 4 })
        .topology_change(0, TopologyChange::RemoveLink { a: 4, b: 6 });
    let contents: Vec<ContentId> = (0..CONTENTS).collect();
    h.trace(10_000, 10_000, 1, &contents);
    let out = h.run();
    for k in 0..CONTENTS {
        if owner(k) == 4 {
            assert_eq!(out.served(k), Some(Served::Source(6)));
            assert!(out.recorder.degraded.contains(&(k, 4)));
        }
    }
    let sessions = &out.results()["SESSIONS"];
    assert_eq!(sessions["FAILED"], 0);
}

#[test]
fn test_edge_proxy_keeps_local_copies_of_remote_contents() {
    let mut h = TestHarness::new();
    h.receiver(1)
        .cache_router(3, CacheSpec::lru(40))
        .cache_router(4, CacheSpec::lru(40))
        .source(6)
        .connect(1, 3)
        .connect(3, 4)
        .connect(4, 6)
        .strategy(StrategyConfig::HrEdgeCache {
            routing: HashRouting::Symm,
            edge_cache_ratio: 0.5,
            replicas: DEFAULT_REPLICAS,
        });
    let contents: Vec<ContentId> = (0..10).collect();
    h.trace(0, 10_000, 1, &contents);
    h.trace(1_000_000, 10_000, 1, &contents);
    let out = h.run();

    let network = out.sim.network();
    assert_eq!(network.cache(3).unwrap().capacity(), 20);
    assert_eq!(network.local_cache(3).unwrap().capacity(), 20);

    let ring = HashRing::new(&[3, 4], DEFAULT_REPLICAS);
    let mut remote: Vec<ContentId> = contents
        .iter()
        .copied()
        .filter(|&k| ring.lookup(k) == Some(4))
        .collect();
    remote.sort_unstable();
    let mut local = network.local_cache(3).unwrap().dump();
    local.sort_unstable();
    assert_eq!(local, remote);

    for k in 10..20 {
        assert_eq!(out.served(k), Some(Served::Cache(3)));
    }
}

#[test]
fn test_edge_requires_caching_neighbour() {
    let ctx = RunContext::new(0);
    let mut b = Network::builder();
    b.node(1, NodeRole::Receiver).unwrap();
    b.node(3, NodeRole::Router).unwrap();
    b.node(6, NodeRole::Source).unwrap();
    b.link(1, 3, MS, None, LinkKind::Internal).unwrap();
    b.link(3, 6, MS, None, LinkKind::Internal).unwrap();
    let network = b.build(&ctx).unwrap();
    let err = StrategyConfig::HrEdgeCache {
        routing: HashRouting::Symm,
        edge_cache_ratio: 0.5,
        replicas: DEFAULT_REPLICAS,
    }
    .build(&network, &ctx);
    assert!(matches!(err, Err(ConfigError::NoEdgeCache(1))));
}

fn hybrid(strategy: StrategyConfig) -> TestHarness {
    let mut h = fabric(HashRouting::Symm);
    h.strategy(strategy);
    two_rounds(&mut h);
    h
}

#[test]
fn test_hybrid_am_multicasts_only_short_branches() {
    // Diameter is 3 hops; the branch from source 6 to cache 5 is 1 hop.
    let out = hybrid(StrategyConfig::HrHybridAm {
        max_stretch: 0.2,
        replicas: DEFAULT_REPLICAS,
    })
    .run();
    let StrategyKind::HrHybridAm(hr) = out.sim.strategy() else {
        panic!("expected HR_HYBRID_AM");
    };
    assert!(hr.max_branch().unwrap() < 1.0);
    for k in 0..CONTENTS {
        let expected = if owner(k) == 4 {
            Served::Cache(4)
        } else {
            Served::Source(6)
        };
        assert_eq!(second_round(&out, k), Some(expected), "content {k}");
    }
    assert!(out.recorder.content_hops.iter().all(|hop| hop.main_path));

    let out = hybrid(StrategyConfig::HrHybridAm {
        max_stretch: 0.5,
        replicas: DEFAULT_REPLICAS,
    })
    .run();
    let StrategyKind::HrHybridAm(hr) = out.sim.strategy() else {
        panic!("expected HR_HYBRID_AM");
    };
    assert_eq!(hr.max_branch(), Some(1.5));
    for k in 0..CONTENTS {
        assert_eq!(second_round(&out, k), Some(Served::Cache(owner(k))));
    }
    assert!(out
        .recorder
        .content_hops
        .iter()
        .filter(|hop| !hop.main_path)
        .all(|hop| hop.from == 6 && hop.to == 5));
}

#[test]
fn test_hybrid_sm_picks_the_cheaper_delivery() {
    // Through cache 5 the content crosses 3 links, multicast needs 4.
    let out = hybrid(StrategyConfig::HrHybridSm {
        replicas: DEFAULT_REPLICAS,
    })
    .run();
    assert!(out.recorder.content_hops.iter().all(|hop| hop.main_path));
    for k in 0..CONTENTS {
        assert_eq!(second_round(&out, k), Some(Served::Cache(owner(k))));
    }
    let through_five = out
        .recorder
        .content_hops
        .iter()
        .filter(|hop| hop.from == 6 && hop.to == 5)
        .count();
    let owned_by_five = (0..CONTENTS).filter(|&k| owner(k) == 5).count();
    assert_eq!(through_five, owned_by_five);
}

/// receiver 1 -- 2 -- 3 -- source 4, routers 2 and 3 split half local,
/// half coordinated.
fn on_path(routing: HashRouting) -> TestHarness {
    let mut h = TestHarness::new();
    h.receiver(1)
        .cache_router(2, CacheSpec::lru(20))
        .cache_router(3, CacheSpec::lru(20))
        .source(4)
        .connect(1, 2)
        .connect(2, 3)
        .connect(3, 4)
        .strategy(StrategyConfig::HrOnPath {
            routing,
            on_path_cache_ratio: 0.5,
            replicas: DEFAULT_REPLICAS,
        });
    h
}

#[test]
fn test_on_path_fills_local_partitions_along_the_way() {
    let mut h = on_path(HashRouting::Symm);
    let contents: Vec<ContentId> = (0..8).collect();
    h.trace(0, 10_000, 1, &contents);
    h.trace(1_000_000, 10_000, 1, &contents);
    let out = h.run();

    let ring = HashRing::new(&[2, 3], DEFAULT_REPLICAS);
    let network = out.sim.network();
    assert_eq!(network.local_cache(2).unwrap().capacity(), 10);
    let owned_by = |node: NodeId| -> Vec<ContentId> {
        contents
            .iter()
            .copied()
            .filter(|&k| ring.lookup(k) == Some(node))
            .collect()
    };
    let sorted = |mut items: Vec<ContentId>| {
        items.sort_unstable();
        items
    };
    assert_eq!(sorted(network.local_cache(2).unwrap().dump()), owned_by(3));
    assert_eq!(sorted(network.local_cache(3).unwrap().dump()), owned_by(2));
    assert_eq!(out.dump(3), owned_by(3));
    for k in 8..16 {
        assert_eq!(out.served(k), Some(Served::Cache(2)), "request {k}");
    }
}

#[test]
fn test_on_path_needs_a_ratio() {
    assert!(matches!(
        "HR_ON_PATH".parse::<StrategyConfig>(),
        Err(ConfigError::InvalidParameter {
            name: "on_path_cache_ratio",
            ..
        })
    ));
    let cfg: StrategyConfig =
        serde_json::from_str(r#"{"name": "HR_ON_PATH", "on_path_cache_ratio": 0.25}"#).unwrap();
    assert_eq!(cfg.local_cache_ratio(), Some(0.25));
}

/// receiver 1 -- 2 -- 3 -- source 4; cluster 0 holds 1 and 2, cluster 1
/// holds 3 and 4.
fn clustered(intra_routing: HashRouting, inter_routing: InterClusterRouting) -> TestHarness {
    let mut h = TestHarness::new();
    h.receiver(1)
        .cache_router(2, CacheSpec::lru(16))
        .cache_router(3, CacheSpec::lru(16))
        .source(4)
        .connect(1, 2)
        .connect(2, 3)
        .connect(3, 4)
        .cluster(0, &[1, 2])
        .cluster(1, &[3, 4])
        .strategy(StrategyConfig::HrCluster {
            intra_routing,
            inter_routing,
            replicas: DEFAULT_REPLICAS,
        });
    let contents: Vec<ContentId> = (0..8).collect();
    h.trace(0, 10_000, 1, &contents);
    h.trace(1_000_000, 10_000, 1, &contents);
    h
}

#[test]
fn test_cluster_lce_caches_in_every_cluster() {
    let out = clustered(HashRouting::Symm, InterClusterRouting::Lce).run();
    let StrategyKind::HrCluster(hc) = out.sim.strategy() else {
        panic!("expected HR_CLUSTER");
    };
    assert_eq!(hc.cluster_path(0, 1), Some(vec![0, 1]));
    assert_eq!(hc.authoritative_cache(5, 1), Some(3));
    let all: Vec<ContentId> = (0..8).collect();
    assert_eq!(out.dump(2), all);
    assert_eq!(out.dump(3), all);
    for k in 0..8 {
        assert_eq!(out.served(k), Some(Served::Source(4)));
        assert_eq!(out.served(8 + k), Some(Served::Cache(2)));
        assert!(out.recorder.misses.contains(&(k, 3)));
    }
}

#[test]
fn test_cluster_edge_only_looks_up_the_home_cluster() {
    let out = clustered(HashRouting::Multicast, InterClusterRouting::Edge).run();
    assert!(out.recorder.misses.iter().all(|&(_, node)| node == 2));
    assert!(out.dump(3).is_empty());
    assert_eq!(out.dump(2), (0..8).collect::<Vec<_>>());
    for k in 8..16 {
        assert_eq!(out.served(k), Some(Served::Cache(2)));
    }
}

#[test]
fn test_cluster_requires_every_node_assigned() {
    let ctx = RunContext::new(0);
    let mut b = Network::builder();
    b.node(1, NodeRole::Receiver).unwrap();
    b.node(2, NodeRole::Router).unwrap();
    b.node(3, NodeRole::Source).unwrap();
    b.cache(2, CacheSpec::lru(4)).unwrap();
    b.link(1, 2, MS, None, LinkKind::Internal).unwrap();
    b.link(2, 3, MS, None, LinkKind::Internal).unwrap();
    b.cluster(1, 0).unwrap().cluster(2, 0).unwrap();
    let network = b.build(&ctx).unwrap();
    let err = "HR_CLUSTER".parse::<StrategyConfig>().unwrap().build(&network, &ctx);
    assert!(matches!(
        err,
        Err(ConfigError::InvalidParameter { name: "cluster", .. })
    ));
}
