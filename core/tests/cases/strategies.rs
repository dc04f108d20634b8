use crate::common::{chain, Served, TestHarness};
use cachenet_core::strategy::Metacaching;
use cachenet_core::*;

const X: ContentId = 42;

fn holders(out: &crate::common::Outcome) -> Vec<NodeId> {
    [2, 3, 4]
        .into_iter()
        .filter(|&v| out.dump(v).contains(&X))
        .collect()
}

#[test]
fn test_lce_copies_everywhere_on_the_way_back() {
    let mut h = chain(2, StrategyConfig::Lce);
    h.request(0, 1, X).request(100_000, 1, X);
    let out = h.run();
    assert_eq!(holders(&out), vec![2, 3, 4]);
    assert_eq!(out.served(1), Some(Served::Cache(2)));
}

#[test]
fn test_lcd_moves_one_level_down_per_hit() {
    let mut h = chain(2, StrategyConfig::Lcd);
    h.trace(0, 100_000, 1, &[X, X, X, X]);
    let out = h.run();
    assert_eq!(
        out.served_all(),
        vec![
            Served::Source(5),
            Served::Cache(4),
            Served::Cache(3),
            Served::Cache(2)
        ]
    );
    assert_eq!(holders(&out), vec![2, 3, 4]);
}

#[test]
fn test_no_cache_always_reaches_source() {
    let mut h = chain(2, StrategyConfig::NoCache);
    h.trace(0, 100_000, 1, &[X, X, X]);
    let out = h.run();
    assert!(out.served_all().iter().all(|&s| s == Served::Source(5)));
    assert!(holders(&out).is_empty());
    assert!(out.recorder.misses.is_empty());
}

#[test]
fn test_rand_choice_leaves_exactly_one_copy() {
    for seed in 0..8 {
        let mut h = TestHarness::new_with_seed(seed);
        h.receiver(1)
            .cache_router(2, CacheSpec::lru(2))
            .cache_router(3, CacheSpec::lru(2))
            .cache_router(4, CacheSpec::lru(2))
            .source(5)
            .connect(1, 2)
            .connect(2, 3)
            .connect(3, 4)
            .connect(4, 5)
            .strategy(StrategyConfig::RandChoice);
        h.request(0, 1, X);
        let out = h.run();
        assert_eq!(holders(&out).len(), 1, "seed {seed}");
    }
}

#[test]
fn test_rand_bernoulli_extremes() {
    let mut always = chain(2, StrategyConfig::RandBernoulli { p: 1.0 });
    always.request(0, 1, X);
    assert_eq!(holders(&always.run()), vec![2, 3, 4]);

    let mut never = chain(2, StrategyConfig::RandBernoulli { p: 0.0 });
    never.request(0, 1, X);
    assert!(holders(&never.run()).is_empty());
}

#[test]
fn test_prob_cache_with_tiny_window_caches_everywhere() {
    let mut h = chain(2, StrategyConfig::ProbCache { t_tw: 1e-3 });
    h.request(0, 1, X);
    assert_eq!(holders(&h.run()), vec![2, 3, 4]);
}

#[test]
fn test_prob_cache_is_reproducible() {
    let run = |seed| {
        let mut h = TestHarness::new_with_seed(seed);
        h.receiver(1)
            .cache_router(2, CacheSpec::lru(1))
            .cache_router(3, CacheSpec::lru(1))
            .cache_router(4, CacheSpec::lru(1))
            .source(5)
            .connect(1, 2)
            .connect(2, 3)
            .connect(3, 4)
            .connect(4, 5)
            .strategy(StrategyConfig::ProbCache { t_tw: 10.0 });
        h.trace(0, 10_000, 1, &[1, 2, 3, 1, 2, 3, 4, 1, 1, 2]);
        h.run().recorder.stored
    };
    assert_eq!(run(11), run(11));
}

#[test]
fn test_cl4m_picks_most_central_cache() {
    let mut h = chain(2, StrategyConfig::Cl4m);
    h.request(0, 1, X);
    let out = h.run();
    assert_eq!(holders(&out), vec![3]);
}

#[test]
fn test_edge_only_recorders_first_cache() {
    let mut h = chain(2, StrategyConfig::Edge);
    h.request(0, 1, X).request(100_000, 1, X);
    let out = h.run();
    assert_eq!(holders(&out), vec![2]);
    assert_eq!(out.recorder.misses, vec![(0, 2)]);
    assert_eq!(out.served(1), Some(Served::Cache(2)));
}

/// Receiver 10 hangs off router 2, receiver 11 off router 3. Router 2 is
/// close to router 3 but off the shortest path from 11 to the source.
fn off_path(strategy: StrategyConfig) -> TestHarness {
    let mut h = TestHarness::new();
    h.receiver(10)
        .receiver(11)
        .cache_router(2, CacheSpec::lru(4))
        .cache_router(3, CacheSpec::lru(4))
        .source(5)
        .connect(10, 2)
        .connect(11, 3)
        .connect(2, 3)
        .connect_with_delay(2, 5, 3 * MS)
        .connect_with_delay(3, 5, 3 * MS)
        .strategy(strategy);
    h.request(0, 10, X).request(100_000, 11, X);
    h
}

#[test]
fn test_nearest_replica_finds_off_path_copy() {
    let out = off_path(StrategyConfig::NearestReplica {
        metacaching: Metacaching::Lcd,
    })
    .run();
    assert_eq!(out.served(0), Some(Served::Source(5)));
    assert_eq!(out.served(1), Some(Served::Cache(2)));
    assert_eq!(out.recorder.latency[&1], 4 * MS);
}

#[test]
fn test_on_path_strategy_misses_off_path_copy() {
    let out = off_path(StrategyConfig::Lcd).run();
    assert_eq!(out.served(1), Some(Served::Source(5)));
}

#[test]
fn test_nearest_replica_lce_copies_towards_receiver() {
    let out = off_path(StrategyConfig::NearestReplica {
        metacaching: Metacaching::Lce,
    })
    .run();
    assert_eq!(out.dump(3), vec![X]);
}
