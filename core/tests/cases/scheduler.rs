use cachenet_core::engine::Event;
use cachenet_core::*;

use crate::common::line;

#[derive(Default)]
struct Recorder {
    seen: Vec<(SimTime, u32)>,
    follow_up: bool,
}

impl EventHandler for Recorder {
    type Payload = u32;

    fn handle(&mut self, event: Event<u32>, scheduler: &mut Scheduler<u32>) -> Result<(), SimError> {
        self.seen.push((event.time, event.payload));
        if self.follow_up && event.payload < 100 {
            scheduler.schedule_after(0, event.payload + 100)?;
        }
        Ok(())
    }
}

#[test]
fn test_out_of_order_inserts_pop_in_time_order() {
    let mut s = Scheduler::new();
    s.schedule(30, 1).unwrap();
    s.schedule(10, 2).unwrap();
    s.schedule(20, 3).unwrap();
    s.schedule(10, 4).unwrap();
    let mut r = Recorder::default();
    let outcome = s.run(&mut r, RunLimits::default()).unwrap();
    assert_eq!(r.seen, vec![(10, 2), (10, 4), (20, 3), (30, 1)]);
    assert_eq!(outcome.processed, 4);
    assert_eq!(s.now(), 30);
}

#[test]
fn test_zero_delay_follow_up_runs_after_pending_same_time_events() {
    let mut s = Scheduler::new();
    s.schedule(10, 1).unwrap();
    s.schedule(10, 2).unwrap();
    let mut r = Recorder {
        follow_up: true,
        ..Default::default()
    };
    s.run(&mut r, RunLimits::default()).unwrap();
    assert_eq!(r.seen, vec![(10, 1), (10, 2), (10, 101), (10, 102)]);
}

#[test]
fn test_scheduling_in_the_past_is_a_causality_error() {
    let mut s = Scheduler::new();
    s.schedule(50, 1).unwrap();
    let mut r = Recorder::default();
    assert!(s.step(&mut r).unwrap());
    assert!(matches!(
        s.schedule(40, 2),
        Err(SimError::Causality { at: 40, now: 50 })
    ));
    // Scheduling at the current instant is fine.
    s.schedule(50, 3).unwrap();
    assert!(!s.is_empty());
}

#[test]
fn test_workload_going_back_in_time_fails_the_run() {
    let mut h = line(CacheSpec::lru(1), StrategyConfig::Lce);
    h.request(100, 1, 10).request(50, 1, 11);
    let mut sim = h.build();
    let err = sim.run(&mut CollectorSet::new(), RunLimits::default());
    assert!(matches!(err, Err(SimError::Causality { at: 50, now: 100 })));
}

#[test]
fn test_clock_follows_pops() {
    let ctx = RunContext::new(0);
    let mut s = Scheduler::with_clock(ctx.clock().clone());
    s.schedule(70, 1).unwrap();
    s.step(&mut Recorder::default()).unwrap();
    assert_eq!(ctx.clock().now(), 70);
}
