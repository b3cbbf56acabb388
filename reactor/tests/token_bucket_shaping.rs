//! Five workers draw a fixed total of tokens from a shared throttler;
//! the whole run should take a little over two seconds given the
//! bucket's capacity and refill rate.
//!
//! Burst capacity is 12,800 tokens, refilling at 6,400 tokens/sec. The
//! five workers together withdraw 25,600 tokens, so the first 12,800
//! come from the initial burst and the remaining 12,800 trickle in over
//! the next ~2 seconds of refill.

use reactor::sync::Throttler;
use reactor::{Reactor, ReactorConfig};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn five_workers_drain_the_bucket_within_expected_window() {
    let workloads: [&[(u32, u32)]; 5] = [
        &[(150, 100)],
        &[(3, 1000)],
        &[(3, 1000)],
        &[(2, 1000)],
        &[(26, 100)],
    ];

    let started = Instant::now();

    let exit_code = Reactor::new(ReactorConfig::new()).run(move || {
        let throttler = Rc::new(Throttler::new(12_800, 6_400.0));
        let remaining = Rc::new(RefCell::new(workloads.len() as u32));

        for workload in workloads {
            let throttler = Rc::clone(&throttler);
            let remaining = Rc::clone(&remaining);
            reactor::spawn_fiber(move || {
                for &(repeats, cost) in workload {
                    for _ in 0..repeats {
                        throttler.acquire(cost);
                    }
                }
                *remaining.borrow_mut() -= 1;
                if *remaining.borrow() == 0 {
                    reactor::stop(0);
                }
            });
        }
    });

    let elapsed = started.elapsed();
    assert_eq!(exit_code, 0);
    assert!(
        elapsed >= Duration::from_millis(1900) && elapsed <= Duration::from_millis(2200),
        "draining the bucket took {elapsed:?}, expected roughly 1.9-2.2s"
    );
}
