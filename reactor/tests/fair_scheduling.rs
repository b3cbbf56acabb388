//! Four fibers contending on a capacity-3 semaphore each do 1000
//! acquire/increment/release iterations; every counter should reach
//! (close to) 1000 with no fiber starved out.

use reactor::sync::Semaphore;
use reactor::{Reactor, ReactorConfig};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn every_worker_makes_progress_under_contention() {
    let counters = Rc::new(RefCell::new([0u32; 4]));
    let counters_for_main = Rc::clone(&counters);

    let exit_code = Reactor::new(ReactorConfig::new()).run(move || {
        let sem = Rc::new(Semaphore::new(3));
        let remaining = Rc::new(RefCell::new(4u32));

        for i in 0..4usize {
            let sem = Rc::clone(&sem);
            let counters = Rc::clone(&counters_for_main);
            let remaining = Rc::clone(&remaining);
            reactor::spawn_fiber(move || {
                for _ in 0..1000 {
                    sem.acquire(2);
                    counters.borrow_mut()[i] += 1;
                    sem.release(2);
                    reactor::yield_now();
                }
                *remaining.borrow_mut() -= 1;
                if *remaining.borrow() == 0 {
                    reactor::stop(0);
                }
            });
        }
    });

    assert_eq!(exit_code, 0);
    for (i, &count) in counters.borrow().iter().enumerate() {
        assert!(count >= 999, "worker {i} only made {count} iterations");
    }
}
