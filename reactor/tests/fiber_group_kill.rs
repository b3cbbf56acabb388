//! A group with two sleeping spawned members plus the current fiber
//! tracked as a member; closing it with `wait_for_exit` cancels the
//! siblings, rethrows into the closer, and leaves the group reusable
//! afterward.

use reactor::error::FiberInterrupt;
use reactor::group::FiberGroup;
use reactor::{Reactor, ReactorConfig};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn closing_a_group_cancels_members_and_rethrows_into_the_closer() {
    let siblings_cancelled = Rc::new(Cell::new(0u32));
    let closer_rethrew = Rc::new(Cell::new(false));
    let reopened_after = Rc::new(Cell::new(false));

    let siblings_for_main = Rc::clone(&siblings_cancelled);
    let closer_for_main = Rc::clone(&closer_rethrew);
    let reopened_for_main = Rc::clone(&reopened_after);

    let exit_code = Reactor::new(ReactorConfig::new()).run(move || {
        let group = FiberGroup::open();

        for _ in 0..2 {
            let siblings_cancelled = Rc::clone(&siblings_cancelled);
            group.spawn_fiber(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    reactor::sleep(Duration::from_secs(60));
                }));
                if let Err(payload) = result {
                    if payload.downcast_ref::<FiberInterrupt>().is_some() {
                        siblings_cancelled.set(siblings_cancelled.get() + 1);
                    }
                }
            });
        }

        let closer_rethrew = Rc::clone(&closer_rethrew);
        let reopened_after = Rc::clone(&reopened_after);
        reactor::spawn_fiber(move || {
            // give the siblings a chance to actually start sleeping
            reactor::yield_now();
            reactor::yield_now();

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                group.run_tracked(|| {
                    group.close(true);
                });
            }));
            closer_rethrew.set(result.is_err());
            assert!(!group.is_open());

            let reopened = FiberGroup::open();
            reopened_after.set(reopened.is_open());

            reactor::stop(0);
        });
    });

    assert_eq!(exit_code, 0);
    assert_eq!(siblings_for_main.get(), 2);
    assert!(closer_for_main.get(), "close() should rethrow into a member calling it");
    assert!(reopened_for_main.get());
}
