//! A capacity-10 queue starts full; 10 pushers each add one more item
//! (blocking until room frees up) while 20 poppers drain it, and one
//! final pop past everything times out without leaving any push caller
//! stuck.

use reactor::sync::BoundedQueue;
use reactor::{Reactor, ReactorConfig};
use reactor::scheduler::Timeout;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

const SIZE: usize = 10;

#[test]
fn pushers_and_poppers_drain_cleanly_then_the_extra_pop_times_out() {
    let popped = Rc::new(RefCell::new(Vec::new()));
    let timed_out = Rc::new(RefCell::new(false));
    let popped_for_main = Rc::clone(&popped);
    let timed_out_for_main = Rc::clone(&timed_out);

    let exit_code = Reactor::new(ReactorConfig::new()).run(move || {
        let queue = Rc::new(BoundedQueue::new(SIZE));
        for item in 0..SIZE {
            queue.push(item as u32);
        }

        let remaining_pushers = Rc::new(RefCell::new(SIZE as u32));
        for _ in 0..SIZE {
            let queue = Rc::clone(&queue);
            let remaining_pushers = Rc::clone(&remaining_pushers);
            reactor::spawn_fiber(move || {
                let result = queue.push_timeout(1000, Timeout::after(Duration::from_secs(10)));
                assert!(result.is_ok(), "a pusher should never see its push time out");
                *remaining_pushers.borrow_mut() -= 1;
            });
        }

        let remaining_poppers = Rc::new(RefCell::new(2 * SIZE as u32));
        for _ in 0..(2 * SIZE) {
            let queue = Rc::clone(&queue);
            let popped = Rc::clone(&popped);
            let remaining_poppers = Rc::clone(&remaining_poppers);
            let timed_out = Rc::clone(&timed_out);
            let remaining_pushers = Rc::clone(&remaining_pushers);
            reactor::spawn_fiber(move || {
                let value = queue.pop();
                popped.borrow_mut().push(value);
                let left = {
                    let mut left = remaining_poppers.borrow_mut();
                    *left -= 1;
                    *left
                };
                if left == 0 {
                    assert_eq!(*remaining_pushers.borrow(), 0, "no push caller should still be blocked");
                    let extra = queue.pop_timeout(Timeout::after(Duration::from_secs(1)));
                    *timed_out.borrow_mut() = extra.is_err();
                    reactor::stop(0);
                }
            });
        }
    });

    assert_eq!(exit_code, 0);
    assert_eq!(popped_for_main.borrow().len(), 2 * SIZE);
    assert!(timed_out_for_main.borrow().clone(), "the 11th pop should have timed out");
}
