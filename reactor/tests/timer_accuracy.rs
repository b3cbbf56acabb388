//! Eight one-shot timers at varying delays, two of them cancelled just
//! after arming, plus a recurring timer checked for firing count over a
//! fixed window.

use reactor::{Reactor, ReactorConfig};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[test]
fn one_shot_timers_fire_except_cancelled_ones() {
    let bits = Rc::new(Cell::new(0u8));
    let bits_for_main = Rc::clone(&bits);

    let exit_code = Reactor::new(ReactorConfig::new()).run(move || {
        let delays_ms = [2u64, 200, 6, 120, 37, 40, 133, 8];
        let handles = Rc::new(RefCell::new(Vec::new()));

        for (i, &ms) in delays_ms.iter().enumerate() {
            let bits = Rc::clone(&bits);
            let id = reactor::register_timer(Duration::from_millis(ms), move || {
                bits.set(bits.get() | (1 << i));
            });
            handles.borrow_mut().push(id);
        }

        reactor::sleep(Duration::from_millis(3));
        let to_cancel = handles.borrow();
        reactor::cancel_timer(to_cancel[0]);
        reactor::cancel_timer(to_cancel[6]);
        drop(to_cancel);

        reactor::sleep(Duration::from_millis(200));
        reactor::stop(0);
    });

    assert_eq!(exit_code, 0);
    assert_eq!(bits_for_main.get(), 0b1011_1111);
}

#[test]
fn recurring_timer_fires_expected_number_of_times() {
    let count = Rc::new(Cell::new(0u32));
    let count_for_main = Rc::clone(&count);

    let exit_code = Reactor::new(ReactorConfig::new()).run(move || {
        let count = Rc::clone(&count);
        let id = reactor::register_recurring_timer(Duration::from_millis(7), move || {
            count.set(count.get() + 1);
        });
        reactor::sleep(Duration::from_millis(203));
        reactor::cancel_timer(id);
        reactor::stop(0);
    });

    assert_eq!(exit_code, 0);
    let fires = count_for_main.get();
    assert!((29..=30).contains(&fires), "recurring timer fired {fires} times, expected 29 or 30");
}
