//! Fiber A waits on an event; fiber B sets an unrelated event, injects
//! an exception into A, then sets the event A is waiting on. A must
//! observe the injected exception, never the event wakeup.

use reactor::sync::Event;
use reactor::{FiberHandle, Reactor, ReactorConfig};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug)]
struct TheException(&'static str);

#[test]
fn injected_exception_preempts_event_wakeup() {
    let woke_on_event = Rc::new(Cell::new(false));
    let caught_message = Rc::new(RefCell::new(None::<String>));
    let woke_for_main = Rc::clone(&woke_on_event);
    let caught_for_main = Rc::clone(&caught_message);

    let exit_code = Reactor::new(ReactorConfig::new()).run(move || {
        let event1 = Rc::new(Event::new());
        let event2 = Rc::new(Event::new());
        let handle_cell: Rc<RefCell<Option<FiberHandle>>> = Rc::new(RefCell::new(None));

        let a_event2 = Rc::clone(&event2);
        let a_woke = Rc::clone(&woke_on_event);
        let a_caught = Rc::clone(&caught_message);
        // Spawned first, so it runs (and blocks on event2) before B gets
        // a turn: the scheduler drains the ready queue in spawn order
        // once the fiber that did the spawning finishes.
        let a_handle = reactor::spawn_fiber(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| a_event2.wait()));
            match result {
                Ok(()) => a_woke.set(true),
                Err(payload) => {
                    if let Some(exc) = payload.downcast_ref::<TheException>() {
                        *a_caught.borrow_mut() = Some(exc.0.to_string());
                    }
                }
            }
        });
        *handle_cell.borrow_mut() = Some(a_handle);

        let b_event1 = Rc::clone(&event1);
        let b_event2 = Rc::clone(&event2);
        let b_handle_cell = Rc::clone(&handle_cell);
        reactor::spawn_fiber(move || {
            b_event1.set();
            let target = b_handle_cell.borrow().unwrap();
            reactor::throw_in_fiber(target, TheException("The Exception"), false).unwrap();
            b_event2.set();
        });

        reactor::spawn_fiber(move || {
            let _ = reactor::join_fiber(a_handle);
            reactor::stop(0);
        });
    });

    assert_eq!(exit_code, 0);
    assert!(!woke_for_main.get(), "fiber A should not have observed the event wakeup");
    assert_eq!(caught_for_main.borrow().as_deref(), Some("The Exception"));
}
