use criterion::{criterion_group, criterion_main, Criterion};
use fiber::{init_stack, switch, Stack, MIN_STACK_SIZE};
use std::cell::Cell;

thread_local! {
    static MAIN_SP: Cell<usize> = const { Cell::new(0) };
    static FIBER_SP: Cell<usize> = const { Cell::new(0) };
}

extern "C" fn ping_pong(_arg: usize) -> ! {
    loop {
        // Safety: both cells always hold a live stack pointer by the time
        // either side of the ping-pong reads the other's.
        unsafe { switch(FIBER_SP.with(Cell::as_ptr), MAIN_SP.with(Cell::get)) };
    }
}

fn bench_switch(c: &mut Criterion) {
    let stack = Stack::new(MIN_STACK_SIZE).unwrap();
    // Safety: `stack` is exclusively owned here for the duration of the benchmark.
    let fiber_sp = unsafe { init_stack(&stack, ping_pong, 0) };
    FIBER_SP.with(|cell| cell.set(fiber_sp));

    c.bench_function("switch round trip", |b| {
        b.iter(|| {
            // Safety: `FIBER_SP` was seeded above and only ever resumes this
            // benchmark's own fiber.
            unsafe { switch(MAIN_SP.with(Cell::as_ptr), FIBER_SP.with(Cell::get)) };
        });
    });
}

criterion_group!(benches, bench_switch);
criterion_main!(benches);
