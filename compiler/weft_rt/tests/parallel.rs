//! Worker-pool stress: many jobs, many tasks, exactly-once execution.

#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use weft_rt::weft_do_par_for;

struct Closure {
    counters: Vec<AtomicUsize>,
    done: AtomicBool,
}

extern "C" fn record_task(index: i32, closure: *mut u8) {
    let c = unsafe { &*closure.cast::<Closure>() };
    assert!(
        !c.done.load(Ordering::SeqCst),
        "task ran after its job's master returned"
    );
    c.counters[usize::try_from(index).unwrap()].fetch_add(1, Ordering::SeqCst);
}

#[test]
fn sixteen_jobs_of_a_thousand_tasks_each() {
    const JOBS: usize = 16;
    const TASKS: i32 = 1000;

    let mut handles = Vec::new();
    for _ in 0..JOBS {
        handles.push(std::thread::spawn(|| {
            let mut closure = Closure {
                counters: (0..TASKS).map(|_| AtomicUsize::new(0)).collect(),
                done: AtomicBool::new(false),
            };
            weft_do_par_for(record_task, 0, TASKS, (&mut closure as *mut Closure).cast());
            // The master only returns once every worker has left the job;
            // from here no task of this job may run again.
            closure.done.store(true, Ordering::SeqCst);
            for (i, c) in closure.counters.iter().enumerate() {
                assert_eq!(c.load(Ordering::SeqCst), 1, "task {i} ran a wrong number of times");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn nested_state_survives_concurrent_jobs() {
    // Two sequenced parallel loops over shared state observe each
    // other's writes: the master's return is the happens-before edge.
    let data: Arc<Vec<AtomicUsize>> = Arc::new((0..256).map(|_| AtomicUsize::new(1)).collect());

    struct Shared {
        data: Arc<Vec<AtomicUsize>>,
    }

    extern "C" fn double_task(index: i32, closure: *mut u8) {
        let s = unsafe { &*closure.cast::<Shared>() };
        let slot = &s.data[usize::try_from(index).unwrap()];
        slot.fetch_add(slot.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    let mut shared = Shared { data: Arc::clone(&data) };
    let closure = (&mut shared as *mut Shared).cast::<u8>();
    weft_do_par_for(double_task, 0, 256, closure);
    weft_do_par_for(double_task, 0, 256, closure);

    for slot in data.iter() {
        assert_eq!(slot.load(Ordering::SeqCst), 4);
    }
}
