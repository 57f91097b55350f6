//! The parallel-loop worker pool.
//!
//! A process-wide pool of worker threads drains a bounded FIFO of jobs.
//! A job covers the index range `next..max` of one parallel loop; workers
//! claim one index at a time under the queue mutex, run the task outside
//! it, and decrement the job's `active_workers` when done.
//!
//! Protocol invariants:
//!
//! - queue slots are indexed modulo `MAX_JOBS`; the tail catching up to
//!   the head is a fatal overflow, reported and aborted, never wrapped;
//! - a completed job's `id` is 0, and live ids are never 0, so a stale
//!   job handle can always detect completion;
//! - the enqueueing thread participates as a worker for its own job and
//!   never sleeps on the queue condvar: once its job leaves the head it
//!   busy-checks `active_workers`, so it cannot deadlock with an empty
//!   queue.
//!
//! Worker count comes from `WEFT_NUMTHREADS` (default 8), clamped to
//! `MAX_THREADS`. Workers are detached and live for the process.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::error;

const MAX_JOBS: usize = 65536;
const MAX_THREADS: usize = 64;
const DEFAULT_THREADS: usize = 8;

/// One task of a parallel loop: `(index, closure)`.
pub type TaskFn = extern "C" fn(i32, *mut u8);

#[derive(Clone, Copy)]
struct Job {
    f: Option<TaskFn>,
    next: i32,
    max: i32,
    closure: *mut u8,
    id: i32,
    active_workers: i32,
}

impl Job {
    const EMPTY: Job = Job {
        f: None,
        next: 0,
        max: 0,
        closure: std::ptr::null_mut(),
        id: 0,
        active_workers: 0,
    };
}

// Closures point at caller-owned state that outlives the job; the queue
// only moves the pointer between threads.
unsafe impl Send for Job {}

struct WorkQueue {
    jobs: Vec<Job>,
    head: usize,
    tail: usize,
    ids: i32,
}

impl WorkQueue {
    const fn new() -> WorkQueue {
        WorkQueue {
            jobs: Vec::new(),
            head: 0,
            tail: 0,
            ids: 1,
        }
    }

    fn next_id(&mut self) -> i32 {
        let id = self.ids;
        self.ids = self.ids.wrapping_add(1);
        // Zero flags a completed job; skip it when the counter wraps.
        if self.ids == 0 {
            self.ids = 1;
        }
        if id == 0 {
            self.next_id()
        } else {
            id
        }
    }
}

static QUEUE: Mutex<WorkQueue> = Mutex::new(WorkQueue::new());
static NOT_EMPTY: Condvar = Condvar::new();
static POOL_STARTED: AtomicBool = AtomicBool::new(false);

fn configured_threads() -> usize {
    let n = std::env::var("WEFT_NUMTHREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_THREADS);
    let hardware = std::thread::available_parallelism().map_or(MAX_THREADS, usize::from);
    n.clamp(1, hardware.min(MAX_THREADS))
}

fn ensure_pool() {
    if POOL_STARTED.swap(true, Ordering::SeqCst) {
        return;
    }
    {
        let mut q = QUEUE.lock();
        if q.jobs.is_empty() {
            q.jobs.resize_with(MAX_JOBS, || Job::EMPTY);
        }
    }
    // The enqueueing thread is also a worker, hence threads - 1.
    for _ in 1..configured_threads() {
        std::thread::spawn(|| worker(None));
    }
}

/// A handle the master thread keeps on its own enqueued job.
struct MasterJob {
    id: i32,
    slot: usize,
}

fn worker(master: Option<MasterJob>) {
    loop {
        let mut q = QUEUE.lock();

        if let Some(m) = &master {
            if q.jobs[m.slot].id != m.id {
                // Our job has been fully claimed. Busy-check the stragglers
                // rather than sleeping on the condvar: the queue may stay
                // empty forever and no one would wake us.
                while q.jobs[m.slot].active_workers != 0 {
                    drop(q);
                    std::hint::spin_loop();
                    q = QUEUE.lock();
                }
                return;
            }
        }

        if q.head == q.tail {
            debug_assert!(master.is_none(), "the master thread cannot sleep on the queue");
            NOT_EMPTY.wait(&mut q);
            continue;
        }

        let slot = q.head;
        if q.jobs[slot].next == q.jobs[slot].max {
            // Fully claimed; retire it from the head.
            q.head = (q.head + 1) % MAX_JOBS;
            q.jobs[slot].id = 0;
            continue;
        }

        let index = q.jobs[slot].next;
        let f = q.jobs[slot].f;
        let closure = q.jobs[slot].closure;
        q.jobs[slot].next += 1;
        q.jobs[slot].active_workers += 1;
        drop(q);

        if let Some(f) = f {
            f(index, closure);
        }

        QUEUE.lock().jobs[slot].active_workers -= 1;
    }
}

/// Run `f(i, closure)` for every `i` in `[min, min+size)` across the
/// worker pool. Returns when every index has executed.
#[no_mangle]
pub extern "C" fn weft_do_par_for(f: TaskFn, min: i32, size: i32, closure: *mut u8) {
    if size <= 0 {
        return;
    }
    ensure_pool();

    let (id, slot) = {
        let mut q = QUEUE.lock();
        let id = q.next_id();
        let slot = q.tail;
        let new_tail = (q.tail + 1) % MAX_JOBS;
        if new_tail == q.head {
            drop(q);
            error("parallel job queue overflow");
            return;
        }
        q.jobs[slot] = Job {
            f: Some(f),
            next: min,
            max: min.saturating_add(size),
            closure,
            id,
            active_workers: 0,
        };
        q.tail = new_tail;
        (id, slot)
    };

    NOT_EMPTY.notify_all();

    // Participate until our job is done.
    worker(Some(MasterJob { id, slot }));
}
