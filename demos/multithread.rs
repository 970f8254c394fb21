//! Many coroutines spread across the work-stealing scheduler's worker
//! threads, each yielding cooperatively between counts.

use coro_rt::config::SchedulerConfig;
use coro_rt::coroutine;
use coro_rt::scheduler::Scheduler;

fn main() {
    let workers = num_cpus::get().max(1);
    let scheduler = Scheduler::new(SchedulerConfig::default().worker_threads(workers));
    let handle = scheduler.handle();

    for thread_id in 0..workers {
        handle.spawn(move || {
            for count in 0..10 {
                println!("Coroutine running in worker {thread_id}: counting {count}");
                coroutine::sched();
            }
        });
    }

    scheduler.drain(2_000).unwrap();
    scheduler.shutdown();
}
