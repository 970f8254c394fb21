//! Two coroutines sharing mutable state and reporting their result back
//! over a channel instead of a value-passing yield.

use std::sync::{Arc, Mutex};

use coro_rt::channel::{channel, ChannelKind};
use coro_rt::config::SchedulerConfig;
use coro_rt::scheduler::Scheduler;

fn main() {
    let scheduler = Scheduler::new(SchedulerConfig::default().worker_threads(2));
    let handle = scheduler.handle();
    let shared = Arc::new(Mutex::new(0));
    let (tx, rx) = channel::<usize>(ChannelKind::Buffered(2));

    let shared1 = shared.clone();
    let tx1 = tx.clone();
    handle.spawn(move || {
        *shared1.lock().unwrap() = 1;
        let val = *shared1.lock().unwrap();
        tx1.send(val).unwrap();
    });

    let shared2 = shared.clone();
    handle.spawn(move || {
        *shared2.lock().unwrap() = 2;
        let val = *shared2.lock().unwrap();
        tx.send(val).unwrap();
    });

    println!("First: {}", rx.recv().unwrap());
    println!("Second: {}", rx.recv().unwrap());

    scheduler.drain(1_000).unwrap();
    scheduler.shutdown();
}
