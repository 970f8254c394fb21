//! Two coroutines batting a value back and forth over a pair of
//! rendezvous channels.

use coro_rt::channel::{channel, ChannelKind};
use coro_rt::config::SchedulerConfig;
use coro_rt::scheduler::Scheduler;

fn main() {
    let scheduler = Scheduler::new(SchedulerConfig::default().worker_threads(2));
    let handle = scheduler.handle();
    let (ping_tx, ping_rx) = channel::<u32>(ChannelKind::Rendezvous);
    let (pong_tx, pong_rx) = channel::<u32>(ChannelKind::Rendezvous);

    handle.spawn(move || {
        for i in 0..10 {
            println!("ping {i}");
            ping_tx.send(i).unwrap();
            let reply = pong_rx.recv().unwrap();
            assert_eq!(reply, i);
        }
    });

    handle.spawn(move || {
        for _ in 0..10 {
            let v = ping_rx.recv().unwrap();
            println!("pong {v}");
            pong_tx.send(v).unwrap();
        }
    });

    scheduler.drain(2_000).unwrap();
    scheduler.shutdown();
}
