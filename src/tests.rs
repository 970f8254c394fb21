//! Multi-module scenario tests, aggregated the way the teacher's own
//! `src/tests.rs` aggregates coroutine-level integration tests — here
//! exercising the scheduler, channel engine, cancellation and select
//! together instead of the coroutine primitive alone.

use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::channel::{channel, ChannelKind};
use crate::config::SchedulerConfig;
use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::select::Select;

#[test]
fn ping_pong_between_two_coroutines() {
    let scheduler = Scheduler::new(SchedulerConfig::default().worker_threads(2));
    let handle = scheduler.handle();
    let (ping_tx, ping_rx) = channel::<i32>(ChannelKind::Rendezvous);
    let (pong_tx, pong_rx) = channel::<i32>(ChannelKind::Rendezvous);

    handle.spawn(move || {
        for i in 0..20 {
            ping_tx.send(i).unwrap();
            assert_eq!(pong_rx.recv().unwrap(), i);
        }
    });
    handle.spawn(move || {
        for _ in 0..20 {
            let v = ping_rx.recv().unwrap();
            pong_tx.send(v).unwrap();
        }
    });

    scheduler.drain(2_000).unwrap();
    scheduler.shutdown();
}

#[test]
fn producers_times_consumers_drain_a_buffered_channel() {
    const PRODUCERS: i32 = 4;
    const CONSUMERS: i32 = 3;
    const PER_PRODUCER: i32 = 50;

    let scheduler = Scheduler::new(SchedulerConfig::default().worker_threads(4));
    let handle = scheduler.handle();
    let (tx, rx) = channel::<i32>(ChannelKind::Buffered(8));
    let (done_tx, done_rx) = channel::<i32>(ChannelKind::Unbounded);
    let (finished_tx, finished_rx) = channel::<()>(ChannelKind::Unbounded);

    for p in 0..PRODUCERS {
        let tx = tx.clone();
        let finished_tx = finished_tx.clone();
        handle.spawn(move || {
            for i in 0..PER_PRODUCER {
                tx.send(p * PER_PRODUCER + i).unwrap();
            }
            finished_tx.send(()).unwrap();
        });
    }
    drop(finished_tx);

    for _ in 0..CONSUMERS {
        let rx = rx.clone();
        let done_tx = done_tx.clone();
        handle.spawn(move || {
            let mut count = 0;
            loop {
                match rx.recv() {
                    Ok(_) => count += 1,
                    Err(Error::Closed) => break,
                    Err(e) => panic!("unexpected recv error: {e:?}"),
                }
            }
            done_tx.send(count).unwrap();
        });
    }
    drop(done_tx);

    for _ in 0..PRODUCERS {
        finished_rx.recv_timeout(5_000).unwrap();
    }
    tx.close();

    let mut total = 0;
    for _ in 0..CONSUMERS {
        total += done_rx.recv_timeout(5_000).unwrap();
    }
    assert_eq!(total, PRODUCERS * PER_PRODUCER);

    scheduler.drain(2_000).unwrap();
    scheduler.shutdown();
}

#[test]
fn a_cancellable_recv_returns_cancelled_without_ever_timing_out() {
    let (_tx, rx) = channel::<i32>(ChannelKind::Rendezvous);
    let token = CancellationToken::new();
    let t2 = token.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        t2.cancel();
    });

    let result = rx.recv_c(60_000, Some(&token));
    assert_eq!(result, Err(Error::Cancelled));
    canceller.join().unwrap();
}

#[test]
fn cancelling_a_parent_token_cancels_every_blocked_child_waiter() {
    let (_tx_a, rx_a) = channel::<i32>(ChannelKind::Rendezvous);
    let (_tx_b, rx_b) = channel::<i32>(ChannelKind::Rendezvous);
    let parent = CancellationToken::new();
    let child_a = parent.child();
    let child_b = parent.child();

    let ha = std::thread::spawn(move || rx_a.recv_c(60_000, Some(&child_a)));
    let hb = std::thread::spawn(move || rx_b.recv_c(60_000, Some(&child_b)));

    std::thread::sleep(Duration::from_millis(20));
    parent.cancel();

    assert_eq!(ha.join().unwrap(), Err(Error::Cancelled));
    assert_eq!(hb.join().unwrap(), Err(Error::Cancelled));
}

#[test]
fn select_reports_an_already_ready_clause_without_parking() {
    let (tx, rx) = channel::<&'static str>(ChannelKind::Buffered(1));
    tx.send("ready").unwrap();

    let mut sel = Select::new();
    let (idx, slot) = sel.recv(&rx);
    assert_eq!(sel.wait(0), Ok(idx));
    assert_eq!(slot.take(), Some("ready"));
}

#[test]
fn select_suspends_and_wakes_once_a_clause_becomes_ready() {
    let (tx, rx) = channel::<&'static str>(ChannelKind::Rendezvous);

    let mut sel = Select::new();
    let (idx, slot) = sel.recv(&rx);
    let sender = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        tx.send("late").unwrap();
    });

    let winner = sel.wait(2_000).unwrap();
    assert_eq!(winner, idx);
    assert_eq!(slot.take(), Some("late"));
    sender.join().unwrap();
}
