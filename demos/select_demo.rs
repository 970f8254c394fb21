//! Waiting on two channels at once with [`coro_rt::select::Select`]:
//! whichever producer finishes first wins the clause, and the loser's
//! registration is cancelled without ever completing a transfer.

use std::thread;
use std::time::Duration;

use coro_rt::channel::{channel, ChannelKind};
use coro_rt::select::Select;

fn main() {
    let (fast_tx, fast_rx) = channel::<&'static str>(ChannelKind::Rendezvous);
    let (slow_tx, slow_rx) = channel::<&'static str>(ChannelKind::Rendezvous);

    let fast = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        fast_tx.send("fast producer").unwrap();
    });
    let slow = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        let _ = slow_tx.send("slow producer");
    });

    let mut select = Select::new();
    let (fast_idx, fast_slot) = select.recv(&fast_rx);
    let (slow_idx, slow_slot) = select.recv(&slow_rx);

    let winner = select.wait(5_000).unwrap();
    if winner == fast_idx {
        println!("winner: {}", fast_slot.take().unwrap());
    } else if winner == slow_idx {
        println!("winner: {}", slow_slot.take().unwrap());
    }

    fast.join().unwrap();
    drop(slow);
}
