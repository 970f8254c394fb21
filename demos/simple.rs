//! Bare-metal coroutine primitive: spawn, resume, yield, join.

use coro_rt::coroutine;

fn main() {
    let coro = coroutine::create(
        move || {
            println!("1. Hello in coroutine!");

            coroutine::sched();

            println!("3. We are back!!");

            let inner = coroutine::create(
                move || {
                    println!("4. Begin counting ...");
                    for i in 0..5 {
                        println!("Counting {i}");
                    }
                    println!("5. Counting finished");
                },
                64 * 1024,
            );
            inner.join().unwrap();

            println!("6. Good bye");
        },
        64 * 1024,
    );

    coro.resume().unwrap();

    println!("2. We are here!");

    coro.resume().unwrap();

    println!("7. Back to main.");
}
