use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eddy::{EventLoop, EventLoopThread};

mod util;
use util::{init, recv_within};

#[test]
fn run_in_loop_is_inline_on_the_owning_thread() {
    init();
    let event_loop = EventLoop::new();
    let ran = Arc::new(AtomicBool::new(false));

    let flag = ran.clone();
    event_loop.run_in_loop(move || flag.store(true, Ordering::SeqCst));

    // Inline execution: done before the loop ever polls.
    assert!(ran.load(Ordering::SeqCst));
    assert!(event_loop.is_in_loop_thread());
}

#[test]
fn queued_task_runs_on_the_loop_thread() {
    init();
    let mut loop_thread = EventLoopThread::new(None, "io-test".to_string());
    let event_loop = loop_thread.start_loop();
    assert!(!event_loop.is_in_loop_thread());

    let (sender, receiver) = mpsc::channel();
    let caller = thread::current().id();
    event_loop.run_in_loop(move || {
        sender.send(thread::current().id()).unwrap();
    });

    let executed_on = recv_within(&receiver, 10);
    assert_ne!(executed_on, caller);
}

#[test]
fn task_queued_from_a_task_runs_without_an_extra_poll_timeout() {
    init();
    let mut loop_thread = EventLoopThread::new(None, "io-test".to_string());
    let event_loop = loop_thread.start_loop();

    let (sender, receiver) = mpsc::channel();
    let inner_loop = event_loop.clone();
    let started = Instant::now();
    event_loop.queue_in_loop(move || {
        // Queued while the drain phase is running; the loop must come
        // back around immediately rather than sleep out its poll.
        let sender = sender.clone();
        inner_loop.queue_in_loop(move || {
            sender.send(Instant::now()).unwrap();
        });
    });

    let finished = recv_within(&receiver, 10);
    assert!(
        finished.duration_since(started) < Duration::from_secs(5),
        "follow-up task waited a full poll timeout"
    );
}

#[test]
fn cross_thread_quit_interrupts_the_poll() {
    init();
    let (sender, receiver) = mpsc::channel();
    let handle = thread::spawn(move || {
        let event_loop = EventLoop::new();
        sender.send(event_loop.clone()).unwrap();
        event_loop.run();
    });

    let event_loop = recv_within(&receiver, 10);
    // Give the loop a moment to get into its poll.
    thread::sleep(Duration::from_millis(50));

    let quit_at = Instant::now();
    event_loop.quit();
    handle.join().unwrap();
    assert!(
        quit_at.elapsed() < Duration::from_secs(5),
        "quit did not interrupt the poll"
    );
}

#[test]
fn poll_return_time_advances() {
    init();
    let mut loop_thread = EventLoopThread::new(None, "io-test".to_string());
    let event_loop = loop_thread.start_loop();

    let (sender, receiver) = mpsc::channel();
    let inner_loop = event_loop.clone();
    event_loop.queue_in_loop(move || {
        sender.send(inner_loop.poll_return_time()).unwrap();
    });

    let stamp = recv_within(&receiver, 10);
    assert!(stamp.is_valid());
}
