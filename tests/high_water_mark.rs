use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use eddy::{EventLoop, ServerOption, TcpServer};

mod util;
use util::{any_local_address, connect_with_retry, init, read_exact_n, recv_within};

const CHUNK: usize = 8 * 1024 * 1024;
const CHUNKS: usize = 4;
const MARK: usize = 1024;

// A producer far ahead of a reader that has not started draining must be
// told exactly once that the backlog crossed the mark.
#[test]
fn high_water_mark_fires_once_per_crossing() {
    init();
    let addr = any_local_address();
    let (loop_sender, loop_receiver) = mpsc::channel();
    let (mark_sender, mark_receiver) = mpsc::channel();
    let fired = Arc::new(AtomicUsize::new(0));

    let fired_in_server = fired.clone();
    let server_thread = thread::spawn(move || {
        let main_loop = EventLoop::new();
        let server = TcpServer::new(&main_loop, addr, "flood", ServerOption::NoReusePort);
        server.set_thread_num(1);
        server.set_connection_callback(move |conn| {
            if !conn.connected() {
                return;
            }
            let fired = fired_in_server.clone();
            let mark_sender = mark_sender.clone();
            conn.set_high_water_mark_callback(
                Arc::new(move |_conn: &eddy::TcpConnectionPtr, queued: usize| {
                    fired.fetch_add(1, Ordering::SeqCst);
                    mark_sender.send(queued).unwrap();
                }),
                MARK,
            );
            // Flood from the loop thread itself, so the backlog grows
            // monotonically until the last chunk is queued: exactly one
            // upward crossing no matter how the peer behaves.
            let blob = vec![b'w'; CHUNK];
            for _ in 0..CHUNKS {
                conn.send(&blob);
            }
        });
        server.start();
        loop_sender.send(main_loop.clone()).unwrap();
        main_loop.run();
    });
    let main_loop = recv_within(&loop_receiver, 10);

    let mut client = connect_with_retry(addr);

    // Do not read a byte until the server reports the crossing.
    let queued = recv_within(&mark_receiver, 30);
    assert!(queued >= MARK, "crossing reported below the mark: {}", queued);

    let bytes = read_exact_n(&mut client, CHUNK * CHUNKS);
    assert!(bytes.iter().all(|&b| b == b'w'));

    // The whole flood drained through one crossing.
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(mark_receiver
        .recv_timeout(Duration::from_millis(300))
        .is_err());

    drop(client);
    main_loop.quit();
    server_thread.join().unwrap();
}
