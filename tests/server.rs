use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eddy::{EventLoop, ServerOption, TcpConnectionPtr, TcpServer};

mod util;
use util::{any_local_address, connect_with_retry, init, read_exact_n, recv_within};

#[derive(Debug, PartialEq)]
enum ServerEvent {
    Up(thread::ThreadId),
    Message(Vec<u8>),
    Down,
}

fn spawn_server(
    num_threads: usize,
    events: Sender<ServerEvent>,
    conns: Option<Sender<TcpConnectionPtr>>,
) -> (std::net::SocketAddr, Arc<EventLoop>, thread::JoinHandle<()>) {
    let addr = any_local_address();
    let (loop_sender, loop_receiver) = mpsc::channel();

    let message_events = events.clone();
    let handle = thread::spawn(move || {
        let main_loop = EventLoop::new();
        let server = TcpServer::new(&main_loop, addr, "test", ServerOption::NoReusePort);
        server.set_thread_num(num_threads);
        server.set_connection_callback(move |conn| {
            if conn.connected() {
                events.send(ServerEvent::Up(thread::current().id())).unwrap();
                if let Some(conns) = &conns {
                    conns.send(conn.clone()).unwrap();
                }
            } else {
                events.send(ServerEvent::Down).unwrap();
            }
        });
        server.set_message_callback(move |_conn, buf, _receive_time| {
            message_events
                .send(ServerEvent::Message(buf.retrieve_all_as_bytes()))
                .unwrap();
        });
        server.start();
        loop_sender.send(main_loop.clone()).unwrap();
        main_loop.run();
    });

    let main_loop = recv_within(&loop_receiver, 10);
    (addr, main_loop, handle)
}

#[test]
fn half_close_is_observed_then_closed() {
    init();
    let (events, event_receiver) = mpsc::channel();
    let (addr, main_loop, server_thread) = spawn_server(1, events, None);

    let mut client = connect_with_retry(addr);
    assert!(matches!(
        recv_within(&event_receiver, 10),
        ServerEvent::Up(_)
    ));

    client.write_all(b"abc").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    // The data arrives first, then the zero-length read closes us down.
    assert_eq!(
        recv_within(&event_receiver, 10),
        ServerEvent::Message(b"abc".to_vec())
    );
    assert_eq!(recv_within(&event_receiver, 10), ServerEvent::Down);

    // Close is terminal: nothing fires after the down event.
    assert!(event_receiver
        .recv_timeout(Duration::from_millis(300))
        .is_err());

    // The server never wrote, so our read side sees a clean EOF once the
    // connection is destroyed.
    let mut rest = Vec::new();
    client.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    main_loop.quit();
    server_thread.join().unwrap();
}

#[test]
fn round_robin_assigns_loops_in_order() {
    init();
    let (events, event_receiver) = mpsc::channel();
    let (addr, main_loop, server_thread) = spawn_server(3, events, None);

    let mut clients = Vec::new();
    let mut up_threads = Vec::new();
    for _ in 0..6 {
        clients.push(connect_with_retry(addr));
        match recv_within(&event_receiver, 10) {
            ServerEvent::Up(thread_id) => up_threads.push(thread_id),
            other => panic!("expected an up event, got {:?}", other),
        }
    }

    // Three distinct I/O threads, then the same three again in order.
    let distinct: HashSet<_> = up_threads[..3].iter().copied().collect();
    assert_eq!(distinct.len(), 3);
    assert_eq!(up_threads[..3], up_threads[3..]);

    drop(clients);
    for _ in 0..6 {
        assert_eq!(recv_within(&event_receiver, 10), ServerEvent::Down);
    }
    main_loop.quit();
    server_thread.join().unwrap();
}

#[test]
fn cross_thread_sends_all_arrive() {
    init();
    let (events, event_receiver) = mpsc::channel();
    let (conn_sender, conn_receiver) = mpsc::channel();
    let (addr, main_loop, server_thread) = spawn_server(2, events, Some(conn_sender));

    let mut client = connect_with_retry(addr);
    assert!(matches!(
        recv_within(&event_receiver, 10),
        ServerEvent::Up(_)
    ));
    let conn = recv_within(&conn_receiver, 10);

    // Hammer the same connection from four non-loop threads; every byte
    // must arrive, whatever the interleaving.
    let mut senders = Vec::new();
    for _ in 0..4 {
        let conn = conn.clone();
        senders.push(thread::spawn(move || {
            for _ in 0..1000 {
                conn.send(b"x");
            }
        }));
    }
    for sender in senders {
        sender.join().unwrap();
    }

    let bytes = read_exact_n(&mut client, 4000);
    assert!(bytes.iter().all(|&b| b == b'x'));

    drop(conn);
    drop(client);
    assert_eq!(recv_within(&event_receiver, 10), ServerEvent::Down);
    main_loop.quit();
    server_thread.join().unwrap();
}

#[test]
fn start_is_idempotent() {
    init();
    let addr = any_local_address();
    let (loop_sender, loop_receiver) = mpsc::channel();

    let server_thread = thread::spawn(move || {
        let main_loop = EventLoop::new();
        let server = TcpServer::new(&main_loop, addr, "again", ServerOption::NoReusePort);
        server.set_thread_num(1);
        server.set_message_callback(|conn, buf, _receive_time| {
            let bytes = buf.retrieve_all_as_bytes();
            conn.send(&bytes);
        });
        server.start();
        server.start();
        server.start();
        loop_sender.send(main_loop.clone()).unwrap();
        main_loop.run();
    });
    let main_loop = recv_within(&loop_receiver, 10);

    // One listen, one working server.
    let mut client = connect_with_retry(addr);
    client.write_all(b"ping").unwrap();
    assert_eq!(read_exact_n(&mut client, 4), b"ping");

    drop(client);
    main_loop.quit();
    server_thread.join().unwrap();
}

#[test]
fn graceful_quit_with_a_live_connection() {
    init();
    let (events, event_receiver) = mpsc::channel();
    let (addr, main_loop, server_thread) = spawn_server(1, events, None);

    let client = connect_with_retry(addr);
    assert!(matches!(
        recv_within(&event_receiver, 10),
        ServerEvent::Up(_)
    ));

    // Quit from off-loop while the connection is still up; the loop must
    // notice within one poll cycle and the whole server must tear down.
    main_loop.quit();
    server_thread.join().unwrap();
    drop(client);
}
