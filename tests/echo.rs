use std::io::Write;
use std::sync::mpsc;
use std::thread;

use rand::RngCore;

use eddy::{EventLoop, ServerOption, TcpServer};

mod util;
use util::{any_local_address, connect_with_retry, init, read_exact_n, recv_within};

#[test]
fn echo_round_trip() {
    init();
    let addr = any_local_address();
    let (sender, receiver) = mpsc::channel();

    let server_thread = thread::spawn(move || {
        let main_loop = EventLoop::new();
        let server = TcpServer::new(&main_loop, addr, "echo", ServerOption::NoReusePort);
        server.set_thread_num(1);
        server.set_message_callback(|conn, buf, _receive_time| {
            let bytes = buf.retrieve_all_as_bytes();
            conn.send(&bytes);
        });
        server.start();
        sender.send(main_loop.clone()).unwrap();
        main_loop.run();
    });
    let main_loop = recv_within(&receiver, 10);

    let mut client = connect_with_retry(addr);
    client.write_all(b"hello\n").unwrap();
    assert_eq!(read_exact_n(&mut client, 6), b"hello\n");

    // A larger, arbitrary payload comes back byte for byte, in order.
    let mut payload = vec![0u8; 256 * 1024];
    rand::rng().fill_bytes(&mut payload);
    client.write_all(&payload).unwrap();
    assert_eq!(read_exact_n(&mut client, payload.len()), payload);

    drop(client);
    main_loop.quit();
    server_thread.join().unwrap();
}

#[test]
fn echo_on_the_main_loop_without_workers() {
    init();
    let addr = any_local_address();
    let (sender, receiver) = mpsc::channel();

    let server_thread = thread::spawn(move || {
        let main_loop = EventLoop::new();
        let server = TcpServer::new(&main_loop, addr, "echo0", ServerOption::NoReusePort);
        // Zero workers: accepting and I/O share the main loop.
        server.set_message_callback(|conn, buf, _receive_time| {
            let bytes = buf.retrieve_all_as_bytes();
            conn.send(&bytes);
        });
        server.start();
        sender.send(main_loop.clone()).unwrap();
        main_loop.run();
    });
    let main_loop = recv_within(&receiver, 10);

    let mut client = connect_with_retry(addr);
    client.write_all(b"single loop").unwrap();
    assert_eq!(read_exact_n(&mut client, 11), b"single loop");

    drop(client);
    main_loop.quit();
    server_thread.join().unwrap();
}
