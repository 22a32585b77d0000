// Not all helpers are used by all test binaries.
#![allow(dead_code)]

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

/// A loopback address with a port unlikely to collide with other tests in
/// this process (or a parallel run of the suite).
pub fn any_local_address() -> SocketAddr {
    static NEXT_PORT: AtomicU16 = AtomicU16::new(0);

    // Seed once from a random base so repeated suite runs do not fight
    // over ports still in TIME_WAIT.
    if NEXT_PORT.load(Ordering::Relaxed) == 0 {
        let base: u16 = rand::rng().random_range(20_000..50_000);
        let _ = NEXT_PORT.compare_exchange(0, base, Ordering::Relaxed, Ordering::Relaxed);
    }
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Connects to `addr`, retrying while the server's listen is still in
/// flight on its loop.
pub fn connect_with_retry(addr: SocketAddr) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return stream,
            Err(err) => {
                if Instant::now() >= deadline {
                    panic!("connecting to {} never succeeded: {}", addr, err);
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

/// Reads exactly `n` bytes, failing the test on EOF or timeout.
pub fn read_exact_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    stream
        .set_read_timeout(Some(Duration::from_secs(30)))
        .unwrap();
    let mut bytes = vec![0; n];
    let mut filled = 0;
    while filled < n {
        match stream.read(&mut bytes[filled..]) {
            Ok(0) => panic!("unexpected EOF after {} of {} bytes", filled, n),
            Ok(read) => filled += read,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => panic!("read failed after {} of {} bytes: {}", filled, n, err),
        }
    }
    bytes
}

/// Receives from `receiver`, failing the test after `secs` seconds.
pub fn recv_within<T>(receiver: &Receiver<T>, secs: u64) -> T {
    receiver
        .recv_timeout(Duration::from_secs(secs))
        .expect("timed out waiting on test channel")
}
