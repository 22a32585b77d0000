use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error};

use crate::acceptor::Acceptor;
use crate::buffer::Buffer;
use crate::callbacks::{
    ConnectionCallback, MessageCallback, TcpConnectionPtr, ThreadInitCallback,
    WriteCompleteCallback,
};
use crate::event_loop::EventLoop;
use crate::event_loop_thread_pool::EventLoopThreadPool;
use crate::sys::Socket;
use crate::tcp_connection::TcpConnection;
use crate::timestamp::Timestamp;

/// Whether the listening socket sets `SO_REUSEPORT`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ServerOption {
    NoReusePort,
    ReusePort,
}

/// The top-level composition: an acceptor on the main loop, a pool of
/// I/O loops, and the map of live connections.
///
/// The connection map is touched only on the main loop's thread. Closing
/// a connection therefore takes two hops: the connection's I/O loop posts
/// the removal to the main loop, which erases the map entry and posts the
/// final channel teardown back to the I/O loop.
///
/// # Examples
///
/// ```no_run
/// use eddy::{EventLoop, ServerOption, TcpServer};
///
/// let main_loop = EventLoop::new();
/// let server = TcpServer::new(
///     &main_loop,
///     "0.0.0.0:9000".parse().unwrap(),
///     "demo",
///     ServerOption::NoReusePort,
/// );
/// server.set_thread_num(2);
/// server.set_connection_callback(|conn| {
///     if conn.connected() {
///         println!("{} up", conn.peer_addr());
///     } else {
///         println!("{} down", conn.peer_addr());
///     }
/// });
/// server.set_message_callback(|conn, buf, _when| {
///     let bytes = buf.retrieve_all_as_bytes();
///     conn.send(&bytes);
/// });
/// server.start();
/// main_loop.run();
/// ```
pub struct TcpServer {
    event_loop: Arc<EventLoop>,
    ip_port: String,
    name: String,
    acceptor: Arc<Acceptor>,
    thread_pool: Mutex<EventLoopThreadPool>,
    connection_callback: Mutex<Option<ConnectionCallback>>,
    message_callback: Mutex<Option<MessageCallback>>,
    write_complete_callback: Mutex<Option<WriteCompleteCallback>>,
    thread_init_callback: Mutex<Option<ThreadInitCallback>>,
    connections: Mutex<HashMap<String, TcpConnectionPtr>>,
    next_conn_id: AtomicUsize,
    started: AtomicUsize,
    weak_self: Weak<TcpServer>,
}

impl TcpServer {
    pub fn new(
        event_loop: &Arc<EventLoop>,
        listen_addr: SocketAddr,
        name: &str,
        option: ServerOption,
    ) -> Arc<TcpServer> {
        let server = Arc::new_cyclic(|weak_self: &Weak<TcpServer>| TcpServer {
            event_loop: event_loop.clone(),
            ip_port: listen_addr.to_string(),
            name: name.to_string(),
            acceptor: Acceptor::new(event_loop, &listen_addr, option == ServerOption::ReusePort),
            thread_pool: Mutex::new(EventLoopThreadPool::new(event_loop.clone(), name)),
            connection_callback: Mutex::new(None),
            message_callback: Mutex::new(None),
            write_complete_callback: Mutex::new(None),
            thread_init_callback: Mutex::new(None),
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicUsize::new(1),
            started: AtomicUsize::new(0),
            weak_self: weak_self.clone(),
        });

        let weak = server.weak_self.clone();
        server
            .acceptor
            .set_new_connection_callback(Box::new(move |socket, peer_addr| {
                if let Some(server) = weak.upgrade() {
                    server.new_connection(socket, peer_addr);
                }
            }));
        server
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ip_port(&self) -> &str {
        &self.ip_port
    }

    pub fn get_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// Sets the number of I/O loops. Zero keeps accepting and I/O on the
    /// main loop; `n` puts I/O on `n` workers, round-robin. Call before
    /// [`start`].
    ///
    /// [`start`]: TcpServer::start
    pub fn set_thread_num(&self, num_threads: usize) {
        self.thread_pool.lock().unwrap().set_thread_num(num_threads);
    }

    pub fn set_connection_callback(
        &self,
        callback: impl Fn(&TcpConnectionPtr) + Send + Sync + 'static,
    ) {
        *self.connection_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn set_message_callback(
        &self,
        callback: impl Fn(&TcpConnectionPtr, &mut Buffer, Timestamp) + Send + Sync + 'static,
    ) {
        *self.message_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn set_write_complete_callback(
        &self,
        callback: impl Fn(&TcpConnectionPtr) + Send + Sync + 'static,
    ) {
        *self.write_complete_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn set_thread_init_callback(
        &self,
        callback: impl Fn(&Arc<EventLoop>) + Send + Sync + 'static,
    ) {
        *self.thread_init_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Starts the pool and begins accepting. Harmless to call more than
    /// once; only the first call does anything. Must be called on the
    /// main loop's thread.
    pub fn start(&self) {
        if self.started.fetch_add(1, Ordering::AcqRel) == 0 {
            let init_callback = self.thread_init_callback.lock().unwrap().clone();
            self.thread_pool.lock().unwrap().start(init_callback);

            let acceptor = self.acceptor.clone();
            self.event_loop.run_in_loop(move || acceptor.listen());
        }
    }

    // Runs on the main loop when the acceptor hands over a socket.
    fn new_connection(&self, socket: Socket, peer_addr: SocketAddr) {
        self.event_loop.assert_in_loop_thread();
        let io_loop = self.thread_pool.lock().unwrap().get_next_loop();

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::AcqRel);
        let conn_name = format!("{}-{}#{}", self.name, self.ip_port, conn_id);
        debug!(
            "TcpServer::new_connection [{}] - connection [{}] from {}",
            self.name, conn_name, peer_addr
        );

        let local_addr = socket.local_addr().unwrap_or_else(|err| {
            error!("getsockname for [{}]: {}", conn_name, err);
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        });

        let connection = TcpConnection::new(
            io_loop.clone(),
            conn_name.clone(),
            socket,
            local_addr,
            peer_addr,
        );
        self.connections
            .lock()
            .unwrap()
            .insert(conn_name, connection.clone());

        if let Some(callback) = self.connection_callback.lock().unwrap().clone() {
            connection.set_connection_callback(callback);
        }
        if let Some(callback) = self.message_callback.lock().unwrap().clone() {
            connection.set_message_callback(callback);
        }
        if let Some(callback) = self.write_complete_callback.lock().unwrap().clone() {
            connection.set_write_complete_callback(callback);
        }

        let weak = self.weak_self.clone();
        connection.set_close_callback(Arc::new(move |conn: &TcpConnectionPtr| {
            if let Some(server) = weak.upgrade() {
                server.remove_connection(conn);
            }
        }));

        let established = connection.clone();
        io_loop.run_in_loop(move || established.connect_established());
    }

    // Called from the connection's I/O loop; hop to the main loop where
    // the map lives.
    fn remove_connection(&self, connection: &TcpConnectionPtr) {
        if let Some(server) = self.weak_self.upgrade() {
            let connection = connection.clone();
            self.event_loop
                .run_in_loop(move || server.remove_connection_in_loop(&connection));
        }
    }

    fn remove_connection_in_loop(&self, connection: &TcpConnectionPtr) {
        debug!(
            "TcpServer::remove_connection_in_loop [{}] - connection {}",
            self.name,
            connection.name()
        );
        self.connections.lock().unwrap().remove(connection.name());

        // Second hop: the channel must be torn down on its own loop.
        let io_loop = connection.get_loop().clone();
        let connection = connection.clone();
        io_loop.queue_in_loop(move || connection.connect_destroyed());
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        debug!("TcpServer::drop [{}]", self.name);
        let connections = {
            let mut map = self.connections.lock().unwrap();
            std::mem::take(&mut *map)
        };
        for (_, connection) in connections {
            let destroyed = connection.clone();
            connection
                .get_loop()
                .run_in_loop(move || destroyed.connect_destroyed());
        }
    }
}
