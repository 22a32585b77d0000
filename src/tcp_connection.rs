use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, trace, warn};

use crate::buffer::Buffer;
use crate::callbacks::{
    CloseCallback, ConnectionCallback, HighWaterMarkCallback, MessageCallback, TcpConnectionPtr,
    WriteCompleteCallback,
};
use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::sys::Socket;
use crate::timestamp::Timestamp;

const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024 * 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
enum State {
    Connecting = 0,
    Connected = 1,
    Disconnecting = 2,
    Disconnected = 3,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Connecting,
            1 => State::Connected,
            2 => State::Disconnecting,
            _ => State::Disconnected,
        }
    }
}

/// One accepted TCP connection: its socket, channel, buffers and user
/// callbacks, pinned to one I/O loop.
///
/// Connections are shared-ownership objects ([`TcpConnectionPtr`]); the
/// server's map, posted loop tasks and user callbacks all hold shares,
/// and the socket closes when the last share goes away, necessarily on
/// the owning loop since the destroy path is posted there.
///
/// All state transitions and callback invocations happen on the owning
/// loop's thread. [`send`] and [`shutdown`] may be called from any
/// thread; off-loop sends copy their bytes into the posted task.
///
/// Writes that the socket cannot take immediately land in the output
/// buffer and drain on writability. When the buffered backlog first
/// crosses the high-water mark (64 MiB unless overridden) the high-water
/// callback fires once; well-behaved producers pause until the
/// write-complete callback reports the buffer empty again.
///
/// [`send`]: TcpConnection::send
/// [`shutdown`]: TcpConnection::shutdown
pub struct TcpConnection {
    event_loop: Arc<EventLoop>,
    name: String,
    state: AtomicU8,
    reading: AtomicBool,
    socket: Socket,
    channel: Arc<Channel>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    input_buffer: Mutex<Buffer>,
    output_buffer: Mutex<Buffer>,
    high_water_mark: AtomicUsize,
    connection_callback: Mutex<Option<ConnectionCallback>>,
    message_callback: Mutex<Option<MessageCallback>>,
    write_complete_callback: Mutex<Option<WriteCompleteCallback>>,
    high_water_mark_callback: Mutex<Option<HighWaterMarkCallback>>,
    close_callback: Mutex<Option<CloseCallback>>,
    weak_self: Weak<TcpConnection>,
}

impl TcpConnection {
    pub(crate) fn new(
        event_loop: Arc<EventLoop>,
        name: String,
        socket: Socket,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> TcpConnectionPtr {
        let fd = socket.as_raw_fd();
        let connection = Arc::new_cyclic(|weak_self: &Weak<TcpConnection>| TcpConnection {
            channel: Channel::new(&event_loop, fd),
            event_loop,
            name,
            state: AtomicU8::new(State::Connecting as u8),
            reading: AtomicBool::new(true),
            socket,
            local_addr,
            peer_addr,
            input_buffer: Mutex::new(Buffer::new()),
            output_buffer: Mutex::new(Buffer::new()),
            high_water_mark: AtomicUsize::new(DEFAULT_HIGH_WATER_MARK),
            connection_callback: Mutex::new(None),
            message_callback: Mutex::new(None),
            write_complete_callback: Mutex::new(None),
            high_water_mark_callback: Mutex::new(None),
            close_callback: Mutex::new(None),
            weak_self: weak_self.clone(),
        });
        debug!("TcpConnection::new [{}] fd={}", connection.name, fd);

        let weak = connection.weak_self.clone();
        connection.channel.set_read_callback(move |receive_time| {
            if let Some(connection) = weak.upgrade() {
                connection.handle_read(receive_time);
            }
        });
        let weak = connection.weak_self.clone();
        connection.channel.set_write_callback(move || {
            if let Some(connection) = weak.upgrade() {
                connection.handle_write();
            }
        });
        let weak = connection.weak_self.clone();
        connection.channel.set_close_callback(move || {
            if let Some(connection) = weak.upgrade() {
                connection.handle_close();
            }
        });
        let weak = connection.weak_self.clone();
        connection.channel.set_error_callback(move || {
            if let Some(connection) = weak.upgrade() {
                connection.handle_error();
            }
        });

        if let Err(err) = connection.socket.set_keepalive(true) {
            warn!("SO_KEEPALIVE on [{}]: {}", connection.name, err);
        }
        connection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> &SocketAddr {
        &self.local_addr
    }

    pub fn peer_addr(&self) -> &SocketAddr {
        &self.peer_addr
    }

    pub fn connected(&self) -> bool {
        self.state() == State::Connected
    }

    pub fn disconnected(&self) -> bool {
        self.state() == State::Disconnected
    }

    /// The loop this connection is pinned to.
    pub fn get_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// Enables/disables `TCP_NODELAY`.
    pub fn set_tcp_nodelay(&self, on: bool) {
        if let Err(err) = self.socket.set_tcp_nodelay(on) {
            warn!("TCP_NODELAY on [{}]: {}", self.name, err);
        }
    }

    pub fn set_connection_callback(&self, callback: ConnectionCallback) {
        *self.connection_callback.lock().unwrap() = Some(callback);
    }

    pub fn set_message_callback(&self, callback: MessageCallback) {
        *self.message_callback.lock().unwrap() = Some(callback);
    }

    pub fn set_write_complete_callback(&self, callback: WriteCompleteCallback) {
        *self.write_complete_callback.lock().unwrap() = Some(callback);
    }

    /// Installs the high-water callback and its threshold in bytes.
    ///
    /// The callback fires when a send pushes the output-buffer backlog
    /// from below `mark` to `mark` or above: once per crossing, not once
    /// per send. The mark is advisory; the buffer itself never refuses
    /// bytes.
    pub fn set_high_water_mark_callback(&self, callback: HighWaterMarkCallback, mark: usize) {
        self.high_water_mark.store(mark, Ordering::Release);
        *self.high_water_mark_callback.lock().unwrap() = Some(callback);
    }

    pub(crate) fn set_close_callback(&self, callback: CloseCallback) {
        *self.close_callback.lock().unwrap() = Some(callback);
    }

    /// Sends `data`, from any thread.
    ///
    /// On the owning loop the bytes go straight to the socket (spillover
    /// to the output buffer); from other threads they are copied into a
    /// task posted to the loop, so wire order follows task order.
    pub fn send(&self, data: &[u8]) {
        if self.state() == State::Connected {
            if self.event_loop.is_in_loop_thread() {
                self.send_in_loop(data);
            } else if let Some(connection) = self.weak_self.upgrade() {
                // The caller's slice cannot outlive the post; own it.
                let owned = data.to_vec();
                self.event_loop
                    .queue_in_loop(move || connection.send_in_loop(&owned));
            }
        }
    }

    /// Half-closes the write side once the output buffer drains. The
    /// peer's reads see EOF; its writes still arrive here.
    pub fn shutdown(&self) {
        if self.state() == State::Connected {
            self.set_state(State::Disconnecting);
            if let Some(connection) = self.weak_self.upgrade() {
                self.event_loop
                    .run_in_loop(move || connection.shutdown_in_loop());
            }
        }
    }

    /// Tears the connection down without waiting for the output buffer.
    pub fn force_close(&self) {
        if matches!(self.state(), State::Connected | State::Disconnecting) {
            self.set_state(State::Disconnecting);
            if let Some(connection) = self.weak_self.upgrade() {
                self.event_loop
                    .queue_in_loop(move || connection.force_close_in_loop());
            }
        }
    }

    /// Resumes watching the socket for readability.
    pub fn start_read(&self) {
        if let Some(connection) = self.weak_self.upgrade() {
            self.event_loop.run_in_loop(move || {
                if !connection.reading.swap(true, Ordering::AcqRel) {
                    connection.channel.enable_reading();
                }
            });
        }
    }

    /// Stops watching the socket for readability; bytes pile up in the
    /// kernel (and eventually in the peer) until [`start_read`].
    ///
    /// [`start_read`]: TcpConnection::start_read
    pub fn stop_read(&self) {
        if let Some(connection) = self.weak_self.upgrade() {
            self.event_loop.run_in_loop(move || {
                if connection.reading.swap(false, Ordering::AcqRel) {
                    connection.channel.disable_reading();
                }
            });
        }
    }

    /// Completes establishment on the I/O loop: ties the channel to this
    /// connection, starts reading, and announces the connection.
    pub(crate) fn connect_established(&self) {
        self.event_loop.assert_in_loop_thread();
        self.set_state(State::Connected);
        if let Some(connection) = self.weak_self.upgrade() {
            let tie: Arc<dyn Any + Send + Sync> = connection.clone();
            self.channel.tie(&tie);
            self.channel.enable_reading();
            if let Some(callback) = self.connection_callback.lock().unwrap().clone() {
                callback(&connection);
            }
        }
    }

    /// Final teardown on the I/O loop, posted by the server after the map
    /// entry is gone. Covers the case where the server is going down
    /// while the connection is still up.
    pub(crate) fn connect_destroyed(&self) {
        if self.state() == State::Connected {
            self.set_state(State::Disconnected);
            self.channel.disable_all();
            if let Some(connection) = self.weak_self.upgrade() {
                if let Some(callback) = self.connection_callback.lock().unwrap().clone() {
                    callback(&connection);
                }
            }
        }
        self.channel.remove();
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn handle_read(&self, receive_time: Timestamp) {
        let result = {
            let mut input = self.input_buffer.lock().unwrap();
            input.read_fd(self.channel.fd())
        };
        match result {
            Ok(0) => self.handle_close(),
            Ok(n) => {
                trace!("[{}] read {} bytes", self.name, n);
                if let Some(connection) = self.weak_self.upgrade() {
                    let callback = self.message_callback.lock().unwrap().clone();
                    match callback {
                        Some(callback) => {
                            let mut input = self.input_buffer.lock().unwrap();
                            callback(&connection, &mut *input, receive_time);
                        }
                        // No consumer installed: drop the bytes, or level
                        // triggering would spin on them forever.
                        None => self.input_buffer.lock().unwrap().retrieve_all(),
                    }
                }
            }
            Err(err) => {
                error!("TcpConnection::handle_read [{}]: {}", self.name, err);
                self.handle_error();
            }
        }
    }

    fn handle_write(&self) {
        if !self.channel.is_writing() {
            trace!("[{}] fd={} is down, no more writing", self.name, self.channel.fd());
            return;
        }
        let (result, drained) = {
            let mut output = self.output_buffer.lock().unwrap();
            match output.write_fd(self.channel.fd()) {
                Ok(n) => {
                    output.retrieve(n);
                    (Ok(n), output.readable_bytes() == 0)
                }
                Err(err) => (Err(err), false),
            }
        };
        match result {
            Ok(_) if drained => {
                self.channel.disable_writing();
                if let Some(callback) = self.write_complete_callback.lock().unwrap().clone() {
                    if let Some(connection) = self.weak_self.upgrade() {
                        self.event_loop
                            .queue_in_loop(move || callback(&connection));
                    }
                }
                if self.state() == State::Disconnecting {
                    self.shutdown_in_loop();
                }
            }
            Ok(_) => {}
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                trace!("[{}] socket not writable after all", self.name);
            }
            Err(err) => error!("TcpConnection::handle_write [{}]: {}", self.name, err),
        }
    }

    // The poller's close path: HUP with nothing left to read, or read()
    // returned 0. The close callback goes last; it may release the final
    // strong share of this connection.
    fn handle_close(&self) {
        self.event_loop.assert_in_loop_thread();
        trace!(
            "TcpConnection::handle_close [{}] state={:?}",
            self.name,
            self.state()
        );
        self.set_state(State::Disconnected);
        self.channel.disable_all();

        if let Some(connection) = self.weak_self.upgrade() {
            if let Some(callback) = self.connection_callback.lock().unwrap().clone() {
                callback(&connection);
            }
            if let Some(callback) = self.close_callback.lock().unwrap().clone() {
                callback(&connection);
            }
        }
    }

    fn handle_error(&self) {
        let err = match self.socket.take_error() {
            Ok(Some(err)) => err,
            Ok(None) => return,
            Err(err) => err,
        };
        error!("TcpConnection::handle_error [{}] SO_ERROR={}", self.name, err);
    }

    fn send_in_loop(&self, data: &[u8]) {
        self.event_loop.assert_in_loop_thread();
        if self.state() == State::Disconnected {
            error!("[{}] disconnected, give up writing", self.name);
            return;
        }

        let mut nwrote = 0usize;
        let mut remaining = data.len();
        let mut fault = false;

        let mut output = self.output_buffer.lock().unwrap();
        // Try the socket directly when nothing is queued ahead of us;
        // otherwise bytes would overtake the buffered backlog.
        if !self.channel.is_writing() && output.readable_bytes() == 0 {
            match write_fd(self.channel.fd(), data) {
                Ok(n) => {
                    nwrote = n;
                    remaining -= n;
                    if remaining == 0 {
                        if let Some(callback) =
                            self.write_complete_callback.lock().unwrap().clone()
                        {
                            if let Some(connection) = self.weak_self.upgrade() {
                                self.event_loop
                                    .queue_in_loop(move || callback(&connection));
                            }
                        }
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    error!("TcpConnection::send_in_loop [{}]: {}", self.name, err);
                    if let Some(libc::EPIPE | libc::ECONNRESET) = err.raw_os_error() {
                        // The peer is gone; buffering would only delay
                        // the close path.
                        fault = true;
                    }
                }
            }
        }

        if !fault && remaining > 0 {
            let old_len = output.readable_bytes();
            let mark = self.high_water_mark.load(Ordering::Acquire);
            if old_len + remaining >= mark && old_len < mark {
                if let Some(callback) = self.high_water_mark_callback.lock().unwrap().clone() {
                    if let Some(connection) = self.weak_self.upgrade() {
                        let queued = old_len + remaining;
                        self.event_loop
                            .queue_in_loop(move || callback(&connection, queued));
                    }
                }
            }
            output.append(&data[nwrote..]);
            if !self.channel.is_writing() {
                self.channel.enable_writing();
            }
        }
    }

    fn shutdown_in_loop(&self) {
        self.event_loop.assert_in_loop_thread();
        // A non-empty output buffer keeps the write interest; handle_write
        // finishes the shutdown once it drains.
        if !self.channel.is_writing() {
            if let Err(err) = self.socket.shutdown_write() {
                error!("shutdown_write [{}]: {}", self.name, err);
            }
        }
    }

    fn force_close_in_loop(&self) {
        self.event_loop.assert_in_loop_thread();
        if matches!(self.state(), State::Connected | State::Disconnecting) {
            self.handle_close();
        }
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        debug!(
            "TcpConnection::drop [{}] fd={} state={:?}",
            self.name,
            self.channel.fd(),
            self.state()
        );
    }
}

fn write_fd(fd: std::os::fd::RawFd, data: &[u8]) -> io::Result<usize> {
    let n = syscall!(write(
        fd,
        data.as_ptr() as *const libc::c_void,
        data.len(),
    ))?;
    Ok(n as usize)
}
