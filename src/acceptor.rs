use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::sys::Socket;

pub(crate) type NewConnectionCallback = Box<dyn Fn(Socket, SocketAddr) + Send + Sync>;

/// The listening socket and its channel on the main loop.
///
/// On readability, accepts until the queue is empty and hands each
/// connected socket to the new-connection callback; the server turns
/// those into `TcpConnection`s on the I/O loops.
pub(crate) struct Acceptor {
    accept_socket: Socket,
    accept_channel: Arc<Channel>,
    listening: AtomicBool,
    new_connection_callback: Mutex<Option<NewConnectionCallback>>,
}

impl Acceptor {
    /// Binds the listen address. Socket creation and bind failures are
    /// programmer errors (bad address, privileged port, address in use)
    /// and abort.
    pub(crate) fn new(
        event_loop: &Arc<EventLoop>,
        listen_addr: &SocketAddr,
        reuse_port: bool,
    ) -> Arc<Acceptor> {
        let accept_socket = match Socket::new_stream(listen_addr) {
            Ok(socket) => socket,
            Err(err) => fatal!("listen socket create failed: {}", err),
        };
        if let Err(err) = accept_socket
            .set_reuseaddr(true)
            .and_then(|()| accept_socket.set_reuseport(reuse_port))
            .and_then(|()| accept_socket.bind(listen_addr))
        {
            fatal!("bind {} failed: {}", listen_addr, err);
        }

        let accept_channel = Channel::new(event_loop, accept_socket.as_raw_fd());
        let acceptor = Arc::new(Acceptor {
            accept_socket,
            accept_channel,
            listening: AtomicBool::new(false),
            new_connection_callback: Mutex::new(None),
        });

        let weak = Arc::downgrade(&acceptor);
        acceptor.accept_channel.set_read_callback(move |_receive_time| {
            if let Some(acceptor) = weak.upgrade() {
                acceptor.handle_read();
            }
        });
        acceptor
    }

    pub(crate) fn set_new_connection_callback(&self, callback: NewConnectionCallback) {
        *self.new_connection_callback.lock().unwrap() = Some(callback);
    }

    /// Starts listening and watches the socket for readability. Runs on
    /// the main loop.
    pub(crate) fn listen(&self) {
        self.listening.store(true, Ordering::Release);
        if let Err(err) = self.accept_socket.listen() {
            fatal!("listen failed: {}", err);
        }
        self.accept_channel.enable_reading();
        debug!("listening on fd={}", self.accept_socket.as_raw_fd());
    }

    fn handle_read(&self) {
        loop {
            match self.accept_socket.accept() {
                Ok((socket, peer_addr)) => {
                    let callback = self.new_connection_callback.lock().unwrap();
                    match callback.as_ref() {
                        Some(callback) => callback(socket, peer_addr),
                        // Nobody to hand the fd to; close it rather than
                        // leak it.
                        None => drop(socket),
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!("accept failed: {}", err);
                    if err.raw_os_error() == Some(libc::EMFILE) {
                        // Out of descriptors. The listen socket stays
                        // registered; accepting resumes once fds free up.
                        error!("accept hit the open-descriptor limit");
                    }
                    break;
                }
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        if self.listening.load(Ordering::Acquire) {
            self.accept_channel.disable_all();
        }
        self.accept_channel.remove();
    }
}
