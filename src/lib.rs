//! A callback-driven, multi-reactor TCP server framework.
//!
//! Eddy implements the classic "one loop per thread" design: a main
//! [`EventLoop`] owns the listening socket and accepts connections, and a
//! fixed pool of worker loops performs all per-connection I/O. Each loop is
//! a single thread blocked on a level-triggered readiness multiplexer
//! (epoll by default, `poll(2)` when the `EDDY_USE_POLL` environment
//! variable is set); readiness is translated into callbacks on
//! [`Channel`]s, and the rest of the crate is built out of channels.
//!
//! Applications embed the framework through [`TcpServer`]: install a
//! message callback, call [`TcpServer::start`], and run the main loop.
//! Everything the application observes (connection up/down, received
//! bytes, output-buffer drain, high-water marks) arrives as a callback on
//! the loop that owns the connection, and must not block.
//!
//! # Examples
//!
//! An echo server on four I/O threads:
//!
//! ```no_run
//! use eddy::{EventLoop, ServerOption, TcpServer};
//!
//! let main_loop = EventLoop::new();
//! let server = TcpServer::new(
//!     &main_loop,
//!     "127.0.0.1:7000".parse().unwrap(),
//!     "echo",
//!     ServerOption::NoReusePort,
//! );
//! server.set_thread_num(4);
//! server.set_message_callback(|conn, buf, _when| {
//!     let bytes = buf.retrieve_all_as_bytes();
//!     conn.send(&bytes);
//! });
//! server.start();
//! main_loop.run();
//! ```
//!
//! # Threading model
//!
//! Every connection is pinned to one loop; all of its callbacks and buffer
//! mutations happen on that loop's thread. The only cross-thread channel
//! into a loop is [`EventLoop::queue_in_loop`], which appends to a
//! mutex-guarded task queue and kicks the loop out of its poll through an
//! eventfd. [`TcpConnection::send`] is therefore safe to call from any
//! thread: off-loop callers have their bytes copied and replayed on the
//! owning loop.
//!
//! [`TcpConnection::send`]: crate::TcpConnection::send

// Helper macro to execute a system call that returns an `io::Result`.
//
// Macro must be defined before any modules that use it.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

// Programmer errors abort the process after leaving a diagnostic in the
// log. Used for the conditions the framework cannot continue past: a
// second loop on one thread, epoll/eventfd creation failure, a failed
// kernel register.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        std::process::abort();
    }};
}

mod acceptor;
mod buffer;
mod callbacks;
mod channel;
mod event_loop;
mod event_loop_thread;
mod event_loop_thread_pool;
mod poller;
mod ready;
mod sys;
mod tcp_connection;
mod tcp_server;
mod timestamp;

pub use buffer::Buffer;
pub use callbacks::{
    ConnectionCallback, HighWaterMarkCallback, MessageCallback, TcpConnectionPtr,
    ThreadInitCallback, WriteCompleteCallback,
};
pub use channel::Channel;
pub use event_loop::EventLoop;
pub use event_loop_thread::EventLoopThread;
pub use event_loop_thread_pool::EventLoopThreadPool;
pub use ready::Ready;
pub use tcp_connection::TcpConnection;
pub use tcp_server::{ServerOption, TcpServer};
pub use timestamp::Timestamp;
