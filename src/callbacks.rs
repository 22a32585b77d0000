use std::sync::Arc;

use crate::buffer::Buffer;
use crate::event_loop::EventLoop;
use crate::tcp_connection::TcpConnection;
use crate::timestamp::Timestamp;

/// Shared handle to a connection. Callbacks receive a reference and may
/// clone it to keep the connection alive past their own return.
pub type TcpConnectionPtr = Arc<TcpConnection>;

/// Invoked on connection up and connection down; check
/// [`TcpConnection::connected`] to tell the two apart.
///
/// [`TcpConnection::connected`]: crate::TcpConnection::connected
pub type ConnectionCallback = Arc<dyn Fn(&TcpConnectionPtr) + Send + Sync>;

/// Invoked when bytes arrive; the callback owns consuming them from the
/// buffer.
pub type MessageCallback = Arc<dyn Fn(&TcpConnectionPtr, &mut Buffer, Timestamp) + Send + Sync>;

/// Invoked when the output buffer fully drains.
pub type WriteCompleteCallback = Arc<dyn Fn(&TcpConnectionPtr) + Send + Sync>;

/// Invoked with the queued byte count when the output buffer first
/// crosses the high-water mark from below.
pub type HighWaterMarkCallback = Arc<dyn Fn(&TcpConnectionPtr, usize) + Send + Sync>;

/// Invoked on each pool thread with its loop, before polling begins.
pub type ThreadInitCallback = Arc<dyn Fn(&Arc<EventLoop>) + Send + Sync>;

// The server's removal hook; must be the very last thing a dying
// connection calls.
pub(crate) type CloseCallback = Arc<dyn Fn(&TcpConnectionPtr) + Send + Sync>;
