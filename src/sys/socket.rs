use std::io;
use std::mem::{self, size_of, MaybeUninit};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use crate::sys::{from_socket_addr, to_socket_addr};

const LISTEN_BACKLOG: libc::c_int = 1024;

/// Owning wrapper over a TCP socket descriptor.
///
/// The descriptor is created non-blocking and close-on-exec and is closed
/// on drop. All operations delegate straight to the kernel, so a `Socket`
/// is safe to poke from any thread; serialization of reads and writes is
/// the owning connection's job.
#[derive(Debug)]
pub(crate) struct Socket {
    fd: OwnedFd,
}

impl Socket {
    /// Creates a non-blocking stream socket for `addr`'s address family.
    pub(crate) fn new_stream(addr: &SocketAddr) -> io::Result<Socket> {
        let domain = match addr {
            SocketAddr::V4(..) => libc::AF_INET,
            SocketAddr::V6(..) => libc::AF_INET6,
        };
        let socket_type = libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;
        let fd = syscall!(socket(domain, socket_type, 0))?;
        // SAFETY: `socket(2)` returned a fresh, valid descriptor.
        Ok(Socket {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub(crate) fn bind(&self, addr: &SocketAddr) -> io::Result<()> {
        let raw = from_socket_addr(addr);
        syscall!(bind(self.as_raw_fd(), raw.as_ptr(), raw.len())).map(|_| ())
    }

    pub(crate) fn listen(&self) -> io::Result<()> {
        syscall!(listen(self.as_raw_fd(), LISTEN_BACKLOG)).map(|_| ())
    }

    /// Accepts one pending connection.
    ///
    /// The returned socket is non-blocking and close-on-exec. Returns
    /// `WouldBlock` when the accept queue is empty.
    pub(crate) fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::uninit();
        let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = syscall!(accept4(
            self.as_raw_fd(),
            storage.as_mut_ptr() as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        ))?;
        // SAFETY: `accept4(2)` returned a valid descriptor and filled in
        // the peer address.
        let socket = Socket {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        };
        let addr = unsafe { to_socket_addr(storage.as_ptr())? };
        Ok((socket, addr))
    }

    /// Closes the write half; queued bytes are flushed before FIN.
    pub(crate) fn shutdown_write(&self) -> io::Result<()> {
        syscall!(shutdown(self.as_raw_fd(), libc::SHUT_WR)).map(|_| ())
    }

    pub(crate) fn set_reuseaddr(&self, on: bool) -> io::Result<()> {
        self.set_opt(libc::SOL_SOCKET, libc::SO_REUSEADDR, on as libc::c_int)
    }

    pub(crate) fn set_reuseport(&self, on: bool) -> io::Result<()> {
        self.set_opt(libc::SOL_SOCKET, libc::SO_REUSEPORT, on as libc::c_int)
    }

    pub(crate) fn set_keepalive(&self, on: bool) -> io::Result<()> {
        self.set_opt(libc::SOL_SOCKET, libc::SO_KEEPALIVE, on as libc::c_int)
    }

    /// Enables/disables `TCP_NODELAY` (disables/enables Nagle's algorithm).
    pub(crate) fn set_tcp_nodelay(&self, on: bool) -> io::Result<()> {
        self.set_opt(libc::IPPROTO_TCP, libc::TCP_NODELAY, on as libc::c_int)
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        syscall!(getsockname(
            self.as_raw_fd(),
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        ))?;
        unsafe { to_socket_addr(&storage) }
    }

    /// Retrieves and clears `SO_ERROR`.
    pub(crate) fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut optval: libc::c_int = 0;
        let mut optlen = size_of::<libc::c_int>() as libc::socklen_t;
        syscall!(getsockopt(
            self.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut optval as *mut _ as *mut libc::c_void,
            &mut optlen,
        ))?;
        if optval == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(optval)))
        }
    }

    fn set_opt(&self, level: libc::c_int, name: libc::c_int, optval: libc::c_int) -> io::Result<()> {
        syscall!(setsockopt(
            self.as_raw_fd(),
            level,
            name,
            &optval as *const _ as *const libc::c_void,
            size_of::<libc::c_int>() as libc::socklen_t,
        ))
        .map(|_| ())
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Socket {
        Socket {
            fd: OwnedFd::from_raw_fd(fd),
        }
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}
