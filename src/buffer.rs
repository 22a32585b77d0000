use std::io;
use std::os::fd::RawFd;

/// A growable byte queue with separate read and write cursors.
///
/// The underlying storage is one contiguous region split in three:
///
/// ```text
/// +-------------------+------------------+------------------+
/// | prependable bytes |  readable bytes  |  writable bytes  |
/// |                   |     (CONTENT)    |                  |
/// +-------------------+------------------+------------------+
/// |                   |                  |                  |
/// 0      <=      reader_index  <=  writer_index   <=      len
/// ```
///
/// Bytes arriving from the socket are appended at the write cursor;
/// message callbacks consume from the read cursor. A small prependable
/// region is kept in front of the content so a length or type prefix can
/// be added after the payload has been written. Draining the buffer
/// completely resets both cursors to the prepend base, so steady-state
/// traffic never reallocates.
pub struct Buffer {
    buf: Vec<u8>,
    reader_index: usize,
    writer_index: usize,
}

impl Buffer {
    /// Headroom kept in front of the content for cheap prepends.
    pub const CHEAP_PREPEND: usize = 8;

    /// Initial writable capacity.
    pub const INITIAL_SIZE: usize = 1024;

    pub fn new() -> Buffer {
        Buffer::with_size(Buffer::INITIAL_SIZE)
    }

    pub fn with_size(initial_size: usize) -> Buffer {
        Buffer {
            buf: vec![0; Buffer::CHEAP_PREPEND + initial_size],
            reader_index: Buffer::CHEAP_PREPEND,
            writer_index: Buffer::CHEAP_PREPEND,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.writer_index
    }

    pub fn prependable_bytes(&self) -> usize {
        self.reader_index
    }

    /// The readable region, without consuming it.
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.reader_index..self.writer_index]
    }

    /// Consumes `len` readable bytes. Consuming everything (or more than
    /// is readable) collapses both cursors back to the prepend base.
    pub fn retrieve(&mut self, len: usize) {
        if len < self.readable_bytes() {
            self.reader_index += len;
        } else {
            self.retrieve_all();
        }
    }

    pub fn retrieve_all(&mut self) {
        self.reader_index = Buffer::CHEAP_PREPEND;
        self.writer_index = Buffer::CHEAP_PREPEND;
    }

    /// Copies out and consumes `len` readable bytes.
    pub fn retrieve_as_bytes(&mut self, len: usize) -> Vec<u8> {
        let len = len.min(self.readable_bytes());
        let bytes = self.peek()[..len].to_vec();
        self.retrieve(len);
        bytes
    }

    /// Copies out and consumes the whole readable region.
    pub fn retrieve_all_as_bytes(&mut self) -> Vec<u8> {
        self.retrieve_as_bytes(self.readable_bytes())
    }

    /// Appends `data` after the current content, growing or compacting the
    /// storage as needed.
    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        self.buf[self.writer_index..self.writer_index + data.len()].copy_from_slice(data);
        self.writer_index += data.len();
    }

    /// Writes `data` into the prependable region, in front of the content.
    ///
    /// Panics if the prependable region is too small; callers prepend at
    /// most [`CHEAP_PREPEND`] bytes they have reserved by construction.
    ///
    /// [`CHEAP_PREPEND`]: Buffer::CHEAP_PREPEND
    pub fn prepend(&mut self, data: &[u8]) {
        assert!(data.len() <= self.prependable_bytes());
        self.reader_index -= data.len();
        self.buf[self.reader_index..self.reader_index + data.len()].copy_from_slice(data);
    }

    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
    }

    /// Reads from `fd` into the buffer with one `readv(2)`.
    ///
    /// A 64 KiB stack scratch serves as the second iovec, so a single
    /// syscall can pull in far more than the current writable region
    /// without the buffer being permanently sized for the worst case;
    /// whatever lands in the scratch is appended afterwards. Saves an
    /// `FIONREAD` ioctl per read.
    pub fn read_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut extrabuf = [0u8; 65536];
        let writable = self.writable_bytes();
        let mut iovs = [
            libc::iovec {
                iov_base: self.buf[self.writer_index..].as_mut_ptr() as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: extrabuf.as_mut_ptr() as *mut libc::c_void,
                iov_len: extrabuf.len(),
            },
        ];
        // When the writable region already dwarfs the scratch, skip it;
        // with both in play one read moves at most `writable + 64K`.
        let iovcnt = if writable < extrabuf.len() { 2 } else { 1 };
        let n = syscall!(readv(fd, iovs.as_mut_ptr(), iovcnt))? as usize;
        if n <= writable {
            self.writer_index += n;
        } else {
            self.writer_index = self.buf.len();
            self.append(&extrabuf[..n - writable]);
        }
        Ok(n)
    }

    /// Writes the readable region to `fd` with one `write(2)`.
    ///
    /// Returns the number of bytes the kernel accepted; the caller decides
    /// how much to [`retrieve`]. Does not loop: a partial write means the
    /// socket buffer is full and the caller should wait for writability.
    ///
    /// [`retrieve`]: Buffer::retrieve
    pub fn write_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let readable = self.readable_bytes();
        let n = syscall!(write(
            fd,
            self.buf[self.reader_index..].as_ptr() as *const libc::c_void,
            readable,
        ))?;
        Ok(n as usize)
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len + Buffer::CHEAP_PREPEND {
            self.buf.resize(self.writer_index + len, 0);
        } else {
            // Enough slack overall; slide the content back to the prepend
            // base instead of growing.
            let readable = self.readable_bytes();
            self.buf
                .copy_within(self.reader_index..self.writer_index, Buffer::CHEAP_PREPEND);
            self.reader_index = Buffer::CHEAP_PREPEND;
            self.writer_index = self.reader_index + readable;
        }
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("reader_index", &self.reader_index)
            .field("writer_index", &self.writer_index)
            .field("len", &self.buf.len())
            .finish()
    }
}
