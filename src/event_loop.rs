use std::cell::Cell;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::{debug, error, trace};

use crate::channel::Channel;
use crate::poller::{new_default_poller, Poller};
use crate::timestamp::Timestamp;

/// How long one poll may block. Quit requests and queued tasks cut this
/// short through the wakeup fd.
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

thread_local! {
    // One loop per thread, enforced at construction.
    static LOOP_IN_THIS_THREAD: Cell<bool> = const { Cell::new(false) };
}

type Task = Box<dyn FnOnce() + Send>;

/// A single-threaded reactor: one poller, the channels registered with
/// it, a queue of deferred tasks, and the eventfd that lets other threads
/// interrupt the poll.
///
/// The loop is pinned to the thread that constructs it; [`run`] and all
/// channel handling happen there and nowhere else. Other threads talk to
/// the loop exclusively through [`run_in_loop`] / [`queue_in_loop`].
/// Constructing a second loop on a thread that already owns one aborts
/// the process.
///
/// [`run`]: EventLoop::run
/// [`run_in_loop`]: EventLoop::run_in_loop
/// [`queue_in_loop`]: EventLoop::queue_in_loop
pub struct EventLoop {
    thread_id: ThreadId,
    looping: AtomicBool,
    quit: AtomicBool,
    calling_pending_tasks: AtomicBool,
    poll_return_time: AtomicI64,
    poller: Mutex<Box<dyn Poller + Send>>,
    wakeup_fd: OwnedFd,
    wakeup_channel: Arc<Channel>,
    pending_tasks: Mutex<Vec<Task>>,
}

impl EventLoop {
    /// Creates the loop for the calling thread.
    pub fn new() -> Arc<EventLoop> {
        LOOP_IN_THIS_THREAD.with(|flag| {
            if flag.get() {
                fatal!(
                    "another EventLoop already exists in thread {:?}",
                    thread::current().id()
                );
            }
            flag.set(true);
        });

        let wakeup_fd = match syscall!(eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC)) {
            // SAFETY: `eventfd(2)` returned a valid descriptor.
            Ok(fd) => unsafe { OwnedFd::from_raw_fd(fd) },
            Err(err) => fatal!("eventfd failed: {}", err),
        };
        let wakeup_raw = wakeup_fd.as_raw_fd();

        let event_loop = Arc::new_cyclic(|weak: &Weak<EventLoop>| EventLoop {
            thread_id: thread::current().id(),
            looping: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            calling_pending_tasks: AtomicBool::new(false),
            poll_return_time: AtomicI64::new(0),
            poller: Mutex::new(new_default_poller()),
            wakeup_fd,
            wakeup_channel: Channel::from_weak(weak.clone(), wakeup_raw),
            pending_tasks: Mutex::new(Vec::new()),
        });
        debug!(
            "EventLoop created in thread {:?}",
            event_loop.thread_id
        );

        // We are always reading the wakeup fd; draining it is all the
        // callback has to do.
        let weak = Arc::downgrade(&event_loop);
        event_loop
            .wakeup_channel
            .set_read_callback(move |_receive_time| {
                if let Some(event_loop) = weak.upgrade() {
                    event_loop.handle_wakeup_read();
                }
            });
        event_loop.wakeup_channel.enable_reading();
        event_loop
    }

    /// Runs the poll / dispatch / drain cycle until [`quit`] is observed.
    ///
    /// [`quit`]: EventLoop::quit
    pub fn run(&self) {
        self.assert_in_loop_thread();
        self.looping.store(true, Ordering::Release);
        self.quit.store(false, Ordering::Release);
        debug!("EventLoop {:?} start looping", self.thread_id);

        let mut active_channels: Vec<Arc<Channel>> = Vec::new();
        while !self.quit.load(Ordering::Acquire) {
            active_channels.clear();
            let poll_return_time = self
                .poller
                .lock()
                .unwrap()
                .poll(POLL_TIMEOUT, &mut active_channels);
            self.poll_return_time
                .store(poll_return_time.micros_since_epoch(), Ordering::Release);

            for channel in &active_channels {
                channel.handle_event(poll_return_time);
            }
            self.do_pending_tasks();
        }

        debug!("EventLoop {:?} stop looping", self.thread_id);
        self.looping.store(false, Ordering::Release);
    }

    /// Asks the loop to exit after the current cycle. Callable from any
    /// thread; cross-thread callers additionally wake the poll so the
    /// flag is observed promptly.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            self.wakeup();
        }
    }

    /// Runs `task` on the loop thread: inline when already there,
    /// deferred through the queue otherwise.
    pub fn run_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        if self.is_in_loop_thread() {
            task();
        } else {
            self.queue_in_loop(task);
        }
    }

    /// Appends `task` to the deferred queue, to run after the current (or
    /// next) poll cycle's dispatch phase.
    pub fn queue_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        {
            let mut pending = self.pending_tasks.lock().unwrap();
            pending.push(Box::new(task));
        }
        // Wake when queued from another thread, and also when queued by a
        // task the drain phase is running right now: the drain only sees
        // the batch it swapped out, so the loop must come back around
        // already signalled instead of sleeping a full poll timeout.
        if !self.is_in_loop_thread() || self.calling_pending_tasks.load(Ordering::Acquire) {
            self.wakeup();
        }
    }

    /// The timestamp of the most recent poll return.
    pub fn poll_return_time(&self) -> Timestamp {
        Timestamp::from_micros(self.poll_return_time.load(Ordering::Acquire))
    }

    pub fn is_in_loop_thread(&self) -> bool {
        self.thread_id == thread::current().id()
    }

    pub fn assert_in_loop_thread(&self) {
        if !self.is_in_loop_thread() {
            fatal!(
                "EventLoop owned by thread {:?} touched from thread {:?}",
                self.thread_id,
                thread::current().id()
            );
        }
    }

    pub(crate) fn update_channel(&self, channel: &Arc<Channel>) {
        debug_assert!(self.is_in_loop_thread() || !self.looping.load(Ordering::Acquire));
        self.poller.lock().unwrap().update_channel(channel);
    }

    pub(crate) fn remove_channel(&self, channel: &Channel) {
        debug_assert!(self.is_in_loop_thread() || !self.looping.load(Ordering::Acquire));
        self.poller.lock().unwrap().remove_channel(channel);
    }

    /// Whether `channel` is currently known to this loop's poller.
    pub fn has_channel(&self, channel: &Channel) -> bool {
        self.poller.lock().unwrap().has_channel(channel)
    }

    fn wakeup(&self) {
        let one: u64 = 1;
        let result = syscall!(write(
            self.wakeup_fd.as_raw_fd(),
            &one as *const u64 as *const libc::c_void,
            mem::size_of::<u64>(),
        ));
        match result {
            Ok(n) if n as usize == mem::size_of::<u64>() => {}
            Ok(n) => error!("wakeup write returned {} bytes instead of 8", n),
            Err(err) => error!("wakeup write failed: {}", err),
        }
    }

    fn handle_wakeup_read(&self) {
        let mut one: u64 = 0;
        let result = syscall!(read(
            self.wakeup_fd.as_raw_fd(),
            &mut one as *mut u64 as *mut libc::c_void,
            mem::size_of::<u64>(),
        ));
        match result {
            Ok(n) if n as usize == mem::size_of::<u64>() => {}
            Ok(n) => error!("wakeup read returned {} bytes instead of 8", n),
            Err(err) => error!("wakeup read failed: {}", err),
        }
        trace!("wakeup drained ({})", one);
    }

    fn do_pending_tasks(&self) {
        self.calling_pending_tasks.store(true, Ordering::Release);
        // Swap under the lock so queueing threads are never blocked on
        // task execution.
        let tasks = {
            let mut pending = self.pending_tasks.lock().unwrap();
            mem::take(&mut *pending)
        };
        for task in tasks {
            task();
        }
        self.calling_pending_tasks.store(false, Ordering::Release);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        debug!("EventLoop {:?} dropped", self.thread_id);
        if self.is_in_loop_thread() {
            LOOP_IN_THIS_THREAD.with(|flag| flag.set(false));
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("thread_id", &self.thread_id)
            .field("looping", &self.looping.load(Ordering::Relaxed))
            .finish()
    }
}
