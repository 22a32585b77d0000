use std::any::Any;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, Weak};

use log::trace;

use crate::event_loop::EventLoop;
use crate::poller::PollerState;
use crate::ready::Ready;
use crate::timestamp::Timestamp;

type ReadCallback = Arc<dyn Fn(Timestamp) + Send + Sync>;
type EventCallback = Arc<dyn Fn() + Send + Sync>;

/// Binds one file descriptor to the events it is interested in, the
/// events the kernel last reported, and a callback per event kind.
///
/// A `Channel` never owns its descriptor; the acceptor, connection or
/// loop that created it does. Interest changes re-register with the
/// owning loop's poller immediately, and [`handle_event`] is invoked by
/// that loop, and only that loop, once per poll cycle in which the fd
/// was ready.
///
/// An owner whose lifetime must gate dispatch (a connection that might be
/// dropped by a close callback earlier in the same poll batch) calls
/// [`tie`]; from then on dispatch first upgrades the recorded weak
/// reference and silently skips when the owner is gone.
///
/// [`handle_event`]: Channel::handle_event
/// [`tie`]: Channel::tie
pub struct Channel {
    fd: RawFd,
    owner_loop: Weak<EventLoop>,
    weak_self: Weak<Channel>,
    inner: Mutex<Inner>,
}

struct Inner {
    interest: Ready,
    received: Ready,
    state: PollerState,
    tied: bool,
    tie: Option<Weak<dyn Any + Send + Sync>>,
    read_callback: Option<ReadCallback>,
    write_callback: Option<EventCallback>,
    close_callback: Option<EventCallback>,
    error_callback: Option<EventCallback>,
}

impl Channel {
    pub fn new(owner_loop: &Arc<EventLoop>, fd: RawFd) -> Arc<Channel> {
        Channel::from_weak(Arc::downgrade(owner_loop), fd)
    }

    pub(crate) fn from_weak(owner_loop: Weak<EventLoop>, fd: RawFd) -> Arc<Channel> {
        Arc::new_cyclic(|weak_self| Channel {
            fd,
            owner_loop,
            weak_self: weak_self.clone(),
            inner: Mutex::new(Inner {
                interest: Ready::EMPTY,
                received: Ready::EMPTY,
                state: PollerState::Unregistered,
                tied: false,
                tie: None,
                read_callback: None,
                write_callback: None,
                close_callback: None,
                error_callback: None,
            }),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Ready {
        self.inner.lock().unwrap().interest
    }

    pub fn received(&self) -> Ready {
        self.inner.lock().unwrap().received
    }

    // Setter only; the received mask is poller-written state.
    pub(crate) fn set_received(&self, received: Ready) {
        self.inner.lock().unwrap().received = received;
    }

    pub fn is_none_event(&self) -> bool {
        self.interest().is_empty()
    }

    pub fn is_reading(&self) -> bool {
        self.interest().is_readable()
    }

    pub fn is_writing(&self) -> bool {
        self.interest().is_writable()
    }

    pub fn set_read_callback(&self, callback: impl Fn(Timestamp) + Send + Sync + 'static) {
        self.inner.lock().unwrap().read_callback = Some(Arc::new(callback));
    }

    pub fn set_write_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.lock().unwrap().write_callback = Some(Arc::new(callback));
    }

    pub fn set_close_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.lock().unwrap().close_callback = Some(Arc::new(callback));
    }

    pub fn set_error_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.lock().unwrap().error_callback = Some(Arc::new(callback));
    }

    /// Gates event dispatch on `owner` staying alive.
    ///
    /// Called once, when the owning object hands shares of itself to
    /// callbacks that may outlive it.
    pub fn tie(&self, owner: &Arc<dyn Any + Send + Sync>) {
        let mut inner = self.inner.lock().unwrap();
        inner.tie = Some(Arc::downgrade(owner));
        inner.tied = true;
    }

    pub fn enable_reading(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest |= Ready::READABLE | Ready::PRIORITY;
        }
        self.update();
    }

    pub fn disable_reading(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest.remove(Ready::READABLE | Ready::PRIORITY);
        }
        self.update();
    }

    pub fn enable_writing(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest |= Ready::WRITABLE;
        }
        self.update();
    }

    pub fn disable_writing(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest.remove(Ready::WRITABLE);
        }
        self.update();
    }

    pub fn disable_all(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interest = Ready::EMPTY;
        }
        self.update();
    }

    /// Drops this channel from the owning loop's poller.
    pub fn remove(&self) {
        if let Some(owner_loop) = self.owner_loop.upgrade() {
            owner_loop.remove_channel(self);
        }
    }

    pub(crate) fn poller_state(&self) -> PollerState {
        self.inner.lock().unwrap().state
    }

    pub(crate) fn set_poller_state(&self, state: PollerState) {
        self.inner.lock().unwrap().state = state;
    }

    /// Dispatches the received events to the installed callbacks.
    ///
    /// If tied, the owner is upgraded first and kept alive for the whole
    /// dispatch; a dead owner means the events are stale and are dropped
    /// on the floor.
    pub fn handle_event(&self, receive_time: Timestamp) {
        let (tied, tie) = {
            let inner = self.inner.lock().unwrap();
            (inner.tied, inner.tie.clone())
        };
        if tied {
            let guard = tie.and_then(|weak| weak.upgrade());
            if guard.is_some() {
                self.dispatch(receive_time);
            }
            // `guard` lives to here, past the last callback.
        } else {
            self.dispatch(receive_time);
        }
    }

    fn dispatch(&self, receive_time: Timestamp) {
        let (received, read_cb, write_cb, close_cb, error_cb) = {
            let inner = self.inner.lock().unwrap();
            (
                inner.received,
                inner.read_callback.clone(),
                inner.write_callback.clone(),
                inner.close_callback.clone(),
                inner.error_callback.clone(),
            )
        };
        trace!("fd={} handling {:?}", self.fd, received);

        // Hang-up with nothing left to read means the connection is gone.
        if received.is_hup() && !received.is_readable() {
            if let Some(callback) = close_cb {
                callback();
            }
        }
        if received.is_error() {
            if let Some(callback) = error_cb {
                callback();
            }
        }
        if received.is_readable() || received.is_priority() {
            if let Some(callback) = read_cb {
                callback(receive_time);
            }
        }
        if received.is_writable() {
            if let Some(callback) = write_cb {
                callback();
            }
        }
    }

    fn update(&self) {
        if let Some(owner_loop) = self.owner_loop.upgrade() {
            if let Some(this) = self.weak_self.upgrade() {
                owner_loop.update_channel(&this);
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Channel")
            .field("fd", &self.fd)
            .field("interest", &inner.interest)
            .field("received", &inner.received)
            .field("state", &inner.state)
            .finish()
    }
}
