use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use log::{error, trace, warn};

use crate::channel::Channel;
use crate::poller::{timeout_to_millis, Poller, PollerState};
use crate::ready::Ready;
use crate::timestamp::Timestamp;

const INITIAL_EVENT_CAPACITY: usize = 16;

/// The default backend: `epoll(7)` in level-triggered mode.
///
/// The kernel-side payload of each registration carries the fd; ready fds
/// are resolved back to channels through `channels`. The event array's
/// capacity doubles whenever one wait fills it completely.
pub(crate) struct EpollPoller {
    epfd: OwnedFd,
    events: Vec<libc::epoll_event>,
    channels: HashMap<RawFd, Arc<Channel>>,
}

impl EpollPoller {
    pub(crate) fn new() -> EpollPoller {
        let epfd = match syscall!(epoll_create1(libc::EPOLL_CLOEXEC)) {
            Ok(fd) => fd,
            Err(err) => fatal!("epoll_create1 failed: {}", err),
        };
        EpollPoller {
            // SAFETY: `epoll_create1(2)` returned a valid descriptor.
            epfd: unsafe { OwnedFd::from_raw_fd(epfd) },
            events: Vec::with_capacity(INITIAL_EVENT_CAPACITY),
            channels: HashMap::new(),
        }
    }

    fn ctl(&self, op: libc::c_int, channel: &Channel) {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(channel.interest()),
            u64: channel.fd() as u64,
        };
        if let Err(err) = syscall!(epoll_ctl(
            self.epfd.as_raw_fd(),
            op,
            channel.fd(),
            &mut event,
        )) {
            if op == libc::EPOLL_CTL_DEL {
                warn!("epoll_ctl del fd={}: {}", channel.fd(), err);
            } else {
                fatal!("epoll_ctl op={} fd={}: {}", op, channel.fd(), err);
            }
        }
    }
}

impl Poller for EpollPoller {
    fn poll(&mut self, timeout: Duration, active: &mut Vec<Arc<Channel>>) -> Timestamp {
        trace!("polling {} fds", self.channels.len());
        self.events.clear();
        let result = syscall!(epoll_wait(
            self.epfd.as_raw_fd(),
            self.events.as_mut_ptr(),
            self.events.capacity() as libc::c_int,
            timeout_to_millis(timeout),
        ));
        let now = Timestamp::now();
        match result {
            Ok(num_events) => {
                let num_events = num_events as usize;
                // SAFETY: `epoll_wait` wrote `num_events` entries.
                unsafe { self.events.set_len(num_events) };
                for event in &self.events {
                    let fd = event.u64 as RawFd;
                    match self.channels.get(&fd) {
                        Some(channel) => {
                            channel.set_received(ready_from_epoll(event.events));
                            active.push(channel.clone());
                        }
                        None => trace!("stale epoll event for fd={}", fd),
                    }
                }
                if num_events == self.events.capacity() {
                    let cap = self.events.capacity();
                    self.events.reserve_exact(cap);
                }
            }
            Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => {
                trace!("epoll_wait interrupted");
            }
            Err(err) => error!("epoll_wait failed: {}", err),
        }
        now
    }

    fn update_channel(&mut self, channel: &Arc<Channel>) {
        let state = channel.poller_state();
        trace!(
            "update fd={} interest={:?} state={:?}",
            channel.fd(),
            channel.interest(),
            state
        );
        match state {
            PollerState::Unregistered | PollerState::Detached => {
                if state == PollerState::Unregistered {
                    self.channels.insert(channel.fd(), channel.clone());
                } else if !self.channels.contains_key(&channel.fd()) {
                    fatal!("detached channel fd={} missing from poller", channel.fd());
                }
                channel.set_poller_state(PollerState::Registered);
                self.ctl(libc::EPOLL_CTL_ADD, channel);
            }
            PollerState::Registered => {
                if !self.channels.contains_key(&channel.fd()) {
                    fatal!("registered channel fd={} missing from poller", channel.fd());
                }
                if channel.is_none_event() {
                    self.ctl(libc::EPOLL_CTL_DEL, channel);
                    channel.set_poller_state(PollerState::Detached);
                } else {
                    self.ctl(libc::EPOLL_CTL_MOD, channel);
                }
            }
        }
    }

    fn remove_channel(&mut self, channel: &Channel) {
        trace!("remove fd={}", channel.fd());
        self.channels.remove(&channel.fd());
        if channel.poller_state() == PollerState::Registered {
            self.ctl(libc::EPOLL_CTL_DEL, channel);
        }
        channel.set_poller_state(PollerState::Unregistered);
    }

    fn has_channel(&self, channel: &Channel) -> bool {
        self.channels
            .get(&channel.fd())
            .map_or(false, |held| std::ptr::eq(Arc::as_ptr(held), channel))
    }
}

fn interest_to_epoll(interest: Ready) -> u32 {
    let mut kind = 0;
    if interest.is_readable() {
        kind |= libc::EPOLLIN;
    }
    if interest.is_priority() {
        kind |= libc::EPOLLPRI;
    }
    if interest.is_writable() {
        kind |= libc::EPOLLOUT;
    }
    kind as u32
}

fn ready_from_epoll(events: u32) -> Ready {
    let events = events as libc::c_int;
    let mut ready = Ready::EMPTY;
    if events & libc::EPOLLIN != 0 {
        ready |= Ready::READABLE;
    }
    if events & libc::EPOLLPRI != 0 {
        ready |= Ready::PRIORITY;
    }
    if events & libc::EPOLLOUT != 0 {
        ready |= Ready::WRITABLE;
    }
    if events & libc::EPOLLERR != 0 {
        ready |= Ready::ERROR;
    }
    if events & libc::EPOLLHUP != 0 {
        ready |= Ready::HUP;
    }
    ready
}
