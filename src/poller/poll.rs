use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use log::{error, trace};

use crate::channel::Channel;
use crate::poller::{timeout_to_millis, Poller, PollerState};
use crate::ready::Ready;
use crate::timestamp::Timestamp;

/// Fallback backend on `poll(2)`, selected by `EDDY_USE_POLL`.
///
/// Keeps a dense `pollfd` array; each fd maps to its slot and channel.
/// Removal swap-fills the hole from the tail so the array never has dead
/// slots to skip during a scan.
pub(crate) struct PollPoller {
    pollfds: Vec<libc::pollfd>,
    channels: HashMap<RawFd, Entry>,
}

struct Entry {
    slot: usize,
    channel: Arc<Channel>,
}

impl PollPoller {
    pub(crate) fn new() -> PollPoller {
        PollPoller {
            pollfds: Vec::new(),
            channels: HashMap::new(),
        }
    }

    fn push_slot(&mut self, channel: &Arc<Channel>) -> usize {
        self.pollfds.push(libc::pollfd {
            fd: channel.fd(),
            events: interest_to_poll(channel.interest()),
            revents: 0,
        });
        self.pollfds.len() - 1
    }

    fn remove_slot(&mut self, slot: usize) {
        self.pollfds.swap_remove(slot);
        if slot < self.pollfds.len() {
            let moved_fd = self.pollfds[slot].fd;
            if let Some(entry) = self.channels.get_mut(&moved_fd) {
                entry.slot = slot;
            }
        }
    }
}

impl Poller for PollPoller {
    fn poll(&mut self, timeout: Duration, active: &mut Vec<Arc<Channel>>) -> Timestamp {
        trace!("polling {} fds", self.pollfds.len());
        let result = syscall!(poll(
            self.pollfds.as_mut_ptr(),
            self.pollfds.len() as libc::nfds_t,
            timeout_to_millis(timeout),
        ));
        let now = Timestamp::now();
        match result {
            Ok(num_events) => {
                let mut left = num_events;
                for pollfd in &self.pollfds {
                    if left == 0 {
                        break;
                    }
                    if pollfd.revents == 0 {
                        continue;
                    }
                    left -= 1;
                    if let Some(entry) = self.channels.get(&pollfd.fd) {
                        entry.channel.set_received(ready_from_poll(pollfd.revents));
                        active.push(entry.channel.clone());
                    }
                }
            }
            Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => {
                trace!("poll interrupted");
            }
            Err(err) => error!("poll failed: {}", err),
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
            PollerState::Unregistered => {
                let slot = self.push_slot(channel);
                self.channels.insert(
                    channel.fd(),
                    Entry {
                        slot,
                        channel: channel.clone(),
                    },
                );
                channel.set_poller_state(PollerState::Registered);
            }
            PollerState::Detached => {
                if !self.channels.contains_key(&channel.fd()) {
                    fatal!("detached channel fd={} missing from poller", channel.fd());
                }
                let slot = self.push_slot(channel);
                self.channels.get_mut(&channel.fd()).unwrap().slot = slot;
                channel.set_poller_state(PollerState::Registered);
            }
            PollerState::Registered => {
                let slot = match self.channels.get(&channel.fd()) {
                    Some(entry) => entry.slot,
                    None => {
                        fatal!("registered channel fd={} missing from poller", channel.fd())
                    }
                };
                if channel.is_none_event() {
                    self.remove_slot(slot);
                    channel.set_poller_state(PollerState::Detached);
                } else {
                    self.pollfds[slot].events = interest_to_poll(channel.interest());
                }
            }
        }
    }

    fn remove_channel(&mut self, channel: &Channel) {
        trace!("remove fd={}", channel.fd());
        if let Some(entry) = self.channels.remove(&channel.fd()) {
            if channel.poller_state() == PollerState::Registered {
                self.remove_slot(entry.slot);
            }
        }
        channel.set_poller_state(PollerState::Unregistered);
    }

    fn has_channel(&self, channel: &Channel) -> bool {
        self.channels
            .get(&channel.fd())
            .map_or(false, |entry| {
                std::ptr::eq(Arc::as_ptr(&entry.channel), channel)
            })
    }
}

fn interest_to_poll(interest: Ready) -> libc::c_short {
    let mut kind = 0;
    if interest.is_readable() {
        kind |= libc::POLLIN;
    }
    if interest.is_priority() {
        kind |= libc::POLLPRI;
    }
    if interest.is_writable() {
        kind |= libc::POLLOUT;
    }
    kind
}

fn ready_from_poll(revents: libc::c_short) -> Ready {
    let mut ready = Ready::EMPTY;
    if revents & libc::POLLIN != 0 {
        ready |= Ready::READABLE;
    }
    if revents & libc::POLLPRI != 0 {
        ready |= Ready::PRIORITY;
    }
    if revents & libc::POLLOUT != 0 {
        ready |= Ready::WRITABLE;
    }
    if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        ready |= Ready::ERROR;
    }
    if revents & libc::POLLHUP != 0 {
        ready |= Ready::HUP;
    }
    ready
}
