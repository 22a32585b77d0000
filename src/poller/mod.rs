use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::Channel;
use crate::timestamp::Timestamp;

mod epoll;
mod poll;

pub(crate) use self::epoll::EpollPoller;
pub(crate) use self::poll::PollPoller;

/// Where a channel currently stands with its poller.
///
/// Carried inside the channel but owned, by contract, by the poller: the
/// poller is the only writer, and uses it to pick the right kernel
/// transition on the next update.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PollerState {
    /// Never registered, or fully removed.
    Unregistered,
    /// Known to the kernel.
    Registered,
    /// Still in the fd map but deregistered from the kernel because the
    /// interest mask went empty.
    Detached,
}

/// A level-triggered readiness multiplexer.
///
/// All methods must be called from the owning loop's thread. Level
/// triggering is part of the contract: a readable fd that is not drained
/// must be reported again on the next poll.
pub(crate) trait Poller: Send {
    /// Blocks for at most `timeout`, stamps every ready channel's
    /// received mask, appends those channels to `active`, and returns the
    /// time the kernel reported back.
    fn poll(&mut self, timeout: Duration, active: &mut Vec<Arc<Channel>>) -> Timestamp;

    /// Registers, re-registers or deregisters `channel` according to its
    /// interest mask and [`PollerState`].
    fn update_channel(&mut self, channel: &Arc<Channel>);

    /// Forgets `channel` entirely, deregistering first if needed.
    fn remove_channel(&mut self, channel: &Channel);

    fn has_channel(&self, channel: &Channel) -> bool;
}

/// Picks the backend: epoll unless `EDDY_USE_POLL` is set.
pub(crate) fn new_default_poller() -> Box<dyn Poller + Send> {
    if env::var_os("EDDY_USE_POLL").is_some() {
        Box::new(PollPoller::new())
    } else {
        Box::new(EpollPoller::new())
    }
}

pub(crate) fn timeout_to_millis(timeout: Duration) -> libc::c_int {
    // `Duration::as_millis` truncates, so round up. This avoids turning
    // sub-millisecond timeouts into a busy zero timeout.
    timeout
        .checked_add(Duration::from_nanos(999_999))
        .unwrap_or(timeout)
        .as_millis() as libc::c_int
}
