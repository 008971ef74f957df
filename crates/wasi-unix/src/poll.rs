//! `poll_oneoff`: multiplexing heterogeneous subscriptions onto one host
//! poll call.

use crate::ctx::WasiCtx;
use crate::errno::{Errno, Result};
use crate::rights::Rights;
use crate::types::{ClockId, Fd, FileSize, Timestamp, UserData};
use rustix::event::{poll, PollFd, PollFlags};
use std::time::Duration;
use tracing::trace;

bitflags::bitflags! {
    /// Flags of a clock subscription.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SubscriptionClockFlags: u16 {
        /// The timeout is an absolute reading of the clock rather than a
        /// duration.
        const ABSTIME = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Flags reported with a readiness event.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct EventRwFlags: u16 {
        /// The peer of this descriptor has hung up.
        const HANGUP = 1 << 0;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    Clock,
    FdRead,
    FdWrite,
}

#[derive(Copy, Clone, Debug)]
pub struct SubscriptionClock {
    pub id: ClockId,
    /// Nanoseconds. Relative unless `ABSTIME` is set.
    pub timeout: Timestamp,
    /// Advisory; not enforced.
    pub precision: Timestamp,
    pub flags: SubscriptionClockFlags,
}

#[derive(Copy, Clone, Debug)]
pub struct SubscriptionFdReadWrite {
    pub fd: Fd,
}

#[derive(Copy, Clone, Debug)]
pub enum SubscriptionU {
    Clock(SubscriptionClock),
    FdRead(SubscriptionFdReadWrite),
    FdWrite(SubscriptionFdReadWrite),
}

/// One request handed to `poll_oneoff`.
#[derive(Copy, Clone, Debug)]
pub struct Subscription {
    /// Copied verbatim into any event this subscription produces.
    pub userdata: UserData,
    pub u: SubscriptionU,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFdReadWrite {
    pub nbytes: FileSize,
    pub flags: EventRwFlags,
}

/// One result appended by `poll_oneoff`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub userdata: UserData,
    pub errno: Errno,
    pub type_: EventType,
    pub fd_readwrite: EventFdReadWrite,
}

impl WasiCtx {
    /// Waits for the first of the given subscriptions to be ready,
    /// appending readiness events to `events`.
    ///
    /// Clock subscriptions must be relative monotonic timeouts; the
    /// shortest one bounds the wait. Only readiness of descriptor
    /// subscriptions is reported: an expired timeout returns without
    /// appending an event. A missing descriptor or right fails the whole
    /// call. With no descriptor subscriptions at all this is a sleep,
    /// interruptible by the embedder's interrupt descriptor.
    pub fn poll_oneoff(
        &self,
        subscriptions: &[Subscription],
        events: &mut Vec<Event>,
    ) -> Result<()> {
        if subscriptions.is_empty() {
            return Err(Errno::Inval);
        }

        let mut timeout: Option<Duration> = None;
        let mut pollfds = Vec::new();
        for subscription in subscriptions {
            match &subscription.u {
                SubscriptionU::Clock(clock) => {
                    if clock.id != ClockId::Monotonic
                        || clock.flags.contains(SubscriptionClockFlags::ABSTIME)
                    {
                        return Err(Errno::Nosys);
                    }
                    let wait = Duration::from_nanos(clock.timeout);
                    timeout = Some(match timeout {
                        Some(current) => current.min(wait),
                        None => wait,
                    });
                }
                SubscriptionU::FdRead(sub) => {
                    let f = self.lookup(sub.fd, Rights::POLL_FD_READWRITE)?;
                    pollfds.push(PollFd::new(&f.host, PollFlags::IN));
                }
                SubscriptionU::FdWrite(sub) => {
                    let f = self.lookup(sub.fd, Rights::POLL_FD_READWRITE)?;
                    pollfds.push(PollFd::new(&f.host, PollFlags::OUT));
                }
            }
        }

        if pollfds.is_empty() {
            // Nothing to poll; just sleep out the shortest timeout. The
            // interrupt descriptor, when configured, cuts the sleep short.
            if let Some(timeout) = timeout {
                match &self.interrupt {
                    Some(interrupt) => {
                        let mut fds = [PollFd::new(interrupt, PollFlags::IN)];
                        let n = poll(&mut fds, timeout_millis(Some(timeout)))
                            .map_err(Errno::from)?;
                        if n > 0 {
                            trace!("sleep interrupted");
                            return Err(Errno::Canceled);
                        }
                    }
                    None => std::thread::sleep(timeout),
                }
            }
            return Ok(());
        }

        let n = poll(&mut pollfds, timeout_millis(timeout)).map_err(Errno::from)?;

        let mut ready = 0;
        let mut next_pollfd = 0;
        for subscription in subscriptions {
            let type_ = match &subscription.u {
                SubscriptionU::Clock(_) => continue,
                SubscriptionU::FdRead(_) => EventType::FdRead,
                SubscriptionU::FdWrite(_) => EventType::FdWrite,
            };
            let revents = pollfds[next_pollfd].revents();
            next_pollfd += 1;
            if revents.is_empty() {
                continue;
            }
            ready += 1;

            let mut event = Event {
                userdata: subscription.userdata,
                errno: Errno::Success,
                type_,
                fd_readwrite: EventFdReadWrite::default(),
            };
            // The host does not report how much is readable or writable;
            // one byte signals readiness.
            if type_ == EventType::FdRead && revents.contains(PollFlags::IN) {
                event.fd_readwrite.nbytes = 1;
            }
            if type_ == EventType::FdWrite && revents.contains(PollFlags::OUT) {
                event.fd_readwrite.nbytes = 1;
            }
            if revents.contains(PollFlags::ERR) {
                // The error itself is unknown at this layer.
                event.errno = Errno::Canceled;
            }
            if revents.contains(PollFlags::HUP) {
                event.fd_readwrite.flags |= EventRwFlags::HANGUP;
            }
            events.push(event);
        }
        assert_eq!(
            ready, n,
            "host poll returned a count inconsistent with its revents"
        );
        Ok(())
    }
}

fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(timeout) => i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX),
        None => -1,
    }
}
