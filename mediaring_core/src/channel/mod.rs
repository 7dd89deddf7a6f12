//! Item channels: role, liveness and polling on top of a segment or a ring.
//!
//! * [`ItemChannel`] - fixed-size items in a flat region with a legacy head.
//! * [`VarItemChannel`] - variable-size items over a [`RingChannel`](crate::ring::RingChannel).
//! * [`MediaChannel`] - a `VarItemChannel` speaking the versioned item protocol.

mod head;
mod item_channel;
mod media;
mod var_channel;

use std::time::{Duration, Instant};

pub use head::{FixedGeometry, ITEM_CHANNEL_VERSION};
pub use item_channel::ItemChannel;
pub use media::{ItemLoan, MediaChannel};
pub use var_channel::VarItemChannel;

/// Outcome of a `sendable`/`readable` poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Nothing to do before the timeout expired.
    Wait,
    /// The writer raised the close flag.
    Closed,
}

impl Readiness {
    #[inline]
    pub fn is_ready(self) -> bool {
        self == Readiness::Ready
    }
}

/// Outcome of a polling read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polled<T> {
    Ready(T),
    Wait,
    Closed,
}

impl<T> Polled<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Polled::Ready(v) => Some(v),
            _ => None,
        }
    }
}

/// Which side of a channel a handle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Writer,
    Reader,
}

/// Rate-limits the OS existence probe of a segment.
#[derive(Debug)]
pub(crate) struct ExistenceProbe {
    interval: Duration,
    last: Option<Instant>,
}

impl ExistenceProbe {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Run `probe` if the interval elapsed; `true` unless the probe ran and
    /// reported the object gone.
    pub(crate) fn check(&mut self, probe: impl FnOnce() -> bool) -> bool {
        let now = Instant::now();
        if self.last.is_some_and(|t| now.duration_since(t) < self.interval) {
            return true;
        }
        self.last = Some(now);
        probe()
    }
}

/// Bounded poll with a fixed sleep quantum. `attempt` returns `Some` to stop.
pub(crate) fn poll_until<T>(
    timeout: Duration,
    quantum: Duration,
    mut attempt: impl FnMut() -> crate::error::MediaRingResult<Option<T>>,
) -> crate::error::MediaRingResult<Option<T>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(v) = attempt()? {
            return Ok(Some(v));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(quantum.min(deadline - now));
    }
}
