//! Link counters, updated from the receive task and read from anywhere.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct LinkStats {
    pub datagrams_received: AtomicU64,
    pub frames_received: AtomicU64,
    pub pings_answered: AtomicU64,
    pub frames_forwarded: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub malformed_datagrams: AtomicU64,
    pub send_failures: AtomicU64,
}

impl LinkStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            pings_answered: self.pings_answered.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            malformed_datagrams: self.malformed_datagrams.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatsSnapshot {
    pub datagrams_received: u64,
    pub frames_received: u64,
    pub pings_answered: u64,
    /// Non-ping frames handed to the frame sink
    pub frames_forwarded: u64,
    /// Non-ping frames the sink could not take
    pub frames_dropped: u64,
    pub malformed_datagrams: u64,
    pub send_failures: u64,
}
