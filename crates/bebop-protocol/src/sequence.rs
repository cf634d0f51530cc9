//! Per-channel sequence counters for frames the controller originates.
//!
//! Each registered channel owns one byte counter that wraps 255 -> 0. The set
//! of channels is fixed at construction; counters are atomics, so concurrent
//! senders on the same channel never hand out the same value twice and
//! different channels never contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

use crate::frame::BufferId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("channel {0} is not registered")]
    UnknownChannel(BufferId),
}

#[derive(Debug)]
pub struct SequenceRegistry {
    counters: HashMap<BufferId, AtomicU8>,
}

impl SequenceRegistry {
    /// Channels the controller sends on.
    pub const CONTROLLER_CHANNELS: [BufferId; 8] = [
        BufferId::Pong,
        BufferId::SendNoAck,
        BufferId::SendWithAck,
        BufferId::SendHighPriority,
        BufferId::VideoAck,
        BufferId::AckDroneData,
        BufferId::NoAckDroneData,
        BufferId::VideoData,
    ];

    pub fn with_channels(channels: &[BufferId]) -> Self {
        let counters = channels
            .iter()
            .map(|&channel| (channel, AtomicU8::new(0)))
            .collect();
        Self { counters }
    }

    pub fn controller() -> Self {
        Self::with_channels(&Self::CONTROLLER_CHANNELS)
    }

    /// Advance the channel's counter and return the new value.
    pub fn next(&self, channel: BufferId) -> Result<u8, SequenceError> {
        let counter = self.counter(channel)?;
        // fetch_add wraps on overflow
        Ok(counter.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }

    pub fn current(&self, channel: BufferId) -> Result<u8, SequenceError> {
        Ok(self.counter(channel)?.load(Ordering::Acquire))
    }

    pub fn is_registered(&self, channel: BufferId) -> bool {
        self.counters.contains_key(&channel)
    }

    fn counter(&self, channel: BufferId) -> Result<&AtomicU8, SequenceError> {
        self.counters
            .get(&channel)
            .ok_or(SequenceError::UnknownChannel(channel))
    }
}

impl Default for SequenceRegistry {
    fn default() -> Self {
        Self::controller()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_returns_post_increment_value() {
        let registry = SequenceRegistry::controller();
        assert_eq!(registry.current(BufferId::Pong), Ok(0));
        assert_eq!(registry.next(BufferId::Pong), Ok(1));
        assert_eq!(registry.next(BufferId::Pong), Ok(2));
        assert_eq!(registry.current(BufferId::Pong), Ok(2));
    }

    #[test]
    fn counter_wraps_after_256() {
        let registry = SequenceRegistry::with_channels(&[BufferId::Pong]);
        let first = registry.next(BufferId::Pong).unwrap();
        for _ in 0..255 {
            registry.next(BufferId::Pong).unwrap();
        }
        assert_eq!(registry.current(BufferId::Pong), Ok(0));
        assert_eq!(registry.next(BufferId::Pong), Ok(first));
    }

    #[test]
    fn channels_are_independent() {
        let registry = SequenceRegistry::controller();
        registry.next(BufferId::Pong).unwrap();
        registry.next(BufferId::Pong).unwrap();
        assert_eq!(registry.next(BufferId::SendNoAck), Ok(1));
        assert_eq!(registry.current(BufferId::Pong), Ok(2));
    }

    #[test]
    fn unregistered_channel_is_an_error() {
        let registry = SequenceRegistry::with_channels(&[BufferId::Pong]);
        assert_eq!(
            registry.next(BufferId::Ping),
            Err(SequenceError::UnknownChannel(BufferId::Ping))
        );
        assert_eq!(
            registry.current(BufferId::SendWithAck),
            Err(SequenceError::UnknownChannel(BufferId::SendWithAck))
        );
        assert!(!registry.is_registered(BufferId::Ping));
    }

    #[test]
    fn concurrent_senders_never_share_a_value() {
        use std::sync::Arc;

        let registry = Arc::new(SequenceRegistry::controller());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| registry.next(BufferId::SendWithAck).unwrap())
                        .collect::<Vec<u8>>()
                })
            })
            .collect();

        let mut seen: Vec<u8> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 200);
    }
}
