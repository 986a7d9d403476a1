//! Bounded per-channel frame relay.
//!
//! A [`FrameRelay`] sits between one producer (the task routine feeding a
//! channel) and any number of consumers (stream gates). It never blocks the
//! producer: when full, the single oldest frame is evicted to make room.
//! Consumers never block either; an empty relay returns `None`.
//!
//! Retained frames are always the `capacity` most recently pushed, in
//! production order.

use parking_lot::Mutex;
use rov_common::config::RelayConfig;
use rov_common::consts::CHANNEL_COUNT;
use rov_common::mode::StreamChannel;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A captured image. Pixels are RGB24, row-major, shared by reference.
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel: StreamChannel,
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(channel: StreamChannel, seq: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            channel,
            seq,
            width,
            height,
            pixels: Arc::from(pixels),
            captured_at: Instant::now(),
        }
    }

    /// Whether the payload size matches `width * height * 3`.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * 3
    }

    /// Same pixels, re-addressed to another channel.
    pub fn retarget(&self, channel: StreamChannel) -> Frame {
        Frame {
            channel,
            ..self.clone()
        }
    }
}

/// Push/evict counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStats {
    pub pushed: u64,
    pub evicted: u64,
    pub popped: u64,
}

/// Drop-oldest bounded queue.
#[derive(Debug)]
pub struct FrameRelay<T = Frame> {
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    pushed: AtomicU64,
    evicted: AtomicU64,
    popped: AtomicU64,
}

impl<T: Clone> FrameRelay<T> {
    /// Create a relay holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            pushed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            popped: AtomicU64::new(0),
        }
    }

    /// Insert `item`, evicting the oldest entry when full.
    ///
    /// Returns the evicted entry, if any.
    pub fn push(&self, item: T) -> Option<T> {
        let mut queue = self.queue.lock();
        let evicted = if queue.len() >= self.capacity {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(item);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    /// Take the next retained item in production order, if any.
    pub fn pop_latest(&self) -> Option<T> {
        let item = self.queue.lock().pop_front();
        if item.is_some() {
            self.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Most recently pushed item, left in place.
    pub fn peek_newest(&self) -> Option<T> {
        self.queue.lock().back().cloned()
    }

    /// Retained items, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every retained item.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
        }
    }
}

/// One relay per [`StreamChannel`].
#[derive(Debug, Clone)]
pub struct RelaySet {
    relays: [Arc<FrameRelay>; CHANNEL_COUNT],
}

impl RelaySet {
    /// Relays with per-channel capacities, indexed by channel ordinal.
    pub fn with_capacities(capacities: [usize; CHANNEL_COUNT]) -> Self {
        Self {
            relays: capacities.map(|c| Arc::new(FrameRelay::new(c))),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::with_capacities(config.capacities())
    }

    pub fn get(&self, channel: StreamChannel) -> &Arc<FrameRelay> {
        &self.relays[channel.index()]
    }

    /// Push into the relay matching `frame.channel`.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        self.get(frame.channel).push(frame)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StreamChannel, &Arc<FrameRelay>)> {
        StreamChannel::ALL.into_iter().zip(self.relays.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_keeps_last_capacity_items_in_order() {
        let relay = FrameRelay::new(15);
        for k in 1..=5u32 {
            relay.clear();
            for i in 0..(15 + k) {
                relay.push(i);
            }
            let expected: Vec<u32> = (k..15 + k).collect();
            assert_eq!(relay.snapshot(), expected, "k = {k}");
            assert_eq!(relay.len(), 15);
        }
    }

    #[test]
    fn push_returns_evicted_oldest() {
        let relay = FrameRelay::new(2);
        assert_eq!(relay.push('a'), None);
        assert_eq!(relay.push('b'), None);
        assert_eq!(relay.push('c'), Some('a'));
        assert_eq!(relay.stats().evicted, 1);
        assert_eq!(relay.stats().pushed, 3);
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let relay: FrameRelay<u8> = FrameRelay::new(3);
        assert_eq!(relay.pop_latest(), None);
        assert!(relay.is_empty());
    }

    #[test]
    fn pop_follows_production_order() {
        let relay = FrameRelay::new(4);
        for i in 0..6 {
            relay.push(i);
        }
        let drained: Vec<_> = std::iter::from_fn(|| relay.pop_latest()).collect();
        assert_eq!(drained, vec![2, 3, 4, 5]);
        assert_eq!(relay.stats().popped, 4);
    }

    #[test]
    fn peek_does_not_consume() {
        let relay = FrameRelay::new(3);
        relay.push(1);
        relay.push(2);
        assert_eq!(relay.peek_newest(), Some(2));
        assert_eq!(relay.len(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let relay = FrameRelay::new(0);
        assert_eq!(relay.capacity(), 1);
        relay.push(1);
        relay.push(2);
        assert_eq!(relay.snapshot(), vec![2]);
    }

    #[test]
    fn concurrent_producer_never_exceeds_capacity() {
        let relay = Arc::new(FrameRelay::new(8));
        let producer = {
            let relay = Arc::clone(&relay);
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    relay.push(i);
                }
            })
        };
        let mut last = None;
        for _ in 0..10_000 {
            assert!(relay.len() <= 8);
            if let Some(v) = relay.pop_latest() {
                if let Some(prev) = last {
                    assert!(v > prev, "out of order: {prev} then {v}");
                }
                last = Some(v);
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn relay_set_routes_by_channel() {
        let set = RelaySet::with_capacities([1, 2, 3, 4]);
        assert_eq!(set.get(StreamChannel::Down).capacity(), 3);

        let frame = Frame::new(StreamChannel::Manipulator, 7, 2, 1, vec![0; 6]);
        assert!(frame.is_well_formed());
        set.push(frame);
        let got = set.get(StreamChannel::Manipulator).pop_latest().unwrap();
        assert_eq!(got.seq, 7);
        assert!(set.get(StreamChannel::Down).is_empty());
    }
}
