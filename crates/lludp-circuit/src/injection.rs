//! Packet id translation for one direction of a proxied circuit.
//!
//! When the proxy injects a packet, it has to give it an id the receiver
//! will accept, which means taking the next id in the sender's sequence.
//! From then on every real id from that sender must be shifted up by one
//! so the receiver never sees a duplicate, and every ack coming back must
//! be shifted down again before the real sender sees it.
//!
//! Two id spaces are involved:
//!
//! ```text
//! original   1   2   3          ids the real sender chose
//! effective  1   3   4          ids the receiver sees
//!                2              injected by the proxy
//! ```
//!
//! Only a bounded window of injected ids is kept. Once an injection
//! falls out of the window, ids at or below it can no longer be
//! translated back and [`InjectionTracker::get_original_id`] reports them
//! as [`NoOriginalId::Forgotten`] instead of guessing.

use std::collections::VecDeque;

/// Why an effective id has no original id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NoOriginalId {
    /// The id belongs to a packet the proxy injected.
    #[error("packet {0} was injected by the proxy")]
    Injected(u32),

    /// The id is older than the remembered injection window.
    #[error("packet {0} is older than the injection window")]
    Forgotten(u32),
}

/// Tracks injected and dropped packet ids for one traffic direction.
#[derive(Debug, Clone)]
pub struct InjectionTracker {
    capacity: usize,
    /// Highest effective id sent so far, real or injected.
    last_seen: u32,
    /// Injected effective ids, ascending.
    injected: VecDeque<u32>,
    /// Injections that fell out of the window.
    evicted: u32,
    /// Highest evicted injection.
    forgotten_floor: Option<u32>,
    dropped: VecDeque<u32>,
    dropped_capacity: usize,
}

impl InjectionTracker {
    pub fn new(capacity: usize) -> Self {
        Self::with_dropped_capacity(capacity, capacity)
    }

    pub fn with_dropped_capacity(capacity: usize, dropped_capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            last_seen: 0,
            injected: VecDeque::new(),
            evicted: 0,
            forgotten_floor: None,
            dropped: VecDeque::new(),
            dropped_capacity: dropped_capacity.max(1),
        }
    }

    /// Allocates the id for a packet the proxy is about to inject.
    pub fn gen_injectable_id(&mut self) -> u32 {
        let id = self.last_seen.wrapping_add(1);
        self.injected.push_back(id);
        self.last_seen = id;
        if self.injected.len() > self.capacity {
            if let Some(oldest) = self.injected.pop_front() {
                self.forgotten_floor = Some(oldest);
                self.evicted += 1;
                tracing::debug!(oldest, evicted = self.evicted, "injection window full");
            }
        }
        id
    }

    /// Records an effective id that went out for a real packet.
    pub fn track_seen(&mut self, effective_id: u32) {
        if effective_id > self.last_seen {
            self.last_seen = effective_id;
        }
        if self.is_forgotten(effective_id) {
            tracing::warn!(
                effective_id,
                floor = self.forgotten_floor,
                "packet id below injection window; acks for it will be withheld"
            );
        }
    }

    /// Maps a real sender's id to the id the receiver sees.
    ///
    /// Exact for any id newer than the injection window. For older ids
    /// the answer assumes every forgotten injection came first, and a
    /// warning is logged.
    pub fn get_effective_id(&self, original_id: u32) -> u32 {
        let mut effective = original_id.wrapping_add(self.evicted);
        for &injected in &self.injected {
            if injected > effective {
                break;
            }
            effective = effective.wrapping_add(1);
        }
        if self.is_forgotten(effective) {
            tracing::warn!(
                original_id,
                effective,
                "translating packet id older than injection window"
            );
        }
        effective
    }

    /// Maps an id the receiver acked back to the real sender's id.
    pub fn get_original_id(&self, effective_id: u32) -> Result<u32, NoOriginalId> {
        if self.is_injected(effective_id) {
            return Err(NoOriginalId::Injected(effective_id));
        }
        if self.is_forgotten(effective_id) {
            return Err(NoOriginalId::Forgotten(effective_id));
        }
        let below = self
            .injected
            .iter()
            .rev()
            .skip_while(|&&injected| injected > effective_id)
            .count();
        u32::try_from(below)
            .ok()
            .and_then(|below| effective_id.checked_sub(below))
            .and_then(|id| id.checked_sub(self.evicted))
            .ok_or(NoOriginalId::Forgotten(effective_id))
    }

    /// True if `effective_id` is a remembered injection.
    pub fn is_injected(&self, effective_id: u32) -> bool {
        self.injected.binary_search(&effective_id).is_ok()
    }

    fn is_forgotten(&self, effective_id: u32) -> bool {
        self.forgotten_floor
            .is_some_and(|floor| effective_id <= floor)
    }

    /// Remembers that the proxy swallowed a real packet.
    pub fn mark_dropped(&mut self, original_id: u32) {
        if self.dropped.contains(&original_id) {
            return;
        }
        self.dropped.push_back(original_id);
        if self.dropped.len() > self.dropped_capacity {
            self.dropped.pop_front();
        }
    }

    pub fn was_dropped(&self, original_id: u32) -> bool {
        self.dropped.contains(&original_id)
    }

    /// Highest effective id sent so far.
    pub fn last_seen(&self) -> u32 {
        self.last_seen
    }

    /// Injections still inside the window.
    pub fn injected_len(&self) -> usize {
        self.injected.len()
    }

    /// Injections that have fallen out of the window.
    pub fn evicted(&self) -> u32 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_injection_between_real_ids() {
        let mut tracker = InjectionTracker::new(16);
        let first = tracker.get_effective_id(1);
        tracker.track_seen(first);
        assert_eq!(first, 1);

        assert_eq!(tracker.gen_injectable_id(), 2);

        assert_eq!(tracker.get_effective_id(2), 3);
        assert_eq!(tracker.get_original_id(3), Ok(2));
        assert_eq!(tracker.get_original_id(2), Err(NoOriginalId::Injected(2)));
        assert_eq!(tracker.get_original_id(1), Ok(1));
    }

    #[test]
    fn test_injection_follows_high_water_mark() {
        let mut tracker = InjectionTracker::new(16);
        tracker.track_seen(10);
        assert_eq!(tracker.gen_injectable_id(), 11);
        assert_eq!(tracker.gen_injectable_id(), 12);
        assert_eq!(tracker.get_effective_id(11), 13);
        assert_eq!(tracker.get_original_id(13), Ok(11));
    }

    #[test]
    fn test_late_packet_before_injection_is_not_shifted() {
        let mut tracker = InjectionTracker::new(16);
        tracker.track_seen(tracker.get_effective_id(5));
        tracker.gen_injectable_id();
        // 3 was sent before the injection but arrives after it.
        assert_eq!(tracker.get_effective_id(3), 3);
        assert_eq!(tracker.get_original_id(3), Ok(3));
    }

    #[test]
    fn test_eviction_withholds_old_ids() {
        let mut tracker = InjectionTracker::new(2);
        tracker.track_seen(tracker.get_effective_id(1));
        let a = tracker.gen_injectable_id();
        let b = tracker.gen_injectable_id();
        let c = tracker.gen_injectable_id();
        assert_eq!((a, b, c), (2, 3, 4));
        assert_eq!(tracker.evicted(), 1);
        assert_eq!(tracker.injected_len(), 2);

        assert_eq!(tracker.get_original_id(1), Err(NoOriginalId::Forgotten(1)));
        assert_eq!(tracker.get_original_id(2), Err(NoOriginalId::Forgotten(2)));
        assert_eq!(tracker.get_original_id(3), Err(NoOriginalId::Injected(3)));

        // Real id 2 now maps past all three injections.
        assert_eq!(tracker.get_effective_id(2), 5);
        assert_eq!(tracker.get_original_id(5), Ok(2));
    }

    #[test]
    fn test_dropped_ids_are_bounded() {
        let mut tracker = InjectionTracker::with_dropped_capacity(4, 2);
        tracker.mark_dropped(1);
        tracker.mark_dropped(2);
        tracker.mark_dropped(2);
        tracker.mark_dropped(3);
        assert!(!tracker.was_dropped(1));
        assert!(tracker.was_dropped(2));
        assert!(tracker.was_dropped(3));
    }
}
