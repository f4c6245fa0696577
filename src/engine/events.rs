//! Transport notifications from the audio callback
//!
//! The callback cannot log, lock or allocate, so anything the control side
//! needs to hear about (a track starting, a loop boundary, a stop) goes
//! through a lock-free SPSC ring. When the ring is full the event is dropped
//! and counted.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

use super::controls::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// A freshly handed-off track played its first block
    TrackStarted { generation: u64, frames: usize },
    /// The playhead wrapped at a loop boundary
    BoundaryCrossed { generation: u64, direction: Direction },
    /// The stop fade finished
    Stopped { position: usize },
    /// Playback resumed from stopped
    Started,
}

/// Audio-thread half
pub struct EventProducer {
    producer: ringbuf::HeapProd<TransportEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventProducer {
    /// Push without blocking; a full ring drops the event.
    #[inline]
    pub fn push(&mut self, event: TransportEvent) {
        if self.producer.try_push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Control-thread half
pub struct EventConsumer {
    consumer: ringbuf::HeapCons<TransportEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventConsumer {
    pub fn pop(&mut self) -> Option<TransportEvent> {
        self.consumer.try_pop()
    }

    /// Drain everything pending, oldest first
    pub fn drain(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::with_capacity(self.consumer.occupied_len());
        while let Some(event) = self.consumer.try_pop() {
            events.push(event);
        }
        events
    }

    /// Events lost to a full ring since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a connected producer/consumer pair holding `capacity` events
pub fn event_channel(capacity: usize) -> (EventProducer, EventConsumer) {
    let rb = HeapRb::<TransportEvent>::new(capacity.max(1));
    let (producer, consumer) = rb.split();
    let dropped = Arc::new(AtomicU64::new(0));

    (
        EventProducer {
            producer,
            dropped: Arc::clone(&dropped),
        },
        EventConsumer { consumer, dropped },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (mut tx, mut rx) = event_channel(8);
        tx.push(TransportEvent::Started);
        tx.push(TransportEvent::Stopped { position: 42 });

        assert_eq!(rx.pop(), Some(TransportEvent::Started));
        assert_eq!(rx.pop(), Some(TransportEvent::Stopped { position: 42 }));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_full_ring_counts_drops() {
        let (mut tx, mut rx) = event_channel(2);
        for _ in 0..5 {
            tx.push(TransportEvent::Started);
        }
        assert_eq!(rx.drain().len(), 2);
        assert_eq!(rx.dropped(), 3);
    }
}
