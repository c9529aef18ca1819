//! Bounded SPSC queues
//!
//! Thin wrappers over `rtrb` used for control → audio commands and for
//! returning retired `Arc`s audio → control, so nothing is freed on the
//! audio thread.

use rtrb::{Consumer, Producer, RingBuffer};

/// Lock-free single-producer single-consumer queue
pub struct SpscQueue<T> {
    producer: Producer<T>,
    consumer: Consumer<T>,
}

impl<T> SpscQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        Self { producer, consumer }
    }

    /// Split into producer and consumer
    pub fn split(self) -> (QueueProducer<T>, QueueConsumer<T>) {
        (
            QueueProducer {
                producer: self.producer,
            },
            QueueConsumer {
                consumer: self.consumer,
            },
        )
    }
}

pub struct QueueProducer<T> {
    producer: Producer<T>,
}

impl<T> QueueProducer<T> {
    /// Push an item (non-blocking). A full queue hands the item back.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        self.producer.push(item).map_err(|rtrb::PushError::Full(item)| item)
    }

    /// Free slots
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }

    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }
}

pub struct QueueConsumer<T> {
    consumer: Consumer<T>,
}

impl<T> QueueConsumer<T> {
    /// Pop an item (non-blocking)
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.consumer.pop().ok()
    }

    /// Items waiting
    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// Pop everything waiting, handing each item to `f`
    pub fn drain(&mut self, mut f: impl FnMut(T)) -> usize {
        let mut count = 0;
        while let Ok(item) = self.consumer.pop() {
            f(item);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_full_queue() {
        let (mut tx, mut rx) = SpscQueue::new(2).split();
        assert!(tx.push(1).is_ok());
        assert!(tx.push(2).is_ok());
        assert!(tx.is_full());
        assert_eq!(tx.push(3), Err(3));

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_drain_hands_back_everything() {
        let (mut tx, mut rx) = SpscQueue::new(8).split();
        for i in 0..5 {
            tx.push(std::sync::Arc::new(i)).ok();
        }
        let mut seen = Vec::new();
        assert_eq!(rx.drain(|arc| seen.push(*arc)), 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(tx.slots(), 8);
    }
}
