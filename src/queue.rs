use crate::event::FramedEvent;
use rtrb::RingBuffer;

/// Events each queue can hold. Comfortably more than one processing
/// cycle's worth of worst-case short-message traffic.
pub const QUEUE_CAPACITY: usize = 256;

/// Creates one direction of the bridge: a wait-free single-producer
/// single-consumer queue of timestamped events. Each half is owned by
/// exactly one thread; neither side ever blocks the other.
pub fn event_queue(capacity: usize) -> (EventProducer, EventConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (
        EventProducer { inner: producer },
        EventConsumer { inner: consumer },
    )
}

pub struct EventProducer {
    inner: rtrb::Producer<FramedEvent>,
}

impl EventProducer {
    /// Queues an event. Returns false when the queue is full; the event is
    /// dropped, which is the deliberate backpressure policy: better to lose
    /// one control message than to stall a latency-critical thread.
    pub fn push(&mut self, event: FramedEvent) -> bool {
        self.inner.push(event).is_ok()
    }
}

pub struct EventConsumer {
    inner: rtrb::Consumer<FramedEvent>,
}

impl EventConsumer {
    pub fn pop(&mut self) -> Option<FramedEvent> {
        self.inner.pop().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn event(key: u8, frame: u32) -> FramedEvent {
        FramedEvent::new(&[0x90, key, 0x40], frame).unwrap()
    }

    #[test]
    fn pop_order_matches_push_order() {
        let (mut tx, mut rx) = event_queue(8);
        for key in 0..5 {
            assert!(tx.push(event(key, u32::from(key))));
        }
        for key in 0..5 {
            let popped = rx.pop().unwrap();
            assert_eq!(popped.bytes[1], key);
            assert_eq!(popped.frame, u32::from(key));
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn push_to_full_queue_fails_and_preserves_contents() {
        let (mut tx, mut rx) = event_queue(2);
        assert!(tx.push(event(1, 100)));
        assert!(tx.push(event(2, 200)));
        assert!(!tx.push(event(3, 300)));

        assert_eq!(rx.pop().unwrap().bytes[1], 1);
        assert_eq!(rx.pop().unwrap().bytes[1], 2);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn queue_recovers_after_drops() {
        let (mut tx, mut rx) = event_queue(1);
        assert!(tx.push(event(1, 0)));
        assert!(!tx.push(event(2, 0)));
        assert_eq!(rx.pop().unwrap().bytes[1], 1);
        assert!(tx.push(event(3, 0)));
        assert_eq!(rx.pop().unwrap().bytes[1], 3);
    }

    #[test]
    fn cross_thread_fifo_ordering() {
        let (mut tx, mut rx) = event_queue(QUEUE_CAPACITY);
        let count: u32 = 10_000;

        let producer = thread::spawn(move || {
            let mut pushed = 0;
            while pushed < count {
                if tx.push(event((pushed % 128) as u8, pushed)) {
                    pushed += 1;
                }
            }
        });

        let mut expected = 0;
        while expected < count {
            if let Some(popped) = rx.pop() {
                assert_eq!(popped.frame, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }
}
