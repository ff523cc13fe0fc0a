//! Lock-free single-producer/single-consumer frame queue
//!
//! A singly linked list with three pointer roles: `first` (oldest allocated
//! node, producer-private), `divider` (boundary between consumed and
//! pending, shared) and `last` (newest, shared). Only the shared pointers
//! are touched with atomics; the SPSC contract is enforced by handing out
//! exactly one non-cloneable producer and one non-cloneable consumer.
//!
//! Nodes passed by the divider are recycled through a producer-local free
//! list, so the hot path never calls the allocator once it has warmed up.

use crate::types::VideoFrame;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

struct Node {
    value: Option<Arc<VideoFrame>>,
    next: AtomicPtr<Node>,
}

impl Node {
    fn new(value: Option<Arc<VideoFrame>>) -> *mut Node {
        Box::into_raw(Box::new(Node {
            value,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

struct Shared {
    // producer-private cursor; shared only so the final handle can free the
    // chain, at which point access is unique again
    first: UnsafeCell<*mut Node>,
    divider: AtomicPtr<Node>,
    last: AtomicPtr<Node>,
    pending: AtomicUsize,
}

// SAFETY: `first` is only dereferenced by the producer (unique handle) and
// by `drop` once both handles are gone; everything else is atomic.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Drop for Shared {
    fn drop(&mut self) {
        // both handles are gone, the chain is exclusively ours
        let mut cur = *self.first.get_mut();
        while !cur.is_null() {
            let next = unsafe { (*cur).next.load(Ordering::Relaxed) };
            drop(unsafe { Box::from_raw(cur) });
            cur = next;
        }
    }
}

/// Producer half of the queue. Not cloneable; owned by the capture side.
pub struct FrameProducer {
    shared: Arc<Shared>,
    free_list: Vec<*mut Node>,
    capacity: Option<usize>,
    dropped: u64,
}

// SAFETY: the raw node pointers in the free list are unlinked from the live
// chain and only ever touched by this handle.
unsafe impl Send for FrameProducer {}

/// Consumer half of the queue. Not cloneable; owned by the display side.
pub struct FrameConsumer {
    shared: Arc<Shared>,
}

unsafe impl Send for FrameConsumer {}

/// Create a queue that accepts every produced frame.
pub fn unbounded() -> (FrameProducer, FrameConsumer) {
    with_capacity(None)
}

/// Create a queue that drops the newest frame once `capacity` frames are
/// pending. This is the optional overflow policy; the default pipeline uses
/// [`unbounded`] and processes every arrived frame.
pub fn bounded(capacity: usize) -> (FrameProducer, FrameConsumer) {
    with_capacity(Some(capacity.max(1)))
}

fn with_capacity(capacity: Option<usize>) -> (FrameProducer, FrameConsumer) {
    let dummy = Node::new(None);
    let shared = Arc::new(Shared {
        first: UnsafeCell::new(dummy),
        divider: AtomicPtr::new(dummy),
        last: AtomicPtr::new(dummy),
        pending: AtomicUsize::new(0),
    });

    let producer = FrameProducer {
        shared: Arc::clone(&shared),
        free_list: Vec::new(),
        capacity,
        dropped: 0,
    };
    let consumer = FrameConsumer { shared };
    (producer, consumer)
}

impl FrameProducer {
    /// Append a frame. Never blocks the consumer.
    ///
    /// Returns `false` only under the bounded overflow policy, when the
    /// frame was dropped instead of enqueued.
    pub fn produce(&mut self, frame: Arc<VideoFrame>) -> bool {
        if let Some(capacity) = self.capacity {
            if self.shared.pending.load(Ordering::Acquire) >= capacity {
                self.dropped += 1;
                log::debug!("frame queue full ({capacity}), dropping newest frame");
                self.reclaim();
                return false;
            }
        }

        let node = self.get_node(frame);

        // link after last, then publish: a consumer that observes the new
        // `last` is guaranteed to see the fully initialised node
        let last = self.shared.last.load(Ordering::Relaxed);
        unsafe { (*last).next.store(node, Ordering::Release) };
        self.shared.last.store(node, Ordering::Release);
        self.shared.pending.fetch_add(1, Ordering::AcqRel);

        self.reclaim();
        true
    }

    /// Number of frames pending consumption (approximate under concurrency).
    pub fn len(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames discarded by the bounded overflow policy.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Move nodes the consumer has passed into the free list. Walks `first`
    /// up to, but never past, `divider`.
    fn reclaim(&mut self) {
        let divider = self.shared.divider.load(Ordering::Acquire);
        // SAFETY: nodes strictly before `divider` are never touched by the
        // consumer again; `first` is only dereferenced on this thread.
        unsafe {
            let first = self.shared.first.get();
            while *first != divider {
                let passed = *first;
                *first = (*passed).next.load(Ordering::Relaxed);
                self.release_node(passed);
            }
        }
    }

    fn get_node(&mut self, frame: Arc<VideoFrame>) -> *mut Node {
        match self.free_list.pop() {
            Some(node) => {
                // recycled nodes are cleared by release_node
                unsafe { (*node).value = Some(frame) };
                node
            }
            None => Node::new(Some(frame)),
        }
    }

    fn release_node(&mut self, node: *mut Node) {
        unsafe {
            (*node).value = None;
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
        }
        self.free_list.push(node);
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        // free-list nodes are unlinked from the chain, so the shared
        // destructor will not see them
        for node in self.free_list.drain(..) {
            drop(unsafe { Box::from_raw(node) });
        }
    }
}

impl FrameConsumer {
    /// Take the oldest pending frame, or `None` when the queue is empty.
    /// Never blocks the producer; `None` is a normal result, not an error.
    pub fn consume(&mut self) -> Option<Arc<VideoFrame>> {
        let divider = self.shared.divider.load(Ordering::Relaxed);
        let last = self.shared.last.load(Ordering::Acquire);
        if divider == last {
            return None;
        }

        // SAFETY: divider != last guarantees a published successor, and the
        // producer never reclaims the divider node itself
        unsafe {
            let next = (*divider).next.load(Ordering::Acquire);
            let frame = (*next).value.clone();
            self.shared.divider.store(next, Ordering::Release);
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            frame
        }
    }

    pub fn len(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColorSpace;
    use std::thread;
    use std::time::Duration;

    fn tagged_frame(tag: u8) -> Arc<VideoFrame> {
        let mut frame = VideoFrame::new(2, 1, 2, ColorSpace::Grayscale);
        frame.pixels_mut()[0] = tag;
        Arc::new(frame)
    }

    fn tag_of(frame: &VideoFrame) -> u8 {
        frame.pixels()[0]
    }

    #[test]
    fn test_empty_queue() {
        let (_producer, mut consumer) = unbounded();
        assert!(consumer.consume().is_none());
        assert!(consumer.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let (mut producer, mut consumer) = unbounded();

        for i in 0..10 {
            assert!(producer.produce(tagged_frame(i)));
        }
        assert_eq!(consumer.len(), 10);

        for i in 0..10 {
            let frame = consumer.consume().expect("frame missing");
            assert_eq!(tag_of(&frame), i);
        }
        assert!(consumer.consume().is_none());
    }

    #[test]
    fn test_node_recycling() {
        let (mut producer, mut consumer) = unbounded();

        // interleaved produce/consume keeps the live list short; the free
        // list absorbs every passed node
        for round in 0..100u8 {
            producer.produce(tagged_frame(round));
            let frame = consumer.consume().unwrap();
            assert_eq!(tag_of(&frame), round);
        }
        assert!(producer.is_empty());
    }

    #[test]
    fn test_bounded_drops_newest() {
        let (mut producer, mut consumer) = bounded(2);

        assert!(producer.produce(tagged_frame(0)));
        assert!(producer.produce(tagged_frame(1)));
        // queue at capacity: the newest frame is the one discarded
        assert!(!producer.produce(tagged_frame(2)));
        assert_eq!(producer.dropped_frames(), 1);

        assert_eq!(tag_of(&consumer.consume().unwrap()), 0);
        assert_eq!(tag_of(&consumer.consume().unwrap()), 1);
        assert!(consumer.consume().is_none());

        // draining made room again
        assert!(producer.produce(tagged_frame(3)));
        assert_eq!(tag_of(&consumer.consume().unwrap()), 3);
    }

    #[test]
    fn test_concurrent_produce_consume() {
        const FRAMES: usize = 1000;
        let (mut producer, mut consumer) = unbounded();

        let producer_thread = thread::spawn(move || {
            for i in 0..FRAMES {
                let mut frame = VideoFrame::new(2, 1, 2, ColorSpace::Grayscale);
                frame.pixels_mut()[0] = (i % 256) as u8;
                frame.pixels_mut()[1] = (i / 256) as u8;
                producer.produce(Arc::new(frame));
            }
            producer
        });

        let consumer_thread = thread::spawn(move || {
            let mut received = Vec::with_capacity(FRAMES);
            while received.len() < FRAMES {
                match consumer.consume() {
                    Some(frame) => {
                        let tag =
                            frame.pixels()[0] as usize + frame.pixels()[1] as usize * 256;
                        received.push(tag);
                    }
                    None => thread::sleep(Duration::from_micros(10)),
                }
            }
            received
        });

        let _producer = producer_thread.join().unwrap();
        let received = consumer_thread.join().unwrap();

        // every frame exactly once, in production order
        assert_eq!(received.len(), FRAMES);
        for (expected, got) in received.iter().enumerate() {
            assert_eq!(*got, expected);
        }
    }

    #[test]
    fn test_drop_with_pending_frames() {
        let (mut producer, consumer) = unbounded();
        for i in 0..5 {
            producer.produce(tagged_frame(i));
        }
        // no leak or double free regardless of drop order
        drop(consumer);
        drop(producer);
    }
}
