//! Outbound frame queue
//!
//! Bounded channel from the capture callback (real-time thread) to the
//! transport's send loop (async task). The producer side never blocks and
//! never locks: a push is one `ArrayQueue` insert plus an `AtomicWaker` wake.
//! When the queue is full the newest frame is dropped and counted.

use crossbeam::queue::ArrayQueue;
use futures_util::task::AtomicWaker;
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::audio::buffer::AudioFrame;

struct Shared {
    queue: ArrayQueue<AudioFrame>,
    waker: AtomicWaker,
    senders: AtomicUsize,
    receiver_alive: AtomicBool,
    /// Timestamp the next frame on this queue receives
    next_pts: AtomicU64,
    counters: Arc<QueueCounters>,
}

/// Counters shared between the queue ends and whoever monitors them
#[derive(Debug, Default)]
pub struct QueueCounters {
    sent: AtomicU64,
    dropped: AtomicU64,
    reported_drops: AtomicU64,
}

impl QueueCounters {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drops that happened since the previous call
    ///
    /// The capture callback cannot log, so the monitor task polls this and
    /// raises the warning on its behalf.
    pub fn take_unreported_drops(&self) -> u64 {
        let dropped = self.dropped.load(Ordering::Relaxed);
        let reported = self.reported_drops.swap(dropped, Ordering::Relaxed);
        dropped.saturating_sub(reported)
    }
}

/// Create an outbound queue holding at most `capacity` frames
pub fn outbound_queue(capacity: usize) -> (FrameSink, FrameSource) {
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity.max(1)),
        waker: AtomicWaker::new(),
        senders: AtomicUsize::new(1),
        receiver_alive: AtomicBool::new(true),
        next_pts: AtomicU64::new(0),
        counters: Arc::new(QueueCounters::default()),
    });
    (
        FrameSink {
            shared: shared.clone(),
        },
        FrameSource { shared },
    )
}

/// Producer half, safe to call from a hardware callback
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    /// Push without blocking
    /// Returns false if the frame was dropped because the queue is full
    /// or the consumer is gone
    pub fn push(&self, frame: AudioFrame) -> bool {
        if !self.shared.receiver_alive.load(Ordering::Relaxed) {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.shared.queue.push(frame) {
            Ok(()) => {
                self.shared.counters.sent.fetch_add(1, Ordering::Relaxed);
                self.shared.waker.wake();
                true
            }
            Err(_newest) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Timestamp where a producer attaching to this queue continues
    pub fn next_pts(&self) -> u64 {
        self.shared.next_pts.load(Ordering::Relaxed)
    }

    /// Record how far the current producer's clock has advanced
    pub fn set_next_pts(&self, pts: u64) {
        self.shared.next_pts.store(pts, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        !self.shared.receiver_alive.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> Arc<QueueCounters> {
        self.shared.counters.clone()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }
}

impl Clone for FrameSink {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.waker.wake();
        }
    }
}

/// Outcome of a bounded wait on the queue
#[derive(Debug, PartialEq, Eq)]
pub enum QueueRecv {
    Frame(AudioFrame),
    TimedOut,
    Closed,
}

/// Consumer half, handed to the transport as the local media source
pub struct FrameSource {
    shared: Arc<Shared>,
}

impl FrameSource {
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<AudioFrame>> {
        if let Some(frame) = self.shared.queue.pop() {
            return Poll::Ready(Some(frame));
        }

        self.shared.waker.register(cx.waker());

        // Re-check after registering so a push racing the registration is not lost
        if let Some(frame) = self.shared.queue.pop() {
            return Poll::Ready(Some(frame));
        }
        if self.shared.senders.load(Ordering::Acquire) == 0 {
            return Poll::Ready(self.shared.queue.pop());
        }
        Poll::Pending
    }

    /// Wait for the next frame; None once every sink is dropped and the
    /// queue is drained
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Wait for the next frame for at most `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> QueueRecv {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Some(frame)) => QueueRecv::Frame(frame),
            Ok(None) => QueueRecv::Closed,
            Err(_) => QueueRecv::TimedOut,
        }
    }

    pub fn try_recv(&mut self) -> Option<AudioFrame> {
        self.shared.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn counters(&self) -> Arc<QueueCounters> {
        self.shared.counters.clone()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shared.receiver_alive.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pts: u64) -> AudioFrame {
        AudioFrame::new(vec![0; 960], 1, 48000, pts)
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let (sink, mut source) = outbound_queue(2);
        assert!(sink.push(frame(0)));
        assert!(sink.push(frame(960)));
        assert!(!sink.push(frame(1920)));

        assert_eq!(source.try_recv().map(|f| f.pts()), Some(0));
        assert_eq!(source.try_recv().map(|f| f.pts()), Some(960));
        assert!(source.try_recv().is_none());

        let counters = sink.counters();
        assert_eq!(counters.sent(), 2);
        assert_eq!(counters.dropped(), 1);
        assert_eq!(counters.take_unreported_drops(), 1);
        assert_eq!(counters.take_unreported_drops(), 0);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push_from_other_thread() {
        let (sink, mut source) = outbound_queue(8);
        let producer = std::thread::spawn(move || {
            for i in 0..5u64 {
                std::thread::sleep(Duration::from_millis(2));
                sink.push(frame(i * 960));
            }
        });

        let mut received = Vec::new();
        while let Some(frame) = source.recv().await {
            received.push(frame.pts());
        }
        producer.join().unwrap();
        assert_eq!(received, vec![0, 960, 1920, 2880, 3840]);
    }

    #[tokio::test]
    async fn test_recv_timeout_is_bounded() {
        let (_sink, mut source) = outbound_queue(4);
        let started = std::time::Instant::now();
        assert_eq!(
            source.recv_timeout(Duration::from_millis(20)).await,
            QueueRecv::TimedOut
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_closed_after_all_sinks_dropped() {
        let (sink, mut source) = outbound_queue(4);
        let second = sink.clone();
        sink.push(frame(0));
        drop(sink);

        assert_eq!(
            source.recv_timeout(Duration::from_millis(50)).await,
            QueueRecv::Frame(frame(0))
        );
        assert_eq!(
            source.recv_timeout(Duration::from_millis(20)).await,
            QueueRecv::TimedOut
        );

        drop(second);
        assert_eq!(
            source.recv_timeout(Duration::from_millis(50)).await,
            QueueRecv::Closed
        );
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let (sink, source) = outbound_queue(4);
        drop(source);
        assert!(sink.is_closed());
        assert!(!sink.push(frame(0)));
        assert_eq!(sink.counters().dropped(), 1);
    }
}
