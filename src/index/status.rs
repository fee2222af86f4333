//! Live index status: a snapshot plus a throttled broadcast of changes.
//!
//! Every [`StatusChannel::publish`] updates the snapshot. Broadcasts are
//! rate-limited by a [`Throttle`] with leading and trailing edges: the first
//! update after a quiet period goes out at once and updates inside the
//! interval are held back. There is no timer. A held-back update goes out
//! on the next publish once the interval has passed, or on an explicit
//! flush, complete or close. Subscribers therefore always end on the final
//! status.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::IndexStatus;

/// Subscribers that fall further behind than this skip to newer updates.
const CHANNEL_CAPACITY: usize = 64;

/// Called with every broadcast status, after subscribers are notified.
pub type StatusHook = Arc<dyn Fn(&IndexStatus) + Send + Sync>;

/// Leading/trailing-edge rate limiter.
#[derive(Clone, Debug)]
pub struct Throttle {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: bool,
}

impl Throttle {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            pending: false,
        }
    }

    /// Record an update at `now` and report whether it should go out now.
    /// A suppressed update is remembered for [`take_pending`](Self::take_pending).
    pub fn admit(&mut self, now: Instant) -> bool {
        let due = self
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last_emit = Some(now);
            self.pending = false;
        } else {
            self.pending = true;
        }
        due
    }

    /// Whether a suppressed update is waiting, clearing the flag.
    pub fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

struct Inner {
    snapshot: IndexStatus,
    sender: Option<broadcast::Sender<IndexStatus>>,
    throttle: Throttle,
}

/// Status of one index.
pub struct StatusChannel {
    inner: Mutex<Inner>,
    hook: Option<StatusHook>,
}

impl StatusChannel {
    #[must_use]
    pub fn new(initial: IndexStatus, interval: Duration, hook: Option<StatusHook>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                snapshot: initial,
                sender: Some(sender),
                throttle: Throttle::new(interval),
            }),
            hook,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> IndexStatus {
        self.lock().snapshot.clone()
    }

    /// The current snapshot and a stream of later updates. The stream is
    /// already finished when the channel has completed.
    #[must_use]
    pub fn subscribe(&self) -> StatusStream {
        let inner = self.lock();
        StatusStream {
            initial: inner.snapshot.clone(),
            receiver: inner.sender.as_ref().map(broadcast::Sender::subscribe),
        }
    }

    /// Replace the snapshot and broadcast it if the throttle allows.
    pub fn publish(&self, status: IndexStatus) {
        let mut inner = self.lock();
        inner.snapshot = status;
        if inner.throttle.admit(Instant::now()) {
            self.emit(&inner);
        }
    }

    /// Broadcast the snapshot if an update was held back by the throttle.
    pub fn flush(&self) {
        let mut inner = self.lock();
        if inner.throttle.take_pending() {
            self.emit(&inner);
        }
    }

    /// Publish a final status unthrottled and end every subscriber's stream.
    pub fn complete(&self, status: IndexStatus) {
        let mut inner = self.lock();
        inner.snapshot = status;
        inner.throttle.take_pending();
        self.emit(&inner);
        inner.sender = None;
    }

    /// End streams without a final update, keeping the snapshot.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.throttle.take_pending() {
            self.emit(&inner);
        }
        inner.sender = None;
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lock().sender.is_none()
    }

    fn emit(&self, inner: &Inner) {
        if let Some(sender) = &inner.sender {
            // No receivers is fine.
            let _ = sender.send(inner.snapshot.clone());
        }
        if let Some(hook) = &self.hook {
            hook(&inner.snapshot);
        }
    }
}

/// A subscriber's view: the snapshot at subscription time, then updates.
pub struct StatusStream {
    /// Status when the stream was opened.
    pub initial: IndexStatus,
    receiver: Option<broadcast::Receiver<IndexStatus>>,
}

impl StatusStream {
    /// Next update if one is ready. Skips over updates lost to lag.
    pub fn try_next(&mut self) -> Option<IndexStatus> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(status) => return Some(status),
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Block until the next update. `None` once the channel has completed.
    ///
    /// Must not be called from inside an async runtime.
    pub fn next_blocking(&mut self) -> Option<IndexStatus> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.blocking_recv() {
                Ok(status) => return Some(status),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Await the next update. `None` once the channel has completed.
    pub async fn recv(&mut self) -> Option<IndexStatus> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(status) => return Some(status),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Drain updates until the channel completes and return the last status
    /// seen, starting from [`initial`](Self::initial).
    pub fn wait_for_completion(mut self) -> IndexStatus {
        let mut last = self.initial.clone();
        while let Some(status) = self.next_blocking() {
            last = status;
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn throttle_has_leading_and_trailing_edges() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        assert!(throttle.admit(start));
        assert!(!throttle.admit(start + Duration::from_millis(10)));
        assert!(!throttle.admit(start + Duration::from_millis(20)));
        assert!(throttle.take_pending());
        assert!(!throttle.take_pending());
        assert!(throttle.admit(start + Duration::from_millis(150)));
    }

    #[test]
    fn zero_interval_never_suppresses() {
        let now = Instant::now();
        let mut throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.admit(now));
        assert!(throttle.admit(now));
    }

    #[test]
    fn snapshot_tracks_every_publish_even_when_throttled() {
        let channel = StatusChannel::new(IndexStatus::default(), Duration::from_secs(60), None);
        let mut stream = channel.subscribe();
        channel.publish(IndexStatus::counting(1));
        channel.publish(IndexStatus::counting(2));
        channel.publish(IndexStatus::counting(3));
        assert_eq!(channel.snapshot(), IndexStatus::counting(3));
        assert_eq!(stream.try_next(), Some(IndexStatus::counting(1)));
        assert_eq!(stream.try_next(), None);

        channel.flush();
        assert_eq!(stream.try_next(), Some(IndexStatus::counting(3)));
    }

    #[test]
    fn completion_ends_streams_on_final_status() {
        let channel = StatusChannel::new(IndexStatus::counting(0), Duration::from_secs(60), None);
        let stream = channel.subscribe();
        channel.publish(IndexStatus::indexing(0, 2, 1));
        channel.publish(IndexStatus::indexing(1, 2, 2));
        channel.complete(IndexStatus::complete(2));
        assert_eq!(stream.wait_for_completion(), IndexStatus::complete(2));

        let late = channel.subscribe();
        assert!(channel.is_complete());
        assert_eq!(late.initial, IndexStatus::complete(2));
        assert_eq!(late.wait_for_completion(), IndexStatus::complete(2));
    }

    #[test]
    fn hook_sees_broadcasts() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let channel = StatusChannel::new(
            IndexStatus::default(),
            Duration::ZERO,
            Some(Arc::new(move |_: &IndexStatus| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        channel.publish(IndexStatus::counting(1));
        channel.complete(IndexStatus::complete(1));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
