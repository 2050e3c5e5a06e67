//! Queue plus dedicated drain thread shared by every sink
//!
//! An [`AsyncWriter`] owns a FIFO of opaque payloads and one background
//! thread that batch-drains it into a [`WriteTarget`]. In synchronous mode
//! there is no queue and items are written on the caller's thread. Either
//! way each item is written in isolation: an error or panic from one write
//! is reported and the next item is still written.

use super::error::{LogError, Result};
use super::internal;
use super::metrics::WriterMetrics;
use super::overflow_policy::{OverflowCallback, OverflowPolicy};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default time `close` waits for the drain thread (2 minutes)
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Destination the drain thread writes into.
///
/// `begin_batch`/`end_batch` bracket every drained batch, which lets a
/// target hold a lock or buffer across many items.
pub trait WriteTarget<T>: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn begin_batch(&self) -> Result<()> {
        Ok(())
    }

    fn write_one(&self, item: T) -> Result<()>;

    fn end_batch(&self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying resource after the writer stopped
    fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle of a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Synchronous mode, no drain thread
    Idle,
    Running,
    Draining,
    Closed,
}

impl WriterState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WriterState::Idle,
            1 => WriterState::Running,
            2 => WriterState::Draining,
            _ => WriterState::Closed,
        }
    }
}

/// Construction options for an [`AsyncWriter`]
#[derive(Clone)]
pub struct WriterOptions {
    pub asynchronous: bool,
    /// Maximum queued items, 0 for unbounded
    pub max_queue: usize,
    pub overflow_policy: OverflowPolicy,
    pub on_overflow: Option<OverflowCallback>,
    pub close_timeout: Duration,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            asynchronous: true,
            max_queue: 0,
            overflow_policy: OverflowPolicy::default(),
            on_overflow: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for WriterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterOptions")
            .field("asynchronous", &self.asynchronous)
            .field("max_queue", &self.max_queue)
            .field("overflow_policy", &self.overflow_policy)
            .field("close_timeout", &self.close_timeout)
            .finish()
    }
}

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    space: Condvar,
    // Set under the queue lock so nothing is accepted after the final drain
    closing: Mutex<bool>,
    // Set when close gave up waiting; the drain thread stops between items
    abandoned: AtomicBool,
    state: AtomicU8,
    metrics: WriterMetrics,
}

struct Worker {
    exit_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: thread::JoinHandle<()>,
}

/// Generic single-consumer writer.
///
/// # Example
///
/// ```
/// use sourcelog::core::async_writer::{AsyncWriter, WriteTarget, WriterOptions};
/// use sourcelog::Result;
/// use std::sync::{Arc, Mutex};
///
/// struct Collect(Mutex<Vec<u32>>);
///
/// impl WriteTarget<u32> for Collect {
///     fn name(&self) -> &str { "collect" }
///     fn write_one(&self, item: u32) -> Result<()> {
///         self.0.lock().unwrap().push(item);
///         Ok(())
///     }
/// }
///
/// let target = Arc::new(Collect(Mutex::new(Vec::new())));
/// let writer = AsyncWriter::new(target.clone(), WriterOptions::default());
/// for i in 0..10 {
///     writer.enqueue(i).unwrap();
/// }
/// assert!(writer.close());
/// assert_eq!(*target.0.lock().unwrap(), (0..10).collect::<Vec<_>>());
/// ```
pub struct AsyncWriter<T: Send + 'static> {
    target: Arc<dyn WriteTarget<T>>,
    shared: Arc<Shared<T>>,
    options: WriterOptions,
    item_tx: Option<Sender<()>>,
    worker: Mutex<Option<Worker>>,
    // Serializes batches in synchronous mode
    sync_lock: Mutex<()>,
}

impl<T: Send + 'static> AsyncWriter<T> {
    /// Create a writer, spawning the drain thread in asynchronous mode.
    ///
    /// The mode is fixed for the writer's lifetime. If the thread cannot be
    /// spawned the writer falls back to synchronous mode.
    pub fn new(target: Arc<dyn WriteTarget<T>>, options: WriterOptions) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            space: Condvar::new(),
            closing: Mutex::new(false),
            abandoned: AtomicBool::new(false),
            state: AtomicU8::new(WriterState::Idle as u8),
            metrics: WriterMetrics::new(),
        });

        let mut writer = Self {
            target,
            shared,
            options,
            item_tx: None,
            worker: Mutex::new(None),
            sync_lock: Mutex::new(()),
        };
        if writer.options.asynchronous {
            writer.spawn_worker();
        }
        writer
    }

    fn spawn_worker(&mut self) {
        // One pending wake-up is enough: the drain empties the whole queue
        let (item_tx, item_rx) = bounded::<()>(1);
        let (exit_tx, exit_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        let shared = Arc::clone(&self.shared);
        let target = Arc::clone(&self.target);
        let spawned = thread::Builder::new()
            .name(format!("sourcelog-{}", self.target.name()))
            .spawn(move || {
                loop {
                    if exit_rx.try_recv().is_ok() {
                        break;
                    }
                    select! {
                        recv(exit_rx) -> _ => break,
                        recv(item_rx) -> msg => {
                            if msg.is_err() {
                                break;
                            }
                            Self::drain(&shared, target.as_ref());
                        }
                    }
                }
                shared
                    .state
                    .store(WriterState::Draining as u8, Ordering::Release);
                Self::drain(&shared, target.as_ref());
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                self.shared
                    .state
                    .store(WriterState::Running as u8, Ordering::Release);
                self.item_tx = Some(item_tx);
                *self.worker.lock() = Some(Worker {
                    exit_tx,
                    done_rx,
                    handle,
                });
            }
            Err(e) => {
                internal::report(
                    self.target.name(),
                    &LogError::io_operation("spawning drain thread", "using synchronous writes", e),
                );
                self.options.asynchronous = false;
            }
        }
    }

    pub fn state(&self) -> WriterState {
        WriterState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_async(&self) -> bool {
        self.options.asynchronous
    }

    pub fn metrics(&self) -> &WriterMetrics {
        &self.shared.metrics
    }

    /// Number of items waiting for the drain thread
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Queue an item (or write it now in synchronous mode).
    ///
    /// Never blocks unless a bounded queue uses a blocking overflow policy.
    /// Returns [`LogError::WriterClosed`] once `close` has begun.
    pub fn enqueue(&self, item: T) -> Result<()> {
        let Some(item_tx) = &self.item_tx else {
            let _serial = self.sync_lock.lock();
            if *self.shared.closing.lock() {
                return Err(LogError::WriterClosed);
            }
            self.shared.metrics.record_enqueued();
            Self::write_batch(&self.shared, self.target.as_ref(), std::iter::once(item));
            return Ok(());
        };

        {
            let mut queue = self.shared.queue.lock();
            if *self.shared.closing.lock() {
                return Err(LogError::WriterClosed);
            }
            let max = self.options.max_queue;
            if max > 0 && queue.len() >= max {
                self.shared.metrics.record_queue_full();
                if !self.make_room(&mut queue, max) {
                    return Ok(());
                }
            }
            queue.push_back(item);
            self.shared.metrics.record_enqueued();
        }

        let _ = item_tx.try_send(());
        Ok(())
    }

    /// Apply the overflow policy. Returns false when the incoming item is dropped.
    fn make_room(&self, queue: &mut parking_lot::MutexGuard<'_, VecDeque<T>>, max: usize) -> bool {
        match &self.options.overflow_policy {
            OverflowPolicy::DropNewest => {
                self.shared.metrics.record_dropped();
                false
            }
            OverflowPolicy::DropOldest => {
                queue.pop_front();
                self.shared.metrics.record_dropped();
                true
            }
            OverflowPolicy::Block => {
                self.shared.metrics.record_block();
                while queue.len() >= max {
                    if *self.shared.closing.lock() {
                        self.alert_and_drop();
                        return false;
                    }
                    self.shared.space.wait(queue);
                }
                true
            }
            OverflowPolicy::BlockWithTimeout(timeout) => {
                self.shared.metrics.record_block();
                let deadline = Instant::now() + *timeout;
                while queue.len() >= max {
                    if *self.shared.closing.lock()
                        || self.shared.space.wait_until(queue, deadline).timed_out()
                    {
                        if queue.len() < max && !*self.shared.closing.lock() {
                            return true;
                        }
                        self.alert_and_drop();
                        return false;
                    }
                }
                true
            }
            OverflowPolicy::AlertAndDrop => {
                self.alert_and_drop();
                false
            }
        }
    }

    fn alert_and_drop(&self) {
        let dropped = self.shared.metrics.record_dropped();

        // Alert on first drop and periodically thereafter
        if dropped == 1 || dropped % 1000 == 0 {
            internal::warn(
                self.target.name(),
                format!(
                    "Queue full, {} items dropped. \
                     Consider raising MaxQueue or using a different overflow policy.",
                    dropped
                ),
            );
            if let Some(callback) = &self.options.on_overflow {
                callback(dropped);
            }
        }
    }

    fn drain(shared: &Shared<T>, target: &dyn WriteTarget<T>) {
        loop {
            let batch = std::mem::take(&mut *shared.queue.lock());
            if batch.is_empty() {
                return;
            }
            shared.space.notify_all();
            if shared.abandoned.load(Ordering::Acquire) {
                for _ in batch {
                    shared.metrics.record_dropped();
                }
                return;
            }
            Self::write_batch(shared, target, batch);
        }
    }

    fn write_batch(shared: &Shared<T>, target: &dyn WriteTarget<T>, batch: impl IntoIterator<Item = T>) {
        let name = target.name();
        guarded(name, || target.begin_batch());
        for item in batch {
            if shared.abandoned.load(Ordering::Acquire) {
                shared.metrics.record_dropped();
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| target.write_one(item))) {
                Ok(Ok(())) => {
                    shared.metrics.record_written();
                }
                Ok(Err(e)) => {
                    shared.metrics.record_failed();
                    internal::report(name, &e);
                }
                Err(panic_info) => {
                    shared.metrics.record_failed();
                    internal::report_panic(name, panic_info);
                }
            }
        }
        guarded(name, || target.end_batch());
    }

    /// Stop the writer: drain what is queued, stop the thread, release the target.
    ///
    /// Waits up to the configured close timeout for the drain thread. A
    /// thread that does not finish in time is abandoned: it finishes the item
    /// in hand, drops the rest and closes its batch. The target is then not
    /// released, since the thread may still be inside it. Idempotent; returns
    /// `false` if anything went wrong.
    pub fn close(&self) -> bool {
        {
            let _queue = self.shared.queue.lock();
            let mut closing = self.shared.closing.lock();
            if *closing {
                return true;
            }
            *closing = true;
        }
        self.shared.space.notify_all();

        let mut clean = true;
        let mut abandoned = false;
        if let Some(worker) = self.worker.lock().take() {
            self.shared
                .state
                .store(WriterState::Draining as u8, Ordering::Release);
            let _ = worker.exit_tx.send(());
            match worker.done_rx.recv_timeout(self.options.close_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if let Err(panic_info) = worker.handle.join() {
                        internal::report_panic(self.target.name(), panic_info);
                        clean = false;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.shared.abandoned.store(true, Ordering::Release);
                    internal::warn(
                        self.target.name(),
                        format!(
                            "Drain thread did not finish within {:?}; abandoning {} queued items \
                             and leaving the target open",
                            self.options.close_timeout,
                            self.pending()
                        ),
                    );
                    clean = false;
                    abandoned = true;
                }
            }
        } else {
            // Wait out a synchronous write in progress
            drop(self.sync_lock.lock());
        }

        if !abandoned && !guarded(self.target.name(), || self.target.release()) {
            clean = false;
        }
        self.shared
            .state
            .store(WriterState::Closed as u8, Ordering::Release);
        clean
    }
}

impl<T: Send + 'static> Drop for AsyncWriter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run a target hook with error and panic isolation
fn guarded(component: &str, f: impl FnOnce() -> Result<()>) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            internal::report(component, &e);
            false
        }
        Err(panic_info) => {
            internal::report_panic(component, panic_info);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        items: Mutex<Vec<u32>>,
        batches: AtomicUsize,
        released: AtomicUsize,
        delay: Option<Duration>,
        // Item 13 fails and item 666 panics
        faulty: bool,
    }

    impl WriteTarget<u32> for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn begin_batch(&self) -> Result<()> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn write_one(&self, item: u32) -> Result<()> {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if self.faulty && item == 13 {
                return Err(LogError::other("unlucky"));
            }
            if self.faulty && item == 666 {
                panic!("evil item");
            }
            self.items.lock().push(item);
            Ok(())
        }

        fn release(&self) -> Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn writer(target: &Arc<Recorder>, options: WriterOptions) -> AsyncWriter<u32> {
        AsyncWriter::new(Arc::clone(target) as Arc<dyn WriteTarget<u32>>, options)
    }

    #[test]
    fn test_fifo_order() {
        let target = Arc::new(Recorder::default());
        let w = writer(&target, WriterOptions::default());
        assert_eq!(w.state(), WriterState::Running);
        for i in 0..1000 {
            w.enqueue(i).unwrap();
        }
        assert!(w.close());
        assert_eq!(*target.items.lock(), (0..1000).collect::<Vec<_>>());
        assert_eq!(w.state(), WriterState::Closed);
        assert_eq!(w.metrics().written_count(), 1000);
    }

    #[test]
    fn test_failures_are_isolated() {
        let target = Arc::new(Recorder {
            faulty: true,
            ..Default::default()
        });
        let w = writer(&target, WriterOptions::default());
        for i in [1, 13, 666, 2] {
            w.enqueue(i).unwrap();
        }
        w.close();
        assert_eq!(*target.items.lock(), vec![1, 2]);
        assert_eq!(w.metrics().failed_count(), 2);
    }

    #[test]
    fn test_sync_mode_writes_immediately() {
        let target = Arc::new(Recorder {
            faulty: true,
            ..Default::default()
        });
        let w = writer(
            &target,
            WriterOptions {
                asynchronous: false,
                ..Default::default()
            },
        );
        assert_eq!(w.state(), WriterState::Idle);
        w.enqueue(5).unwrap();
        assert_eq!(*target.items.lock(), vec![5]);
        w.enqueue(666).unwrap();
        assert_eq!(w.metrics().failed_count(), 1);
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_writes() {
        let target = Arc::new(Recorder::default());
        let w = writer(&target, WriterOptions::default());
        assert!(w.close());
        assert!(w.close());
        assert!(matches!(w.enqueue(1), Err(LogError::WriterClosed)));
        assert_eq!(target.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let target = Arc::new(Recorder {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let w = writer(
            &target,
            WriterOptions {
                max_queue: 2,
                overflow_policy: OverflowPolicy::DropOldest,
                ..Default::default()
            },
        );
        for i in 100..110 {
            w.enqueue(i).unwrap();
        }
        w.close();
        let items = target.items.lock().clone();
        assert_eq!(items.last(), Some(&109));
        assert!(w.metrics().dropped_count() > 0);
        assert_eq!(
            items.len() as u64 + w.metrics().dropped_count(),
            10
        );
    }

    #[test]
    fn test_block_policy_loses_nothing() {
        let target = Arc::new(Recorder {
            delay: Some(Duration::from_millis(1)),
            ..Default::default()
        });
        let w = writer(
            &target,
            WriterOptions {
                max_queue: 4,
                overflow_policy: OverflowPolicy::Block,
                ..Default::default()
            },
        );
        for i in 0..50 {
            w.enqueue(i).unwrap();
        }
        w.close();
        assert_eq!(*target.items.lock(), (0..50).collect::<Vec<_>>());
        assert_eq!(w.metrics().dropped_count(), 0);
    }

    #[test]
    fn test_close_timeout_abandons_thread() {
        let target = Arc::new(Recorder {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let w = writer(
            &target,
            WriterOptions {
                close_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        for i in 0..5 {
            w.enqueue(i).unwrap();
        }
        assert!(!w.close());
        assert_eq!(w.state(), WriterState::Closed);
    }

    #[test]
    fn test_abandoned_thread_stops_and_target_stays_open() {
        let target = Arc::new(Recorder {
            delay: Some(Duration::from_millis(150)),
            ..Default::default()
        });
        let w = writer(
            &target,
            WriterOptions {
                close_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        for i in 0..5 {
            w.enqueue(i).unwrap();
        }
        assert!(!w.close());
        assert_eq!(target.released.load(Ordering::SeqCst), 0);

        // Let the thread finish the item it was writing
        thread::sleep(Duration::from_millis(400));
        let written = target.items.lock().len();
        assert!(written <= 1, "wrote {} items after close gave up", written);
        assert_eq!(written as u64 + w.metrics().dropped_count(), 5);
        assert_eq!(target.released.load(Ordering::SeqCst), 0);
    }
}
