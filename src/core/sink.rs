//! Sink trait and the generic adapter driving every sink
//!
//! A [`Sink`] only knows how to initialize itself, turn an [`EventRecord`]
//! into its payload type and write one payload. [`SinkAdapter`] supplies
//! everything else: lazy initialization, the compiled format, the per-sink
//! filter, record reuse and the [`AsyncWriter`] hand-off. Sources talk to
//! adapters through the object-safe [`EventSink`] trait.

use super::async_writer::{AsyncWriter, WriteTarget, WriterOptions};
use super::config::SinkConfig;
use super::error::{LogError, Result};
use super::event_record::{ErrorInfo, EventRecord};
use super::format::{CompiledFormat, FormatCompiler, FormatFlavor};
use super::host::HostInfo;
use super::internal;
use super::metrics::WriterMetrics;
use super::registry::TRACE_SOURCE;
use super::severity::{ActivityKind, Severity, Threshold};
use super::user_data::UserData;
use super::activity::ActivityId;
use parking_lot::{Mutex, RwLock};
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// Output destination.
///
/// Implementations use interior mutability: `write_one` and the batch hooks
/// run on the drain thread (or the caller in synchronous mode), `format` runs
/// on the producing thread.
pub trait Sink: Send + Sync + 'static {
    type Payload: Send + 'static;

    /// One-time setup from configuration. Any error disables the sink.
    fn initialize(&self, config: &SinkConfig, host: &HostInfo) -> Result<()>;

    /// Flavor requested from the format compiler
    fn format_flavor(&self) -> FormatFlavor {
        FormatFlavor::Plain
    }

    /// Build the payload, using `compiled` when a template is configured
    fn format(&self, record: &Arc<EventRecord>, compiled: Option<&CompiledFormat>) -> Self::Payload;

    fn begin_batch(&self) -> Result<()> {
        Ok(())
    }

    fn write_one(&self, payload: Self::Payload) -> Result<()>;

    fn end_batch(&self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying resource. The sink may be initialized again later.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Whether a failed write permanently disables the sink
    fn write_failure_is_fatal(&self) -> bool {
        false
    }
}

/// Initialization state of a sink instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Uninitialized,
    Ready,
    PermanentlyFailed,
}

impl SinkState {
    fn load(cell: &AtomicU8) -> Self {
        match cell.load(Ordering::Acquire) {
            0 => SinkState::Uninitialized,
            1 => SinkState::Ready,
            _ => SinkState::PermanentlyFailed,
        }
    }

    fn store(self, cell: &AtomicU8) {
        cell.store(self as u8, Ordering::Release);
    }
}

/// Arguments of one write call
#[derive(Debug, Clone, Copy)]
pub struct EventArgs<'a> {
    pub severity: Severity,
    pub activity: Option<ActivityKind>,
    pub source_name: &'a str,
    pub source_index: u32,
    pub message: Option<&'a str>,
    pub error: Option<&'a ErrorInfo>,
    pub user_data: Option<&'a UserData>,
}

impl<'a> EventArgs<'a> {
    pub fn new(severity: Severity, source_name: &'a str, source_index: u32) -> Self {
        Self {
            severity,
            activity: None,
            source_name,
            source_index,
            message: None,
            error: None,
            user_data: None,
        }
    }

    #[must_use]
    pub fn message(mut self, message: &'a str) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn error(mut self, error: &'a ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }
}

/// Services a sink needs from the context it is attached to
pub trait SinkHost: Send + Sync {
    fn host_info(&self) -> Arc<HostInfo>;

    /// Distinguishes contexts in the per-thread record cache
    fn context_id(&self) -> u64;

    /// Deliver an unrouted event through the TRACE source
    fn redirect_to_trace(&self, args: &EventArgs<'_>);
}

/// Object-safe view of a sink instance used by sources.
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    /// Attach to a context. Called by the context when the sink is built.
    fn bind(&self, host: Weak<dyn SinkHost>);

    fn write_event(&self, args: &EventArgs<'_>);

    fn write(
        &self,
        severity: Severity,
        source_name: &str,
        source_index: u32,
        message: Option<&str>,
        error: Option<&ErrorInfo>,
    ) {
        self.write_event(&EventArgs {
            message,
            error,
            ..EventArgs::new(severity, source_name, source_index)
        });
    }

    /// Drain and release. The sink re-initializes on its next write.
    fn close(&self) -> bool;

    fn state(&self) -> SinkState;

    /// Snapshot of the writer counters, `None` before initialization
    fn metrics(&self) -> Option<WriterMetrics>;
}

#[derive(PartialEq, Eq, Clone, Copy)]
struct RecordKey {
    context: u64,
    source_index: u32,
    severity: Severity,
    activity: Option<ActivityKind>,
    activity_id: Option<ActivityId>,
    content: u64,
}

thread_local! {
    static LAST_RECORD: RefCell<Option<(RecordKey, Arc<EventRecord>)>> = const { RefCell::new(None) };
}

fn content_hash(args: &EventArgs<'_>) -> u64 {
    let mut hasher = DefaultHasher::new();
    args.source_name.hash(&mut hasher);
    args.message.hash(&mut hasher);
    args.error.map(ErrorInfo::to_string).hash(&mut hasher);
    hasher.finish()
}

fn build_record(args: &EventArgs<'_>, host: Arc<HostInfo>) -> EventRecord {
    let mut record = EventRecord::new(
        args.severity,
        args.source_name,
        args.source_index,
        args.message.map(String::from),
    )
    .with_host(host);
    if let Some(error) = args.error {
        record = record.with_error(error.clone());
    }
    if let Some(kind) = args.activity {
        record = record.with_activity(kind);
    }
    if let Some(data) = args.user_data {
        record = record.with_user_data(data.clone());
    }
    record
}

/// Record for `args`. A raw trace call (index 0) reuses the previous record
/// built on this thread when the call is identical; every other event, and
/// any event carrying user data, gets a fresh record.
pub(crate) fn record_for(args: &EventArgs<'_>, context: u64, host: impl FnOnce() -> Arc<HostInfo>) -> Arc<EventRecord> {
    if args.source_index != 0 || args.user_data.is_some() {
        return Arc::new(build_record(args, host()));
    }
    let key = RecordKey {
        context,
        source_index: args.source_index,
        severity: args.severity,
        activity: args.activity,
        activity_id: ActivityId::current(),
        content: content_hash(args),
    };
    LAST_RECORD.with(|last| {
        let mut last = last.borrow_mut();
        if let Some((cached_key, record)) = last.as_ref() {
            if *cached_key == key {
                return Arc::clone(record);
            }
        }
        let record = Arc::new(build_record(args, host()));
        *last = Some((key, Arc::clone(&record)));
        record
    })
}

/// Forget the cached record of the calling thread
pub fn reset_record_cache() {
    LAST_RECORD.with(|last| last.borrow_mut().take());
}

struct SinkTarget<S: Sink> {
    name: String,
    sink: Arc<S>,
    state: Arc<AtomicU8>,
}

impl<S: Sink> WriteTarget<S::Payload> for SinkTarget<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin_batch(&self) -> Result<()> {
        if SinkState::load(&self.state) == SinkState::PermanentlyFailed {
            return Ok(());
        }
        self.sink.begin_batch()
    }

    fn write_one(&self, payload: S::Payload) -> Result<()> {
        // Items queued before a fatal failure are discarded
        if SinkState::load(&self.state) == SinkState::PermanentlyFailed {
            return Ok(());
        }
        let result = self.sink.write_one(payload);
        if result.is_err() && self.sink.write_failure_is_fatal() {
            SinkState::PermanentlyFailed.store(&self.state);
            internal::report_message(&self.name, "write failed, sink permanently disabled");
        }
        result
    }

    fn end_batch(&self) -> Result<()> {
        if SinkState::load(&self.state) == SinkState::PermanentlyFailed {
            return Ok(());
        }
        self.sink.end_batch()
    }

    fn release(&self) -> Result<()> {
        self.sink.close()
    }
}

struct Runtime<P: Send + 'static> {
    writer: Arc<AsyncWriter<P>>,
    format: Option<Arc<CompiledFormat>>,
    filter: Option<Threshold>,
}

impl<P: Send + 'static> Clone for Runtime<P> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            format: self.format.clone(),
            filter: self.filter,
        }
    }
}

/// Generic driver turning write calls into queued sink payloads.
///
/// # Example
///
/// ```
/// use sourcelog::{EventSink, Severity, SinkAdapter, SinkConfig};
/// use sourcelog::core::format::CompiledFormat;
/// use sourcelog::{EventRecord, HostInfo, Result, Sink};
/// use std::sync::{Arc, Mutex};
///
/// #[derive(Default)]
/// struct Lines(Mutex<Vec<String>>);
///
/// impl Sink for Lines {
///     type Payload = String;
///     fn initialize(&self, _: &SinkConfig, _: &HostInfo) -> Result<()> { Ok(()) }
///     fn format(&self, r: &Arc<EventRecord>, f: Option<&CompiledFormat>) -> String {
///         f.map(|f| f.render(r)).unwrap_or_else(|| r.user_message())
///     }
///     fn write_one(&self, line: String) -> Result<()> {
///         self.0.lock().unwrap().push(line);
///         Ok(())
///     }
/// }
///
/// let config = SinkConfig::new("lines").with("Format", r#""{0}|{1}", SourceName, UserMessage"#);
/// let adapter = SinkAdapter::new(config, Lines::default());
/// adapter.write(Severity::Warning, "APP", 3, Some("hello"), None);
/// adapter.close();
/// assert_eq!(*adapter.sink().0.lock().unwrap(), ["APP|hello"]);
/// ```
pub struct SinkAdapter<S: Sink> {
    name: String,
    sink: Arc<S>,
    config: SinkConfig,
    state: Arc<AtomicU8>,
    runtime: Mutex<Option<Runtime<S::Payload>>>,
    host: RwLock<Option<Weak<dyn SinkHost>>>,
}

impl<S: Sink> SinkAdapter<S> {
    pub fn new(config: SinkConfig, sink: S) -> Self {
        Self::from_arc(config, Arc::new(sink))
    }

    pub fn from_arc(config: SinkConfig, sink: Arc<S>) -> Self {
        Self {
            name: config.name().to_string(),
            sink,
            config,
            state: Arc::new(AtomicU8::new(SinkState::Uninitialized as u8)),
            runtime: Mutex::new(None),
            host: RwLock::new(None),
        }
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn bound_host(&self) -> Option<Arc<dyn SinkHost>> {
        self.host.read().as_ref().and_then(Weak::upgrade)
    }

    fn host_info(&self) -> Arc<HostInfo> {
        self.bound_host()
            .map(|h| h.host_info())
            .unwrap_or_else(|| Arc::new(HostInfo::default()))
    }

    /// Current runtime, initializing on first use. `None` if disabled.
    fn runtime(&self) -> Option<Runtime<S::Payload>> {
        let mut slot = self.runtime.lock();
        if let Some(runtime) = slot.as_ref() {
            return Some(runtime.clone());
        }
        if SinkState::load(&self.state) == SinkState::PermanentlyFailed {
            return None;
        }
        match self.initialize() {
            Ok(runtime) => {
                SinkState::Ready.store(&self.state);
                *slot = Some(runtime.clone());
                Some(runtime)
            }
            Err(e) => {
                // Reported once; later writes see the failed state
                SinkState::PermanentlyFailed.store(&self.state);
                internal::report(&self.name, &e);
                None
            }
        }
    }

    fn initialize(&self) -> Result<Runtime<S::Payload>> {
        let filter = self.config.filter()?;
        let options = WriterOptions {
            asynchronous: self.config.get_bool("Async", true)?,
            max_queue: self.config.max_queue()?,
            overflow_policy: self.config.overflow_policy()?,
            on_overflow: None,
            close_timeout: self.config.close_timeout()?,
        };
        let format = FormatCompiler::compile(self.config.format_template(), self.sink.format_flavor())
            .map(Arc::new);

        let host = self.host_info();
        match catch_unwind(AssertUnwindSafe(|| self.sink.initialize(&self.config, &host))) {
            Ok(result) => result?,
            Err(_) => return Err(LogError::other("sink panicked during initialization")),
        }

        let target = SinkTarget {
            name: self.name.clone(),
            sink: Arc::clone(&self.sink),
            state: Arc::clone(&self.state),
        };
        Ok(Runtime {
            writer: Arc::new(AsyncWriter::new(Arc::new(target), options)),
            format,
            filter,
        })
    }

    fn deliver(&self, record: &Arc<EventRecord>) {
        // One retry covers a close racing with this write
        for _ in 0..2 {
            let Some(runtime) = self.runtime() else {
                return;
            };
            if let Some(filter) = runtime.filter {
                if !filter.allows(record.severity(), record.activity()) {
                    return;
                }
            }
            let formatted = catch_unwind(AssertUnwindSafe(|| {
                self.sink.format(record, runtime.format.as_deref())
            }));
            let payload = match formatted {
                Ok(payload) => payload,
                Err(panic_info) => {
                    internal::report_panic(&self.name, panic_info);
                    return;
                }
            };
            match runtime.writer.enqueue(payload) {
                Ok(()) => return,
                Err(LogError::WriterClosed) => continue,
                Err(e) => {
                    internal::report(&self.name, &e);
                    return;
                }
            }
        }
    }
}

impl<S: Sink> EventSink for SinkAdapter<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, host: Weak<dyn SinkHost>) {
        *self.host.write() = Some(host);
    }

    fn write_event(&self, args: &EventArgs<'_>) {
        if SinkState::load(&self.state) == SinkState::PermanentlyFailed {
            return;
        }
        let bound = self.bound_host();
        // Index 0 marks a raw, unrouted trace call
        if args.source_index == 0 && !args.source_name.eq_ignore_ascii_case(TRACE_SOURCE) {
            if let Some(host) = bound {
                host.redirect_to_trace(args);
                return;
            }
        }
        let context = bound.as_ref().map_or(0, |h| h.context_id());
        let record = record_for(args, context, || {
            bound
                .as_ref()
                .map(|h| h.host_info())
                .unwrap_or_else(|| Arc::new(HostInfo::default()))
        });
        self.deliver(&record);
    }

    fn close(&self) -> bool {
        let runtime = self.runtime.lock().take();
        let clean = runtime.map_or(true, |r| r.writer.close());
        if SinkState::load(&self.state) != SinkState::PermanentlyFailed {
            SinkState::Uninitialized.store(&self.state);
        }
        clean
    }

    fn state(&self) -> SinkState {
        SinkState::load(&self.state)
    }

    fn metrics(&self) -> Option<WriterMetrics> {
        self.runtime
            .lock()
            .as_ref()
            .map(|r| r.writer.metrics().clone())
    }
}

impl<S: Sink> Drop for SinkAdapter<S> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.writer.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        inits: AtomicUsize,
        writes: Mutex<Vec<String>>,
        closes: AtomicUsize,
        fail_init: bool,
        fatal: bool,
    }

    impl Sink for Counting {
        type Payload = String;

        fn initialize(&self, _config: &SinkConfig, _host: &HostInfo) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(LogError::config("counting", "bad"));
            }
            Ok(())
        }

        fn format(&self, record: &Arc<EventRecord>, compiled: Option<&CompiledFormat>) -> String {
            compiled.map_or_else(|| record.user_message(), |f| f.render(record))
        }

        fn write_one(&self, payload: String) -> Result<()> {
            if self.fatal {
                return Err(LogError::database("gone"));
            }
            self.writes.lock().push(payload);
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn write_failure_is_fatal(&self) -> bool {
            self.fatal
        }
    }

    fn sync_config() -> SinkConfig {
        SinkConfig::new("counting").with("Async", "false")
    }

    #[test]
    fn test_lazy_init_and_reinit_after_close() {
        let adapter = SinkAdapter::new(SinkConfig::new("counting"), Counting::default());
        assert_eq!(adapter.state(), SinkState::Uninitialized);
        adapter.write(Severity::Information, "APP", 3, Some("one"), None);
        assert_eq!(adapter.state(), SinkState::Ready);
        assert!(adapter.close());
        assert_eq!(adapter.state(), SinkState::Uninitialized);
        adapter.write(Severity::Information, "APP", 3, Some("two"), None);
        adapter.close();

        let sink = adapter.sink();
        assert_eq!(sink.inits.load(Ordering::SeqCst), 2);
        assert_eq!(sink.closes.load(Ordering::SeqCst), 2);
        assert_eq!(*sink.writes.lock(), ["one", "two"]);
    }

    #[test]
    fn test_failed_init_is_not_retried() {
        let adapter = SinkAdapter::new(
            sync_config(),
            Counting {
                fail_init: true,
                ..Default::default()
            },
        );
        for _ in 0..5 {
            adapter.write(Severity::Error, "APP", 3, Some("x"), None);
        }
        adapter.close();
        assert_eq!(adapter.sink().inits.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.state(), SinkState::PermanentlyFailed);
    }

    #[test]
    fn test_fatal_write_disables_sink() {
        let adapter = SinkAdapter::new(
            sync_config(),
            Counting {
                fatal: true,
                ..Default::default()
            },
        );
        adapter.write(Severity::Error, "APP", 3, Some("a"), None);
        adapter.write(Severity::Error, "APP", 3, Some("b"), None);
        assert_eq!(adapter.state(), SinkState::PermanentlyFailed);
        assert!(adapter.metrics().is_some_and(|m| m.failed_count() == 1));
        adapter.close();
        assert_eq!(adapter.state(), SinkState::PermanentlyFailed);
    }

    #[test]
    fn test_filter_applies_after_source() {
        let adapter = SinkAdapter::new(sync_config().with("Filter", "Error"), Counting::default());
        adapter.write(Severity::Warning, "APP", 3, Some("low"), None);
        adapter.write(Severity::Critical, "APP", 3, Some("high"), None);
        assert_eq!(*adapter.sink().writes.lock(), ["high"]);
    }

    #[test]
    fn test_identical_raw_calls_share_record() {
        reset_record_cache();
        let args = EventArgs::new(Severity::Warning, "TRACE", 0).message("same");
        let a = record_for(&args, 1, || Arc::new(HostInfo::default()));
        let b = record_for(&args, 1, || Arc::new(HostInfo::default()));
        assert!(Arc::ptr_eq(&a, &b));

        let other = EventArgs::new(Severity::Warning, "TRACE", 0).message("different");
        let c = record_for(&other, 1, || Arc::new(HostInfo::default()));
        assert!(!Arc::ptr_eq(&a, &c));

        let data = UserData::new().with_field("k", 1);
        let with_data = EventArgs {
            user_data: Some(&data),
            ..other
        };
        let d = record_for(&with_data, 1, || Arc::new(HostInfo::default()));
        let e = record_for(&with_data, 1, || Arc::new(HostInfo::default()));
        assert!(!Arc::ptr_eq(&d, &e));
    }

    #[test]
    fn test_repeated_source_events_get_fresh_records() {
        reset_record_cache();
        let args = EventArgs::new(Severity::Error, "APP", 3).message("retrying");
        let first = record_for(&args, 1, || Arc::new(HostInfo::default()));
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = record_for(&args, 1, || Arc::new(HostInfo::default()));
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.date_time() > first.date_time());
    }
}
