//! Snapshot of one logged event

use super::activity::{self, ActivityId};
use super::host::HostInfo;
use super::severity::{ActivityKind, Severity};
use super::user_data::UserData;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

// Thread-local caches for thread information to avoid repeated allocations
thread_local! {
    static THREAD_ID_CACHE: RefCell<Option<String>> = const { RefCell::new(None) };
    static THREAD_NAME_CACHE: RefCell<Option<Option<String>>> = const { RefCell::new(None) };
}

fn get_thread_id() -> String {
    THREAD_ID_CACHE.with(|cache| {
        cache
            .borrow_mut()
            .get_or_insert_with(|| format!("{:?}", thread::current().id()))
            .clone()
    })
}

fn get_thread_name() -> Option<String> {
    THREAD_NAME_CACHE.with(|cache| {
        cache
            .borrow_mut()
            .get_or_insert_with(|| thread::current().name().map(String::from))
            .clone()
    })
}

fn default_host() -> Arc<HostInfo> {
    static DEFAULT_HOST: OnceLock<Arc<HostInfo>> = OnceLock::new();
    Arc::clone(DEFAULT_HOST.get_or_init(|| Arc::new(HostInfo::default())))
}

/// Captured text of an error attached to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    message: String,
    causes: Vec<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Capture an error and its `source()` chain
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            causes,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn causes(&self) -> &[String] {
        &self.causes
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, "\nCaused by: {}", cause)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct FormatHints {
    squeeze: bool,
    indent: String,
}

/// One log event.
///
/// Read-only after construction except for the two formatting hints (line
/// squeeze and indent) that a sink sets around its own formatting through
/// [`EventRecord::with_hints`]. The call stack is captured on first access
/// from the thread that created the record and cached for its lifetime.
///
/// # Example
///
/// ```
/// use sourcelog::{EventRecord, Severity};
///
/// let record = EventRecord::new(Severity::Warning, "APP", 3, Some("line one\nline two".into()));
/// let squeezed = record.with_hints(true, "", |r| r.user_message());
/// assert_eq!(squeezed, "line one line two");
/// assert_eq!(record.user_message(), "line one\nline two");
/// ```
pub struct EventRecord {
    severity: Severity,
    activity: Option<ActivityKind>,
    source_name: String,
    source_id: u32,
    message: Option<String>,
    error: Option<ErrorInfo>,
    timestamp: DateTime<Utc>,
    thread_id: String,
    thread_name: Option<String>,
    origin_thread: ThreadId,
    activity_id: Option<ActivityId>,
    operations: Vec<String>,
    user_data: Option<UserData>,
    host: Arc<HostInfo>,
    call_stack: OnceLock<String>,
    hints: Mutex<FormatHints>,
}

impl EventRecord {
    pub fn new(
        severity: Severity,
        source_name: impl Into<String>,
        source_id: u32,
        message: Option<String>,
    ) -> Self {
        Self {
            severity,
            activity: None,
            source_name: source_name.into(),
            source_id,
            message,
            error: None,
            timestamp: Utc::now(),
            thread_id: get_thread_id(),
            thread_name: get_thread_name(),
            origin_thread: thread::current().id(),
            activity_id: ActivityId::current(),
            operations: activity::current_operations(),
            user_data: None,
            host: default_host(),
            call_stack: OnceLock::new(),
            hints: Mutex::new(FormatHints::default()),
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn with_activity(mut self, kind: ActivityKind) -> Self {
        self.activity = Some(kind);
        self
    }

    #[must_use]
    pub fn with_user_data(mut self, data: UserData) -> Self {
        self.user_data = Some(data);
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: Arc<HostInfo>) -> Self {
        self.host = host;
        self
    }

    /// Run `f` with the formatting hints set, restoring defaults afterwards.
    pub fn with_hints<R>(&self, squeeze: bool, indent: &str, f: impl FnOnce(&Self) -> R) -> R {
        struct Reset<'a>(&'a Mutex<FormatHints>);
        impl Drop for Reset<'_> {
            fn drop(&mut self) {
                *self.0.lock() = FormatHints::default();
            }
        }

        *self.hints.lock() = FormatHints {
            squeeze,
            indent: indent.to_string(),
        };
        let _reset = Reset(&self.hints);
        f(self)
    }

    fn apply_hints(&self, text: &str) -> String {
        let hints = self.hints.lock().clone();
        if hints.squeeze {
            return text
                .lines()
                .map(|l| l.trim_end_matches('\r'))
                .collect::<Vec<_>>()
                .join(" ");
        }
        if hints.indent.is_empty() || !text.contains('\n') {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len() + hints.indent.len() * 4);
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                out.push('\n');
                out.push_str(&hints.indent);
            }
            out.push_str(line);
        }
        out
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn activity(&self) -> Option<ActivityKind> {
        self.activity
    }

    /// Numeric event type (severity bit, or activity bit for activity events)
    pub fn event_type(&self) -> u32 {
        self.activity.map_or_else(|| self.severity.bit(), |a| a.bit())
    }

    pub fn severity_string(&self) -> &'static str {
        self.activity
            .map_or_else(|| self.severity.to_str(), |a| a.to_str())
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    pub fn raw_message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Message text, falling back to the error message when none was given
    pub fn user_message(&self) -> String {
        match (&self.message, &self.error) {
            (Some(message), _) => self.apply_hints(message),
            (None, Some(error)) => self.apply_hints(error.message()),
            (None, None) => String::new(),
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    /// Full error text including its cause chain
    pub fn exception(&self) -> Option<String> {
        self.error.as_ref().map(|e| self.apply_hints(&e.to_string()))
    }

    pub fn exception_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| self.apply_hints(e.message()))
    }

    /// Call stack of the creating thread.
    ///
    /// Captured on first access. Returns an empty string when first accessed
    /// from a thread other than the one that created the record.
    pub fn call_stack(&self) -> String {
        let raw = match self.call_stack.get() {
            Some(stack) => stack.as_str(),
            None if thread::current().id() == self.origin_thread => self
                .call_stack
                .get_or_init(|| Backtrace::force_capture().to_string())
                .as_str(),
            None => "",
        };
        self.apply_hints(raw.trim_end())
    }

    pub fn exception_or_call_stack(&self) -> String {
        self.exception().unwrap_or_else(|| self.call_stack())
    }

    pub fn date_time(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn local_date_time(&self) -> DateTime<Local> {
        self.timestamp.with_timezone(&Local)
    }

    /// Microseconds since the Unix epoch
    pub fn timestamp(&self) -> i64 {
        self.timestamp.timestamp_micros()
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn process_id(&self) -> u32 {
        self.host.process_id()
    }

    pub fn process_name(&self) -> &str {
        self.host.process_name()
    }

    pub fn domain_name(&self) -> &str {
        self.host.context_name()
    }

    pub fn entry_name(&self) -> &str {
        self.host.process_name()
    }

    pub fn version(&self) -> &str {
        self.host.app_version()
    }

    pub fn activity_id(&self) -> Option<ActivityId> {
        self.activity_id
    }

    pub fn logical_operation_stack(&self) -> &[String] {
        &self.operations
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }
}

impl fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRecord")
            .field("severity", &self.severity)
            .field("activity", &self.activity)
            .field("source_name", &self.source_name)
            .field("source_id", &self.source_id)
            .field("message", &self.message)
            .field("error", &self.error)
            .field("timestamp", &self.timestamp)
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}
