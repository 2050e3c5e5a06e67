//! Named event sources and the context that owns them
//!
//! A [`LoggingContext`] maps case-insensitive source names to [`Source`]s,
//! builds configured sink instances lazily (once per instance name) and owns
//! their lifecycle. Hosts construct one explicitly and call
//! [`LoggingContext::shutdown`] (or drop it) at a well-defined point.

use super::config::{ContextConfig, SinkConfig};
use super::error::{LogError, Result};
use super::event_record::ErrorInfo;
use super::host::HostInfo;
use super::internal;
use super::severity::{ActivityKind, Severity, Threshold};
use super::sink::{EventArgs, EventSink, Sink, SinkAdapter, SinkHost};
use super::user_data::UserData;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Source receiving raw, unrouted trace calls
pub const TRACE_SOURCE: &str = "TRACE";
pub const CONSOLE_SOURCE: &str = "CONSOLE";
pub const FIRSTCHANCE_SOURCE: &str = "FIRSTCHANCE";

const FIRST_USER_INDEX: u32 = 3;

fn reserved_index(name: &str) -> Option<u32> {
    [TRACE_SOURCE, CONSOLE_SOURCE, FIRSTCHANCE_SOURCE]
        .iter()
        .position(|reserved| reserved.eq_ignore_ascii_case(name))
        .map(|i| i as u32)
}

/// Builds a sink instance from its configuration
pub type SinkFactory = Arc<dyn Fn(&SinkConfig) -> Result<Arc<dyn EventSink>> + Send + Sync>;

/// Wrap a constructor of a concrete [`Sink`] into a [`SinkFactory`]
pub fn adapter_factory<S, F>(make: F) -> SinkFactory
where
    S: Sink,
    F: Fn(&SinkConfig) -> Result<S> + Send + Sync + 'static,
{
    Arc::new(move |config: &SinkConfig| {
        let sink = make(config)?;
        Ok(Arc::new(SinkAdapter::new(config.clone(), sink)) as Arc<dyn EventSink>)
    })
}

/// A named logical channel with its own threshold and sink list.
///
/// Threshold reads are lock-free; the sink list is copied out before
/// dispatch so sinks never run under the list lock.
pub struct Source {
    name: String,
    index: u32,
    threshold: AtomicU32,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl Source {
    fn new(name: &str, index: u32, threshold: Threshold, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            name: name.to_string(),
            index,
            threshold: AtomicU32::new(threshold.bits()),
            sinks: RwLock::new(sinks),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable per-context index; 0, 1 and 2 are reserved
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn threshold(&self) -> Threshold {
        Threshold::from_bits(self.threshold.load(Ordering::Relaxed))
    }

    /// Replace the threshold, returning the previous one
    pub fn set_threshold(&self, threshold: Threshold) -> Threshold {
        Threshold::from_bits(self.threshold.swap(threshold.bits(), Ordering::Relaxed))
    }

    #[inline]
    pub fn is_enabled(&self, severity: Severity) -> bool {
        self.threshold().allows(severity, None)
    }

    #[inline]
    pub fn is_activity_enabled(&self, kind: ActivityKind) -> bool {
        self.threshold().allows(Severity::Information, Some(kind))
    }

    pub fn sinks(&self) -> Vec<Arc<dyn EventSink>> {
        self.sinks.read().clone()
    }

    /// Attach a sink unless one with the same name is already attached
    pub fn attach(&self, sink: Arc<dyn EventSink>) {
        let mut sinks = self.sinks.write();
        if !sinks.iter().any(|s| s.name() == sink.name()) {
            sinks.push(sink);
        }
    }

    pub fn detach(&self, name: &str) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|s| s.name() != name);
        sinks.len() != before
    }

    /// Dispatch without threshold checks
    pub fn dispatch(&self, args: &EventArgs<'_>) {
        let sinks = self.sinks();
        for sink in &sinks {
            sink.write_event(args);
        }
    }

    fn emit(&self, args: EventArgs<'_>) {
        if self.threshold().allows(args.severity, args.activity) {
            self.dispatch(&args);
        }
    }

    pub fn trace_event(&self, severity: Severity, message: impl AsRef<str>) {
        self.emit(EventArgs::new(severity, &self.name, self.index).message(message.as_ref()));
    }

    /// Log an error with its cause chain, optionally with a message
    pub fn trace_error(&self, severity: Severity, error: &(dyn Error + 'static), message: Option<&str>) {
        if !self.is_enabled(severity) {
            return;
        }
        let info = ErrorInfo::from_error(error);
        self.emit(EventArgs {
            message,
            error: Some(&info),
            ..EventArgs::new(severity, &self.name, self.index)
        });
    }

    pub fn trace_data(&self, severity: Severity, message: impl AsRef<str>, data: &UserData) {
        self.emit(EventArgs {
            message: Some(message.as_ref()),
            user_data: Some(data),
            ..EventArgs::new(severity, &self.name, self.index)
        });
    }

    /// Activity-tracing event, gated by the activity bits of the threshold
    pub fn trace_activity(&self, kind: ActivityKind, message: impl AsRef<str>) {
        self.emit(EventArgs {
            activity: Some(kind),
            message: Some(message.as_ref()),
            ..EventArgs::new(Severity::Information, &self.name, self.index)
        });
    }

    #[inline]
    pub fn verbose(&self, message: impl AsRef<str>) {
        self.trace_event(Severity::Verbose, message);
    }

    #[inline]
    pub fn info(&self, message: impl AsRef<str>) {
        self.trace_event(Severity::Information, message);
    }

    #[inline]
    pub fn warning(&self, message: impl AsRef<str>) {
        self.trace_event(Severity::Warning, message);
    }

    #[inline]
    pub fn error(&self, message: impl AsRef<str>) {
        self.trace_event(Severity::Error, message);
    }

    #[inline]
    pub fn critical(&self, message: impl AsRef<str>) {
        self.trace_event(Severity::Critical, message);
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("threshold", &self.threshold())
            .field("sinks", &self.sinks.read().iter().map(|s| s.name().to_string()).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    sources: HashMap<String, Arc<Source>>,
    next_index: u32,
    instances: HashMap<String, Arc<dyn EventSink>>,
    fallback: Option<Vec<Arc<dyn EventSink>>>,
    // Attached to every source, including ones created later
    global: Vec<Arc<dyn EventSink>>,
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ContextShared {
    id: u64,
    host: Arc<HostInfo>,
    config: ContextConfig,
    factories: RwLock<HashMap<String, SinkFactory>>,
    registry: Mutex<Registry>,
    weak_self: Weak<ContextShared>,
}

impl ContextShared {
    fn host_weak(&self) -> Weak<dyn SinkHost> {
        self.weak_self.clone()
    }

    fn get_or_create(&self, name: &str, default_threshold: Threshold) -> Arc<Source> {
        let key = name.to_ascii_lowercase();
        let mut registry = self.registry.lock();
        if let Some(source) = registry.sources.get(&key) {
            return Arc::clone(source);
        }

        let index = reserved_index(name).unwrap_or_else(|| {
            let index = registry.next_index.max(FIRST_USER_INDEX);
            registry.next_index = index + 1;
            index
        });
        let source_config = self.config.source(name);
        let threshold = source_config
            .and_then(|c| c.threshold)
            .unwrap_or(default_threshold);
        let sink_names = source_config
            .and_then(|c| c.sinks.clone())
            .unwrap_or_else(|| self.config.default_sinks.clone());

        let mut sinks = match self.build_sinks(&mut registry, &sink_names) {
            Ok(sinks) => sinks,
            Err(e) => {
                internal::report(&format!("source {}", name), &e);
                self.fallback_sinks(&mut registry)
            }
        };
        for sink in &registry.global {
            if !sinks.iter().any(|s| s.name() == sink.name()) {
                sinks.push(Arc::clone(sink));
            }
        }

        let source = Arc::new(Source::new(name, index, threshold, sinks));
        registry.sources.insert(key, Arc::clone(&source));
        source
    }

    fn build_sinks(&self, registry: &mut Registry, names: &[String]) -> Result<Vec<Arc<dyn EventSink>>> {
        if names.is_empty() && self.config.sinks.is_empty() {
            return Ok(self.fallback_sinks(registry));
        }
        names
            .iter()
            .map(|name| self.instance(registry, name))
            .collect()
    }

    fn instance(&self, registry: &mut Registry, name: &str) -> Result<Arc<dyn EventSink>> {
        let key = name.to_ascii_lowercase();
        if let Some(sink) = registry.instances.get(&key) {
            return Ok(Arc::clone(sink));
        }
        let config = self
            .config
            .sink(name)
            .ok_or_else(|| LogError::config(name, "no sink configured with this name"))?;
        let sink = self.build(config)?;
        registry.instances.insert(key, Arc::clone(&sink));
        Ok(sink)
    }

    fn build(&self, config: &SinkConfig) -> Result<Arc<dyn EventSink>> {
        let kind = config
            .sink_type()
            .ok_or_else(|| LogError::config(config.name(), "missing key 'Type'"))?
            .to_ascii_lowercase();
        let factory = self
            .factories
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| LogError::config(config.name(), format!("unknown sink type '{}'", kind)))?;
        let sink = factory(config)?;
        sink.bind(self.host_weak());
        Ok(sink)
    }

    fn fallback_sinks(&self, registry: &mut Registry) -> Vec<Arc<dyn EventSink>> {
        if let Some(fallback) = &registry.fallback {
            return fallback.clone();
        }
        let config = SinkConfig::new("console").with("Type", "console");
        let fallback = match self.build(&config) {
            Ok(sink) => vec![sink],
            Err(_) => Vec::new(),
        };
        registry.fallback = Some(fallback.clone());
        fallback
    }

    fn all_sinks(&self) -> Vec<Arc<dyn EventSink>> {
        let registry = self.registry.lock();
        let mut sinks: Vec<Arc<dyn EventSink>> = registry.instances.values().cloned().collect();
        sinks.extend(registry.fallback.iter().flatten().cloned());
        sinks.extend(registry.global.iter().cloned());
        sinks
    }

    fn shutdown(&self) -> bool {
        let mut clean = true;
        for sink in self.all_sinks() {
            clean &= sink.close();
        }
        clean
    }
}

impl SinkHost for ContextShared {
    fn host_info(&self) -> Arc<HostInfo> {
        Arc::clone(&self.host)
    }

    fn context_id(&self) -> u64 {
        self.id
    }

    fn redirect_to_trace(&self, args: &EventArgs<'_>) {
        let trace = self.get_or_create(TRACE_SOURCE, self.config.default_threshold);
        if !trace.threshold().allows(args.severity, args.activity) {
            return;
        }
        let message = match args.message {
            Some(message) if !args.source_name.is_empty() => {
                Some(format!("{}: {}", args.source_name, message))
            }
            other => other.map(String::from),
        };
        trace.dispatch(&EventArgs {
            source_name: trace.name(),
            source_index: trace.index(),
            message: message.as_deref(),
            ..*args
        });
    }
}

impl Drop for ContextShared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Explicitly constructed logging context.
///
/// # Example
///
/// ```
/// use sourcelog::{LoggingContext, Severity, Threshold};
///
/// let context = LoggingContext::builder().name("demo").build();
/// let app = context.get_or_create("APP", Threshold::WARNING);
/// assert_eq!(app.index(), 3);
/// assert_eq!(context.source("trace").index(), 0);
///
/// let previous = context.set_severity("app", Threshold::ERROR);
/// assert_eq!(previous, Threshold::WARNING);
/// assert!(!app.is_enabled(Severity::Warning));
/// context.shutdown();
/// ```
#[derive(Clone)]
pub struct LoggingContext {
    shared: Arc<ContextShared>,
}

impl LoggingContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub fn host(&self) -> &HostInfo {
        &self.shared.host
    }

    pub fn config(&self) -> &ContextConfig {
        &self.shared.config
    }

    /// Existing source by case-insensitive name, or a new one with
    /// `default_threshold` (a per-source configured threshold wins).
    pub fn get_or_create(&self, name: &str, default_threshold: Threshold) -> Arc<Source> {
        self.shared.get_or_create(name, default_threshold)
    }

    /// Source with the context's default threshold
    pub fn source(&self, name: &str) -> Arc<Source> {
        self.get_or_create(name, self.shared.config.default_threshold)
    }

    pub fn find(&self, name: &str) -> Option<Arc<Source>> {
        self.shared
            .registry
            .lock()
            .sources
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    pub fn sources(&self) -> Vec<Arc<Source>> {
        let mut sources: Vec<_> = self.shared.registry.lock().sources.values().cloned().collect();
        sources.sort_by_key(|s| s.index());
        sources
    }

    /// Set a source's threshold, creating the source if needed. Returns the previous threshold.
    pub fn set_severity(&self, name: &str, threshold: Threshold) -> Threshold {
        self.source(name).set_threshold(threshold)
    }

    pub fn set_all_severities(&self, threshold: Threshold) {
        let registry = self.shared.registry.lock();
        for source in registry.sources.values() {
            source.set_threshold(threshold);
        }
    }

    /// Configured sink instance by name, building it if needed
    pub fn sink(&self, name: &str) -> Result<Arc<dyn EventSink>> {
        let mut registry = self.shared.registry.lock();
        self.shared.instance(&mut registry, name)
    }

    /// Register a sink factory for a `Type` value
    pub fn register_sink(&self, type_name: &str, factory: SinkFactory) {
        self.shared
            .factories
            .write()
            .insert(type_name.to_ascii_lowercase(), factory);
    }

    /// Attach a sink to every current and future source
    pub fn attach_everywhere(&self, sink: Arc<dyn EventSink>) {
        sink.bind(self.shared.host_weak());
        let mut registry = self.shared.registry.lock();
        if !registry.global.iter().any(|s| s.name() == sink.name()) {
            registry.global.push(Arc::clone(&sink));
        }
        for source in registry.sources.values() {
            source.attach(Arc::clone(&sink));
        }
    }

    /// Undo [`attach_everywhere`](Self::attach_everywhere)
    pub fn detach_everywhere(&self, name: &str) {
        let mut registry = self.shared.registry.lock();
        registry.global.retain(|s| s.name() != name);
        for source in registry.sources.values() {
            source.detach(name);
        }
    }

    /// Raw trace call from code that has no source; delivered through TRACE
    pub fn write_raw(&self, severity: Severity, category: &str, message: &str) {
        self.shared
            .redirect_to_trace(&EventArgs::new(severity, category, 0).message(message));
    }

    /// Drain and close every sink. Sinks re-initialize if written to again.
    pub fn shutdown(&self) -> bool {
        self.shared.shutdown()
    }
}

/// Builder for [`LoggingContext`]
#[must_use]
pub struct ContextBuilder {
    name: Option<String>,
    app_version: Option<String>,
    base_dir: Option<PathBuf>,
    config: ContextConfig,
    factories: HashMap<String, SinkFactory>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        let mut factories: HashMap<String, SinkFactory> = HashMap::new();
        #[cfg(feature = "console")]
        factories.insert(
            "console".into(),
            adapter_factory(|_| Ok(crate::sinks::console::ConsoleSink::new())),
        );
        #[cfg(feature = "file")]
        factories.insert(
            "file".into(),
            adapter_factory(|_| Ok(crate::sinks::rotating_file::RotatingFileSink::new())),
        );
        factories.insert(
            "eventlog".into(),
            adapter_factory(|_| Ok(crate::sinks::event_log::EventLogSink::new())),
        );
        factories.insert(
            "email".into(),
            adapter_factory(|_| Ok(crate::sinks::email::EmailSink::new())),
        );
        Self {
            name: None,
            app_version: None,
            base_dir: None,
            config: ContextConfig::default(),
            factories,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    /// Directory relative file paths resolve against
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_sink(mut self, type_name: &str, factory: SinkFactory) -> Self {
        self.factories.insert(type_name.to_ascii_lowercase(), factory);
        self
    }

    /// Enable `Type=database` sinks backed by `connector`
    pub fn database_connector(self, connector: Arc<dyn crate::sinks::database::DbConnector>) -> Self {
        self.register_sink(
            "database",
            adapter_factory(move |_| {
                Ok(crate::sinks::database::DatabaseSink::new(Arc::clone(&connector)))
            }),
        )
    }

    pub fn build(self) -> LoggingContext {
        let name = self
            .name
            .or_else(|| self.config.name.clone())
            .unwrap_or_else(|| super::host::process_name().to_string());
        let version = self
            .app_version
            .or_else(|| self.config.app_version.clone())
            .unwrap_or_default();
        let mut host = HostInfo::new(name, version);
        if let Some(dir) = self.base_dir {
            host = host.with_base_dir(dir);
        }

        let config = self.config;
        let factories = self.factories;
        let shared = Arc::new_cyclic(|weak| ContextShared {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            host: Arc::new(host),
            config,
            factories: RwLock::new(factories),
            registry: Mutex::new(Registry {
                next_index: FIRST_USER_INDEX,
                ..Default::default()
            }),
            weak_self: weak.clone(),
        });
        LoggingContext { shared }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
