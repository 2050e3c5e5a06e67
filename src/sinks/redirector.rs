//! In-process redirection of events to subscribers
//!
//! Subscribers receive the [`EventRecord`] itself and format it as they
//! like. The redirector attaches to every source of its context when the
//! first subscriber arrives and detaches when the last one leaves.

use crate::core::config::SinkConfig;
use crate::core::error::Result;
use crate::core::event_record::EventRecord;
use crate::core::format::CompiledFormat;
use crate::core::host::HostInfo;
use crate::core::internal;
use crate::core::registry::LoggingContext;
use crate::core::sink::{EventSink, Sink, SinkAdapter};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Subscriber = Arc<dyn Fn(&Arc<EventRecord>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    list: RwLock<Vec<(SubscriptionId, Subscriber)>>,
}

impl Sink for Subscribers {
    type Payload = Arc<EventRecord>;

    fn initialize(&self, _config: &SinkConfig, _host: &HostInfo) -> Result<()> {
        Ok(())
    }

    fn format(&self, record: &Arc<EventRecord>, _compiled: Option<&CompiledFormat>) -> Arc<EventRecord> {
        Arc::clone(record)
    }

    fn write_one(&self, record: Arc<EventRecord>) -> Result<()> {
        let subscribers: Vec<Subscriber> = self.list.read().iter().map(|(_, s)| Arc::clone(s)).collect();
        for subscriber in subscribers {
            // One misbehaving subscriber must not starve the others
            if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| subscriber(&record))) {
                internal::report_panic("redirector", panic_info);
            }
        }
        Ok(())
    }
}

/// Subscription point for in-process consumers such as a status window.
///
/// ```
/// use sourcelog::{EventRecord, LoggingContext, SinkConfig};
/// use sourcelog::sinks::redirector::InProcessRedirector;
/// use std::sync::{Arc, Mutex};
///
/// let context = LoggingContext::builder().build();
/// let redirector = InProcessRedirector::with_config(
///     &context,
///     SinkConfig::new("status").with("Async", "false"),
/// );
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let id = redirector.subscribe(Arc::new(move |r: &Arc<EventRecord>| sink.lock().unwrap().push(r.user_message())));
///
/// context.source("APP").warning("low disk");
/// assert_eq!(*seen.lock().unwrap(), ["low disk"]);
/// assert!(redirector.unsubscribe(id));
/// ```
pub struct InProcessRedirector {
    context: LoggingContext,
    subscribers: Arc<Subscribers>,
    adapter: Arc<SinkAdapter<Subscribers>>,
    membership: Mutex<()>,
    next_id: AtomicU64,
}

impl InProcessRedirector {
    pub fn new(context: &LoggingContext) -> Self {
        Self::with_config(context, SinkConfig::new("redirector"))
    }

    /// Use `config` for the underlying sink (`Name`, `Async`, `Filter`, ...)
    pub fn with_config(context: &LoggingContext, config: SinkConfig) -> Self {
        let subscribers = Arc::new(Subscribers::default());
        let adapter = Arc::new(SinkAdapter::from_arc(config, Arc::clone(&subscribers)));
        Self {
            context: context.clone(),
            subscribers,
            adapter,
            membership: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let _membership = self.membership.lock();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let first = {
            let mut list = self.subscribers.list.write();
            list.push((id, subscriber));
            list.len() == 1
        };
        if first {
            self.context
                .attach_everywhere(Arc::clone(&self.adapter) as Arc<dyn EventSink>);
        }
        id
    }

    /// Remove a subscriber. Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let _membership = self.membership.lock();
        let (removed, now_empty) = {
            let mut list = self.subscribers.list.write();
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            (list.len() != before, list.is_empty())
        };
        if removed && now_empty {
            self.context.detach_everywhere(self.adapter.name());
            self.adapter.close();
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.list.read().len()
    }

    /// Drain events still queued for subscribers
    pub fn flush(&self) -> bool {
        self.adapter.close()
    }
}

impl Drop for InProcessRedirector {
    fn drop(&mut self) {
        if self.subscriber_count() > 0 {
            self.context.detach_everywhere(self.adapter.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::severity::{Severity, Threshold};

    fn sync_redirector(context: &LoggingContext) -> InProcessRedirector {
        InProcessRedirector::with_config(context, SinkConfig::new("status").with("Async", "false"))
    }

    fn collector() -> (Arc<Mutex<Vec<String>>>, Subscriber) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Arc::new(move |r: &Arc<EventRecord>| sink.lock().push(r.user_message())))
    }

    #[test]
    fn test_attaches_on_first_and_detaches_on_last() {
        let context = LoggingContext::builder().build();
        let existing = context.get_or_create("EXISTING", Threshold::ALL);
        let redirector = sync_redirector(&context);
        assert!(!existing.sinks().iter().any(|s| s.name() == "status"));

        let (_, a) = collector();
        let (_, b) = collector();
        let first = redirector.subscribe(a);
        let second = redirector.subscribe(b);
        assert!(existing.sinks().iter().any(|s| s.name() == "status"));
        let later = context.get_or_create("LATER", Threshold::ALL);
        assert!(later.sinks().iter().any(|s| s.name() == "status"));

        assert!(redirector.unsubscribe(first));
        assert!(existing.sinks().iter().any(|s| s.name() == "status"));
        assert!(redirector.unsubscribe(second));
        assert!(!redirector.unsubscribe(second));
        assert!(!existing.sinks().iter().any(|s| s.name() == "status"));
        assert!(!later.sinks().iter().any(|s| s.name() == "status"));
    }

    #[test]
    fn test_delivers_records_to_every_subscriber() {
        let context = LoggingContext::builder().build();
        let redirector = sync_redirector(&context);
        let (seen_a, a) = collector();
        let (seen_b, b) = collector();
        redirector.subscribe(a);
        redirector.subscribe(b);

        let app = context.get_or_create("APP", Threshold::ALL);
        app.trace_event(Severity::Information, "one");
        app.trace_event(Severity::Error, "two");

        assert_eq!(*seen_a.lock(), ["one", "two"]);
        assert_eq!(*seen_b.lock(), ["one", "two"]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let context = LoggingContext::builder().build();
        let redirector = sync_redirector(&context);
        redirector.subscribe(Arc::new(|_: &Arc<EventRecord>| panic!("subscriber bug")));
        let (seen, ok) = collector();
        redirector.subscribe(ok);

        context.get_or_create("APP", Threshold::ALL).info("still delivered");
        assert_eq!(*seen.lock(), ["still delivered"]);
    }
}
