//! Logging macros with `format!` style arguments.
//!
//! The message is only formatted when the source lets the severity through.
//!
//! # Examples
//!
//! ```
//! use sourcelog::prelude::*;
//! use sourcelog::{info, warning};
//!
//! let context = LoggingContext::builder().build();
//! let app = context.get_or_create("APP", Threshold::INFORMATION);
//!
//! info!(app, "Server started");
//! let port = 8080;
//! warning!(app, "Port {} already in use, retrying", port);
//! context.shutdown();
//! ```

/// Log at an explicit severity.
///
/// ```
/// # use sourcelog::prelude::*;
/// # let context = LoggingContext::builder().build();
/// # let app = context.source("APP");
/// use sourcelog::log_event;
/// log_event!(app, Severity::Error, "Error code: {}", 500);
/// # context.shutdown();
/// ```
#[macro_export]
macro_rules! log_event {
    ($source:expr, $severity:expr, $($arg:tt)+) => {{
        let source = &$source;
        let severity = $severity;
        if source.is_enabled(severity) {
            source.trace_event(severity, format!($($arg)+));
        }
    }};
}

#[macro_export]
macro_rules! verbose {
    ($source:expr, $($arg:tt)+) => {
        $crate::log_event!($source, $crate::Severity::Verbose, $($arg)+)
    };
}

#[macro_export]
macro_rules! info {
    ($source:expr, $($arg:tt)+) => {
        $crate::log_event!($source, $crate::Severity::Information, $($arg)+)
    };
}

#[macro_export]
macro_rules! warning {
    ($source:expr, $($arg:tt)+) => {
        $crate::log_event!($source, $crate::Severity::Warning, $($arg)+)
    };
}

#[macro_export]
macro_rules! error {
    ($source:expr, $($arg:tt)+) => {
        $crate::log_event!($source, $crate::Severity::Error, $($arg)+)
    };
}

/// Log a critical message.
///
/// ```
/// # use sourcelog::prelude::*;
/// # let context = LoggingContext::builder().build();
/// # let app = context.source("APP");
/// use sourcelog::critical;
/// critical!(app, "Unable to recover from error: {}", "disk full");
/// # context.shutdown();
/// ```
#[macro_export]
macro_rules! critical {
    ($source:expr, $($arg:tt)+) => {
        $crate::log_event!($source, $crate::Severity::Critical, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use crate::core::config::{ContextConfig, SinkConfig};
    use crate::core::registry::{adapter_factory, LoggingContext};
    use crate::core::severity::{Severity, Threshold};
    use crate::core::sink::Sink;
    use crate::core::{CompiledFormat, EventRecord, HostInfo, Result};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Lines(Arc<Mutex<Vec<String>>>);

    impl Sink for Lines {
        type Payload = String;
        fn initialize(&self, _: &SinkConfig, _: &HostInfo) -> Result<()> {
            Ok(())
        }
        fn format(&self, record: &Arc<EventRecord>, _: Option<&CompiledFormat>) -> String {
            format!("{}:{}", record.severity_string(), record.user_message())
        }
        fn write_one(&self, line: String) -> Result<()> {
            self.0.lock().push(line);
            Ok(())
        }
    }

    fn context(lines: Arc<Mutex<Vec<String>>>) -> LoggingContext {
        let config = ContextConfig::default().with_sink(
            SinkConfig::new("mem").with("Type", "mem").with("Async", "false"),
            true,
        );
        LoggingContext::builder()
            .config(config)
            .register_sink("mem", adapter_factory(move |_| Ok(Lines(Arc::clone(&lines)))))
            .build()
    }

    #[test]
    fn test_macros_format_and_gate() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let context = context(Arc::clone(&lines));
        let app = context.get_or_create("APP", Threshold::WARNING);

        verbose!(app, "hidden {}", 1);
        info!(app, "hidden {}", 2);
        warning!(app, "retry {} of {}", 1, 3);
        error!(app, "code {}", 500);
        critical!(app, "down");
        log_event!(app, Severity::Information, "hidden");

        assert_eq!(
            *lines.lock(),
            ["Warning:retry 1 of 3", "Error:code 500", "Critical:down"]
        );
    }

    #[test]
    fn test_arguments_not_evaluated_when_gated() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let context = context(Arc::clone(&lines));
        let app = context.get_or_create("APP", Threshold::ERROR);
        let mut evaluated = false;
        let mut expensive = || {
            evaluated = true;
            "x"
        };
        info!(app, "{}", expensive());
        assert!(!evaluated);
    }
}
