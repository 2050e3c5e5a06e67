//! # sourcelog
//!
//! Source-routed, multi-sink event logging.
//!
//! Callers write through named [`Source`]s, each with its own severity
//! [`Threshold`] and list of sinks. Every sink instance formats events with an
//! optional compiled template and hands the payload to its own
//! [`AsyncWriter`], which drains on a dedicated thread in FIFO order.
//!
//! ## Sinks
//!
//! - **file**: rotating CSV file with retention, header/footer and
//!   cross-process locking
//! - **eventlog**: system event log (syslog on Unix)
//! - **email**: one mail per event over SMTP
//! - **database**: parametrized command through a host-supplied driver
//! - **console**: stdout/stderr, also the fallback sink
//! - in-process redirection to subscribers
//!
//! ## Example
//!
//! ```
//! use sourcelog::prelude::*;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = ContextConfig::default().with_sink(
//!     SinkConfig::new("main")
//!         .with("Type", "file")
//!         .with("FileName", dir.path().join("app.log").display().to_string()),
//!     true,
//! );
//! let context = LoggingContext::builder().name("demo").config(config).build();
//!
//! let app = context.get_or_create("APP", Threshold::WARNING);
//! app.info("not written");
//! app.error("disk=full");
//! context.shutdown();
//!
//! let text = std::fs::read_to_string(dir.path().join("app.log")).unwrap();
//! assert!(text.trim_end().ends_with(",\"disk=full\""));
//! ```

pub mod core;
pub mod macros;
pub mod sinks;

pub mod prelude {
    pub use crate::core::{
        ActivityId, ActivityKind, ActivityScope, ContextConfig, ErrorInfo, EventRecord, EventSink,
        LogError, LoggingContext, OperationScope, OverflowPolicy, Result, Severity, SinkConfig,
        Source, SourceConfig, Threshold, UserData,
    };
}

pub use core::{
    adapter_factory, set_internal_error_hook, ActivityId, ActivityKind, ActivityScope, AsyncWriter,
    CompiledFormat, ContextBuilder, ContextConfig, ErrorInfo, EventArgs, EventRecord, EventSink,
    FieldValue, FormatCompiler, FormatFlavor, HostInfo, InternalError, InternalErrorHook, LogError,
    LoggingContext, OperationScope, OverflowCallback, OverflowPolicy, Result, Severity, Sink,
    SinkAdapter, SinkConfig, SinkFactory, SinkHost, SinkState, Source, SourceConfig, Threshold,
    UserData, WriterMetrics, WriterOptions, WriterState,
};
