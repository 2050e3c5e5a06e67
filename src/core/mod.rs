//! Core pipeline types: records, templates, sources and the generic sink driver

pub mod activity;
pub mod async_writer;
pub mod config;
pub mod error;
pub mod event_record;
pub mod format;
pub mod host;
pub mod internal;
pub mod metrics;
pub mod overflow_policy;
pub mod registry;
pub mod severity;
pub mod sink;
pub mod user_data;

pub use activity::{ActivityId, ActivityScope, OperationScope};
pub use async_writer::{AsyncWriter, WriteTarget, WriterOptions, WriterState, DEFAULT_CLOSE_TIMEOUT};
pub use config::{ContextConfig, SinkConfig, SourceConfig};
pub use error::{LogError, Result};
pub use event_record::{ErrorInfo, EventRecord};
pub use format::{CompiledFormat, FormatCompiler, FormatFlavor};
pub use host::HostInfo;
pub use internal::{set_internal_error_hook, InternalError, InternalErrorHook, InternalLevel};
pub use metrics::WriterMetrics;
pub use overflow_policy::{OverflowCallback, OverflowPolicy};
pub use registry::{adapter_factory, ContextBuilder, LoggingContext, SinkFactory, Source};
pub use severity::{ActivityKind, Severity, Threshold};
pub use sink::{EventArgs, EventSink, Sink, SinkAdapter, SinkHost, SinkState};
pub use user_data::{FieldValue, UserData};
