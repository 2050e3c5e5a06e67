//! Output destinations

#[cfg(feature = "console")]
pub mod console;
pub mod database;
pub mod email;
pub mod event_log;
pub mod redirector;
#[cfg(feature = "file")]
pub mod rotating_file;

#[cfg(feature = "console")]
pub use console::ConsoleSink;
pub use database::{DatabaseSink, DbCommand, DbConnection, DbConnector, DbParam};
pub use email::{EmailSink, MailMessage, MailTransport, SmtpTransport};
pub use event_log::{EventLogBackend, EventLogEntry, EventLogKind, EventLogSink};
pub use redirector::{InProcessRedirector, Subscriber, SubscriptionId};
#[cfg(feature = "file")]
pub use rotating_file::RotatingFileSink;
