//! Basic usage example
//!
//! Demonstrates sources, thresholds and the console sink.
//!
//! Run with: cargo run --example basic_usage

use sourcelog::prelude::*;
use sourcelog::{info, warning};

#[derive(Debug)]
struct ConfigMissing;

impl std::fmt::Display for ConfigMissing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "settings.json not found")
    }
}

impl std::error::Error for ConfigMissing {}

fn main() -> Result<()> {
    println!("=== sourcelog - Basic Usage Example ===\n");

    let config = ContextConfig::default().with_sink(
        SinkConfig::new("console")
            .with("Type", "console")
            .with("Async", "false"),
        true,
    );
    let context = LoggingContext::builder()
        .name("basic_usage")
        .app_version(env!("CARGO_PKG_VERSION"))
        .config(config)
        .build();

    println!("1. Logging at different severities:");
    let app = context.get_or_create("APP", Threshold::VERBOSE);
    app.verbose("This is a verbose message");
    app.info("This is an information message");
    app.warning("This is a warning message");
    app.error("This is an error message");
    app.critical("This is a critical message");

    println!("\n2. Raising the threshold at runtime:");
    let previous = context.set_severity("app", Threshold::WARNING);
    println!("   Threshold changed from {} to {}", previous, app.threshold());
    info!(app, "Information message (hidden)");
    warning!(app, "Retry {} of {} (visible)", 1, 3);

    println!("\n3. Errors, user data and activities:");
    app.trace_error(Severity::Error, &ConfigMissing, Some("Falling back to defaults"));
    let data = UserData::new().with_field("order_id", 4711).with_field("amount", 19.99);
    app.trace_data(Severity::Warning, "Payment slow", &data);

    let jobs = context.get_or_create("JOBS", Threshold::INFORMATION | Threshold::ACTIVITY_TRACING);
    {
        let _activity = ActivityScope::new();
        let _operation = OperationScope::new("nightly-import");
        jobs.trace_activity(ActivityKind::Start, "Import started");
        jobs.info("Imported 120 rows");
        jobs.trace_activity(ActivityKind::Stop, "Import finished");
    }

    context.shutdown();
    println!("\n=== Example completed successfully! ===");
    Ok(())
}
