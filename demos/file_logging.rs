//! File logging example
//!
//! Demonstrates the rotating CSV file sink with a custom template, header,
//! footer and retention.
//!
//! Run with: cargo run --example file_logging

use sourcelog::prelude::*;
use sourcelog::sinks::rotating_file::rotated_files;

fn main() -> Result<()> {
    println!("=== sourcelog - File Logging Example ===\n");

    let dir = std::env::temp_dir().join("sourcelog-demo");
    let config = ContextConfig::default()
        .with_sink(
            SinkConfig::new("main")
                .with("Type", "file")
                .with("FileName", "%ProcessName%-%ProcessId%.csv")
                .with("MaxFileSize", "2048")
                .with("MaxFiles", "3")
                .with("Header", "Time,Severity,Source,Message")
                .with("Footer", "# closed"),
            true,
        )
        .with_sink(
            SinkConfig::new("audit")
                .with("Type", "file")
                .with("FileName", "audit.log")
                .with(
                    "Format",
                    r#""{0:%Y-%m-%dT%H:%M:%S%.3f} {1,-11} {2}", DateTime, SeverityString, UserMessage"#,
                ),
            false,
        )
        .with_source(SourceConfig {
            name: "AUDIT".into(),
            threshold: Some(Threshold::VERBOSE),
            sinks: Some(vec!["audit".into()]),
        });

    let context = LoggingContext::builder()
        .name("file_logging")
        .base_dir(&dir)
        .config(config)
        .build();

    let app = context.source("APP");
    for i in 0..200 {
        app.info(format!("Processed batch {}, 50 records", i));
    }
    context.source("AUDIT").verbose("User admin changed retention to 3 files");

    if !context.shutdown() {
        eprintln!("Some sinks did not close cleanly");
    }

    println!("Log directory: {}", dir.display());
    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.flatten() {
            println!("  {}", entry.file_name().to_string_lossy());
        }
    }
    let live = dir.join(format!(
        "{}-{}.csv",
        context.host().process_name(),
        context.host().process_id()
    ));
    println!("Rotated files kept: {}", rotated_files(&live).len());

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
