//! Criterion benchmarks for sourcelog

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use sourcelog::core::async_writer::{AsyncWriter, WriteTarget, WriterOptions};
use sourcelog::core::format::csv_escape;
use sourcelog::core::registry::adapter_factory;
use sourcelog::prelude::*;
use sourcelog::{CompiledFormat, FormatCompiler, FormatFlavor, HostInfo, Sink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Discard(AtomicU64);

impl WriteTarget<String> for Discard {
    fn name(&self) -> &str {
        "discard"
    }

    fn write_one(&self, item: String) -> Result<()> {
        self.0.fetch_add(item.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

impl Sink for Discard {
    type Payload = String;

    fn initialize(&self, _config: &SinkConfig, _host: &HostInfo) -> Result<()> {
        Ok(())
    }

    fn format(&self, record: &Arc<EventRecord>, compiled: Option<&CompiledFormat>) -> String {
        compiled
            .map(|f| f.render(record))
            .unwrap_or_else(|| record.user_message())
    }

    fn write_one(&self, item: String) -> Result<()> {
        self.0.fetch_add(item.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// Template Benchmarks
// ============================================================================

fn bench_templates(c: &mut Criterion) {
    let mut group = c.benchmark_group("templates");
    group.throughput(Throughput::Elements(1));

    let template = r#""{0:%H:%M:%S%.3f} [{1,-11}] {2}: {3}", LocalDateTime, SeverityString, SourceName, UserMessage"#;
    group.bench_function("compile", |b| {
        b.iter(|| FormatCompiler::compile(black_box(Some(template)), FormatFlavor::Plain));
    });

    let compiled = FormatCompiler::compile(Some(template), FormatFlavor::Csv).expect("template");
    let record = EventRecord::new(
        Severity::Warning,
        "APP",
        3,
        Some("disk usage at 91%, \"cleanup\" scheduled".to_string()),
    );
    group.bench_function("render_csv", |b| {
        b.iter(|| black_box(compiled.render(black_box(&record))));
    });

    group.bench_function("csv_escape", |b| {
        b.iter(|| csv_escape(black_box("a message, with \"quotes\"\nand lines")));
    });

    group.finish();
}

// ============================================================================
// Writer Benchmarks
// ============================================================================

fn bench_writer(c: &mut Criterion) {
    let mut group = c.benchmark_group("writer");
    group.throughput(Throughput::Elements(1));

    let sync = AsyncWriter::new(
        Arc::new(Discard(AtomicU64::new(0))),
        WriterOptions {
            asynchronous: false,
            ..WriterOptions::default()
        },
    );
    group.bench_function("enqueue_sync", |b| {
        b.iter(|| sync.enqueue(black_box("payload".to_string())));
    });

    let queued = AsyncWriter::new(Arc::new(Discard(AtomicU64::new(0))), WriterOptions::default());
    group.bench_function("enqueue_async", |b| {
        b.iter(|| queued.enqueue(black_box("payload".to_string())));
    });

    group.finish();
    sync.close();
    queued.close();
}

// ============================================================================
// Source Benchmarks
// ============================================================================

fn bench_sources(c: &mut Criterion) {
    let mut group = c.benchmark_group("sources");
    group.throughput(Throughput::Elements(1));

    let config = ContextConfig::default()
        .with_sink(SinkConfig::new("discard").with("Type", "discard"), true);
    let context = LoggingContext::builder()
        .config(config)
        .register_sink(
            "discard",
            adapter_factory(|_| Ok(Discard(AtomicU64::new(0)))),
        )
        .build();
    let app = context.get_or_create("APP", Threshold::WARNING);

    group.bench_function("gated_out", |b| {
        b.iter(|| app.info(black_box("filtered")));
    });

    let mut n = 0u64;
    group.bench_function("written", |b| {
        b.iter(|| {
            n += 1;
            app.warning(format!("event {}", n));
        });
    });

    group.bench_function("lookup", |b| {
        b.iter(|| context.find(black_box("app")));
    });

    group.finish();
    context.shutdown();
}

criterion_group!(benches, bench_templates, bench_writer, bench_sources);
criterion_main!(benches);
