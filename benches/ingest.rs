use std::fmt::Write as _;
use std::time::Duration;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use csv_replicator::cleaner::ValueCleaner;
use csv_replicator::columns::HeaderMapping;
use csv_replicator::config::ReplicationConfig;
use csv_replicator::destination::memory::MemoryDestination;
use csv_replicator::loader::ImportStrategy;
use csv_replicator::orchestrator::Replicator;
use csv_replicator::parser;
use csv_replicator::retry::BackoffPolicy;

fn generate_invoices(rows: usize) -> String {
    let mut text = String::from("Invoice ID,Invoice Date,Total,Customer Name,Last Modified Time\n");
    for i in 0..rows {
        let day = (i % 28) + 1;
        let hour = i % 24;
        writeln!(
            text,
            "{i},{day:02} Aug 2024,\"SAR {},{:03}.50\",\"Customer {i}, Ltd\",2024-08-{day:02} {hour:02}:15:00",
            i % 97 + 1,
            i % 1000
        )
        .expect("write row");
    }
    text
}

fn bench_parse_and_clean(c: &mut Criterion) {
    let text = generate_invoices(20_000);
    let mut group = c.benchmark_group("ingest");

    group.bench_function("parse", |b| {
        b.iter(|| parser::parse_csv(&text));
    });

    let parsed = parser::parse_csv(&text);
    let columns = HeaderMapping::from_headers(&parsed.headers).names();
    let cleaner = ValueCleaner::default();
    group.bench_function("clean", |b| {
        b.iter(|| {
            let values: Vec<&[Option<String>]> =
                parsed.records.iter().map(|r| r.values()).collect();
            cleaner.clean_rows(&columns, &values)
        });
    });

    for strategy in [ImportStrategy::Batched, ImportStrategy::Streaming] {
        let config = ReplicationConfig {
            import_strategy: strategy,
            inter_batch_delay: Duration::ZERO,
            table_retry: BackoffPolicy::once(),
            schema_visibility: BackoffPolicy::once(),
            ..ReplicationConfig::default()
        };
        group.bench_function(format!("replicate_{strategy:?}").to_lowercase(), |b| {
            b.iter_batched(
                || Replicator::new(MemoryDestination::new(), config.clone()).expect("replicator"),
                |mut replicator| replicator.replicate_table("Invoices", &text),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse_and_clean);
criterion_main!(benches);
