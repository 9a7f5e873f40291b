//! Performance benchmarks for the MRZ parser.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench parser_bench
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use scanrelay_mrz::{MrzParser, RowSeparator, TemplateStore};
use std::hint::black_box;
use std::sync::Arc;

const PASSPORT: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\r\n\
                        L898902C36UTO7408122F1204159ZE184226B<<<<<10";

const ID_CARD: &str = "I<UTOD231458907<<<<<<<<<<<<<<<\r\n\
                       7408122F1204159UTO<<<<<<<<<<<6\r\n\
                       ERIKSSON<<ANNA<MARIA<<<<<<<<<<";

fn parser() -> MrzParser {
    MrzParser::new(Arc::new(TemplateStore::builtin().unwrap()))
}

/// Benchmark parsing each bundled document shape.
fn bench_parse_documents(c: &mut Criterion) {
    let parser = parser();
    let mut group = c.benchmark_group("parse_document");

    for (name, raw) in [("td3_passport", PASSPORT), ("td1_id_card", ID_CARD)] {
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), raw, |b, raw| {
            b.iter(|| parser.parse(black_box(raw), RowSeparator::CrLf));
        });
    }

    group.finish();
}

/// Benchmark rejecting input that fits no template.
fn bench_parse_no_match(c: &mut Criterion) {
    let parser = parser();
    let raw = "NOT AN MRZ\r\nAT ALL";

    c.bench_function("parse_no_match", |b| {
        b.iter(|| parser.parse(black_box(raw), RowSeparator::CrLf));
    });
}

/// Benchmark loading the bundled template set.
fn bench_load_templates(c: &mut Criterion) {
    c.bench_function("load_builtin_templates", |b| {
        b.iter(|| TemplateStore::builtin().unwrap());
    });
}

criterion_group!(
    benches,
    bench_parse_documents,
    bench_parse_no_match,
    bench_load_templates
);
criterion_main!(benches);
