//! Throughput of the relay codec.
//!
//! ```sh
//! cargo bench --bench codec_bench
//! ```

use bytes::BytesMut;
use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use scanrelay_core::{DeviceId, MrzRecord, RelayRecord, TerminalId};
use scanrelay_protocol::{
    ClientCodec, ClientFrame, Event, Request, ServerCodec, ServerFrame,
};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn record_event() -> ServerFrame {
    let record = RelayRecord::new(
        DeviceId::generate(),
        TerminalId::new("desk-1").unwrap(),
        MrzRecord {
            document_type: "P".to_string(),
            last_name: "ERIKSSON".to_string(),
            first_name: "ANNA MARIA".to_string(),
            document_number: "L898902C36".to_string(),
            nationality: "UTO".to_string(),
            sex: "F".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1974, 8, 12),
            expiration_date: NaiveDate::from_ymd_opt(2012, 4, 15),
            issuing_country: "UTO".to_string(),
            raw_mrz_data: concat!(
                "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\r\n",
                "L898902C36UTO7408122F1204159ZE184226B<<<<<10"
            )
            .to_string(),
            ..MrzRecord::default()
        },
    );
    ServerFrame::event(Event::RecordReceived { record })
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("heartbeat", |b| {
        b.iter(|| {
            let mut codec = ClientCodec::new();
            let mut buffer = BytesMut::new();
            codec
                .encode(black_box(ClientFrame::new(1, Request::Heartbeat)), &mut buffer)
                .unwrap();
            black_box(buffer);
        });
    });

    let event = record_event();
    group.bench_function("record_event", |b| {
        b.iter(|| {
            let mut codec = ServerCodec::new();
            let mut buffer = BytesMut::new();
            codec.encode(black_box(event.clone()), &mut buffer).unwrap();
            black_box(buffer);
        });
    });

    group.finish();
}

fn bench_decode_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_batch");

    for count in [1usize, 10, 100] {
        let mut wire = BytesMut::new();
        let mut encoder = ServerCodec::new();
        for _ in 0..count {
            encoder.encode(record_event(), &mut wire).unwrap();
        }

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &wire, |b, wire| {
            b.iter(|| {
                let mut codec = ClientCodec::new();
                let mut buffer = wire.clone();
                let mut decoded = 0;
                while let Ok(Some(frame)) = codec.decode(&mut buffer) {
                    black_box(frame);
                    decoded += 1;
                }
                assert_eq!(decoded, count);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode_batches);
criterion_main!(benches);
