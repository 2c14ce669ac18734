//! Benchmarks for parameter buffer encoding.

#![allow(missing_docs, clippy::unwrap_used)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use fb_protocol::dpb::{ParameterBuffer, tags};
use fb_protocol::tpb::{self, TransactionFlags};

fn connect_dpb(c: &mut Criterion) {
    c.bench_function("dpb_connect", |b| {
        b.iter(|| {
            let mut dpb = ParameterBuffer::new();
            dpb.append_bytes(tags::DUMMY_PACKET_INTERVAL, &[120, 10, 0, 0])
                .unwrap();
            dpb.append_bytes(tags::SQL_DIALECT, &[3, 0, 0, 0]).unwrap();
            dpb.append_str(tags::LC_CTYPE, black_box("UTF8")).unwrap();
            dpb.append_int(tags::CONNECT_TIMEOUT, 15);
            dpb.append_str(tags::USER_NAME, black_box("SYSDBA")).unwrap();
            dpb.append_str(tags::PASSWORD, black_box("masterkey")).unwrap();
            black_box(dpb.into_bytes())
        });
    });
}

fn read_committed_tpb(c: &mut Criterion) {
    let flags = TransactionFlags::READ_COMMITTED
        | TransactionFlags::NO_REC_VERSION
        | TransactionFlags::WAIT
        | TransactionFlags::WRITE;
    c.bench_function("tpb_read_committed", |b| {
        b.iter(|| black_box(tpb::build(black_box(flags), None)));
    });
}

criterion_group!(benches, connect_dpb, read_committed_tpb);
criterion_main!(benches);
