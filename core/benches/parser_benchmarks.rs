//! Parse and validate throughput.

#![allow(clippy::unwrap_used)]
#![allow(missing_docs)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ticket_ingest_core::{is_valid, parse_ticket};

fn ticket_with_products(count: usize) -> String {
    let mut raw = format!("OrderId: BENCH\nVAT: 1.00\nTotal: {count}.00\n\nproduct");
    for i in 0..count {
        raw.push_str(&format!("\nItem {i},P{i},1.00"));
    }
    raw
}

fn bench_parse(c: &mut Criterion) {
    let small = ticket_with_products(3);
    let large = ticket_with_products(500);

    c.bench_function("parse_ticket/3_products", |b| {
        b.iter(|| parse_ticket(black_box(&small)).unwrap());
    });
    c.bench_function("parse_ticket/500_products", |b| {
        b.iter(|| parse_ticket(black_box(&large)).unwrap());
    });
}

fn bench_validate(c: &mut Criterion) {
    let large = ticket_with_products(500);

    c.bench_function("is_valid/500_products", |b| {
        b.iter(|| is_valid(black_box(&large)));
    });
}

criterion_group!(benches, bench_parse, bench_validate);
criterion_main!(benches);
