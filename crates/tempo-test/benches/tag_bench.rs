//! Benchmarks for tag arithmetic

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tempo_core::{Tag, MSEC};

fn bench_delay(c: &mut Criterion) {
    let tag = Tag::new(123 * MSEC, 4);

    c.bench_function("tag_delay", |b| b.iter(|| black_box(tag).delay(black_box(5 * MSEC))));
    c.bench_function("tag_delay_zero", |b| b.iter(|| black_box(tag).delay(black_box(0))));
    c.bench_function("tag_delay_strict", |b| {
        b.iter(|| black_box(tag).delay_strict(black_box(5 * MSEC)))
    });
}

fn bench_add_and_compare(c: &mut Criterion) {
    let a = Tag::new(10 * MSEC, 1);
    let b_tag = Tag::new(10 * MSEC, 2);

    c.bench_function("tag_add", |b| b.iter(|| black_box(a).add(black_box(b_tag))));
    c.bench_function("tag_compare", |b| b.iter(|| Tag::compare(black_box(a), black_box(b_tag))));
}

criterion_group!(benches, bench_delay, bench_add_and_compare);
criterion_main!(benches);
