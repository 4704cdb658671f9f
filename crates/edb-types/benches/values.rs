//! Benchmarks for value decoding and argument encoding.

#![allow(clippy::unwrap_used, missing_docs)]

use bytes::BytesMut;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use edb_protocol::{
    Cardinality, DescriptorBlockBuilder, ShapeElement, ShapeElementFlags, TypeId, scalars,
};
use edb_types::{CodecCache, Object, QueryArgs, Value};
use std::hint::black_box;

const USER: TypeId = TypeId::from_u128(0x2000);
const TAGS: TypeId = TypeId::from_u128(0x2001);

fn element(name: &str, type_id: TypeId, cardinality: Cardinality) -> ShapeElement {
    ShapeElement {
        flags: ShapeElementFlags::empty(),
        cardinality,
        name: name.into(),
        type_id,
    }
}

fn user_cache() -> CodecCache {
    let block = DescriptorBlockBuilder::new()
        .base_scalar(scalars::UUID)
        .base_scalar(scalars::STR)
        .base_scalar(scalars::INT64)
        .array(TAGS, scalars::STR)
        .object_shape(
            USER,
            vec![
                element("id", scalars::UUID, Cardinality::One),
                element("name", scalars::STR, Cardinality::One),
                element("age", scalars::INT64, Cardinality::AtMostOne),
                element("tags", TAGS, Cardinality::One),
            ],
        )
        .build()
        .unwrap();
    let mut cache = CodecCache::new();
    cache.ingest(&block).unwrap();
    cache
}

fn bench_object_decode(c: &mut Criterion) {
    let mut cache = user_cache();
    let codec = cache.codec_for(USER).unwrap();
    let edb_types::Codec::Object { shape, .. } = &*codec else {
        unreachable!()
    };
    let value = Value::Object(Object::new(
        shape.clone(),
        vec![
            Value::Uuid(uuid::Uuid::from_u128(7)),
            Value::from("Alice Example"),
            Value::Int64(42),
            Value::from(vec!["admin", "staff", "oncall"]),
        ],
    ));
    let mut buf = BytesMut::new();
    codec.encode(&mut buf, &value).unwrap();
    let payload = buf.freeze();

    let mut group = c.benchmark_group("object_decode");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("user", |b| {
        b.iter(|| black_box(codec.decode(black_box(&payload)).unwrap()))
    });
    group.finish();
}

fn bench_codec_build(c: &mut Criterion) {
    c.bench_function("codec_build_user", |b| {
        b.iter(|| {
            let mut cache = user_cache();
            black_box(cache.codec_for(USER).unwrap())
        })
    });
}

fn bench_argument_encode(c: &mut Criterion) {
    let block = DescriptorBlockBuilder::new()
        .base_scalar(scalars::STR)
        .base_scalar(scalars::INT64)
        .input_shape(
            USER,
            vec![
                element("0", scalars::STR, Cardinality::One),
                element("1", scalars::INT64, Cardinality::One),
            ],
        )
        .build()
        .unwrap();
    let mut cache = CodecCache::new();
    cache.ingest(&block).unwrap();
    let codec = cache.codec_for(USER).unwrap();
    let args = QueryArgs::from(("Alice", 42i64));

    c.bench_function("argument_encode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(64);
            codec.encode_arguments(&mut buf, black_box(&args)).unwrap();
            black_box(buf)
        })
    });
}

criterion_group!(
    benches,
    bench_object_decode,
    bench_codec_build,
    bench_argument_encode
);
criterion_main!(benches);
