//! Codec benchmarks: varint and typed-value pack/unpack throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use adlb_core::value::{ContainerVal, DataType, Value};
use adlb_core::vint;

fn bench_vint(c: &mut Criterion) {
    c.bench_function("vint_encode_decode_mixed", |b| {
        let inputs: Vec<u64> = (0..64).map(|i| 1u64 << i).collect();
        b.iter(|| {
            let mut buf = Vec::with_capacity(inputs.len() * vint::MAX_WIDTH);
            for &v in &inputs {
                vint::encode_u64(black_box(v), &mut buf);
            }
            let mut pos = 0;
            let mut sum = 0u64;
            while pos < buf.len() {
                let (v, n) = vint::decode_u64(&buf[pos..]).unwrap();
                sum = sum.wrapping_add(v);
                pos += n;
            }
            black_box(sum)
        })
    });
}

fn bench_container_pack(c: &mut Criterion) {
    let mut cont = ContainerVal::new(DataType::String, DataType::Integer);
    for i in 0..1024i64 {
        cont.entries
            .insert(format!("key{:05}", i).into_bytes(), Some(Value::Integer(i).pack()));
    }
    let v = Value::Container(cont);

    c.bench_function("container_pack_1k", |b| b.iter(|| black_box(v.pack())));

    let packed = v.pack();
    c.bench_function("container_unpack_1k", |b| {
        b.iter(|| black_box(Value::unpack(DataType::Container, &packed).unwrap()))
    });
}

criterion_group!(benches, bench_vint, bench_container_pack);
criterion_main!(benches);
