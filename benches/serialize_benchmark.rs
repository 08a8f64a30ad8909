use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::Value;
use space_relay::{
    ChangeBatch, ChangeBatchSerializer, ChangeItem, EntitySchema, FieldDescriptor, Operation,
    SchemaRegistry,
};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn registry() -> Arc<SchemaRegistry> {
    let schema = EntitySchema::new("Acme.Sales.Order", "Id")
        .field(FieldDescriptor::new("Id", "Int64"))
        .field(FieldDescriptor::new("Customer", "String"))
        .field(FieldDescriptor::new("Total", "Decimal"))
        .field(FieldDescriptor::nullable("Quantity", "Int32"));
    Arc::new(SchemaRegistry::from_schemas([schema]).unwrap())
}

fn batch(size: usize) -> ChangeBatch {
    (0..size)
        .map(|i| {
            ChangeItem::new(Operation::Update, "Acme.Sales.Order")
                .with_field("Id", "Int64", i as i64)
                .with_field("Customer", "String", format!("customer_{}", i))
                .with_field("Total", "Decimal", i as f64 * 1.5)
                .with_field("Quantity", "Nullable<Int32>", Value::Null)
        })
        .collect()
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize_batch");
    group.measurement_time(Duration::from_secs(5));
    let serializer = ChangeBatchSerializer::new(registry());

    for size in [10, 100, 1000].iter() {
        let batch = batch(*size);
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("serialize", size), &batch, |b, batch| {
            b.iter(|| serializer.serialize(black_box(batch)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_serialize);
criterion_main!(benches);
