#![allow(dead_code)]

use serde_json::{json, Value};
use space_relay::{
    ChangeBatch, ChangeItem, EntitySchema, FieldDescriptor, Operation, SchemaRegistry,
};
use std::sync::Arc;

pub const ORDER_TYPE: &str = "Acme.Sales.Order";

pub fn generate_rows(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| json!({ "id": i as i64, "name": format!("row_{:04}", i) }))
        .collect()
}

/// Rows inserted out of identifier order.
pub fn generate_shuffled_rows(count: usize) -> Vec<Value> {
    let mut rows = generate_rows(count);
    rows.reverse();
    rows
}

pub fn order_registry() -> Arc<SchemaRegistry> {
    let schema = EntitySchema::new(ORDER_TYPE, "Id")
        .field(FieldDescriptor::new("Id", "Int64"))
        .field(FieldDescriptor::new("Customer", "String"))
        .field(FieldDescriptor::nullable("Quantity", "Int32"));
    Arc::new(SchemaRegistry::from_schemas([schema]).expect("valid schema"))
}

pub fn order_item(operation: Operation, id: i64) -> ChangeItem {
    ChangeItem::new(operation, ORDER_TYPE)
        .with_field("Id", "Int64", id)
        .with_field("Customer", "String", format!("customer_{}", id))
        .with_field("Quantity", "Nullable<Int32>", Value::Null)
}

pub fn order_batch(count: i64) -> ChangeBatch {
    (0..count).map(|id| order_item(Operation::Write, id)).collect()
}
